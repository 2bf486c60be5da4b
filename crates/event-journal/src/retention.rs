// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of PlexSpaces.
//
// PlexSpaces is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// PlexSpaces is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with PlexSpaces. If not, see <https://www.gnu.org/licenses/>.

//! Retention settings: compaction, tombstone grace, TTL and delete mode.
//!
//! ## Purpose
//! Each journal table carries its own retention settings. They are rendered
//! into the `WITH` clause of `CREATE TABLE` and, for the event TTL, into the
//! `USING TTL` clause of every write to that table.
//!
//! ## Tombstones
//! Deletes in a wide-column store write tombstones that stay until
//! `gc_grace_seconds` pass and compaction runs. [`DeleteMode::Range`] writes
//! one range tombstone per partition; [`DeleteMode::SingleRow`] writes one
//! tombstone per event for stores that cannot do range deletes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default tombstone grace period (10 days).
pub const DEFAULT_GC_GRACE_SECONDS: u64 = 864_000;

/// Compaction strategy of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum CompactionStrategy {
    /// `SizeTieredCompactionStrategy`
    SizeTiered {
        /// Minimum similar-sized sstables to trigger compaction
        min_threshold: Option<u32>,
        /// Maximum sstables compacted at once
        max_threshold: Option<u32>,
    },
    /// `LeveledCompactionStrategy`
    Leveled {
        /// Target sstable size
        sstable_size_in_mb: Option<u32>,
    },
    /// `TimeWindowCompactionStrategy`, for TTL'd time series
    TimeWindow {
        /// `MINUTES`, `HOURS` or `DAYS`
        compaction_window_unit: String,
        /// Window size in units
        compaction_window_size: u32,
    },
    /// Verbatim CQL map, e.g. `{'class': 'com.example.MyStrategy'}`
    Custom {
        /// Rendered map
        cql: String,
    },
}

impl Default for CompactionStrategy {
    fn default() -> Self {
        CompactionStrategy::SizeTiered {
            min_threshold: None,
            max_threshold: None,
        }
    }
}

impl CompactionStrategy {
    /// Parse a strategy name as used in environment configuration.
    ///
    /// Unknown names are taken as a strategy class.
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "size-tiered" | "sizetiered" | "sizetieredcompactionstrategy" => Self::default(),
            "leveled" | "leveledcompactionstrategy" => CompactionStrategy::Leveled {
                sstable_size_in_mb: None,
            },
            "time-window" | "timewindow" | "timewindowcompactionstrategy" => {
                CompactionStrategy::TimeWindow {
                    compaction_window_unit: "DAYS".to_string(),
                    compaction_window_size: 1,
                }
            }
            _ => CompactionStrategy::Custom {
                cql: format!("{{'class': '{}'}}", name),
            },
        }
    }

    /// Render as a CQL map.
    pub fn to_cql(&self) -> String {
        fn map(class: &str, options: Vec<(&str, String)>) -> String {
            let mut entries = vec![format!("'class': '{}'", class)];
            entries.extend(
                options
                    .into_iter()
                    .map(|(key, value)| format!("'{}': '{}'", key, value)),
            );
            format!("{{{}}}", entries.join(", "))
        }

        match self {
            CompactionStrategy::SizeTiered {
                min_threshold,
                max_threshold,
            } => {
                let mut options = Vec::new();
                if let Some(min) = min_threshold {
                    options.push(("min_threshold", min.to_string()));
                }
                if let Some(max) = max_threshold {
                    options.push(("max_threshold", max.to_string()));
                }
                map("SizeTieredCompactionStrategy", options)
            }
            CompactionStrategy::Leveled { sstable_size_in_mb } => map(
                "LeveledCompactionStrategy",
                sstable_size_in_mb
                    .map(|size| vec![("sstable_size_in_mb", size.to_string())])
                    .unwrap_or_default(),
            ),
            CompactionStrategy::TimeWindow {
                compaction_window_unit,
                compaction_window_size,
            } => map(
                "TimeWindowCompactionStrategy",
                vec![
                    ("compaction_window_unit", compaction_window_unit.clone()),
                    ("compaction_window_size", compaction_window_size.to_string()),
                ],
            ),
            CompactionStrategy::Custom { cql } => cql.clone(),
        }
    }
}

/// Retention settings of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableSettings {
    /// Compaction strategy
    pub compaction: CompactionStrategy,

    /// Tombstone grace period in seconds
    pub gc_grace_seconds: u64,

    /// Table-level `default_time_to_live`
    pub default_time_to_live: Option<Duration>,

    /// `USING TTL` applied to every event written by the journal
    pub event_ttl: Option<Duration>,
}

impl Default for TableSettings {
    fn default() -> Self {
        Self {
            compaction: CompactionStrategy::default(),
            gc_grace_seconds: DEFAULT_GC_GRACE_SECONDS,
            default_time_to_live: None,
            event_ttl: None,
        }
    }
}

impl TableSettings {
    /// `WITH` options for `CREATE TABLE`.
    pub fn table_options(&self) -> Vec<String> {
        let mut options = vec![
            format!("gc_grace_seconds = {}", self.gc_grace_seconds),
            format!("compaction = {}", self.compaction.to_cql()),
        ];
        if let Some(ttl) = self.default_time_to_live {
            options.push(format!("default_time_to_live = {}", ttl.as_secs()));
        }
        options
    }
}

/// How physical deletes are issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// One `sequence_nr <= N` range delete per partition
    #[default]
    Range,
    /// One delete per sequence number (stores without range tombstones)
    SingleRow,
}

impl DeleteMode {
    /// Parse a delete mode name as used in environment configuration.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "range" => Some(DeleteMode::Range),
            "single-row" | "single_row" | "legacy" => Some(DeleteMode::SingleRow),
            _ => None,
        }
    }
}
