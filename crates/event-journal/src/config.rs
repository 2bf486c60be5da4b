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

//! Configuration for the event journal.
//!
//! ## Purpose
//! Keyspace and table names, schema auto-creation, partitioning, the tag
//! index and per-table retention.
//!
//! ## Environment Variables
//! - `PLEXSPACES_JOURNAL_KEYSPACE`: keyspace (default: "plexspaces_journal")
//! - `PLEXSPACES_JOURNAL_KEYSPACE_AUTOCREATE`: create the keyspace (default: true)
//! - `PLEXSPACES_JOURNAL_TABLES_AUTOCREATE`: create the tables (default: true)
//! - `PLEXSPACES_JOURNAL_REPLICATION_FACTOR`: SimpleStrategy factor (default: 1)
//! - `PLEXSPACES_JOURNAL_PARTITION_SIZE`: events per partition (default: 500000)
//! - `PLEXSPACES_JOURNAL_DELETE_MODE`: "range" | "single-row" (default: "range")
//! - `PLEXSPACES_JOURNAL_GC_GRACE_SECONDS`: messages tombstone grace (default: 864000)
//! - `PLEXSPACES_JOURNAL_COMPACTION`: messages compaction strategy (default: "size-tiered")
//! - `PLEXSPACES_JOURNAL_EVENT_TTL_SECONDS`: TTL on event writes (default: none)
//! - `PLEXSPACES_JOURNAL_EVENTS_BY_TAG_ENABLED`: maintain the tag index (default: true)
//! - `PLEXSPACES_JOURNAL_TAG_BUCKET_SIZE`: "day" | "hour" | "minute" | "second" (default: "hour")
//! - `PLEXSPACES_JOURNAL_TAG_TTL_SECONDS`: TTL on tag row writes (default: none)
//!
//! ## Usage Example
//!
//! ```rust
//! use plexspaces_event_journal::config::*;
//!
//! let config = JournalConfig::builder()
//!     .keyspace("orders")
//!     .target_partition_size(100_000)
//!     .bucket_size(BucketSize::Day)
//!     .build();
//! assert!(config.validate().is_ok());
//! ```

use crate::{JournalError, JournalResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub use crate::retention::{CompactionStrategy, DeleteMode, TableSettings};
pub use crate::time_bucket::BucketSize;

/// Default keyspace.
pub const DEFAULT_KEYSPACE: &str = "plexspaces_journal";

/// Default events per partition.
pub const DEFAULT_PARTITION_SIZE: u64 = 500_000;

/// Keyspace replication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum ReplicationStrategy {
    /// `SimpleStrategy`
    Simple {
        /// Copies of each row
        replication_factor: u32,
    },
    /// `NetworkTopologyStrategy`
    NetworkTopology {
        /// Replication factor per data center
        data_centers: BTreeMap<String, u32>,
    },
}

impl Default for ReplicationStrategy {
    fn default() -> Self {
        ReplicationStrategy::Simple {
            replication_factor: 1,
        }
    }
}

impl ReplicationStrategy {
    /// Render as a CQL replication map.
    pub fn to_cql(&self) -> String {
        match self {
            ReplicationStrategy::Simple { replication_factor } => format!(
                "{{'class': 'SimpleStrategy', 'replication_factor': {}}}",
                replication_factor
            ),
            ReplicationStrategy::NetworkTopology { data_centers } => {
                let mut entries = vec!["'class': 'NetworkTopologyStrategy'".to_string()];
                entries.extend(
                    data_centers
                        .iter()
                        .map(|(dc, factor)| format!("'{}': {}", dc, factor)),
                );
                format!("{{{}}}", entries.join(", "))
            }
        }
    }
}

/// Tag index configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsByTagConfig {
    /// Maintain the tag index and its bookkeeping tables
    pub enabled: bool,

    /// Tag index table
    pub table: String,

    /// Per-(stream, tag) progress table
    pub progress_table: String,

    /// Per-stream scan point table
    pub scanning_table: String,

    /// Width of the tag index time buckets
    pub bucket_size: BucketSize,

    /// Tag index retention
    pub settings: TableSettings,
}

impl Default for EventsByTagConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            table: "tag_views".to_string(),
            progress_table: "tag_write_progress".to_string(),
            scanning_table: "tag_scanning".to_string(),
            bucket_size: BucketSize::Hour,
            settings: TableSettings::default(),
        }
    }
}

/// Event journal configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Keyspace holding every journal table
    pub keyspace: String,

    /// Create the keyspace on bootstrap
    pub keyspace_autocreate: bool,

    /// Create the tables on bootstrap
    pub tables_autocreate: bool,

    /// Keyspace replication (only used when creating the keyspace)
    pub replication: ReplicationStrategy,

    /// Events table
    pub table: String,

    /// Per-stream metadata table
    pub metadata_table: String,

    /// Events per partition; fixed for the life of the data
    pub target_partition_size: u64,

    /// Physical delete mode
    pub delete_mode: DeleteMode,

    /// Events table retention
    pub settings: TableSettings,

    /// Tag index
    pub events_by_tag: EventsByTagConfig,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            keyspace: DEFAULT_KEYSPACE.to_string(),
            keyspace_autocreate: true,
            tables_autocreate: true,
            replication: ReplicationStrategy::default(),
            table: "messages".to_string(),
            metadata_table: "metadata".to_string(),
            target_partition_size: DEFAULT_PARTITION_SIZE,
            delete_mode: DeleteMode::Range,
            settings: TableSettings::default(),
            events_by_tag: EventsByTagConfig::default(),
        }
    }
}

impl JournalConfig {
    /// Create a new builder
    pub fn builder() -> JournalConfigBuilder {
        JournalConfigBuilder {
            config: JournalConfig::default(),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Unset variables keep their defaults; malformed values are errors.
    pub fn from_env() -> JournalResult<Self> {
        let mut config = JournalConfig::default();

        if let Some(keyspace) = env_var("PLEXSPACES_JOURNAL_KEYSPACE") {
            config.keyspace = keyspace;
        }
        if let Some(value) = env_parse::<bool>("PLEXSPACES_JOURNAL_KEYSPACE_AUTOCREATE")? {
            config.keyspace_autocreate = value;
        }
        if let Some(value) = env_parse::<bool>("PLEXSPACES_JOURNAL_TABLES_AUTOCREATE")? {
            config.tables_autocreate = value;
        }
        if let Some(factor) = env_parse::<u32>("PLEXSPACES_JOURNAL_REPLICATION_FACTOR")? {
            config.replication = ReplicationStrategy::Simple {
                replication_factor: factor,
            };
        }
        if let Some(size) = env_parse::<u64>("PLEXSPACES_JOURNAL_PARTITION_SIZE")? {
            config.target_partition_size = size;
        }
        if let Some(mode) = env_var("PLEXSPACES_JOURNAL_DELETE_MODE") {
            config.delete_mode = DeleteMode::from_name(&mode).ok_or_else(|| {
                JournalError::Configuration(format!(
                    "Unknown delete mode: {}. Valid options: range, single-row",
                    mode
                ))
            })?;
        }
        if let Some(seconds) = env_parse::<u64>("PLEXSPACES_JOURNAL_GC_GRACE_SECONDS")? {
            config.settings.gc_grace_seconds = seconds;
        }
        if let Some(name) = env_var("PLEXSPACES_JOURNAL_COMPACTION") {
            config.settings.compaction = CompactionStrategy::from_name(&name);
        }
        if let Some(seconds) = env_parse::<u64>("PLEXSPACES_JOURNAL_EVENT_TTL_SECONDS")? {
            config.settings.event_ttl = Some(Duration::from_secs(seconds));
        }
        if let Some(enabled) = env_parse::<bool>("PLEXSPACES_JOURNAL_EVENTS_BY_TAG_ENABLED")? {
            config.events_by_tag.enabled = enabled;
        }
        if let Some(name) = env_var("PLEXSPACES_JOURNAL_TAG_BUCKET_SIZE") {
            config.events_by_tag.bucket_size = BucketSize::from_name(&name).ok_or_else(|| {
                JournalError::Configuration(format!(
                    "Unknown bucket size: {}. Valid options: day, hour, minute, second",
                    name
                ))
            })?;
        }
        if let Some(seconds) = env_parse::<u64>("PLEXSPACES_JOURNAL_TAG_TTL_SECONDS")? {
            config.events_by_tag.settings.event_ttl = Some(Duration::from_secs(seconds));
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration before any statement is built from it.
    pub fn validate(&self) -> JournalResult<()> {
        if self.target_partition_size == 0 {
            return Err(JournalError::Configuration(
                "target_partition_size must be greater than 0".to_string(),
            ));
        }
        let names = [
            ("keyspace", &self.keyspace),
            ("table", &self.table),
            ("metadata_table", &self.metadata_table),
            ("events_by_tag.table", &self.events_by_tag.table),
            ("events_by_tag.progress_table", &self.events_by_tag.progress_table),
            ("events_by_tag.scanning_table", &self.events_by_tag.scanning_table),
        ];
        for (field, name) in names {
            if !is_identifier(name) {
                return Err(JournalError::Configuration(format!(
                    "{} is not a valid identifier: {:?}",
                    field, name
                )));
            }
        }
        if let ReplicationStrategy::Simple {
            replication_factor: 0,
        } = self.replication
        {
            return Err(JournalError::Configuration(
                "replication_factor must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            name.len() <= 48 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> JournalResult<Option<T>> {
    match env_var(name) {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            JournalError::Configuration(format!("{} has an invalid value: {}", name, raw))
        }),
        None => Ok(None),
    }
}

/// Builder for [`JournalConfig`]
///
/// ## Example
/// ```rust
/// use plexspaces_event_journal::config::*;
///
/// let config = JournalConfig::builder()
///     .keyspace("billing")
///     .events_by_tag(false)
///     .delete_mode(DeleteMode::SingleRow)
///     .build();
/// assert!(!config.events_by_tag.enabled);
/// ```
pub struct JournalConfigBuilder {
    config: JournalConfig,
}

impl JournalConfigBuilder {
    /// Set keyspace
    pub fn keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.config.keyspace = keyspace.into();
        self
    }

    /// Enable/disable keyspace creation
    pub fn keyspace_autocreate(mut self, enabled: bool) -> Self {
        self.config.keyspace_autocreate = enabled;
        self
    }

    /// Enable/disable table creation
    pub fn tables_autocreate(mut self, enabled: bool) -> Self {
        self.config.tables_autocreate = enabled;
        self
    }

    /// Set keyspace replication
    pub fn replication(mut self, replication: ReplicationStrategy) -> Self {
        self.config.replication = replication;
        self
    }

    /// Set events per partition
    pub fn target_partition_size(mut self, size: u64) -> Self {
        self.config.target_partition_size = size;
        self
    }

    /// Set physical delete mode
    pub fn delete_mode(mut self, mode: DeleteMode) -> Self {
        self.config.delete_mode = mode;
        self
    }

    /// Set events table retention
    pub fn table_settings(mut self, settings: TableSettings) -> Self {
        self.config.settings = settings;
        self
    }

    /// Set TTL on event writes
    pub fn event_ttl(mut self, ttl: Duration) -> Self {
        self.config.settings.event_ttl = Some(ttl);
        self
    }

    /// Enable/disable the tag index
    pub fn events_by_tag(mut self, enabled: bool) -> Self {
        self.config.events_by_tag.enabled = enabled;
        self
    }

    /// Set tag index bucket size
    pub fn bucket_size(mut self, size: BucketSize) -> Self {
        self.config.events_by_tag.bucket_size = size;
        self
    }

    /// Set tag index retention
    pub fn tag_table_settings(mut self, settings: TableSettings) -> Self {
        self.config.events_by_tag.settings = settings;
        self
    }

    /// Set TTL on tag row writes
    pub fn tag_ttl(mut self, ttl: Duration) -> Self {
        self.config.events_by_tag.settings.event_ttl = Some(ttl);
        self
    }

    /// Build the configuration
    pub fn build(self) -> JournalConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = JournalConfig::default();
        assert_eq!(config.keyspace, "plexspaces_journal");
        assert_eq!(config.target_partition_size, 500_000);
        assert_eq!(config.delete_mode, DeleteMode::Range);
        assert_eq!(config.settings.gc_grace_seconds, 864_000);
        assert!(config.events_by_tag.enabled);
        assert_eq!(config.events_by_tag.bucket_size, BucketSize::Hour);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_partition_size_rejected() {
        let config = JournalConfig::builder().target_partition_size(0).build();
        assert!(matches!(
            config.validate(),
            Err(JournalError::Configuration(_))
        ));
    }

    #[test]
    fn test_bad_identifier_rejected() {
        let config = JournalConfig::builder().keyspace("drop table; --").build();
        assert!(config.validate().is_err());
        let config = JournalConfig::builder().keyspace("9lives").build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_replication_rendering() {
        assert_eq!(
            ReplicationStrategy::default().to_cql(),
            "{'class': 'SimpleStrategy', 'replication_factor': 1}"
        );
        let mut data_centers = BTreeMap::new();
        data_centers.insert("dc1".to_string(), 3);
        data_centers.insert("dc2".to_string(), 2);
        assert_eq!(
            ReplicationStrategy::NetworkTopology { data_centers }.to_cql(),
            "{'class': 'NetworkTopologyStrategy', 'dc1': 3, 'dc2': 2}"
        );
    }

    #[test]
    fn test_builder_fluent_api() {
        let config = JournalConfig::builder()
            .keyspace("orders")
            .keyspace_autocreate(false)
            .target_partition_size(5)
            .events_by_tag(false)
            .bucket_size(BucketSize::Minute)
            .event_ttl(Duration::from_secs(60))
            .tag_ttl(Duration::from_secs(30))
            .build();
        assert_eq!(config.keyspace, "orders");
        assert!(!config.keyspace_autocreate);
        assert_eq!(config.target_partition_size, 5);
        assert!(!config.events_by_tag.enabled);
        assert_eq!(config.events_by_tag.bucket_size, BucketSize::Minute);
        assert_eq!(config.settings.event_ttl, Some(Duration::from_secs(60)));
        assert_eq!(
            config.events_by_tag.settings.event_ttl,
            Some(Duration::from_secs(30))
        );
    }

    // the only test touching PLEXSPACES_JOURNAL_* variables
    #[test]
    fn test_from_env() {
        let vars = [
            ("PLEXSPACES_JOURNAL_KEYSPACE", "orders_journal"),
            ("PLEXSPACES_JOURNAL_PARTITION_SIZE", "1000"),
            ("PLEXSPACES_JOURNAL_DELETE_MODE", "single-row"),
            ("PLEXSPACES_JOURNAL_EVENTS_BY_TAG_ENABLED", "false"),
            ("PLEXSPACES_JOURNAL_TAG_BUCKET_SIZE", "minute"),
            ("PLEXSPACES_JOURNAL_EVENT_TTL_SECONDS", "3600"),
        ];
        for (name, value) in vars {
            std::env::set_var(name, value);
        }

        let config = JournalConfig::from_env().unwrap();
        assert_eq!(config.keyspace, "orders_journal");
        assert_eq!(config.target_partition_size, 1000);
        assert_eq!(config.delete_mode, DeleteMode::SingleRow);
        assert!(!config.events_by_tag.enabled);
        assert_eq!(config.events_by_tag.bucket_size, BucketSize::Minute);
        assert_eq!(config.settings.event_ttl, Some(Duration::from_secs(3600)));
        assert_eq!(config.table, "messages");

        std::env::set_var("PLEXSPACES_JOURNAL_PARTITION_SIZE", "lots");
        match JournalConfig::from_env() {
            Err(JournalError::Configuration(msg)) => {
                assert!(msg.contains("PLEXSPACES_JOURNAL_PARTITION_SIZE"))
            }
            other => panic!("expected configuration error, got {:?}", other.map(|c| c.keyspace)),
        }

        std::env::set_var("PLEXSPACES_JOURNAL_PARTITION_SIZE", "0");
        assert!(matches!(
            JournalConfig::from_env(),
            Err(JournalError::Configuration(_))
        ));

        std::env::remove_var("PLEXSPACES_JOURNAL_PARTITION_SIZE");
        std::env::set_var("PLEXSPACES_JOURNAL_DELETE_MODE", "shred");
        assert!(matches!(
            JournalConfig::from_env(),
            Err(JournalError::Configuration(_))
        ));

        for (name, _) in vars {
            std::env::remove_var(name);
        }
        assert_eq!(JournalConfig::from_env().unwrap().keyspace, "plexspaces_journal");
    }

    #[test]
    fn test_serde_defaults_fill_missing_fields() {
        let config: JournalConfig =
            serde_json::from_str(r#"{"keyspace": "ks", "target_partition_size": 10}"#).unwrap();
        assert_eq!(config.keyspace, "ks");
        assert_eq!(config.target_partition_size, 10);
        assert_eq!(config.table, "messages");
        assert!(config.events_by_tag.enabled);
    }
}
