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


//! Tag index recovery.
//!
//! ## Purpose
//! A tag write can fail after its event was stored, and a writer can crash
//! between the two. The scan point is the sequence number up to which every
//! tagged event of a stream is known to be indexed. Next to it the row keeps
//! the last ordinal written per tag at that point, so a writer can resume
//! its counters without reading older events.
//!
//! ## Rebuild
//! 1. Seed counters from consumer progress (last delivered ordinal + 1),
//!    raised to the ordinals stored with the scan point
//! 2. Replay events after the scan point
//! 3. For every tag an event carries, look up its tag row (same bucket and
//!    timestamp). An existing row confirms its ordinal; a missing row is
//!    written with the next one.
//! 4. Record the new scan point with the counters reached
//!
//! Consumer progress is only read here, never written.

use crate::error::{to_i64, to_u64, StoreResultExt};
use crate::journal::EventJournal;
use crate::model::TagViewEvent;
use crate::tables::columns::*;
use crate::tables::Tables;
use crate::tag_sequencer::TagSequencer;
use crate::{JournalError, JournalResult};
use plexspaces_widecolumn::statement::{Insert, Select};
use plexspaces_widecolumn::WideColumnSession;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Stored scan point of a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPoint {
    /// Every tagged event up to here is indexed
    pub sequence_nr: u64,
    /// Last ordinal written per tag up to `sequence_nr`
    pub ordinals: BTreeMap<String, u64>,
}

/// Reads and writes per-stream scan points.
#[derive(Clone)]
pub struct TagScanningRecovery {
    session: Arc<dyn WideColumnSession>,
    tables: Tables,
}

impl TagScanningRecovery {
    /// Create a recovery store for the scanning table of `tables`.
    pub fn new(session: Arc<dyn WideColumnSession>, tables: Tables) -> Self {
        Self { session, tables }
    }

    /// Record that a stream is scanned up to `sequence_nr`.
    ///
    /// The scan point never moves backwards. Stored ordinals are kept.
    /// Returns the stored scan point.
    pub async fn record_scan_point(&self, persistence_id: &str, sequence_nr: u64) -> JournalResult<u64> {
        let checkpoint = ScanPoint {
            sequence_nr,
            ordinals: BTreeMap::new(),
        };
        Ok(self.record_checkpoint(persistence_id, &checkpoint).await?.sequence_nr)
    }

    /// Record a scan point together with the writer's ordinals.
    ///
    /// A lower sequence number is a no-op. Ordinals merge with the stored
    /// ones and never decrease. Returns what is stored afterwards.
    #[instrument(skip(self, checkpoint), fields(persistence_id = %persistence_id, sequence_nr = checkpoint.sequence_nr))]
    pub async fn record_checkpoint(
        &self,
        persistence_id: &str,
        checkpoint: &ScanPoint,
    ) -> JournalResult<ScanPoint> {
        let current = self.checkpoint(persistence_id).await?;
        let mut merged = match &current {
            Some(current) if current.sequence_nr > checkpoint.sequence_nr => {
                debug!(current = current.sequence_nr, "Scan point already ahead");
                return Ok(current.clone());
            }
            Some(current) => current.clone(),
            None => ScanPoint::default(),
        };
        merged.sequence_nr = checkpoint.sequence_nr;
        for (tag, ordinal) in &checkpoint.ordinals {
            let stored = merged.ordinals.entry(tag.clone()).or_insert(0);
            *stored = (*stored).max(*ordinal);
        }
        if current.as_ref() == Some(&merged) {
            return Ok(merged);
        }

        let mut ordinals = BTreeMap::new();
        for (tag, ordinal) in &merged.ordinals {
            ordinals.insert(tag.clone(), to_i64(TAG_PID_SEQUENCE_NRS, *ordinal)?);
        }
        let insert = Insert::into_table(&self.tables.tag_scanning)
            .value(PERSISTENCE_ID, persistence_id)
            .value(SEQUENCE_NR, to_i64(SEQUENCE_NR, merged.sequence_nr)?)
            .value(TAG_PID_SEQUENCE_NRS, ordinals);
        self.session
            .execute(&insert.into())
            .await
            .step("write tag_scanning")?;
        Ok(merged)
    }

    /// Stored scan point of a stream.
    pub async fn scan_point(&self, persistence_id: &str) -> JournalResult<Option<u64>> {
        Ok(self
            .checkpoint(persistence_id)
            .await?
            .map(|checkpoint| checkpoint.sequence_nr))
    }

    /// Stored scan point of a stream with its ordinals.
    pub async fn checkpoint(&self, persistence_id: &str) -> JournalResult<Option<ScanPoint>> {
        let select =
            Select::from_table(&self.tables.tag_scanning).where_eq(PERSISTENCE_ID, persistence_id);
        let rows = self
            .session
            .execute(&select.into())
            .await
            .step("read tag_scanning")?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let sequence_nr = row.bigint(SEQUENCE_NR).decoding("tag_scanning")?;
        let mut ordinals = BTreeMap::new();
        for (tag, ordinal) in row.bigint_map(TAG_PID_SEQUENCE_NRS).decoding("tag_scanning")? {
            ordinals.insert(tag, to_u64("tag_scanning", TAG_PID_SEQUENCE_NRS, ordinal)?);
        }
        Ok(Some(ScanPoint {
            sequence_nr: to_u64("tag_scanning", SEQUENCE_NR, sequence_nr)?,
            ordinals,
        }))
    }
}

/// Outcome of [`EventJournal::rebuild_tags`].
#[derive(Debug, Clone)]
pub struct TagRebuild {
    /// First sequence number examined
    pub scanned_from: u64,
    /// Scan point after the rebuild
    pub scanned_to: u64,
    /// Tag rows written
    pub rewritten: usize,
    /// Last ordinal per tag after the rebuild
    pub ordinals: BTreeMap<String, u64>,
    /// Counters to continue writing with
    pub sequencer: TagSequencer,
}

impl EventJournal {
    /// Re-tag a stream's events after its scan point.
    ///
    /// ## Errors
    /// [`JournalError::Configuration`] when the tag index is disabled.
    #[instrument(skip(self), fields(persistence_id = %persistence_id))]
    pub async fn rebuild_tags(&self, persistence_id: &str) -> JournalResult<TagRebuild> {
        if !self.config().events_by_tag.enabled {
            return Err(JournalError::Configuration(
                "events_by_tag is disabled".to_string(),
            ));
        }
        self.bootstrapper().ensure_schema().await?;
        let start = Instant::now();

        let delivered = self
            .progress()
            .progress_for_persistence_id(persistence_id)
            .await?;
        let scan_point = self
            .scanning()
            .checkpoint(persistence_id)
            .await?
            .unwrap_or_default();
        let mut sequencer = TagSequencer::from_progress(&delivered);
        for (tag, ordinal) in &scan_point.ordinals {
            sequencer.confirm(tag, *ordinal);
        }

        let scanned_from = scan_point.sequence_nr.saturating_add(1);
        let events = self
            .replay(persistence_id, scanned_from, u64::MAX, usize::MAX)
            .await?;

        let mut rewritten = 0;
        for event in &events {
            for tag in &event.tags {
                let existing = self
                    .tag_views()
                    .ordinals_of(tag, event.time_bucket, event.timestamp, persistence_id)
                    .await?;
                if let Some(ordinal) = existing.into_iter().max() {
                    sequencer.confirm(tag, ordinal);
                    continue;
                }
                let ordinal = sequencer.candidate(tag);
                self.tag_views()
                    .assign(&TagViewEvent::from_persisted(event, tag, ordinal))
                    .await?;
                sequencer.confirm(tag, ordinal);
                rewritten += 1;
            }
        }

        let scanned_to = match events.last() {
            Some(last) => {
                let checkpoint = ScanPoint {
                    sequence_nr: last.sequence_nr,
                    ordinals: sequencer.confirmed(),
                };
                self.scanning()
                    .record_checkpoint(persistence_id, &checkpoint)
                    .await?
                    .sequence_nr
            }
            None => scan_point.sequence_nr,
        };

        metrics::histogram!("plexspaces_event_journal_tag_rebuild_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        if rewritten > 0 {
            info!(rewritten, scan_point = scanned_to, "Tag index rebuilt");
        }
        Ok(TagRebuild {
            scanned_from,
            scanned_to,
            rewritten,
            ordinals: sequencer.confirmed(),
            sequencer,
        })
    }
}
