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

//! Tag ordinals and the tag index table.
//!
//! ## Purpose
//! Every tagged event gets a per-(stream, tag) ordinal that starts at 1 and
//! grows by exactly one per tagged event. Readers of the tag index use it to
//! detect missing or out-of-order rows across time buckets.
//!
//! ## Design
//! - [`TagSequencer`]: counters of one stream, owned by that stream's single
//!   writer. No locks; `&mut self` is the exclusion.
//! - [`TagViewStore`]: reads and writes tag index rows.
//!
//! A counter moves only after its tag row was written, so a failed write
//! hands the same ordinal to the retry.

use crate::error::{to_i64, to_u64, StoreResultExt};
use crate::model::{PayloadUpdate, TagProgress, TagViewEvent};
use crate::tables::columns::*;
use crate::tables::Tables;
use crate::time_bucket::TimeBucket;
use crate::JournalResult;
use plexspaces_widecolumn::statement::{Insert, Select, Update};
use plexspaces_widecolumn::{TimeUuid, WideColumnSession};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Per-tag ordinal counters of one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSequencer {
    next: HashMap<String, u64>,
}

impl TagSequencer {
    /// Counters for a stream that has never been tagged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters recovered from consumer progress records: next ordinal is
    /// the last confirmed one plus one.
    pub fn from_progress<'a, I>(progress: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a TagProgress)>,
    {
        Self {
            next: progress
                .into_iter()
                .map(|(tag, p)| (tag.clone(), p.tag_pid_sequence_nr + 1))
                .collect(),
        }
    }

    /// Ordinal the next tagged event for `tag` gets.
    pub fn candidate(&self, tag: &str) -> u64 {
        self.next.get(tag).copied().unwrap_or(1)
    }

    /// Record that `ordinal` was written for `tag`.
    pub fn confirm(&mut self, tag: &str, ordinal: u64) {
        let next = self.next.entry(tag.to_string()).or_insert(1);
        *next = (*next).max(ordinal + 1);
    }

    /// Last confirmed ordinal for `tag`.
    pub fn last_confirmed(&self, tag: &str) -> Option<u64> {
        self.next
            .get(tag)
            .copied()
            .filter(|next| *next > 1)
            .map(|next| next - 1)
    }

    /// Tags with at least one confirmed ordinal.
    pub fn tags(&self) -> impl Iterator<Item = &String> {
        self.next.keys()
    }

    /// Last confirmed ordinal of every tag.
    pub fn confirmed(&self) -> BTreeMap<String, u64> {
        self.next
            .iter()
            .filter(|(_, next)| **next > 1)
            .map(|(tag, next)| (tag.clone(), next - 1))
            .collect()
    }
}

/// Reads and writes the tag index table.
#[derive(Clone)]
pub struct TagViewStore {
    session: Arc<dyn WideColumnSession>,
    tables: Tables,
    ttl: Option<Duration>,
}

impl TagViewStore {
    /// Create a store for the tag index of `tables`.
    pub fn new(session: Arc<dyn WideColumnSession>, tables: Tables, ttl: Option<Duration>) -> Self {
        Self {
            session,
            tables,
            ttl,
        }
    }

    /// Write the tag row carrying a candidate ordinal.
    ///
    /// Writing the same (tag, bucket, timestamp, stream, ordinal) twice
    /// overwrites the row.
    #[instrument(skip(self, event), fields(
        tag = %event.tag,
        persistence_id = %event.persistence_id,
        sequence_nr = event.sequence_nr,
        ordinal = event.tag_pid_sequence_nr
    ))]
    pub async fn assign(&self, event: &TagViewEvent) -> JournalResult<()> {
        let start = Instant::now();
        let mut insert = Insert::into_table(&self.tables.tag_views)
            .value(TAG_NAME, &event.tag)
            .value(TIMEBUCKET, event.time_bucket)
            .value(TIMESTAMP, event.timestamp)
            .value(PERSISTENCE_ID, &event.persistence_id)
            .value(
                TAG_PID_SEQUENCE_NR,
                to_i64(TAG_PID_SEQUENCE_NR, event.tag_pid_sequence_nr)?,
            )
            .value(SEQUENCE_NR, to_i64(SEQUENCE_NR, event.sequence_nr)?)
            .value(WRITER_UUID, &event.writer_uuid)
            .value(SER_ID, event.payload.serializer_id)
            .value(SER_MANIFEST, &event.payload.manifest)
            .value(EVENT_MANIFEST, &event.event_manifest)
            .value(EVENT, event.payload.bytes.clone())
            .ttl(self.ttl);
        if let Some(meta) = &event.meta {
            insert = insert
                .value(META_SER_ID, meta.serializer_id)
                .value(META_SER_MANIFEST, &meta.manifest)
                .value(META, meta.bytes.clone());
        }

        self.session
            .execute(&insert.into())
            .await
            .step("write tag_views")?;

        metrics::histogram!("plexspaces_event_journal_tag_write_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        metrics::counter!("plexspaces_event_journal_tag_writes_total").increment(1);
        debug!("Tag row written");
        Ok(())
    }

    /// Ordinals of the rows an event has under `tag`.
    pub async fn ordinals_of(
        &self,
        tag: &str,
        time_bucket: i64,
        timestamp: TimeUuid,
        persistence_id: &str,
    ) -> JournalResult<Vec<u64>> {
        let select = Select::from_table(&self.tables.tag_views)
            .columns([TAG_PID_SEQUENCE_NR])
            .where_eq(TAG_NAME, tag)
            .where_eq(TIMEBUCKET, time_bucket)
            .where_eq(TIMESTAMP, timestamp)
            .where_eq(PERSISTENCE_ID, persistence_id);
        let rows = self
            .session
            .execute(&select.into())
            .await
            .step("read tag_views")?;
        let mut ordinals = Vec::with_capacity(rows.len());
        for row in rows.rows() {
            let ordinal = row.bigint(TAG_PID_SEQUENCE_NR).decoding("tag_views")?;
            ordinals.push(to_u64("tag_views", TAG_PID_SEQUENCE_NR, ordinal)?);
        }
        Ok(ordinals)
    }

    /// Replace the payload of an event's rows under `tag`.
    ///
    /// Only the payload columns change; writer id, metadata and ordinal stay.
    /// Returns the number of rows updated.
    #[instrument(skip(self, update), fields(tag = %tag, persistence_id = %persistence_id))]
    pub async fn update_payload(
        &self,
        tag: &str,
        time_bucket: i64,
        timestamp: TimeUuid,
        persistence_id: &str,
        update: &PayloadUpdate,
    ) -> JournalResult<usize> {
        let ordinals = self
            .ordinals_of(tag, time_bucket, timestamp, persistence_id)
            .await?;
        for ordinal in &ordinals {
            let statement = Update::table(&self.tables.tag_views)
                .set(EVENT, update.payload.bytes.clone())
                .set(SER_MANIFEST, &update.payload.manifest)
                .set(SER_ID, update.payload.serializer_id)
                .set(EVENT_MANIFEST, &update.event_manifest)
                .where_eq(TAG_NAME, tag)
                .where_eq(TIMEBUCKET, time_bucket)
                .where_eq(TIMESTAMP, timestamp)
                .where_eq(PERSISTENCE_ID, persistence_id)
                .where_eq(TAG_PID_SEQUENCE_NR, to_i64(TAG_PID_SEQUENCE_NR, *ordinal)?);
            self.session
                .execute(&statement.into())
                .await
                .step("update tag_views payload")?;
        }
        debug!(rows = ordinals.len(), "Tag rows updated");
        Ok(ordinals.len())
    }

    /// All rows of one tag bucket in timestamp order.
    #[instrument(skip(self), fields(tag = %tag, bucket = %bucket))]
    pub async fn read_bucket(&self, tag: &str, bucket: TimeBucket) -> JournalResult<Vec<TagViewEvent>> {
        let select = Select::from_table(&self.tables.tag_views)
            .where_eq(TAG_NAME, tag)
            .where_eq(TIMEBUCKET, bucket.key());
        let rows = self
            .session
            .execute(&select.into())
            .await
            .step("read tag_views")?;
        rows.rows().iter().map(TagViewEvent::from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_sequencer_starts_at_one() {
        let mut sequencer = TagSequencer::new();
        assert_eq!(sequencer.candidate("orders"), 1);
        assert_eq!(sequencer.last_confirmed("orders"), None);

        sequencer.confirm("orders", 1);
        assert_eq!(sequencer.candidate("orders"), 2);
        assert_eq!(sequencer.last_confirmed("orders"), Some(1));
        assert_eq!(sequencer.candidate("payments"), 1);
    }

    #[test]
    fn test_unconfirmed_candidate_is_reused() {
        let sequencer = TagSequencer::new();
        // write failed, nothing confirmed
        assert_eq!(sequencer.candidate("orders"), 1);
        assert_eq!(sequencer.candidate("orders"), 1);
    }

    #[test]
    fn test_recovery_from_progress() {
        let mut progress = HashMap::new();
        progress.insert(
            "orders".to_string(),
            TagProgress {
                sequence_nr: 40,
                tag_pid_sequence_nr: 7,
                offset: TimeUuid::start_of_millis(0),
            },
        );
        let sequencer = TagSequencer::from_progress(&progress);
        assert_eq!(sequencer.candidate("orders"), 8);
        assert_eq!(sequencer.last_confirmed("orders"), Some(7));
        assert_eq!(sequencer.tags().count(), 1);
    }

    #[test]
    fn test_confirm_never_moves_backwards() {
        let mut sequencer = TagSequencer::new();
        sequencer.confirm("orders", 5);
        sequencer.confirm("orders", 3);
        assert_eq!(sequencer.candidate("orders"), 6);
    }

    #[test]
    fn test_confirmed_lists_last_ordinals() {
        let mut sequencer = TagSequencer::new();
        sequencer.confirm("orders", 2);
        sequencer.confirm("audit", 1);
        let confirmed = sequencer.confirmed();
        assert_eq!(confirmed.len(), 2);
        assert_eq!(confirmed["orders"], 2);
        assert_eq!(confirmed["audit"], 1);
    }
}
