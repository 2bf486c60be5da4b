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

//! Event journal over a wide-column session.
//!
//! ## Purpose
//! Appends events to the events table, keeps the tag index in step and
//! answers the questions recovery asks: highest sequence number, replay and
//! logical deletes.
//!
//! ## Write Path
//! ```text
//! StreamWriter::append(events)
//!   ├─ split by partition ──> one batch per partition ──> messages
//!   ├─ for each tag of each event (after the primary write):
//!   │    candidate ordinal ──> tag_views ──> confirm
//!   └─ scan point + confirmed ordinals ──> tag_scanning
//! ```
//!
//! The two tables are written by independent idempotent upserts. A failed
//! write leaves the primary rows in place; [`EventJournal::rebuild_tags`]
//! writes the missing tag rows. It runs on every
//! [`EventJournal::open_stream`] and before the next append on a handle
//! whose previous append failed. Consumer progress (`tag_write_progress`)
//! is never written here.

use crate::codec::SerializedPayload;
use crate::config::JournalConfig;
use crate::error::{to_i64, to_u64, upper_bound, StoreResultExt};
use crate::model::{
    AppendResult, JournalEvent, PayloadUpdate, PersistedEvent, StreamMetadata, TagViewEvent,
};
use crate::partition::PartitionMapper;
use crate::retention::DeleteMode;
use crate::schema::SchemaBootstrapper;
use crate::tables::columns::*;
use crate::tables::Tables;
use crate::tag_progress::TagProgressTracker;
use crate::tag_scanning::{ScanPoint, TagScanningRecovery};
use crate::tag_sequencer::{TagSequencer, TagViewStore};
use crate::time_bucket::TimeBucket;
use crate::{JournalError, JournalResult};
use plexspaces_widecolumn::statement::{Delete, Insert, Order, Select, Update};
use plexspaces_widecolumn::{Statement, TimeUuid, TimeUuidGenerator, WideColumnSession};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, instrument, warn};

/// Statements per batch for single-row deletes.
const DELETE_BATCH_SIZE: usize = 100;

/// Where [`EventJournal::highest_sequence_nr`] starts probing partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionSearch {
    /// Partition 0
    Beginning,
    /// A known partition
    FromPartition(u64),
    /// The partition holding a known sequence number
    FromSequenceNr(u64),
}

#[derive(Debug, Clone, Copy)]
struct PartitionState {
    used: bool,
    highest: Option<u64>,
}

/// Event journal.
///
/// Cheap to clone; clones share the session, the time UUID generator and
/// the schema bootstrapper.
///
/// ## Example
/// ```rust
/// use plexspaces_event_journal::*;
/// use plexspaces_widecolumn::InMemoryWideColumnStore;
/// use std::sync::Arc;
///
/// # async fn example() -> JournalResult<()> {
/// let session = Arc::new(InMemoryWideColumnStore::new());
/// let journal = EventJournal::new(session, JournalConfig::default())?;
///
/// let mut stream = journal.open_stream("order-42").await?;
/// let payload = SerializedPayload::new(1001, "OrderPlaced", b"{}".to_vec());
/// stream
///     .append(vec![JournalEvent::new(1, payload).with_tags(["orders"])])
///     .await?;
///
/// assert_eq!(
///     journal.highest_sequence_nr("order-42", PartitionSearch::Beginning).await?,
///     1
/// );
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct EventJournal {
    session: Arc<dyn WideColumnSession>,
    config: Arc<JournalConfig>,
    tables: Tables,
    mapper: PartitionMapper,
    writer_uuid: String,
    ids: Arc<TimeUuidGenerator>,
    bootstrapper: SchemaBootstrapper,
    tag_views: TagViewStore,
    progress: TagProgressTracker,
    scanning: TagScanningRecovery,
}

impl EventJournal {
    /// Create a journal with its own schema bootstrapper.
    ///
    /// ## Errors
    /// [`JournalError::Configuration`] if the configuration is invalid.
    pub fn new(session: Arc<dyn WideColumnSession>, config: JournalConfig) -> JournalResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let bootstrapper = SchemaBootstrapper::new(session.clone(), config.clone());
        Self::with_bootstrapper(session, config, bootstrapper)
    }

    /// Create a journal sharing an existing bootstrapper (and its slot).
    pub fn with_bootstrapper(
        session: Arc<dyn WideColumnSession>,
        config: Arc<JournalConfig>,
        bootstrapper: SchemaBootstrapper,
    ) -> JournalResult<Self> {
        config.validate()?;
        let tables = Tables::new(&config);
        Ok(Self {
            mapper: PartitionMapper::new(config.target_partition_size),
            writer_uuid: ulid::Ulid::new().to_string(),
            ids: Arc::new(TimeUuidGenerator::new()),
            tag_views: TagViewStore::new(
                session.clone(),
                tables.clone(),
                config.events_by_tag.settings.event_ttl,
            ),
            progress: TagProgressTracker::new(session.clone(), tables.clone()),
            scanning: TagScanningRecovery::new(session.clone(), tables.clone()),
            session,
            config,
            tables,
            bootstrapper,
        })
    }

    /// Id stored in `writer_uuid` of every row this journal writes.
    pub fn writer_uuid(&self) -> &str {
        &self.writer_uuid
    }

    /// Configuration.
    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// Partition mapper.
    pub fn partition_mapper(&self) -> PartitionMapper {
        self.mapper
    }

    /// Schema bootstrapper; clone it to share the bootstrap slot.
    pub fn bootstrapper(&self) -> &SchemaBootstrapper {
        &self.bootstrapper
    }

    /// Tag index table access.
    pub fn tag_views(&self) -> &TagViewStore {
        &self.tag_views
    }

    /// Tag progress table access.
    pub fn progress(&self) -> &TagProgressTracker {
        &self.progress
    }

    /// Tag scan point table access.
    pub fn scanning(&self) -> &TagScanningRecovery {
        &self.scanning
    }

    /// Open the single writer of a stream.
    ///
    /// With the tag index enabled, tag counters are recovered first: consumer
    /// progress seeds them (last delivered ordinal + 1), the ordinals stored
    /// with the scan point raise them, and events after the scan point are
    /// re-tagged where their tag row is missing.
    #[instrument(skip(self, persistence_id))]
    pub async fn open_stream(&self, persistence_id: impl Into<String>) -> JournalResult<StreamWriter> {
        let persistence_id = persistence_id.into();
        self.bootstrapper.ensure_schema().await?;
        let sequencer = if self.config.events_by_tag.enabled {
            self.rebuild_tags(&persistence_id).await?.sequencer
        } else {
            TagSequencer::new()
        };
        debug!(persistence_id = %persistence_id, "Stream opened");
        Ok(StreamWriter {
            journal: self.clone(),
            persistence_id,
            sequencer,
            needs_rebuild: false,
        })
    }

    /// Mark a partition as used without writing an event.
    #[instrument(skip(self), fields(persistence_id = %persistence_id, partition_nr = partition_nr))]
    pub async fn write_in_use(&self, persistence_id: &str, partition_nr: u64) -> JournalResult<()> {
        self.bootstrapper.ensure_schema().await?;
        let insert = Insert::into_table(&self.tables.messages)
            .value(PERSISTENCE_ID, persistence_id)
            .value(PARTITION_NR, to_i64(PARTITION_NR, partition_nr)?)
            .value(USED, true);
        self.session
            .execute(&insert.into())
            .await
            .step("write messages used")?;
        Ok(())
    }

    async fn partition_state(&self, persistence_id: &str, partition_nr: u64) -> JournalResult<PartitionState> {
        let select = Select::from_table(&self.tables.messages)
            .columns([USED, SEQUENCE_NR])
            .where_eq(PERSISTENCE_ID, persistence_id)
            .where_eq(PARTITION_NR, to_i64(PARTITION_NR, partition_nr)?)
            .order_by(SEQUENCE_NR, Order::Descending)
            .limit(1);
        let rows = self
            .session
            .execute(&select.into())
            .await
            .step("read messages highest")?;
        let Some(row) = rows.first() else {
            return Ok(PartitionState {
                used: false,
                highest: None,
            });
        };
        let highest = row
            .opt_bigint(SEQUENCE_NR)
            .decoding("messages")?
            .map(|n| to_u64("messages", SEQUENCE_NR, n))
            .transpose()?;
        let used = row.opt_boolean(USED).decoding("messages")?.unwrap_or(false);
        Ok(PartitionState {
            used: used || highest.is_some(),
            highest,
        })
    }

    /// Highest sequence number ever written to a stream.
    ///
    /// If the start partition is unused the search walks back to the last
    /// used one, then forward while partitions are used. Logically deleted
    /// events count, so the result never drops below `deleted_to`. Returns 0
    /// for a stream that was never written.
    #[instrument(skip(self), fields(persistence_id = %persistence_id))]
    pub async fn highest_sequence_nr(
        &self,
        persistence_id: &str,
        search: PartitionSearch,
    ) -> JournalResult<u64> {
        self.bootstrapper.ensure_schema().await?;
        let start = Instant::now();
        let mut partition_nr = match search {
            PartitionSearch::Beginning => 0,
            PartitionSearch::FromPartition(p) => p,
            PartitionSearch::FromSequenceNr(n) => self.mapper.partition_nr(n),
        };

        let mut state = self.partition_state(persistence_id, partition_nr).await?;
        while !state.used && partition_nr > 0 {
            partition_nr -= 1;
            state = self.partition_state(persistence_id, partition_nr).await?;
        }

        let mut highest = 0;
        while state.used {
            if let Some(n) = state.highest {
                highest = highest.max(n);
            }
            partition_nr += 1;
            state = self.partition_state(persistence_id, partition_nr).await?;
        }

        let deleted_to = self.metadata(persistence_id).await?.deleted_to;
        metrics::histogram!("plexspaces_event_journal_highest_sequence_nr_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        debug!(highest, deleted_to, "Highest sequence number");
        Ok(highest.max(deleted_to))
    }

    /// Read one event.
    pub async fn read_event(
        &self,
        persistence_id: &str,
        sequence_nr: u64,
    ) -> JournalResult<Option<PersistedEvent>> {
        self.bootstrapper.ensure_schema().await?;
        let select = Select::from_table(&self.tables.messages)
            .where_eq(PERSISTENCE_ID, persistence_id)
            .where_eq(
                PARTITION_NR,
                to_i64(PARTITION_NR, self.mapper.partition_nr(sequence_nr))?,
            )
            .where_eq(SEQUENCE_NR, to_i64(SEQUENCE_NR, sequence_nr)?);
        let rows = self
            .session
            .execute(&select.into())
            .await
            .step("read messages")?;
        // a duplicate append leaves a second row; the later timestamp wins
        rows.rows().last().map(PersistedEvent::from_row).transpose()
    }

    /// Events `from..=to` in sequence order, at most `max`.
    ///
    /// Logically deleted events are skipped. Stops at the first unused
    /// partition. Of several rows for one sequence number only the latest
    /// write is returned.
    #[instrument(skip(self), fields(persistence_id = %persistence_id))]
    pub async fn replay(
        &self,
        persistence_id: &str,
        from_sequence_nr: u64,
        to_sequence_nr: u64,
        max: usize,
    ) -> JournalResult<Vec<PersistedEvent>> {
        self.bootstrapper.ensure_schema().await?;
        let start = Instant::now();
        let deleted_to = self.metadata(persistence_id).await?.deleted_to;
        let from = from_sequence_nr.max(deleted_to.saturating_add(1)).max(1);
        // nothing is stored past i64::MAX
        let to_sequence_nr = upper_bound(to_sequence_nr) as u64;
        let mut events = Vec::new();
        if from > to_sequence_nr || max == 0 {
            return Ok(events);
        }

        let last_partition = self.mapper.partition_nr(to_sequence_nr);
        let mut partition_nr = self.mapper.partition_nr(from);
        while partition_nr <= last_partition && events.len() < max {
            let select = Select::from_table(&self.tables.messages)
                .where_eq(PERSISTENCE_ID, persistence_id)
                .where_eq(PARTITION_NR, to_i64(PARTITION_NR, partition_nr)?)
                .where_range(
                    SEQUENCE_NR,
                    Bound::Included(to_i64(SEQUENCE_NR, from)?.into()),
                    Bound::Included(to_i64(SEQUENCE_NR, to_sequence_nr)?.into()),
                )
                .limit(max - events.len());
            let rows = self
                .session
                .execute(&select.into())
                .await
                .step("read messages")?;
            if rows.is_empty() && !self.partition_state(persistence_id, partition_nr).await?.used {
                break;
            }
            for row in rows.rows() {
                let event = PersistedEvent::from_row(row)?;
                match events.last_mut() {
                    Some(last) if last.sequence_nr == event.sequence_nr => *last = event,
                    _ => events.push(event),
                }
            }
            partition_nr += 1;
        }

        metrics::histogram!("plexspaces_event_journal_replay_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        metrics::counter!("plexspaces_event_journal_events_replayed_total")
            .increment(events.len() as u64);
        debug!(events = events.len(), "Replayed");
        Ok(events)
    }

    /// Replace the content of a stored event.
    ///
    /// The events table row gets the new payload, manifests, metadata, tags
    /// and this journal's writer id. The event's existing tag rows get only
    /// the new payload and manifests; their ordinals never change.
    ///
    /// ## Errors
    /// [`JournalError::EventNotFound`] if the event does not exist.
    #[instrument(skip(self, update), fields(persistence_id = %persistence_id, sequence_nr = sequence_nr))]
    pub async fn update_payload(
        &self,
        persistence_id: &str,
        sequence_nr: u64,
        update: PayloadUpdate,
    ) -> JournalResult<()> {
        let existing = self
            .read_event(persistence_id, sequence_nr)
            .await?
            .ok_or_else(|| JournalError::EventNotFound {
                persistence_id: persistence_id.to_string(),
                sequence_nr,
            })?;

        let (meta_ser_id, meta_manifest, meta) = meta_columns(update.meta.as_ref());
        let statement = Update::table(&self.tables.messages)
            .set(WRITER_UUID, &self.writer_uuid)
            .set(SER_ID, update.payload.serializer_id)
            .set(SER_MANIFEST, &update.payload.manifest)
            .set(EVENT_MANIFEST, &update.event_manifest)
            .set(EVENT, update.payload.bytes.clone())
            .set(META_SER_ID, meta_ser_id)
            .set(META_SER_MANIFEST, meta_manifest)
            .set(META, meta)
            .set(TAGS, update.tags.clone())
            .where_eq(PERSISTENCE_ID, persistence_id)
            .where_eq(PARTITION_NR, to_i64(PARTITION_NR, existing.partition_nr)?)
            .where_eq(SEQUENCE_NR, to_i64(SEQUENCE_NR, sequence_nr)?)
            .where_eq(TIMESTAMP, existing.timestamp)
            .where_eq(TIMEBUCKET, existing.time_bucket.to_string());
        self.session
            .execute(&statement.into())
            .await
            .step("update messages payload")?;

        if self.config.events_by_tag.enabled {
            for tag in &existing.tags {
                self.tag_views
                    .update_payload(
                        tag,
                        existing.time_bucket,
                        existing.timestamp,
                        persistence_id,
                        &update,
                    )
                    .await?;
            }
        }
        debug!(tags = existing.tags.len(), "Payload updated");
        Ok(())
    }

    /// Per-stream metadata; defaults when the stream has none.
    pub async fn metadata(&self, persistence_id: &str) -> JournalResult<StreamMetadata> {
        self.bootstrapper.ensure_schema().await?;
        let select =
            Select::from_table(&self.tables.metadata).where_eq(PERSISTENCE_ID, persistence_id);
        let rows = self
            .session
            .execute(&select.into())
            .await
            .step("read metadata")?;
        let Some(row) = rows.first() else {
            return Ok(StreamMetadata::default());
        };
        Ok(StreamMetadata {
            deleted_to: row
                .opt_bigint(DELETED_TO)
                .decoding("metadata")?
                .map(|n| to_u64("metadata", DELETED_TO, n))
                .transpose()?
                .unwrap_or(0),
            properties: row.text_map(PROPERTIES).decoding("metadata")?,
        })
    }

    /// Merge entries into the stream's property map.
    #[instrument(skip(self, properties), fields(persistence_id = %persistence_id))]
    pub async fn set_properties(
        &self,
        persistence_id: &str,
        properties: BTreeMap<String, String>,
    ) -> JournalResult<()> {
        let mut merged = self.metadata(persistence_id).await?.properties;
        merged.extend(properties);
        let statement = Update::table(&self.tables.metadata)
            .set(PROPERTIES, merged)
            .where_eq(PERSISTENCE_ID, persistence_id);
        self.session
            .execute(&statement.into())
            .await
            .step("write metadata properties")?;
        Ok(())
    }

    /// Delete events up to `to_sequence_nr`.
    ///
    /// The target is clamped to the highest sequence number. `deleted_to` is
    /// written first, so replay stops returning the events even if the
    /// physical deletes fail. Returns the resulting `deleted_to`; a target at
    /// or below the current one changes nothing.
    #[instrument(skip(self), fields(persistence_id = %persistence_id, to_sequence_nr = to_sequence_nr))]
    pub async fn delete_to(&self, persistence_id: &str, to_sequence_nr: u64) -> JournalResult<u64> {
        let start = Instant::now();
        let deleted_to = self.metadata(persistence_id).await?.deleted_to;
        if to_sequence_nr <= deleted_to {
            warn!(deleted_to, "Already deleted, ignoring");
            return Ok(deleted_to);
        }
        let highest = self
            .highest_sequence_nr(
                persistence_id,
                PartitionSearch::FromSequenceNr(deleted_to.saturating_add(1)),
            )
            .await?;
        let target = to_sequence_nr.min(highest);
        if target <= deleted_to {
            return Ok(deleted_to);
        }

        let insert = Insert::into_table(&self.tables.metadata)
            .value(PERSISTENCE_ID, persistence_id)
            .value(DELETED_TO, to_i64(DELETED_TO, target)?);
        self.session
            .execute(&insert.into())
            .await
            .step("write metadata deleted_to")?;

        let first = deleted_to + 1;
        let result = match self.config.delete_mode {
            DeleteMode::Range => self.delete_range(persistence_id, first, target).await,
            DeleteMode::SingleRow => self.delete_rows(persistence_id, first, target).await,
        };
        if let Err(e) = result {
            error!(error = %e, target, "Physical delete failed; events stay hidden by deleted_to");
            return Err(e);
        }

        metrics::histogram!("plexspaces_event_journal_delete_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        metrics::counter!("plexspaces_event_journal_events_deleted_total").increment(target - deleted_to);
        debug!(deleted_to = target, "Deleted");
        Ok(target)
    }

    async fn delete_range(&self, persistence_id: &str, first: u64, target: u64) -> JournalResult<()> {
        let session = &self.session;
        let upper = to_i64(SEQUENCE_NR, target)?;
        let mut statements: Vec<Statement> = Vec::new();
        for partition_nr in self.mapper.partition_nr(first)..=self.mapper.partition_nr(target) {
            statements.push(
                Delete::from_table(&self.tables.messages)
                    .where_eq(PERSISTENCE_ID, persistence_id)
                    .where_eq(PARTITION_NR, to_i64(PARTITION_NR, partition_nr)?)
                    .where_range(SEQUENCE_NR, Bound::Unbounded, Bound::Included(upper.into()))
                    .into(),
            );
        }
        let deletes = statements
            .iter()
            .map(|statement| async move { session.execute(statement).await.step("delete messages") });
        futures::future::try_join_all(deletes).await?;
        Ok(())
    }

    async fn delete_rows(&self, persistence_id: &str, first: u64, target: u64) -> JournalResult<()> {
        let sequence_nrs: Vec<u64> = (first..=target).collect();
        for (partition_nr, group) in self.mapper.group_by_partition(sequence_nrs, |n| *n) {
            for chunk in group.chunks(DELETE_BATCH_SIZE) {
                let deletes = chunk
                    .iter()
                    .map(|sequence_nr| {
                        Ok(Delete::from_table(&self.tables.messages)
                            .where_eq(PERSISTENCE_ID, persistence_id)
                            .where_eq(PARTITION_NR, to_i64(PARTITION_NR, partition_nr)?)
                            .where_eq(SEQUENCE_NR, to_i64(SEQUENCE_NR, *sequence_nr)?)
                            .into())
                    })
                    .collect::<JournalResult<Vec<Statement>>>()?;
                self.session
                    .execute(&Statement::Batch(deletes))
                    .await
                    .step("delete messages")?;
            }
        }
        Ok(())
    }

    fn event_insert(
        &self,
        persistence_id: &str,
        event: &JournalEvent,
        row: &RowKey,
    ) -> JournalResult<Statement> {
        let (meta_ser_id, meta_manifest, meta) = meta_columns(event.meta.as_ref());
        Ok(Insert::into_table(&self.tables.messages)
            .value(PERSISTENCE_ID, persistence_id)
            .value(PARTITION_NR, to_i64(PARTITION_NR, row.partition_nr)?)
            .value(SEQUENCE_NR, to_i64(SEQUENCE_NR, event.sequence_nr)?)
            .value(TIMESTAMP, row.timestamp)
            .value(TIMEBUCKET, row.bucket.key().to_string())
            .value(USED, true)
            .value(WRITER_UUID, &self.writer_uuid)
            .value(SER_ID, event.payload.serializer_id)
            .value(SER_MANIFEST, &event.payload.manifest)
            .value(EVENT_MANIFEST, &event.event_manifest)
            .value(EVENT, event.payload.bytes.clone())
            .value(META_SER_ID, meta_ser_id)
            .value(META_SER_MANIFEST, meta_manifest)
            .value(META, meta)
            .value(TAGS, event.tags.clone())
            .ttl(self.config.settings.event_ttl)
            .into())
    }
}

/// Key parts assigned to an event at append time.
#[derive(Debug, Clone, Copy)]
struct RowKey {
    partition_nr: u64,
    timestamp: TimeUuid,
    bucket: TimeBucket,
}

fn meta_columns(meta: Option<&SerializedPayload>) -> (Option<i32>, Option<String>, Option<Vec<u8>>) {
    match meta {
        Some(meta) => (
            Some(meta.serializer_id),
            Some(meta.manifest.clone()),
            Some(meta.bytes.clone()),
        ),
        None => (None, None, None),
    }
}

/// Single writer of one stream.
///
/// Owns the stream's tag counters; `append` takes `&mut self`, so one handle
/// never runs two appends at once.
pub struct StreamWriter {
    journal: EventJournal,
    persistence_id: String,
    sequencer: TagSequencer,
    /// Set when an append failed after it may have stored events
    needs_rebuild: bool,
}

impl StreamWriter {
    /// Stream this handle writes.
    pub fn persistence_id(&self) -> &str {
        &self.persistence_id
    }

    /// Journal behind this handle.
    pub fn journal(&self) -> &EventJournal {
        &self.journal
    }

    /// Tag counters of this stream.
    pub fn sequencer(&self) -> &TagSequencer {
        &self.sequencer
    }

    /// Whether the next append first rebuilds the tag index.
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    /// Append events in order.
    ///
    /// Events are written one batch per partition. Tagged events then get a
    /// tag row each. Once every tag row landed, the scan point moves to the
    /// highest appended sequence number.
    ///
    /// After a failed append the handle rebuilds the tag index before it
    /// writes again, so events stored by the failed call are indexed with
    /// the ordinals they would have had.
    ///
    /// ## Errors
    /// [`JournalError::Storage`] naming the failed step. After a
    /// `write tag_views` failure the events are stored but not (fully)
    /// indexed. [`JournalError::OutOfRange`] for a sequence number that does
    /// not fit a stored `bigint`; nothing is written then.
    #[instrument(skip(self, events), fields(persistence_id = %self.persistence_id, events = events.len()))]
    pub async fn append(&mut self, events: Vec<JournalEvent>) -> JournalResult<AppendResult> {
        let mut result = AppendResult::default();
        if events.is_empty() {
            return Ok(result);
        }
        for event in &events {
            to_i64(SEQUENCE_NR, event.sequence_nr)?;
        }
        let tagging = self.journal.config.events_by_tag.enabled;
        if tagging && self.needs_rebuild {
            warn!("Rebuilding tag index after a failed append");
            self.rebuild_tags().await?;
        }
        self.journal.bootstrapper.ensure_schema().await?;
        self.needs_rebuild = tagging;
        self.write(events, &mut result).await?;
        self.needs_rebuild = false;

        debug!(
            events = result.events_written,
            tag_writes = result.tag_writes.len(),
            "Appended"
        );
        Ok(result)
    }

    async fn write(&mut self, events: Vec<JournalEvent>, result: &mut AppendResult) -> JournalResult<()> {
        let journal = &self.journal;
        let start = Instant::now();
        let bucket_size = journal.config.events_by_tag.bucket_size;

        let keyed: Vec<(JournalEvent, RowKey)> = events
            .into_iter()
            .map(|event| {
                let timestamp = journal.ids.now();
                let key = RowKey {
                    partition_nr: journal.mapper.partition_nr(event.sequence_nr),
                    bucket: TimeBucket::from_time_uuid(&timestamp, bucket_size),
                    timestamp,
                };
                (event, key)
            })
            .collect();
        let highest = keyed
            .iter()
            .map(|(event, _)| event.sequence_nr)
            .max()
            .unwrap_or_default();

        let groups = journal
            .mapper
            .group_by_partition(keyed, |(event, _)| event.sequence_nr);
        for (partition_nr, group) in &groups {
            let mut inserts = group
                .iter()
                .map(|(event, key)| journal.event_insert(&self.persistence_id, event, key))
                .collect::<JournalResult<Vec<Statement>>>()?;
            let statement = if inserts.len() == 1 {
                inserts.remove(0)
            } else {
                Statement::Batch(inserts)
            };
            if let Err(e) = journal.session.execute(&statement).await {
                error!(partition_nr, error = %e, "Event write failed");
                metrics::counter!("plexspaces_event_journal_write_errors_total", "table" => "messages")
                    .increment(1);
                return Err(JournalError::Storage {
                    step: "write messages",
                    source: e,
                });
            }
            result.partitions.push(*partition_nr);
            result.events_written += group.len();
        }
        metrics::histogram!("plexspaces_event_journal_append_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        metrics::counter!("plexspaces_event_journal_events_written_total")
            .increment(result.events_written as u64);

        if !journal.config.events_by_tag.enabled {
            return Ok(());
        }
        for (event, key) in groups.iter().flat_map(|(_, group)| group.iter()) {
            for tag in &event.tags {
                let ordinal = self.sequencer.candidate(tag);
                let row = TagViewEvent {
                    tag: tag.clone(),
                    time_bucket: key.bucket.key(),
                    timestamp: key.timestamp,
                    persistence_id: self.persistence_id.clone(),
                    sequence_nr: event.sequence_nr,
                    tag_pid_sequence_nr: ordinal,
                    writer_uuid: journal.writer_uuid.clone(),
                    payload: event.payload.clone(),
                    event_manifest: event.event_manifest.clone(),
                    meta: event.meta.clone(),
                };
                if let Err(e) = journal.tag_views.assign(&row).await {
                    error!(tag = %tag, sequence_nr = event.sequence_nr, error = %e, "Tag write failed after event write");
                    metrics::counter!("plexspaces_event_journal_write_errors_total", "table" => "tag_views")
                        .increment(1);
                    return Err(e);
                }
                self.sequencer.confirm(tag, ordinal);
                result
                    .tag_writes
                    .push((tag.clone(), event.sequence_nr, ordinal));
            }
        }

        let checkpoint = ScanPoint {
            sequence_nr: highest,
            ordinals: self.sequencer.confirmed(),
        };
        journal
            .scanning
            .record_checkpoint(&self.persistence_id, &checkpoint)
            .await?;
        Ok(())
    }

    /// Re-tag events after the scan point and reseed this handle's counters.
    pub async fn rebuild_tags(&mut self) -> JournalResult<usize> {
        let rebuild = self.journal.rebuild_tags(&self.persistence_id).await?;
        self.sequencer = rebuild.sequencer;
        self.needs_rebuild = false;
        Ok(rebuild.rewritten)
    }
}
