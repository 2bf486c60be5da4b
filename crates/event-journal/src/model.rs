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

//! Journal records and their row encodings.

use crate::codec::SerializedPayload;
use crate::error::{to_u64, StoreResultExt};
use crate::tables::columns::*;
use crate::{JournalError, JournalResult};
use plexspaces_widecolumn::{Row, TimeUuid};
use std::collections::{BTreeMap, BTreeSet};

const MESSAGES: &str = "messages";
const TAG_VIEWS: &str = "tag_views";
const TAG_WRITE_PROGRESS: &str = "tag_write_progress";

/// An event handed to the journal for appending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEvent {
    /// Stream sequence number (1-based, assigned by the caller)
    pub sequence_nr: u64,
    /// Serialized event
    pub payload: SerializedPayload,
    /// Event adapter manifest (empty when unused)
    pub event_manifest: String,
    /// Optional serialized metadata
    pub meta: Option<SerializedPayload>,
    /// Tags for the tag index
    pub tags: BTreeSet<String>,
}

impl JournalEvent {
    /// Untagged event without metadata.
    pub fn new(sequence_nr: u64, payload: SerializedPayload) -> Self {
        Self {
            sequence_nr,
            payload,
            event_manifest: String::new(),
            meta: None,
            tags: BTreeSet::new(),
        }
    }

    /// Add tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Attach metadata.
    pub fn with_meta(mut self, meta: SerializedPayload) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Set the event adapter manifest.
    pub fn with_event_manifest(mut self, manifest: impl Into<String>) -> Self {
        self.event_manifest = manifest.into();
        self
    }
}

/// Replacement content for an existing event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadUpdate {
    /// New serialized event
    pub payload: SerializedPayload,
    /// New event adapter manifest
    pub event_manifest: String,
    /// New metadata (`None` clears it)
    pub meta: Option<SerializedPayload>,
    /// New tag set of the primary row
    pub tags: BTreeSet<String>,
}

impl From<JournalEvent> for PayloadUpdate {
    fn from(event: JournalEvent) -> Self {
        Self {
            payload: event.payload,
            event_manifest: event.event_manifest,
            meta: event.meta,
            tags: event.tags,
        }
    }
}

/// An event as stored in the events table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedEvent {
    /// Stream
    pub persistence_id: String,
    /// Partition holding the event
    pub partition_nr: u64,
    /// Stream sequence number
    pub sequence_nr: u64,
    /// Time UUID of the write
    pub timestamp: TimeUuid,
    /// Time bucket key (epoch millis)
    pub time_bucket: i64,
    /// Writer that last wrote the row
    pub writer_uuid: String,
    /// Serialized event
    pub payload: SerializedPayload,
    /// Event adapter manifest
    pub event_manifest: String,
    /// Optional serialized metadata
    pub meta: Option<SerializedPayload>,
    /// Tags
    pub tags: BTreeSet<String>,
}

impl PersistedEvent {
    /// Decode an events table row.
    pub(crate) fn from_row(row: &Row) -> JournalResult<Self> {
        let bucket_text = row.text(TIMEBUCKET).decoding(MESSAGES)?;
        let time_bucket = bucket_text
            .parse::<i64>()
            .map_err(|_| JournalError::InvalidRow {
                table: MESSAGES,
                reason: format!("timebucket is not numeric: {}", bucket_text),
            })?;
        Ok(Self {
            persistence_id: row.text(PERSISTENCE_ID).decoding(MESSAGES)?.to_string(),
            partition_nr: to_u64(
                MESSAGES,
                PARTITION_NR,
                row.bigint(PARTITION_NR).decoding(MESSAGES)?,
            )?,
            sequence_nr: to_u64(
                MESSAGES,
                SEQUENCE_NR,
                row.bigint(SEQUENCE_NR).decoding(MESSAGES)?,
            )?,
            timestamp: row.time_uuid(TIMESTAMP).decoding(MESSAGES)?,
            time_bucket,
            writer_uuid: row
                .opt_text(WRITER_UUID)
                .decoding(MESSAGES)?
                .unwrap_or_default()
                .to_string(),
            payload: payload(row, SER_ID, SER_MANIFEST, EVENT, MESSAGES)?,
            event_manifest: row
                .opt_text(EVENT_MANIFEST)
                .decoding(MESSAGES)?
                .unwrap_or_default()
                .to_string(),
            meta: meta(row, MESSAGES)?,
            tags: row.text_set(TAGS).decoding(MESSAGES)?,
        })
    }
}

/// A tag index row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagViewEvent {
    /// Tag
    pub tag: String,
    /// Time bucket key (epoch millis)
    pub time_bucket: i64,
    /// Time UUID of the primary write
    pub timestamp: TimeUuid,
    /// Stream
    pub persistence_id: String,
    /// Stream sequence number
    pub sequence_nr: u64,
    /// Per-(stream, tag) ordinal
    pub tag_pid_sequence_nr: u64,
    /// Writer of the primary row
    pub writer_uuid: String,
    /// Serialized event
    pub payload: SerializedPayload,
    /// Event adapter manifest
    pub event_manifest: String,
    /// Optional serialized metadata
    pub meta: Option<SerializedPayload>,
}

impl TagViewEvent {
    /// Tag row for a stored event.
    pub fn from_persisted(event: &PersistedEvent, tag: &str, tag_pid_sequence_nr: u64) -> Self {
        Self {
            tag: tag.to_string(),
            time_bucket: event.time_bucket,
            timestamp: event.timestamp,
            persistence_id: event.persistence_id.clone(),
            sequence_nr: event.sequence_nr,
            tag_pid_sequence_nr,
            writer_uuid: event.writer_uuid.clone(),
            payload: event.payload.clone(),
            event_manifest: event.event_manifest.clone(),
            meta: event.meta.clone(),
        }
    }

    /// Decode a tag index row.
    pub(crate) fn from_row(row: &Row) -> JournalResult<Self> {
        Ok(Self {
            tag: row.text(TAG_NAME).decoding(TAG_VIEWS)?.to_string(),
            time_bucket: row.bigint(TIMEBUCKET).decoding(TAG_VIEWS)?,
            timestamp: row.time_uuid(TIMESTAMP).decoding(TAG_VIEWS)?,
            persistence_id: row.text(PERSISTENCE_ID).decoding(TAG_VIEWS)?.to_string(),
            sequence_nr: to_u64(
                TAG_VIEWS,
                SEQUENCE_NR,
                row.bigint(SEQUENCE_NR).decoding(TAG_VIEWS)?,
            )?,
            tag_pid_sequence_nr: to_u64(
                TAG_VIEWS,
                TAG_PID_SEQUENCE_NR,
                row.bigint(TAG_PID_SEQUENCE_NR).decoding(TAG_VIEWS)?,
            )?,
            writer_uuid: row
                .opt_text(WRITER_UUID)
                .decoding(TAG_VIEWS)?
                .unwrap_or_default()
                .to_string(),
            payload: payload(row, SER_ID, SER_MANIFEST, EVENT, TAG_VIEWS)?,
            event_manifest: row
                .opt_text(EVENT_MANIFEST)
                .decoding(TAG_VIEWS)?
                .unwrap_or_default()
                .to_string(),
            meta: meta(row, TAG_VIEWS)?,
        })
    }
}

/// Last delivered position of a tag consumer for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagProgress {
    /// Stream sequence number of the last delivered event
    pub sequence_nr: u64,
    /// Tag ordinal of the last delivered event
    pub tag_pid_sequence_nr: u64,
    /// Resume offset in the tag index
    pub offset: TimeUuid,
}

impl TagProgress {
    /// Decode a progress row, returning the tag it belongs to.
    pub(crate) fn from_row(row: &Row) -> JournalResult<(String, Self)> {
        let tag = row.text(TAG).decoding(TAG_WRITE_PROGRESS)?.to_string();
        let progress = Self {
            sequence_nr: to_u64(
                TAG_WRITE_PROGRESS,
                SEQUENCE_NR,
                row.bigint(SEQUENCE_NR).decoding(TAG_WRITE_PROGRESS)?,
            )?,
            tag_pid_sequence_nr: to_u64(
                TAG_WRITE_PROGRESS,
                TAG_PID_SEQUENCE_NR,
                row.bigint(TAG_PID_SEQUENCE_NR)
                    .decoding(TAG_WRITE_PROGRESS)?,
            )?,
            offset: row.time_uuid(OFFSET).decoding(TAG_WRITE_PROGRESS)?,
        };
        Ok((tag, progress))
    }
}

/// Per-stream metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamMetadata {
    /// Highest logically deleted sequence number (0 if none)
    pub deleted_to: u64,
    /// Free-form properties
    pub properties: BTreeMap<String, String>,
}

/// Outcome of an append.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendResult {
    /// Events written to the events table
    pub events_written: usize,
    /// Partitions written, in write order
    pub partitions: Vec<u64>,
    /// Tag rows written as (tag, sequence_nr, tag ordinal)
    pub tag_writes: Vec<(String, u64, u64)>,
}

fn payload(
    row: &Row,
    ser_id: &str,
    manifest: &str,
    bytes: &str,
    table: &'static str,
) -> JournalResult<SerializedPayload> {
    Ok(SerializedPayload {
        serializer_id: row.int(ser_id).decoding(table)?,
        manifest: row
            .opt_text(manifest)
            .decoding(table)?
            .unwrap_or_default()
            .to_string(),
        bytes: row.blob(bytes).decoding(table)?.to_vec(),
    })
}

fn meta(row: &Row, table: &'static str) -> JournalResult<Option<SerializedPayload>> {
    match row.opt_blob(META).decoding(table)? {
        Some(bytes) => Ok(Some(SerializedPayload {
            serializer_id: row.opt_int(META_SER_ID).decoding(table)?.unwrap_or_default(),
            manifest: row
                .opt_text(META_SER_MANIFEST)
                .decoding(table)?
                .unwrap_or_default()
                .to_string(),
            bytes: bytes.to_vec(),
        })),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexspaces_widecolumn::Value;

    fn messages_row() -> Row {
        Row::new()
            .with(PERSISTENCE_ID, "order-42")
            .with(PARTITION_NR, 0i64)
            .with(SEQUENCE_NR, 2i64)
            .with(TIMESTAMP, TimeUuid::start_of_millis(1_000))
            .with(TIMEBUCKET, "0")
            .with(WRITER_UUID, "w1")
            .with(SER_ID, 1001)
            .with(SER_MANIFEST, "OrderPlaced")
            .with(EVENT, vec![1u8, 2, 3])
            .with(TAGS, BTreeSet::from(["orders".to_string()]))
    }

    #[test]
    fn test_decode_messages_row() {
        let event = PersistedEvent::from_row(&messages_row()).unwrap();
        assert_eq!(event.sequence_nr, 2);
        assert_eq!(event.payload.bytes, vec![1, 2, 3]);
        assert_eq!(event.meta, None);
        assert!(event.tags.contains("orders"));
        assert_eq!(event.event_manifest, "");
    }

    #[test]
    fn test_decode_meta() {
        let row = messages_row()
            .with(META_SER_ID, 7)
            .with(META_SER_MANIFEST, "Audit")
            .with(META, vec![9u8]);
        let event = PersistedEvent::from_row(&row).unwrap();
        assert_eq!(event.meta, Some(SerializedPayload::new(7, "Audit", vec![9])));
    }

    #[test]
    fn test_decode_rejects_bad_bucket() {
        let row = messages_row().with(TIMEBUCKET, "soon");
        assert!(matches!(
            PersistedEvent::from_row(&row),
            Err(JournalError::InvalidRow { table: "messages", .. })
        ));
    }

    #[test]
    fn test_decode_rejects_missing_payload() {
        let row = messages_row().with(EVENT, Value::Null);
        assert!(PersistedEvent::from_row(&row).is_err());
    }

    #[test]
    fn test_tag_view_from_persisted() {
        let event = PersistedEvent::from_row(&messages_row()).unwrap();
        let view = TagViewEvent::from_persisted(&event, "orders", 1);
        assert_eq!(view.tag, "orders");
        assert_eq!(view.sequence_nr, 2);
        assert_eq!(view.tag_pid_sequence_nr, 1);
        assert_eq!(view.timestamp, event.timestamp);
    }
}
