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

//! Table layout of the journal.
//!
//! ```text
//! messages            ((persistence_id, partition_nr), sequence_nr, timestamp, timebucket)
//! metadata            (persistence_id)
//! tag_views           ((tag_name, timebucket), timestamp, persistence_id, tag_pid_sequence_nr)
//! tag_write_progress  (persistence_id, tag)
//! tag_scanning        (persistence_id) + last ordinal per tag
//! ```

use crate::config::JournalConfig;
use plexspaces_widecolumn::statement::{ColumnType, TableSchema};
use plexspaces_widecolumn::Statement;

/// Column names.
pub mod columns {
    /// Stream id
    pub const PERSISTENCE_ID: &str = "persistence_id";
    /// Partition of the stream
    pub const PARTITION_NR: &str = "partition_nr";
    /// Stream sequence number
    pub const SEQUENCE_NR: &str = "sequence_nr";
    /// Time UUID of the write
    pub const TIMESTAMP: &str = "timestamp";
    /// Time bucket of the write
    pub const TIMEBUCKET: &str = "timebucket";
    /// Writer instance id
    pub const WRITER_UUID: &str = "writer_uuid";
    /// Payload serializer id
    pub const SER_ID: &str = "ser_id";
    /// Payload manifest
    pub const SER_MANIFEST: &str = "ser_manifest";
    /// Event adapter manifest
    pub const EVENT_MANIFEST: &str = "event_manifest";
    /// Payload bytes
    pub const EVENT: &str = "event";
    /// Metadata serializer id
    pub const META_SER_ID: &str = "meta_ser_id";
    /// Metadata manifest
    pub const META_SER_MANIFEST: &str = "meta_ser_manifest";
    /// Metadata bytes
    pub const META: &str = "meta";
    /// Tags of the event
    pub const TAGS: &str = "tags";
    /// Static partition marker
    pub const USED: &str = "used";
    /// Logical delete watermark
    pub const DELETED_TO: &str = "deleted_to";
    /// Stream properties
    pub const PROPERTIES: &str = "properties";
    /// Tag name (tag index)
    pub const TAG_NAME: &str = "tag_name";
    /// Tag name (progress)
    pub const TAG: &str = "tag";
    /// Per-(stream, tag) ordinal
    pub const TAG_PID_SEQUENCE_NR: &str = "tag_pid_sequence_nr";
    /// Last written ordinal per tag at the scan point
    pub const TAG_PID_SEQUENCE_NRS: &str = "tag_pid_sequence_nrs";
    /// Resume offset
    pub const OFFSET: &str = "offset";
}

use columns::*;

/// Qualified table names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables {
    /// Keyspace
    pub keyspace: String,
    /// `<ks>.messages`
    pub messages: String,
    /// `<ks>.metadata`
    pub metadata: String,
    /// `<ks>.tag_views`
    pub tag_views: String,
    /// `<ks>.tag_write_progress`
    pub tag_write_progress: String,
    /// `<ks>.tag_scanning`
    pub tag_scanning: String,
}

impl Tables {
    /// Qualified names for a configuration.
    pub fn new(config: &JournalConfig) -> Self {
        let qualify = |table: &str| format!("{}.{}", config.keyspace, table);
        Self {
            keyspace: config.keyspace.clone(),
            messages: qualify(&config.table),
            metadata: qualify(&config.metadata_table),
            tag_views: qualify(&config.events_by_tag.table),
            tag_write_progress: qualify(&config.events_by_tag.progress_table),
            tag_scanning: qualify(&config.events_by_tag.scanning_table),
        }
    }
}

/// `CREATE KEYSPACE` for the journal keyspace.
pub fn create_keyspace(config: &JournalConfig) -> Statement {
    Statement::CreateKeyspace {
        name: config.keyspace.clone(),
        replication: config.replication.to_cql(),
    }
}

/// Events table.
pub fn messages_table(config: &JournalConfig) -> TableSchema {
    let schema = TableSchema::new(&config.keyspace, &config.table)
        .partition_key(PERSISTENCE_ID, ColumnType::Text)
        .partition_key(PARTITION_NR, ColumnType::BigInt)
        .clustering(SEQUENCE_NR, ColumnType::BigInt)
        .clustering(TIMESTAMP, ColumnType::TimeUuid)
        .clustering(TIMEBUCKET, ColumnType::Text)
        .regular(WRITER_UUID, ColumnType::Text)
        .regular(SER_ID, ColumnType::Int)
        .regular(SER_MANIFEST, ColumnType::Text)
        .regular(EVENT_MANIFEST, ColumnType::Text)
        .regular(EVENT, ColumnType::Blob)
        .regular(META_SER_ID, ColumnType::Int)
        .regular(META_SER_MANIFEST, ColumnType::Text)
        .regular(META, ColumnType::Blob)
        .regular(TAGS, ColumnType::TextSet)
        .static_column(USED, ColumnType::Boolean);
    with_options(schema, config.settings.table_options())
}

/// Per-stream metadata table.
pub fn metadata_table(config: &JournalConfig) -> TableSchema {
    TableSchema::new(&config.keyspace, &config.metadata_table)
        .partition_key(PERSISTENCE_ID, ColumnType::Text)
        .regular(DELETED_TO, ColumnType::BigInt)
        .regular(PROPERTIES, ColumnType::TextMap)
}

/// Tag index table.
pub fn tag_views_table(config: &JournalConfig) -> TableSchema {
    let schema = TableSchema::new(&config.keyspace, &config.events_by_tag.table)
        .partition_key(TAG_NAME, ColumnType::Text)
        .partition_key(TIMEBUCKET, ColumnType::BigInt)
        .clustering(TIMESTAMP, ColumnType::TimeUuid)
        .clustering(PERSISTENCE_ID, ColumnType::Text)
        .clustering(TAG_PID_SEQUENCE_NR, ColumnType::BigInt)
        .regular(SEQUENCE_NR, ColumnType::BigInt)
        .regular(WRITER_UUID, ColumnType::Text)
        .regular(SER_ID, ColumnType::Int)
        .regular(SER_MANIFEST, ColumnType::Text)
        .regular(EVENT_MANIFEST, ColumnType::Text)
        .regular(EVENT, ColumnType::Blob)
        .regular(META_SER_ID, ColumnType::Int)
        .regular(META_SER_MANIFEST, ColumnType::Text)
        .regular(META, ColumnType::Blob);
    with_options(schema, config.events_by_tag.settings.table_options())
}

/// Tag progress table.
pub fn tag_write_progress_table(config: &JournalConfig) -> TableSchema {
    TableSchema::new(&config.keyspace, &config.events_by_tag.progress_table)
        .partition_key(PERSISTENCE_ID, ColumnType::Text)
        .clustering(TAG, ColumnType::Text)
        .regular(SEQUENCE_NR, ColumnType::BigInt)
        .regular(TAG_PID_SEQUENCE_NR, ColumnType::BigInt)
        .regular(OFFSET, ColumnType::TimeUuid)
}

/// Tag scan point table.
pub fn tag_scanning_table(config: &JournalConfig) -> TableSchema {
    TableSchema::new(&config.keyspace, &config.events_by_tag.scanning_table)
        .partition_key(PERSISTENCE_ID, ColumnType::Text)
        .regular(SEQUENCE_NR, ColumnType::BigInt)
        .regular(TAG_PID_SEQUENCE_NRS, ColumnType::BigIntMap)
}

fn with_options(schema: TableSchema, options: Vec<String>) -> TableSchema {
    options
        .into_iter()
        .fold(schema, |schema, option| schema.with_option(option))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_ddl() {
        let cql = messages_table(&JournalConfig::default()).to_cql();
        assert!(cql.starts_with("CREATE TABLE IF NOT EXISTS plexspaces_journal.messages ("));
        assert!(cql.contains("used boolean static"));
        assert!(cql.contains("tags set<text>"));
        assert!(cql.contains(
            "PRIMARY KEY ((persistence_id, partition_nr), sequence_nr, timestamp, timebucket)"
        ));
        assert!(cql.contains("gc_grace_seconds = 864000"));
    }

    #[test]
    fn test_tag_views_ddl() {
        let cql = tag_views_table(&JournalConfig::default()).to_cql();
        assert!(cql.contains(
            "PRIMARY KEY ((tag_name, timebucket), timestamp, persistence_id, tag_pid_sequence_nr)"
        ));
        assert!(cql.contains("timebucket bigint"));
    }

    #[test]
    fn test_single_key_tables() {
        let config = JournalConfig::default();
        assert!(metadata_table(&config)
            .to_cql()
            .contains("PRIMARY KEY (persistence_id)"));
        assert!(tag_write_progress_table(&config)
            .to_cql()
            .contains("PRIMARY KEY (persistence_id, tag)"));
        let scanning = tag_scanning_table(&config).to_cql();
        assert!(scanning.contains("PRIMARY KEY (persistence_id)"));
        assert!(scanning.contains("tag_pid_sequence_nrs map<text, bigint>"));
    }

    #[test]
    fn test_qualified_names() {
        let config = JournalConfig::builder().keyspace("orders").build();
        let tables = Tables::new(&config);
        assert_eq!(tables.messages, "orders.messages");
        assert_eq!(tables.tag_write_progress, "orders.tag_write_progress");
    }
}
