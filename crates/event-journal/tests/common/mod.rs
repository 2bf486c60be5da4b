// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// Shared helpers for event journal integration tests

#![allow(dead_code)]

use plexspaces_event_journal::*;
use plexspaces_widecolumn::InMemoryWideColumnStore;
use std::collections::BTreeSet;
use std::sync::{Arc, Once};

static TRACING: Once = Once::new();

/// Install a test subscriber once; `RUST_LOG` controls the filter.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Journal on a fresh in-memory store.
pub fn journal(config: JournalConfig) -> (InMemoryWideColumnStore, EventJournal) {
    init_tracing();
    let store = InMemoryWideColumnStore::new();
    let journal = EventJournal::new(Arc::new(store.clone()), config).unwrap();
    (store, journal)
}

/// Config with small partitions.
pub fn small_partitions(size: u64) -> JournalConfig {
    JournalConfig::builder()
        .keyspace("journal_test")
        .target_partition_size(size)
        .build()
}

/// Event with a JSON-ish payload naming its sequence number.
pub fn event(sequence_nr: u64) -> JournalEvent {
    JournalEvent::new(
        sequence_nr,
        SerializedPayload::new(
            1001,
            "TestEvent",
            format!("{{\"n\":{}}}", sequence_nr).into_bytes(),
        ),
    )
}

/// Events `from..=to`.
pub fn events(from: u64, to: u64) -> Vec<JournalEvent> {
    (from..=to).map(event).collect()
}

/// Sequence numbers of replayed events.
pub fn sequence_nrs(events: &[PersistedEvent]) -> Vec<u64> {
    events.iter().map(|e| e.sequence_nr).collect()
}

/// Tag rows of one stream under `tag`, by ordinal.
pub async fn tag_rows(journal: &EventJournal, pid: &str, tag: &str) -> Vec<TagViewEvent> {
    let bucket_size = journal.config().events_by_tag.bucket_size;
    let buckets: BTreeSet<i64> = journal
        .replay(pid, 1, u64::MAX, usize::MAX)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.time_bucket)
        .collect();
    let mut rows = Vec::new();
    for key in buckets {
        rows.extend(
            journal
                .tag_views()
                .read_bucket(tag, TimeBucket::from_key(key, bucket_size))
                .await
                .unwrap()
                .into_iter()
                .filter(|row| row.persistence_id == pid),
        );
    }
    rows.sort_by_key(|row| row.tag_pid_sequence_nr);
    rows
}
