// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// Tag index tests: ordinals, progress, scan points and rebuild after
// injected tag write failures

mod common;

use common::*;
use plexspaces_event_journal::*;
use plexspaces_widecolumn::{FaultKind, InMemoryWideColumnStore, TimeUuidGenerator};
use std::sync::Arc;

fn tagged(sequence_nr: u64, tags: &[&str]) -> JournalEvent {
    event(sequence_nr).with_tags(tags.iter().copied())
}

fn ordinals(rows: &[TagViewEvent]) -> Vec<(u64, u64)> {
    rows.iter()
        .map(|r| (r.sequence_nr, r.tag_pid_sequence_nr))
        .collect()
}

/// Second journal on the same store, as after a process restart.
fn restarted(store: &InMemoryWideColumnStore, config: JournalConfig) -> EventJournal {
    EventJournal::new(Arc::new(store.clone()), config).unwrap()
}

#[tokio::test]
async fn test_ordinals_are_gapless_per_tag() {
    let (_store, journal) = journal(small_partitions(3));
    let mut stream = journal.open_stream("p-1").await.unwrap();

    let result = stream
        .append(vec![
            tagged(1, &["a"]),
            tagged(2, &["a", "b"]),
            tagged(3, &[]),
            tagged(4, &["b"]),
            tagged(5, &["a", "b"]),
            tagged(6, &["a"]),
        ])
        .await
        .unwrap();

    let writes: Vec<(&str, u64, u64)> = result
        .tag_writes
        .iter()
        .map(|(tag, seq, ordinal)| (tag.as_str(), *seq, *ordinal))
        .collect();
    assert_eq!(
        writes,
        vec![
            ("a", 1, 1),
            ("a", 2, 2),
            ("b", 2, 1),
            ("b", 4, 2),
            ("a", 5, 3),
            ("b", 5, 3),
            ("a", 6, 4),
        ]
    );
    assert_eq!(stream.sequencer().last_confirmed("a"), Some(4));
    assert_eq!(stream.sequencer().last_confirmed("b"), Some(3));

    assert_eq!(
        ordinals(&tag_rows(&journal, "p-1", "a").await),
        vec![(1, 1), (2, 2), (5, 3), (6, 4)]
    );
    assert_eq!(
        ordinals(&tag_rows(&journal, "p-1", "b").await),
        vec![(2, 1), (4, 2), (5, 3)]
    );

    let checkpoint = journal.scanning().checkpoint("p-1").await.unwrap().unwrap();
    assert_eq!(checkpoint.sequence_nr, 6);
    assert_eq!(checkpoint.ordinals["a"], 4);
    assert_eq!(checkpoint.ordinals["b"], 3);
}

#[tokio::test]
async fn test_ordinals_are_independent_per_stream() {
    let (_store, journal) = journal(small_partitions(5));
    let mut first = journal.open_stream("p-1").await.unwrap();
    let mut second = journal.open_stream("p-2").await.unwrap();

    first.append(vec![tagged(1, &["orders"])]).await.unwrap();
    second
        .append(vec![tagged(1, &["orders"]), tagged(2, &["orders"])])
        .await
        .unwrap();
    first.append(vec![tagged(2, &["orders"])]).await.unwrap();

    assert_eq!(
        ordinals(&tag_rows(&journal, "p-1", "orders").await),
        vec![(1, 1), (2, 2)]
    );
    assert_eq!(
        ordinals(&tag_rows(&journal, "p-2", "orders").await),
        vec![(1, 1), (2, 2)]
    );
}

#[tokio::test]
async fn test_reopen_continues_after_last_confirmed() {
    let (store, journal) = journal(small_partitions(5));
    let mut stream = journal.open_stream("p-1").await.unwrap();
    stream
        .append((1..=3).map(|n| tagged(n, &["orders"])).collect())
        .await
        .unwrap();
    drop(stream);

    let journal = restarted(&store, small_partitions(5));
    let mut stream = journal.open_stream("p-1").await.unwrap();
    assert_eq!(stream.sequencer().candidate("orders"), 4);
    assert_eq!(stream.sequencer().candidate("never-used"), 1);

    let result = stream.append(vec![tagged(4, &["orders"])]).await.unwrap();
    assert_eq!(result.tag_writes, vec![("orders".to_string(), 4, 4)]);
    assert_eq!(
        ordinals(&tag_rows(&journal, "p-1", "orders").await),
        vec![(1, 1), (2, 2), (3, 3), (4, 4)]
    );
}

#[tokio::test]
async fn test_failed_tag_write_keeps_event_and_candidate() {
    let (store, journal) = journal(small_partitions(5));
    let mut stream = journal.open_stream("p-1").await.unwrap();
    stream.append(vec![tagged(1, &["orders"])]).await.unwrap();

    store
        .inject_fault("INSERT INTO journal_test.tag_views", FaultKind::Unavailable, 1)
        .await;
    let err = stream.append(vec![tagged(2, &["orders"])]).await.unwrap_err();

    assert!(matches!(err, JournalError::Storage { step: "write tag_views", .. }));
    assert!(journal.read_event("p-1", 2).await.unwrap().is_some());
    // the failed ordinal is not confirmed
    assert_eq!(stream.sequencer().candidate("orders"), 2);
    assert_eq!(ordinals(&tag_rows(&journal, "p-1", "orders").await), vec![(1, 1)]);
}

#[tokio::test]
async fn test_append_after_failed_tag_write_indexes_the_gap() {
    let (store, journal) = journal(small_partitions(5));
    let mut stream = journal.open_stream("p-1").await.unwrap();
    stream.append(vec![tagged(1, &["orders"])]).await.unwrap();

    store
        .inject_fault("INSERT INTO journal_test.tag_views", FaultKind::Unavailable, 1)
        .await;
    stream.append(vec![tagged(2, &["orders"])]).await.unwrap_err();
    assert!(stream.needs_rebuild());

    // the same handle keeps writing; event 2 is indexed before event 3
    let result = stream.append(vec![tagged(3, &["orders"])]).await.unwrap();
    assert_eq!(result.tag_writes, vec![("orders".to_string(), 3, 3)]);
    assert!(!stream.needs_rebuild());
    assert_eq!(
        ordinals(&tag_rows(&journal, "p-1", "orders").await),
        vec![(1, 1), (2, 2), (3, 3)]
    );
    drop(stream);

    let journal = restarted(&store, small_partitions(5));
    let rebuild = journal.rebuild_tags("p-1").await.unwrap();
    assert_eq!(rebuild.rewritten, 0);
    assert_eq!(rebuild.sequencer.candidate("orders"), 4);
    assert_eq!(
        ordinals(&tag_rows(&journal, "p-1", "orders").await),
        vec![(1, 1), (2, 2), (3, 3)]
    );
}

#[tokio::test]
async fn test_failed_event_write_is_indexed_before_next_append() {
    let (store, journal) = journal(small_partitions(5));
    let mut stream = journal.open_stream("p-1").await.unwrap();

    // partition 0 (events 4 and 5) lands, partition 1 fails
    store
        .inject_fault("VALUES ('p-1', 1, 6", FaultKind::WriteTimeout, 1)
        .await;
    let err = stream
        .append(vec![tagged(4, &["orders"]), event(5), tagged(6, &["orders"]), event(7)])
        .await
        .unwrap_err();
    assert!(matches!(err, JournalError::Storage { step: "write messages", .. }));
    assert!(tag_rows(&journal, "p-1", "orders").await.is_empty());

    let result = stream
        .append(vec![tagged(6, &["orders"]), event(7)])
        .await
        .unwrap();
    assert_eq!(result.tag_writes, vec![("orders".to_string(), 6, 2)]);
    assert_eq!(
        ordinals(&tag_rows(&journal, "p-1", "orders").await),
        vec![(4, 1), (6, 2)]
    );
}

#[tokio::test]
async fn test_writer_never_touches_consumer_progress() {
    let (store, journal) = journal(small_partitions(5));
    let mut stream = journal.open_stream("order-42").await.unwrap();
    let batch = (1..=5)
        .map(|n| match n {
            2 | 4 => tagged(n, &["orders"]),
            _ => event(n),
        })
        .collect();
    stream.append(batch).await.unwrap();

    let tracker = journal.progress();
    assert_eq!(tracker.progress_for("order-42", "orders").await.unwrap(), None);

    // the consumer processed the first tagged event only
    let rows = tag_rows(&journal, "order-42", "orders").await;
    let first = TagProgress {
        sequence_nr: rows[0].sequence_nr,
        tag_pid_sequence_nr: rows[0].tag_pid_sequence_nr,
        offset: rows[0].timestamp,
    };
    assert_eq!(
        tracker.advance("order-42", "orders", first).await.unwrap(),
        AdvanceOutcome::Advanced
    );

    stream.append(vec![tagged(6, &["orders"])]).await.unwrap();
    assert_eq!(
        tracker.progress_for("order-42", "orders").await.unwrap(),
        Some(first)
    );

    // a restarted consumer resumes after ordinal 1 and still sees event 4
    let stored = tracker.progress_for("order-42", "orders").await.unwrap().unwrap();
    let pending: Vec<(u64, u64)> = ordinals(&tag_rows(&journal, "order-42", "orders").await)
        .into_iter()
        .filter(|(_, ordinal)| *ordinal > stored.tag_pid_sequence_nr)
        .collect();
    assert_eq!(pending, vec![(4, 2), (6, 3)]);

    let second = TagProgress {
        sequence_nr: rows[1].sequence_nr,
        tag_pid_sequence_nr: rows[1].tag_pid_sequence_nr,
        offset: rows[1].timestamp,
    };
    assert_eq!(
        tracker.advance("order-42", "orders", second).await.unwrap(),
        AdvanceOutcome::Advanced
    );

    // reopening reads progress but writes none
    let writes_before = store.count_executed("INSERT INTO journal_test.tag_write_progress").await;
    let journal = restarted(&store, small_partitions(5));
    let stream = journal.open_stream("order-42").await.unwrap();
    assert_eq!(stream.sequencer().candidate("orders"), 4);
    assert_eq!(
        store.count_executed("INSERT INTO journal_test.tag_write_progress").await,
        writes_before
    );
    assert_eq!(
        journal.progress().progress_for("order-42", "orders").await.unwrap(),
        Some(second)
    );
}

#[tokio::test]
async fn test_reopen_seeds_counters_from_consumer_progress() {
    let (store, journal) = journal(small_partitions(5));
    journal.bootstrapper().ensure_schema().await.unwrap();
    let progress = TagProgress {
        sequence_nr: 40,
        tag_pid_sequence_nr: 7,
        offset: TimeUuidGenerator::new().now(),
    };
    journal
        .progress()
        .advance("p-1", "orders", progress)
        .await
        .unwrap();

    let journal = restarted(&store, small_partitions(5));
    let mut stream = journal.open_stream("p-1").await.unwrap();
    assert_eq!(stream.sequencer().candidate("orders"), 8);

    let result = stream.append(vec![tagged(41, &["orders"])]).await.unwrap();
    assert_eq!(result.tag_writes, vec![("orders".to_string(), 41, 8)]);
}

#[tokio::test]
async fn test_append_moves_scan_point() {
    let (store, journal) = journal(small_partitions(5));
    let mut stream = journal.open_stream("p-1").await.unwrap();
    stream
        .append(vec![tagged(1, &["orders"]), event(2), tagged(3, &["orders"])])
        .await
        .unwrap();
    assert_eq!(journal.scanning().scan_point("p-1").await.unwrap(), Some(3));
    drop(stream);

    let reads_before = store.count_executed("FROM journal_test.tag_views").await;
    let journal = restarted(&store, small_partitions(5));
    let rebuild = journal.rebuild_tags("p-1").await.unwrap();

    assert_eq!(rebuild.scanned_from, 4);
    assert_eq!(rebuild.scanned_to, 3);
    assert_eq!(rebuild.sequencer.candidate("orders"), 3);
    // nothing after the scan point, so no tag row is looked up
    assert_eq!(
        store.count_executed("FROM journal_test.tag_views").await,
        reads_before
    );
}

#[tokio::test]
async fn test_checkpoint_ordinals_never_decrease() {
    let (_store, journal) = journal(small_partitions(5));
    journal.bootstrapper().ensure_schema().await.unwrap();
    let scanning = journal.scanning();
    let at = |sequence_nr, orders| ScanPoint {
        sequence_nr,
        ordinals: [("orders".to_string(), orders)].into_iter().collect(),
    };

    scanning.record_checkpoint("p-1", &at(5, 3)).await.unwrap();
    let stored = scanning.record_checkpoint("p-1", &at(6, 2)).await.unwrap();
    assert_eq!(stored, at(6, 3));
    let stale = scanning.record_checkpoint("p-1", &at(4, 9)).await.unwrap();
    assert_eq!(stale, at(6, 3));

    // a bare scan point keeps the ordinals
    assert_eq!(scanning.record_scan_point("p-1", 8).await.unwrap(), 8);
    assert_eq!(scanning.checkpoint("p-1").await.unwrap(), Some(at(8, 3)));
}

#[tokio::test]
async fn test_reopen_rebuilds_missing_tag_rows() {
    let (store, journal) = journal(small_partitions(5));
    let original_writer = journal.writer_uuid().to_string();
    let mut stream = journal.open_stream("p-1").await.unwrap();
    stream
        .append(vec![tagged(1, &["orders"]), tagged(2, &["orders"])])
        .await
        .unwrap();

    store
        .inject_fault("INSERT INTO journal_test.tag_views", FaultKind::WriteTimeout, 1)
        .await;
    stream
        .append(vec![tagged(3, &["orders"]), event(4), tagged(5, &["orders"])])
        .await
        .unwrap_err();
    drop(stream);

    let journal = restarted(&store, small_partitions(5));
    let rebuild = journal.rebuild_tags("p-1").await.unwrap();
    assert_eq!(rebuild.scanned_from, 3);
    assert_eq!(rebuild.scanned_to, 5);
    assert_eq!(rebuild.rewritten, 2);
    assert_eq!(rebuild.ordinals["orders"], 4);
    assert_eq!(rebuild.sequencer.candidate("orders"), 5);
    // consumer progress is left to the consumer
    assert!(journal
        .progress()
        .progress_for("p-1", "orders")
        .await
        .unwrap()
        .is_none());

    let rows = tag_rows(&journal, "p-1", "orders").await;
    assert_eq!(ordinals(&rows), vec![(1, 1), (2, 2), (3, 3), (5, 4)]);
    // rebuilt rows mirror the stored event
    assert_eq!(rows[2].writer_uuid, original_writer);
    assert_eq!(journal.scanning().scan_point("p-1").await.unwrap(), Some(5));
}

#[tokio::test]
async fn test_rebuild_writes_only_missing_rows() {
    let (store, journal) = journal(small_partitions(5));
    let mut stream = journal.open_stream("p-1").await.unwrap();
    stream.append(vec![tagged(1, &["orders"])]).await.unwrap();

    // the orders row of event 2 lands, the shipping row fails
    store
        .inject_fault("VALUES ('shipping'", FaultKind::Unavailable, 1)
        .await;
    stream
        .append(vec![tagged(2, &["orders", "shipping"])])
        .await
        .unwrap_err();
    assert_eq!(
        ordinals(&tag_rows(&journal, "p-1", "orders").await),
        vec![(1, 1), (2, 2)]
    );
    assert!(stream.needs_rebuild());

    let rewritten = stream.rebuild_tags().await.unwrap();

    assert_eq!(rewritten, 1);
    assert!(!stream.needs_rebuild());
    assert_eq!(
        ordinals(&tag_rows(&journal, "p-1", "shipping").await),
        vec![(2, 1)]
    );
    assert_eq!(
        ordinals(&tag_rows(&journal, "p-1", "orders").await),
        vec![(1, 1), (2, 2)]
    );
    assert_eq!(stream.sequencer().candidate("shipping"), 2);
    assert_eq!(stream.sequencer().candidate("orders"), 3);

    let result = stream.append(vec![tagged(3, &["orders"])]).await.unwrap();
    assert_eq!(result.tag_writes, vec![("orders".to_string(), 3, 3)]);
}

#[tokio::test]
async fn test_rebuild_after_scan_point_is_noop() {
    let (_store, journal) = journal(small_partitions(5));
    let mut stream = journal.open_stream("p-1").await.unwrap();
    stream
        .append((1..=4).map(|n| tagged(n, &["orders"])).collect())
        .await
        .unwrap();

    // the append already moved the scan point
    let first = journal.rebuild_tags("p-1").await.unwrap();
    assert_eq!(first.scanned_from, 5);
    assert_eq!(first.rewritten, 0);
    assert_eq!(first.scanned_to, 4);

    let second = journal.rebuild_tags("p-1").await.unwrap();
    assert_eq!(second.scanned_from, 5);
    assert_eq!(second.scanned_to, 4);
    assert_eq!(second.rewritten, 0);
    assert_eq!(second.sequencer.candidate("orders"), 5);
}

#[tokio::test]
async fn test_scan_point_never_moves_back() {
    let (_store, journal) = journal(small_partitions(5));
    journal.bootstrapper().ensure_schema().await.unwrap();
    let scanning = journal.scanning();

    assert_eq!(scanning.scan_point("p-1").await.unwrap(), None);
    assert_eq!(scanning.record_scan_point("p-1", 5).await.unwrap(), 5);
    assert_eq!(scanning.record_scan_point("p-1", 3).await.unwrap(), 5);
    assert_eq!(scanning.scan_point("p-1").await.unwrap(), Some(5));
    assert_eq!(scanning.record_scan_point("p-1", 8).await.unwrap(), 8);
    assert_eq!(scanning.scan_point("p-2").await.unwrap(), None);
}

#[tokio::test]
async fn test_advance_is_idempotent_and_never_regresses() {
    let (_store, journal) = journal(small_partitions(5));
    journal.bootstrapper().ensure_schema().await.unwrap();
    let tracker = journal.progress();
    let ids = TimeUuidGenerator::new();
    let at = |sequence_nr, tag_pid_sequence_nr| TagProgress {
        sequence_nr,
        tag_pid_sequence_nr,
        offset: ids.now(),
    };

    let first = at(5, 2);
    assert_eq!(
        tracker.advance("p-1", "orders", first).await.unwrap(),
        AdvanceOutcome::Advanced
    );
    assert_eq!(
        tracker.advance("p-1", "orders", first).await.unwrap(),
        AdvanceOutcome::Unchanged
    );

    let lower_sequence_nr = at(4, 3);
    assert_eq!(
        tracker.advance("p-1", "orders", lower_sequence_nr).await.unwrap(),
        AdvanceOutcome::Stale { stored: first }
    );
    let lower_ordinal = at(5, 1);
    assert_eq!(
        tracker.advance("p-1", "orders", lower_ordinal).await.unwrap(),
        AdvanceOutcome::Stale { stored: first }
    );
    assert_eq!(
        tracker.progress_for("p-1", "orders").await.unwrap(),
        Some(first)
    );

    let next = at(9, 3);
    assert_eq!(
        tracker.advance("p-1", "orders", next).await.unwrap(),
        AdvanceOutcome::Advanced
    );
    tracker.advance("p-1", "audit", at(1, 1)).await.unwrap();

    let all = tracker.progress_for_persistence_id("p-1").await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all["orders"], next);
    assert_eq!(all["audit"].sequence_nr, 1);
}

#[tokio::test]
async fn test_tag_rows_use_primary_bucket() {
    let config = JournalConfig::builder()
        .keyspace("journal_test")
        .bucket_size(BucketSize::Minute)
        .build();
    let (_store, journal) = journal(config);
    let mut stream = journal.open_stream("p-1").await.unwrap();
    stream.append(vec![tagged(1, &["orders"])]).await.unwrap();

    let stored = journal.read_event("p-1", 1).await.unwrap().unwrap();
    let bucket = TimeBucket::from_time_uuid(&stored.timestamp, BucketSize::Minute);
    assert_eq!(stored.time_bucket, bucket.key());

    let rows = journal.tag_views().read_bucket("orders", bucket).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].timestamp, stored.timestamp);
    assert_eq!(rows[0].time_bucket, bucket.key());
    assert!(journal
        .tag_views()
        .read_bucket("orders", bucket.next())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_disabled_tag_index_writes_no_tag_rows() {
    let config = JournalConfig::builder()
        .keyspace("journal_test")
        .events_by_tag(false)
        .build();
    let (store, journal) = journal(config);
    let mut stream = journal.open_stream("p-1").await.unwrap();

    let result = stream.append(vec![tagged(1, &["orders"])]).await.unwrap();

    assert!(result.tag_writes.is_empty());
    assert!(!store.has_table("journal_test.tag_views").await);
    assert_eq!(store.count_executed("journal_test.tag_").await, 0);
    // tags stay on the event itself
    let stored = journal.read_event("p-1", 1).await.unwrap().unwrap();
    assert!(stored.tags.contains("orders"));
    assert!(matches!(
        journal.rebuild_tags("p-1").await,
        Err(JournalError::Configuration(_))
    ));
}
