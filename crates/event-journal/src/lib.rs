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

//! # PlexSpaces Event Journal
//!
//! ## Purpose
//! Append-only event journal for event-sourced actors on a partitioned,
//! eventually-consistent wide-column store, with a cross-stream tag index.
//!
//! ## Architecture Context
//! Each stream (persistence id) is written by one [`StreamWriter`]. Events go
//! to the `messages` table, spread over fixed-size partitions. Tagged events
//! are also written to `tag_views`, partitioned by (tag, time bucket), with a
//! per-(stream, tag) ordinal that lets readers spot gaps. The store has no
//! cross-partition transactions, so the two writes are independent upserts
//! and [`EventJournal::rebuild_tags`] repairs the index from the events.
//!
//! ```text
//!             ┌──────────────┐                   ┌──────────────┐
//!             │ StreamWriter │ (one per stream)  │ tag consumer │
//!             └──────┬───────┘                   └──────┬───────┘
//!      ┌─────────────┼───────────────┐                  │ advance
//!      v             v               v                  v
//!  messages      tag_views     tag_scanning     tag_write_progress
//!  metadata
//! ```
//!
//! ## Key Components
//! - [`EventJournal`]: writer handles, highest sequence number, replay,
//!   deletes, payload updates, metadata
//! - [`StreamWriter`]: appends for one stream; owns its [`TagSequencer`]
//! - [`TagViewStore`], [`TagProgressTracker`], [`TagScanningRecovery`]: tag
//!   index, consumer progress and scan points
//! - [`SchemaBootstrapper`]: one-time, serialized schema creation
//! - [`PartitionMapper`], [`TimeBucket`]: key derivation
//! - [`JournalConfig`]: configuration and retention settings

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod config;
mod error;
pub mod journal;
pub mod model;
pub mod partition;
pub mod retention;
pub mod schema;
pub mod tables;
pub mod tag_progress;
pub mod tag_scanning;
pub mod tag_sequencer;
pub mod time_bucket;

pub use codec::{JsonPayloadCodec, PayloadCodec, SerializedPayload};
pub use config::{EventsByTagConfig, JournalConfig, JournalConfigBuilder, ReplicationStrategy};
pub use error::{JournalError, JournalResult};
pub use journal::{EventJournal, PartitionSearch, StreamWriter};
pub use model::{
    AppendResult, JournalEvent, PayloadUpdate, PersistedEvent, StreamMetadata, TagProgress,
    TagViewEvent,
};
pub use partition::PartitionMapper;
pub use retention::{CompactionStrategy, DeleteMode, TableSettings};
pub use schema::{SchemaBootstrapper, SchemaState};
pub use tag_progress::{AdvanceOutcome, TagProgressTracker};
pub use tag_scanning::{ScanPoint, TagRebuild, TagScanningRecovery};
pub use tag_sequencer::{TagSequencer, TagViewStore};
pub use time_bucket::{BucketSize, TimeBucket};
