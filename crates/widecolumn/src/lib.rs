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

//! # PlexSpaces Wide-Column Session
//!
//! ## Purpose
//! Defines the contract between PlexSpaces storage layers and a partitioned,
//! eventually-consistent wide-column store (Cassandra/ScyllaDB style):
//! typed values, structured statements and the [`WideColumnSession`] trait.
//!
//! ## Architecture Context
//! Connection pooling, query execution and transport retries belong to the
//! driver behind the session. Layers above (the event journal) only build
//! [`Statement`]s and read [`Row`]s.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ plexspaces-event-journal     │  builds statements
//! └──────────────┬───────────────┘
//!                │ WideColumnSession::execute
//!                v
//! ┌──────────────────────────────┐
//! │ driver session / in-memory   │
//! └──────────────────────────────┘
//! ```
//!
//! ## Key Components
//! - [`WideColumnSession`]: execute one statement, get rows back
//! - [`Statement`]: DDL, DML and single-partition batches, renderable as CQL
//! - [`Value`], [`Row`], [`ResultSet`]: typed data
//! - [`TimeUuid`], [`TimeUuidGenerator`]: time-ordered ids
//! - [`InMemoryWideColumnStore`]: reference session for tests
//!
//! ## Examples
//! ```rust
//! use plexspaces_widecolumn::*;
//! use plexspaces_widecolumn::statement::{ColumnType, Insert, Select, TableSchema};
//!
//! # async fn example() -> StoreResult<()> {
//! let store = InMemoryWideColumnStore::new();
//! store
//!     .execute(&Statement::CreateKeyspace {
//!         name: "ks".to_string(),
//!         replication: "{'class': 'SimpleStrategy', 'replication_factor': 1}".to_string(),
//!     })
//!     .await?;
//! let table = TableSchema::new("ks", "kv")
//!     .partition_key("k", ColumnType::Text)
//!     .regular("v", ColumnType::Blob);
//! store.execute(&table.into()).await?;
//!
//! store
//!     .execute(&Insert::into_table("ks.kv").value("k", "a").value("v", vec![1u8]).into())
//!     .await?;
//! let rows = store
//!     .execute(&Select::from_table("ks.kv").where_eq("k", "a").into())
//!     .await?;
//! assert_eq!(rows.first().unwrap().blob("v")?, &[1u8]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use async_trait::async_trait;
use std::sync::Arc;

pub mod error;
pub mod memory;
pub mod statement;
pub mod value;

pub use error::{StoreError, StoreResult};
pub use memory::{FaultKind, InMemoryWideColumnStore};
pub use statement::Statement;
pub use value::{ResultSet, Row, TimeUuid, TimeUuidGenerator, Value};

/// Session against a wide-column store.
///
/// ## Design Notes
/// - One request, one response; no implicit retries
/// - Timeouts are the session's responsibility and surface as
///   [`StoreError::WriteTimeout`] / [`StoreError::ReadTimeout`]
/// - A [`Statement::Batch`] is applied atomically (single partition)
#[async_trait]
pub trait WideColumnSession: Send + Sync {
    /// Execute a statement.
    ///
    /// ## Returns
    /// Selected rows, or an empty [`ResultSet`] for writes and DDL.
    async fn execute(&self, statement: &Statement) -> StoreResult<ResultSet>;
}

#[async_trait]
impl<T: WideColumnSession + ?Sized> WideColumnSession for Arc<T> {
    async fn execute(&self, statement: &Statement) -> StoreResult<ResultSet> {
        (**self).execute(statement).await
    }
}
