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

//! One-time schema creation.
//!
//! ## Purpose
//! Creates the keyspace and tables before first use. Concurrent schema
//! changes against the same store can leave disagreeing schema versions, so
//! every caller in the process goes through one execution slot.
//!
//! ## State Machine
//! ```text
//! Uninitialized ──ensure_schema──> Creating ──ok──> Ready
//!       ^                              │
//!       └────────── failed twice ──────┘
//! ```
//!
//! The slot is a `tokio::sync::Mutex` holding the state. Waiters are queued
//! FIFO; whoever takes the slot while the state is `Ready` returns without
//! issuing any statement.

use crate::config::JournalConfig;
use crate::tables;
use crate::{JournalError, JournalResult};
use plexspaces_widecolumn::{Statement, StoreError, WideColumnSession};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Attempts of the whole creation sequence.
const MAX_ATTEMPTS: usize = 2;

/// Bootstrap state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaState {
    /// Nothing created yet (or the last attempt failed)
    Uninitialized,
    /// A caller holds the slot and is creating the schema
    Creating,
    /// Schema exists
    Ready,
}

/// Creates the journal schema once per process.
///
/// Clones share the execution slot, so a write side and a read side built
/// from the same bootstrapper never issue schema changes concurrently.
#[derive(Clone)]
pub struct SchemaBootstrapper {
    session: Arc<dyn WideColumnSession>,
    config: Arc<JournalConfig>,
    slot: Arc<Mutex<SchemaState>>,
    ready: Arc<AtomicBool>,
}

impl SchemaBootstrapper {
    /// Create a bootstrapper in state [`SchemaState::Uninitialized`].
    pub fn new(session: Arc<dyn WideColumnSession>, config: Arc<JournalConfig>) -> Self {
        Self {
            session,
            config,
            slot: Arc::new(Mutex::new(SchemaState::Uninitialized)),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current state. Reports `Creating` while a caller holds the slot.
    pub fn state(&self) -> SchemaState {
        match self.slot.try_lock() {
            Ok(state) => *state,
            Err(_) => SchemaState::Creating,
        }
    }

    /// Ordered creation plan as (step name, statement).
    ///
    /// Keyspace first, then the events and metadata tables, then the tag
    /// tables when the tag index is enabled.
    pub fn plan(&self) -> Vec<(String, Statement)> {
        let config = &self.config;
        let mut plan = Vec::new();
        if config.keyspace_autocreate {
            plan.push((
                format!("keyspace {}", config.keyspace),
                tables::create_keyspace(config),
            ));
        }
        if config.tables_autocreate {
            let mut schemas = vec![tables::messages_table(config), tables::metadata_table(config)];
            if config.events_by_tag.enabled {
                schemas.push(tables::tag_views_table(config));
                schemas.push(tables::tag_write_progress_table(config));
                schemas.push(tables::tag_scanning_table(config));
            }
            plan.extend(
                schemas
                    .into_iter()
                    .map(|schema| (format!("table {}", schema.qualified_name()), schema.into())),
            );
        }
        plan
    }

    /// Create the schema unless it already exists.
    ///
    /// ## Errors
    /// [`JournalError::Schema`] naming the failed keyspace or table when the
    /// sequence fails twice.
    #[instrument(skip(self), fields(keyspace = %self.config.keyspace))]
    pub async fn ensure_schema(&self) -> JournalResult<()> {
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut state = self.slot.lock().await;
        if *state == SchemaState::Ready {
            return Ok(());
        }
        *state = SchemaState::Creating;

        let start = Instant::now();
        let plan = self.plan();
        let mut attempt = 1;
        loop {
            match self.run(&plan).await {
                Ok(()) => {
                    *state = SchemaState::Ready;
                    self.ready.store(true, Ordering::Release);
                    metrics::histogram!("plexspaces_event_journal_schema_bootstrap_duration_seconds")
                        .record(start.elapsed().as_secs_f64());
                    info!(statements = plan.len(), attempt, "Journal schema ready");
                    return Ok(());
                }
                Err((step, source)) if attempt < MAX_ATTEMPTS => {
                    warn!(step = %step, error = %source, attempt, "Schema creation failed, retrying from the top");
                    metrics::counter!("plexspaces_event_journal_schema_retries_total").increment(1);
                    attempt += 1;
                }
                Err((step, source)) => {
                    *state = SchemaState::Uninitialized;
                    error!(step = %step, error = %source, "Schema creation failed");
                    return Err(JournalError::Schema { step, source });
                }
            }
        }
    }

    async fn run(&self, plan: &[(String, Statement)]) -> Result<(), (String, StoreError)> {
        for (step, statement) in plan {
            debug!(step = %step, "Creating");
            self.session
                .execute(statement)
                .await
                .map_err(|e| (step.clone(), e))?;
        }
        Ok(())
    }
}
