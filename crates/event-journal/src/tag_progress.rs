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

//! Tag consumer progress.
//!
//! One row per (stream, tag) holding the last delivered sequence number,
//! tag ordinal and resume offset. Only the tag consumer writes these rows,
//! after it has durably processed an event; the journal writer reads them
//! but never moves them. Rows are upserts, so replaying an advance after a
//! crash is harmless.

use crate::error::{to_i64, StoreResultExt};
use crate::model::TagProgress;
use crate::tables::columns::*;
use crate::tables::Tables;
use crate::JournalResult;
use plexspaces_widecolumn::statement::{Insert, Select};
use plexspaces_widecolumn::WideColumnSession;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Result of [`TagProgressTracker::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Stored progress moved forward (or was created)
    Advanced,
    /// Same position as stored; nothing written
    Unchanged,
    /// Behind the stored position; nothing written
    Stale {
        /// Progress that stays in place
        stored: TagProgress,
    },
}

/// Persists tag consumer progress.
#[derive(Clone)]
pub struct TagProgressTracker {
    session: Arc<dyn WideColumnSession>,
    tables: Tables,
}

impl TagProgressTracker {
    /// Create a tracker for the progress table of `tables`.
    pub fn new(session: Arc<dyn WideColumnSession>, tables: Tables) -> Self {
        Self { session, tables }
    }

    /// Record delivery up to `progress` for (stream, tag).
    ///
    /// Progress never moves backwards: a position lower than the stored one
    /// (by sequence number, then ordinal) is reported as
    /// [`AdvanceOutcome::Stale`] and the stored row is left alone.
    #[instrument(skip(self, progress), fields(
        persistence_id = %persistence_id,
        tag = %tag,
        sequence_nr = progress.sequence_nr,
        ordinal = progress.tag_pid_sequence_nr
    ))]
    pub async fn advance(
        &self,
        persistence_id: &str,
        tag: &str,
        progress: TagProgress,
    ) -> JournalResult<AdvanceOutcome> {
        if let Some(stored) = self.progress_for(persistence_id, tag).await? {
            let wanted = (progress.sequence_nr, progress.tag_pid_sequence_nr);
            let current = (stored.sequence_nr, stored.tag_pid_sequence_nr);
            if wanted < current {
                warn!(
                    stored_sequence_nr = stored.sequence_nr,
                    stored_ordinal = stored.tag_pid_sequence_nr,
                    "Ignoring stale tag progress"
                );
                metrics::counter!("plexspaces_event_journal_tag_progress_stale_total").increment(1);
                return Ok(AdvanceOutcome::Stale { stored });
            }
            if wanted == current && stored.offset == progress.offset {
                return Ok(AdvanceOutcome::Unchanged);
            }
        }

        let insert = Insert::into_table(&self.tables.tag_write_progress)
            .value(PERSISTENCE_ID, persistence_id)
            .value(TAG, tag)
            .value(SEQUENCE_NR, to_i64(SEQUENCE_NR, progress.sequence_nr)?)
            .value(
                TAG_PID_SEQUENCE_NR,
                to_i64(TAG_PID_SEQUENCE_NR, progress.tag_pid_sequence_nr)?,
            )
            .value(OFFSET, progress.offset);
        self.session
            .execute(&insert.into())
            .await
            .step("write tag_write_progress")?;
        debug!("Tag progress advanced");
        Ok(AdvanceOutcome::Advanced)
    }

    /// Stored progress for (stream, tag).
    pub async fn progress_for(
        &self,
        persistence_id: &str,
        tag: &str,
    ) -> JournalResult<Option<TagProgress>> {
        let select = Select::from_table(&self.tables.tag_write_progress)
            .where_eq(PERSISTENCE_ID, persistence_id)
            .where_eq(TAG, tag);
        let rows = self
            .session
            .execute(&select.into())
            .await
            .step("read tag_write_progress")?;
        rows.first()
            .map(|row| TagProgress::from_row(row).map(|(_, progress)| progress))
            .transpose()
    }

    /// Stored progress for every tag of a stream.
    #[instrument(skip(self), fields(persistence_id = %persistence_id))]
    pub async fn progress_for_persistence_id(
        &self,
        persistence_id: &str,
    ) -> JournalResult<HashMap<String, TagProgress>> {
        let select = Select::from_table(&self.tables.tag_write_progress)
            .where_eq(PERSISTENCE_ID, persistence_id);
        let rows = self
            .session
            .execute(&select.into())
            .await
            .step("read tag_write_progress")?;
        rows.rows().iter().map(TagProgress::from_row).collect()
    }
}
