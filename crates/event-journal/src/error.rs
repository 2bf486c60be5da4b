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

//! Error types for journal operations.

use plexspaces_widecolumn::{StoreError, StoreResult};
use thiserror::Error;

/// Result type for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

/// Journal errors.
///
/// ## Design Notes
/// - Store failures always carry the step that failed (`"write messages"`,
///   `"write tag_views"`, ...), so a caller can tell a failed primary write
///   from a failed tag-index write
/// - There is no partial-success variant: a multi-row operation either
///   returns `Ok` or the first failure
#[derive(Debug, Error)]
pub enum JournalError {
    /// Store request failed
    #[error("Storage error during {step}: {source}")]
    Storage {
        /// Step that failed
        step: &'static str,
        /// Underlying store error
        #[source]
        source: StoreError,
    },

    /// Schema bootstrap failed after its retry
    #[error("Schema bootstrap failed at {step}: {source}")]
    Schema {
        /// Keyspace or table whose creation failed
        step: String,
        /// Underlying store error
        #[source]
        source: StoreError,
    },

    /// Event does not exist
    #[error("Event not found: persistence_id={persistence_id}, sequence_nr={sequence_nr}")]
    EventNotFound {
        /// Stream
        persistence_id: String,
        /// Sequence number
        sequence_nr: u64,
    },

    /// Stored row could not be decoded
    #[error("Invalid row in {table}: {reason}")]
    InvalidRow {
        /// Table the row came from
        table: &'static str,
        /// What was wrong
        reason: String,
    },

    /// Payload codec error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Counter does not fit a stored `bigint`
    #[error("{column} out of range: {value}")]
    OutOfRange {
        /// Column the value was meant for
        column: &'static str,
        /// Rejected value
        value: u64,
    },
}

impl JournalError {
    /// Whether retrying the whole operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            JournalError::Storage { source, .. } | JournalError::Schema { source, .. } => {
                source.is_transient()
            }
            _ => false,
        }
    }
}

/// Attach journal context to store results.
pub(crate) trait StoreResultExt<T> {
    /// Map a store failure to [`JournalError::Storage`] for `step`.
    fn step(self, step: &'static str) -> JournalResult<T>;

    /// Map a row decoding failure to [`JournalError::InvalidRow`].
    fn decoding(self, table: &'static str) -> JournalResult<T>;
}

impl<T> StoreResultExt<T> for StoreResult<T> {
    fn step(self, step: &'static str) -> JournalResult<T> {
        self.map_err(|source| JournalError::Storage { step, source })
    }

    fn decoding(self, table: &'static str) -> JournalResult<T> {
        self.map_err(|e| JournalError::InvalidRow {
            table,
            reason: e.to_string(),
        })
    }
}

/// Convert a stored `bigint` to an unsigned counter.
pub(crate) fn to_u64(table: &'static str, column: &str, value: i64) -> JournalResult<u64> {
    u64::try_from(value).map_err(|_| JournalError::InvalidRow {
        table,
        reason: format!("negative {}: {}", column, value),
    })
}

/// Convert an unsigned counter to a stored `bigint`.
pub(crate) fn to_i64(column: &'static str, value: u64) -> JournalResult<i64> {
    i64::try_from(value).map_err(|_| JournalError::OutOfRange { column, value })
}

/// Upper bound of a range read; anything past `i64::MAX` reads to the end.
pub(crate) fn upper_bound(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_is_reported() {
        let result: StoreResult<()> = Err(StoreError::Unavailable("1 of 3 replicas".into()));
        let err = result.step("write tag_views").unwrap_err();
        assert!(err.to_string().contains("write tag_views"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_decoding_is_not_transient() {
        let result: StoreResult<i64> = Err(StoreError::MissingColumn("sequence_nr".into()));
        let err = result.decoding("messages").unwrap_err();
        assert!(matches!(err, JournalError::InvalidRow { table: "messages", .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_negative_counter_rejected() {
        assert!(to_u64("metadata", "deleted_to", -1).is_err());
        assert_eq!(to_u64("metadata", "deleted_to", 7).unwrap(), 7);
        assert_eq!(to_i64("sequence_nr", 7).unwrap(), 7);
        assert!(matches!(
            to_i64("sequence_nr", u64::MAX),
            Err(JournalError::OutOfRange { column: "sequence_nr", value: u64::MAX })
        ));
        assert_eq!(upper_bound(u64::MAX), i64::MAX);
    }
}
