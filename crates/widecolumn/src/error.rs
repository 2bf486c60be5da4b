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

//! Error types for wide-column session operations.

use thiserror::Error;

/// Result type for wide-column session operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while executing statements or decoding rows.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Not enough replicas available (transient)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Coordinator timed out waiting for write acknowledgements (transient)
    #[error("Write timeout: {0}")]
    WriteTimeout(String),

    /// Coordinator timed out waiting for read responses (transient)
    #[error("Read timeout: {0}")]
    ReadTimeout(String),

    /// Concurrent schema mutation rejected by the engine
    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    /// Statement is malformed or references unknown objects
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Row does not carry the requested column
    #[error("Missing column: {0}")]
    MissingColumn(String),

    /// Column holds a value of another type
    #[error("Type mismatch for column {column}: expected {expected}")]
    TypeMismatch {
        /// Column name
        column: String,
        /// Expected CQL type
        expected: &'static str,
    },

    /// Value cannot be represented
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

impl StoreError {
    /// Whether the caller may retry the same statement.
    ///
    /// Schema conflicts count as transient: the engine rejects the concurrent
    /// mutation but a later attempt of an `IF NOT EXISTS` statement succeeds.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_)
                | StoreError::WriteTimeout(_)
                | StoreError::ReadTimeout(_)
                | StoreError::SchemaConflict(_)
        )
    }
}
