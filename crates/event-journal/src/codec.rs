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

//! Serialized payloads.
//!
//! The journal stores payloads as opaque bytes next to the serializer id and
//! manifest needed to decode them. It never looks inside. [`PayloadCodec`]
//! is the seam for callers that want typed events; [`JsonPayloadCodec`] is a
//! serde_json implementation.

use crate::{JournalError, JournalResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Serializer id written by [`JsonPayloadCodec`].
pub const JSON_SERIALIZER_ID: i32 = 1001;

/// Opaque payload plus what is needed to decode it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SerializedPayload {
    /// Serializer that produced the bytes
    pub serializer_id: i32,
    /// Type hint for the serializer
    pub manifest: String,
    /// Encoded bytes
    pub bytes: Vec<u8>,
}

impl SerializedPayload {
    /// Create a payload.
    pub fn new(serializer_id: i32, manifest: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            serializer_id,
            manifest: manifest.into(),
            bytes,
        }
    }
}

/// Encodes and decodes typed values.
pub trait PayloadCodec<T>: Send + Sync {
    /// Encode a value.
    fn encode(&self, value: &T) -> JournalResult<SerializedPayload>;

    /// Decode a payload.
    fn decode(&self, payload: &SerializedPayload) -> JournalResult<T>;
}

/// serde_json codec with a fixed manifest.
#[derive(Debug, Clone)]
pub struct JsonPayloadCodec {
    manifest: String,
}

impl JsonPayloadCodec {
    /// Create a codec writing `manifest` on every payload.
    pub fn new(manifest: impl Into<String>) -> Self {
        Self {
            manifest: manifest.into(),
        }
    }
}

impl<T> PayloadCodec<T> for JsonPayloadCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> JournalResult<SerializedPayload> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| JournalError::Serialization(e.to_string()))?;
        Ok(SerializedPayload::new(
            JSON_SERIALIZER_ID,
            self.manifest.clone(),
            bytes,
        ))
    }

    fn decode(&self, payload: &SerializedPayload) -> JournalResult<T> {
        if payload.serializer_id != JSON_SERIALIZER_ID {
            return Err(JournalError::Serialization(format!(
                "Unexpected serializer id {} for manifest {}",
                payload.serializer_id, payload.manifest
            )));
        }
        serde_json::from_slice(&payload.bytes)
            .map_err(|e| JournalError::Serialization(e.to_string()))
    }
}
