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

//! Time buckets for the tag index partition key.
//!
//! A tag's rows are spread over one partition per bucket so a popular tag
//! does not grow a single unbounded partition. The bucket key is the start of
//! the bucket in epoch milliseconds.

use chrono::{DateTime, TimeZone, Utc};
use plexspaces_widecolumn::TimeUuid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of a time bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketSize {
    /// 24 hours
    Day,
    /// 1 hour
    #[default]
    Hour,
    /// 1 minute
    Minute,
    /// 1 second (tests only; creates many partitions)
    Second,
}

impl BucketSize {
    /// Bucket width in milliseconds.
    pub fn millis(&self) -> i64 {
        match self {
            BucketSize::Day => 86_400_000,
            BucketSize::Hour => 3_600_000,
            BucketSize::Minute => 60_000,
            BucketSize::Second => 1_000,
        }
    }

    /// Parse a bucket size name as used in environment configuration.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "day" => Some(BucketSize::Day),
            "hour" => Some(BucketSize::Hour),
            "minute" => Some(BucketSize::Minute),
            "second" => Some(BucketSize::Second),
            _ => None,
        }
    }
}

/// One time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeBucket {
    key: i64,
    size: BucketSize,
}

impl TimeBucket {
    /// Bucket containing a Unix millisecond timestamp.
    pub fn from_unix_millis(unix_millis: i64, size: BucketSize) -> Self {
        let width = size.millis();
        Self {
            key: unix_millis.div_euclid(width) * width,
            size,
        }
    }

    /// Bucket containing the time embedded in a time UUID.
    pub fn from_time_uuid(id: &TimeUuid, size: BucketSize) -> Self {
        Self::from_unix_millis(id.unix_millis(), size)
    }

    /// Bucket from a stored key. The key is aligned down to the bucket start.
    pub fn from_key(key: i64, size: BucketSize) -> Self {
        Self::from_unix_millis(key, size)
    }

    /// Bucket start in epoch milliseconds (the stored key).
    pub fn key(&self) -> i64 {
        self.key
    }

    /// Bucket width.
    pub fn size(&self) -> BucketSize {
        self.size
    }

    /// Following bucket.
    pub fn next(&self) -> Self {
        Self {
            key: self.key + self.size.millis(),
            size: self.size,
        }
    }

    /// Preceding bucket.
    pub fn previous(&self) -> Self {
        Self {
            key: self.key - self.size.millis(),
            size: self.size,
        }
    }

    /// Whether a Unix millisecond timestamp falls in this bucket.
    pub fn contains(&self, unix_millis: i64) -> bool {
        unix_millis >= self.key && unix_millis < self.key + self.size.millis()
    }

    /// Bucket start as a UTC timestamp.
    pub fn starts_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.key)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}
