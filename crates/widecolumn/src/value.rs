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

//! Typed column values, rows and time-ordered ids.
//!
//! ## Purpose
//! Values exchanged with the session are a closed set of CQL types. Rows are
//! column-name keyed maps with typed accessors that fail with
//! [`StoreError::MissingColumn`] / [`StoreError::TypeMismatch`] instead of
//! panicking.
//!
//! ## Time UUIDs
//! [`TimeUuid`] wraps an RFC 4122 version-1 UUID. Ordering compares the
//! embedded 60-bit timestamp first (the way the store orders `timeuuid`
//! clustering columns), then the raw bytes.

use crate::{StoreError, StoreResult};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use uuid::timestamp::context::NoContext;
use uuid::{Timestamp, Uuid};

/// Latest Unix millisecond a 60-bit version-1 timestamp can hold.
const MAX_UNIX_MILLIS: i64 = 103_072_857_660_684;

/// Largest 60-bit tick count.
const MAX_TICKS: u64 = (1 << 60) - 1;

/// Version-1 (time based) UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeUuid(Uuid);

impl TimeUuid {
    /// Wrap a UUID, rejecting anything that is not version 1.
    pub fn from_uuid(uuid: Uuid) -> StoreResult<Self> {
        if uuid.get_version_num() != 1 {
            return Err(StoreError::InvalidValue(format!(
                "{} is not a time-based uuid (version {})",
                uuid,
                uuid.get_version_num()
            )));
        }
        Ok(Self(uuid))
    }

    /// Parse the hyphenated textual form.
    pub fn parse(text: &str) -> StoreResult<Self> {
        let uuid = Uuid::parse_str(text)
            .map_err(|e| StoreError::InvalidValue(format!("invalid uuid {}: {}", text, e)))?;
        Self::from_uuid(uuid)
    }

    /// Build a time UUID from raw Gregorian ticks, clock sequence and node.
    ///
    /// Ticks are clamped to the range between the Unix epoch and the largest
    /// 60-bit timestamp.
    pub fn from_ticks(ticks: u64, clock_seq: u16, node: [u8; 6]) -> Self {
        let ticks = ticks.clamp(millis_to_ticks(0), MAX_TICKS);
        Self(Uuid::new_v1(
            Timestamp::from_gregorian(ticks, clock_seq),
            &node,
        ))
    }

    /// Smallest time UUID for a given Unix millisecond.
    ///
    /// Useful as a lower bound when scanning by time.
    pub fn start_of_millis(unix_millis: i64) -> Self {
        Self::from_ticks(millis_to_ticks(unix_millis), 0, [0u8; 6])
    }

    /// Embedded timestamp in 100ns ticks since the Gregorian epoch.
    pub fn ticks(&self) -> u64 {
        self.0
            .get_timestamp()
            .map(|ts| ts.to_gregorian().0)
            .unwrap_or_default()
    }

    /// Embedded timestamp as Unix milliseconds.
    pub fn unix_millis(&self) -> i64 {
        match self.0.get_timestamp() {
            Some(ts) => {
                let (seconds, nanos) = ts.to_unix();
                (seconds * 1_000 + u64::from(nanos) / 1_000_000) as i64
            }
            None => 0,
        }
    }

    /// Underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Ord for TimeUuid {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ticks()
            .cmp(&other.ticks())
            .then_with(|| self.0.as_bytes().cmp(other.0.as_bytes()))
    }
}

impl PartialOrd for TimeUuid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TimeUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Gregorian ticks of a Unix millisecond, clamped to what a version-1
/// timestamp can hold.
fn millis_to_ticks(unix_millis: i64) -> u64 {
    let millis = unix_millis.clamp(0, MAX_UNIX_MILLIS) as u64;
    let nanos = ((millis % 1_000) * 1_000_000) as u32;
    Timestamp::from_unix(NoContext, millis / 1_000, nanos)
        .to_gregorian()
        .0
}

fn ticks_now() -> u64 {
    Timestamp::now(NoContext).to_gregorian().0
}

/// Generator of strictly increasing time UUIDs.
///
/// ## Design Notes
/// - One random node id and clock sequence per generator
/// - Ticks never repeat: a call within the same 100ns tick (or after the
///   wall clock moved backwards) takes `last + 1`
#[derive(Debug)]
pub struct TimeUuidGenerator {
    node: [u8; 6],
    clock_seq: u16,
    last_ticks: AtomicU64,
}

impl TimeUuidGenerator {
    /// Create a generator with a random node id.
    pub fn new() -> Self {
        let random = Uuid::new_v4();
        let bytes = random.as_bytes();
        let mut node = [0u8; 6];
        node.copy_from_slice(&bytes[..6]);
        // multicast bit marks a random (non-MAC) node id
        node[0] |= 0x01;
        let clock_seq = u16::from_be_bytes([bytes[6], bytes[7]]) & 0x3FFF;
        Self {
            node,
            clock_seq,
            last_ticks: AtomicU64::new(0),
        }
    }

    /// Next time UUID for the current wall clock.
    pub fn now(&self) -> TimeUuid {
        self.at_ticks(ticks_now())
    }

    /// Next time UUID not earlier than the given Unix millisecond.
    pub fn at_unix_millis(&self, unix_millis: i64) -> TimeUuid {
        self.at_ticks(millis_to_ticks(unix_millis))
    }

    fn at_ticks(&self, wanted: u64) -> TimeUuid {
        let previous = match self.last_ticks.fetch_update(
            AtomicOrdering::SeqCst,
            AtomicOrdering::SeqCst,
            |last| Some(next_ticks(last, wanted)),
        ) {
            Ok(previous) | Err(previous) => previous,
        };
        let ticks = next_ticks(previous, wanted);
        TimeUuid::from_ticks(ticks, self.clock_seq, self.node)
    }
}

fn next_ticks(last: u64, wanted: u64) -> u64 {
    if wanted > last {
        wanted
    } else {
        last.saturating_add(1).min(MAX_TICKS)
    }
}

impl Default for TimeUuidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// A single column value.
///
/// `Null` doubles as "not set": writing it removes the cell.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    /// Absent value
    Null,
    /// `boolean`
    Boolean(bool),
    /// `int`
    Int(i32),
    /// `bigint`
    BigInt(i64),
    /// `text`
    Text(String),
    /// `blob`
    Blob(Vec<u8>),
    /// `timeuuid`
    TimeUuid(TimeUuid),
    /// `set<text>`
    TextSet(BTreeSet<String>),
    /// `map<text, text>`
    TextMap(BTreeMap<String, String>),
    /// `map<text, bigint>`
    BigIntMap(BTreeMap<String, i64>),
}

impl Value {
    /// Whether this is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// CQL literal form, used when rendering statements.
    pub fn to_cql_literal(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::BigInt(i) => i.to_string(),
            Value::Text(s) => quote(s),
            Value::Blob(bytes) => {
                let mut out = String::with_capacity(2 + bytes.len() * 2);
                out.push_str("0x");
                for b in bytes {
                    out.push_str(&format!("{:02x}", b));
                }
                out
            }
            Value::TimeUuid(id) => id.to_string(),
            Value::TextSet(set) => {
                let items: Vec<String> = set.iter().map(|s| quote(s)).collect();
                format!("{{{}}}", items.join(", "))
            }
            Value::TextMap(map) => {
                let items: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{}: {}", quote(k), quote(v)))
                    .collect();
                format!("{{{}}}", items.join(", "))
            }
            Value::BigIntMap(map) => {
                let items: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{}: {}", quote(k), v))
                    .collect();
                format!("{{{}}}", items.join(", "))
            }
        }
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<TimeUuid> for Value {
    fn from(v: TimeUuid) -> Self {
        Value::TimeUuid(v)
    }
}

impl From<BTreeSet<String>> for Value {
    fn from(v: BTreeSet<String>) -> Self {
        Value::TextSet(v)
    }
}

impl From<BTreeMap<String, String>> for Value {
    fn from(v: BTreeMap<String, String>) -> Self {
        Value::TextMap(v)
    }
}

impl From<BTreeMap<String, i64>> for Value {
    fn from(v: BTreeMap<String, i64>) -> Self {
        Value::BigIntMap(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One result row: column name to value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    columns: BTreeMap<String, Value>,
}

impl Row {
    /// Empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column (builder style).
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    /// Set a column.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.columns.insert(column.into(), value.into());
    }

    /// Raw value; `None` for absent or null columns.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column).filter(|v| !v.is_null())
    }

    /// Whether the row carries a non-null value for the column.
    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    /// All columns, including nulls.
    pub fn columns(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.columns.iter()
    }

    /// Keep only the named columns.
    pub fn project(self, names: &[String]) -> Self {
        Self {
            columns: self
                .columns
                .into_iter()
                .filter(|(name, _)| names.iter().any(|n| n == name))
                .collect(),
        }
    }

    fn typed<'a, T>(
        &'a self,
        column: &str,
        expected: &'static str,
        extract: impl Fn(&'a Value) -> Option<T>,
    ) -> StoreResult<Option<T>> {
        match self.get(column) {
            None => Ok(None),
            Some(value) => extract(value).map(Some).ok_or_else(|| StoreError::TypeMismatch {
                column: column.to_string(),
                expected,
            }),
        }
    }

    fn required<T>(column: &str, value: StoreResult<Option<T>>) -> StoreResult<T> {
        value?.ok_or_else(|| StoreError::MissingColumn(column.to_string()))
    }

    /// Optional `text` column.
    pub fn opt_text(&self, column: &str) -> StoreResult<Option<&str>> {
        self.typed(column, "text", |v| match v {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        })
    }

    /// Required `text` column.
    pub fn text(&self, column: &str) -> StoreResult<&str> {
        Self::required(column, self.opt_text(column))
    }

    /// Optional `int` column.
    pub fn opt_int(&self, column: &str) -> StoreResult<Option<i32>> {
        self.typed(column, "int", |v| match v {
            Value::Int(i) => Some(*i),
            _ => None,
        })
    }

    /// Required `int` column.
    pub fn int(&self, column: &str) -> StoreResult<i32> {
        Self::required(column, self.opt_int(column))
    }

    /// Optional `bigint` column.
    pub fn opt_bigint(&self, column: &str) -> StoreResult<Option<i64>> {
        self.typed(column, "bigint", |v| match v {
            Value::BigInt(i) => Some(*i),
            _ => None,
        })
    }

    /// Required `bigint` column.
    pub fn bigint(&self, column: &str) -> StoreResult<i64> {
        Self::required(column, self.opt_bigint(column))
    }

    /// Optional `boolean` column.
    pub fn opt_boolean(&self, column: &str) -> StoreResult<Option<bool>> {
        self.typed(column, "boolean", |v| match v {
            Value::Boolean(b) => Some(*b),
            _ => None,
        })
    }

    /// Optional `blob` column.
    pub fn opt_blob(&self, column: &str) -> StoreResult<Option<&[u8]>> {
        self.typed(column, "blob", |v| match v {
            Value::Blob(b) => Some(b.as_slice()),
            _ => None,
        })
    }

    /// Required `blob` column.
    pub fn blob(&self, column: &str) -> StoreResult<&[u8]> {
        Self::required(column, self.opt_blob(column))
    }

    /// Optional `timeuuid` column.
    pub fn opt_time_uuid(&self, column: &str) -> StoreResult<Option<TimeUuid>> {
        self.typed(column, "timeuuid", |v| match v {
            Value::TimeUuid(id) => Some(*id),
            _ => None,
        })
    }

    /// Required `timeuuid` column.
    pub fn time_uuid(&self, column: &str) -> StoreResult<TimeUuid> {
        Self::required(column, self.opt_time_uuid(column))
    }

    /// `set<text>` column; a null set reads as empty.
    pub fn text_set(&self, column: &str) -> StoreResult<BTreeSet<String>> {
        Ok(self
            .typed(column, "set<text>", |v| match v {
                Value::TextSet(set) => Some(set.clone()),
                _ => None,
            })?
            .unwrap_or_default())
    }

    /// `map<text, text>` column; a null map reads as empty.
    pub fn text_map(&self, column: &str) -> StoreResult<BTreeMap<String, String>> {
        Ok(self
            .typed(column, "map<text, text>", |v| match v {
                Value::TextMap(map) => Some(map.clone()),
                _ => None,
            })?
            .unwrap_or_default())
    }

    /// `map<text, bigint>` column; a null map reads as empty.
    pub fn bigint_map(&self, column: &str) -> StoreResult<BTreeMap<String, i64>> {
        Ok(self
            .typed(column, "map<text, bigint>", |v| match v {
                Value::BigIntMap(map) => Some(map.clone()),
                _ => None,
            })?
            .unwrap_or_default())
    }
}

/// Rows returned by a statement (empty for writes and DDL).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    rows: Vec<Row>,
}

impl ResultSet {
    /// Result with the given rows.
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    /// Result of a write or DDL statement.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Rows in result order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// First row, if any.
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no row was returned.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Consume into the rows.
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_uuid_roundtrips_millis() {
        let generator = TimeUuidGenerator::new();
        let id = generator.at_unix_millis(1_700_000_000_123);
        assert_eq!(id.unix_millis(), 1_700_000_000_123);
        assert_eq!(id.as_uuid().get_version_num(), 1);
        assert_eq!(TimeUuid::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_generator_is_strictly_increasing() {
        let generator = TimeUuidGenerator::new();
        let mut previous = generator.now();
        for _ in 0..1000 {
            let next = generator.now();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn test_generator_never_goes_back_in_time() {
        let generator = TimeUuidGenerator::new();
        let later = generator.at_unix_millis(2_000_000_000_000);
        let earlier_request = generator.at_unix_millis(1_000);
        assert!(earlier_request > later);
    }

    #[test]
    fn test_ordering_uses_timestamp_before_bytes() {
        let base = millis_to_ticks(1_000);
        let a = TimeUuid::from_ticks(base, 0x3FFF, [0xFF; 6]);
        let b = TimeUuid::from_ticks(base + 1, 0, [0; 6]);
        assert!(a < b);
        assert_eq!(a.ticks(), base);
        assert!(TimeUuid::start_of_millis(5) <= TimeUuid::from_ticks(millis_to_ticks(5), 1, [1; 6]));
    }

    #[test]
    fn test_far_future_millis_are_clamped() {
        let generator = TimeUuidGenerator::new();
        let last = generator.at_unix_millis(i64::MAX);
        assert_eq!(last.unix_millis(), MAX_UNIX_MILLIS);
        assert_eq!(TimeUuid::start_of_millis(-5), TimeUuid::start_of_millis(0));
        assert_eq!(TimeUuid::start_of_millis(0).unix_millis(), 0);
    }

    #[test]
    fn test_clock_seq_and_variant_bits() {
        let id = TimeUuid::from_ticks(millis_to_ticks(42), 0x1234, [1, 2, 3, 4, 5, 6]);
        assert_eq!(id.as_uuid().get_variant(), uuid::Variant::RFC4122);
        assert_eq!(id.as_uuid().get_node_id(), Some([1, 2, 3, 4, 5, 6]));
        assert_eq!(id.unix_millis(), 42);
    }

    #[test]
    fn test_non_v1_uuid_rejected() {
        assert!(TimeUuid::from_uuid(Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_row_typed_accessors() {
        let row = Row::new()
            .with("persistence_id", "p-1")
            .with("sequence_nr", 7i64)
            .with("ser_id", 3i32)
            .with("meta", Value::Null);

        assert_eq!(row.text("persistence_id").unwrap(), "p-1");
        assert_eq!(row.bigint("sequence_nr").unwrap(), 7);
        assert_eq!(row.int("ser_id").unwrap(), 3);
        assert_eq!(row.opt_blob("meta").unwrap(), None);
        assert!(row.text_set("tags").unwrap().is_empty());
        assert!(row.bigint_map("ordinals").unwrap().is_empty());
        assert!(matches!(
            row.bigint("persistence_id"),
            Err(StoreError::TypeMismatch { .. })
        ));
        assert!(matches!(row.blob("event"), Err(StoreError::MissingColumn(_))));
    }

    #[test]
    fn test_cql_literals() {
        assert_eq!(Value::from("it's").to_cql_literal(), "'it''s'");
        assert_eq!(Value::Blob(vec![0x0a, 0xff]).to_cql_literal(), "0x0aff");
        let tags: BTreeSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();
        assert_eq!(Value::from(tags).to_cql_literal(), "{'a', 'b'}");
        assert_eq!(Value::from(None::<i64>).to_cql_literal(), "null");
        let ordinals: BTreeMap<String, i64> = [("orders".to_string(), 3)].into_iter().collect();
        assert_eq!(Value::from(ordinals).to_cql_literal(), "{'orders': 3}");
    }
}
