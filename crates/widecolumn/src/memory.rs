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

//! In-memory wide-column session.
//!
//! ## Purpose
//! Reference implementation of [`WideColumnSession`] for tests and local
//! development. **NOT for production use** - data is not persisted.
//!
//! ## Semantics kept from the real engine
//! - Inserts and updates are upserts; cells merge into the existing row
//! - Static columns are stored once per partition and survive row deletes
//! - A partition holding only static cells returns one static-only row when
//!   selected without clustering restrictions
//! - Rows written with a TTL disappear once it elapses
//! - `IF NOT EXISTS` DDL is idempotent
//! - A batch is validated before any of it is applied
//!
//! ## Test Hooks
//! - Every issued statement is logged as CQL ([`InMemoryWideColumnStore::executed_cql`])
//! - Faults can be injected for statements whose CQL contains a pattern
//!   ([`InMemoryWideColumnStore::inject_fault`])

use crate::statement::{ColumnKind, Delete, Insert, Order, Restriction, Select, TableSchema, Update};
use crate::{ResultSet, Row, Statement, StoreError, StoreResult, Value, WideColumnSession};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Kind of injected failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// [`StoreError::Unavailable`]
    Unavailable,
    /// [`StoreError::WriteTimeout`]
    WriteTimeout,
    /// [`StoreError::SchemaConflict`]
    SchemaConflict,
}

#[derive(Debug, Clone)]
struct Fault {
    pattern: String,
    kind: FaultKind,
    remaining: usize,
}

impl Fault {
    fn error(&self, cql: &str) -> StoreError {
        let detail = format!("injected fault for `{}`", cql);
        match self.kind {
            FaultKind::Unavailable => StoreError::Unavailable(detail),
            FaultKind::WriteTimeout => StoreError::WriteTimeout(detail),
            FaultKind::SchemaConflict => StoreError::SchemaConflict(detail),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredRow {
    cells: BTreeMap<String, Value>,
    expires_at: Option<Instant>,
}

impl StoredRow {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

#[derive(Debug, Clone, Default)]
struct StoredPartition {
    statics: BTreeMap<String, Value>,
    rows: BTreeMap<Vec<Value>, StoredRow>,
}

#[derive(Debug, Clone)]
struct MemTable {
    schema: TableSchema,
    partition_columns: Vec<String>,
    clustering_columns: Vec<String>,
    partitions: BTreeMap<Vec<Value>, StoredPartition>,
}

impl MemTable {
    fn new(schema: TableSchema) -> Self {
        let partition_columns = schema
            .columns_of(ColumnKind::PartitionKey)
            .into_iter()
            .map(str::to_string)
            .collect();
        let clustering_columns = schema
            .columns_of(ColumnKind::Clustering)
            .into_iter()
            .map(str::to_string)
            .collect();
        Self {
            schema,
            partition_columns,
            clustering_columns,
            partitions: BTreeMap::new(),
        }
    }

    fn kind_of(&self, column: &str) -> StoreResult<ColumnKind> {
        self.schema
            .column_def(column)
            .map(|c| c.kind)
            .ok_or_else(|| {
                StoreError::InvalidQuery(format!(
                    "Undefined column name {} in table {}",
                    column,
                    self.schema.qualified_name()
                ))
            })
    }

    /// Partition key values, clustering prefix values and the range.
    fn resolve(&self, restriction: &Restriction) -> StoreResult<(Vec<Value>, Vec<Value>)> {
        for (column, _) in &restriction.equalities {
            self.kind_of(column)?;
        }
        let mut partition_key = Vec::with_capacity(self.partition_columns.len());
        for column in &self.partition_columns {
            let value = restriction.equality(column).ok_or_else(|| {
                StoreError::InvalidQuery(format!(
                    "Partition key column {} must be restricted by equality",
                    column
                ))
            })?;
            partition_key.push(value.clone());
        }

        let mut prefix = Vec::new();
        for column in &self.clustering_columns {
            match restriction.equality(column) {
                Some(value) => prefix.push(value.clone()),
                None => break,
            }
        }
        let restricted_clustering = restriction
            .equalities
            .iter()
            .filter(|(c, _)| self.clustering_columns.contains(c))
            .count();
        if restricted_clustering != prefix.len() {
            return Err(StoreError::InvalidQuery(
                "Clustering columns must be restricted as a prefix".to_string(),
            ));
        }

        if let Some(range) = &restriction.range {
            if self.clustering_columns.get(prefix.len()) != Some(&range.column) {
                return Err(StoreError::InvalidQuery(format!(
                    "Range restriction on {} must follow the clustering prefix",
                    range.column
                )));
            }
        }
        Ok((partition_key, prefix))
    }

    fn row_matches(key: &[Value], prefix: &[Value], restriction: &Restriction) -> bool {
        if !key.starts_with(prefix) {
            return false;
        }
        match &restriction.range {
            Some(range) => key
                .get(prefix.len())
                .is_some_and(|value| range.contains(value)),
            None => true,
        }
    }

    fn insert(&mut self, insert: &Insert) -> StoreResult<()> {
        let mut restriction = Restriction::default();
        let mut statics = Vec::new();
        let mut cells = Vec::new();
        for (column, value) in &insert.values {
            match self.kind_of(column)? {
                ColumnKind::PartitionKey | ColumnKind::Clustering => {
                    restriction.equalities.push((column.clone(), value.clone()))
                }
                ColumnKind::Static => statics.push((column.clone(), value.clone())),
                ColumnKind::Regular => cells.push((column.clone(), value.clone())),
            }
        }
        self.upsert(&restriction, statics, cells, insert.ttl)
    }

    fn update(&mut self, update: &Update) -> StoreResult<()> {
        let mut statics = Vec::new();
        let mut cells = Vec::new();
        for (column, value) in &update.assignments {
            match self.kind_of(column)? {
                ColumnKind::PartitionKey | ColumnKind::Clustering => {
                    return Err(StoreError::InvalidQuery(format!(
                        "PRIMARY KEY part {} found in SET part",
                        column
                    )))
                }
                ColumnKind::Static => statics.push((column.clone(), value.clone())),
                ColumnKind::Regular => cells.push((column.clone(), value.clone())),
            }
        }
        self.upsert(&update.restriction, statics, cells, None)
    }

    fn upsert(
        &mut self,
        restriction: &Restriction,
        statics: Vec<(String, Value)>,
        cells: Vec<(String, Value)>,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let (partition_key, clustering) = self.resolve(restriction)?;
        let full_row = clustering.len() == self.clustering_columns.len();
        if !full_row && (!clustering.is_empty() || !cells.is_empty()) {
            return Err(StoreError::InvalidQuery(
                "Some clustering keys are missing".to_string(),
            ));
        }

        let partition = self.partitions.entry(partition_key).or_default();
        for (column, value) in statics {
            if value.is_null() {
                partition.statics.remove(&column);
            } else {
                partition.statics.insert(column, value);
            }
        }

        // static-only write on a table with clustering columns
        if !self.clustering_columns.is_empty() && clustering.is_empty() {
            return Ok(());
        }

        let now = Instant::now();
        let row = partition
            .rows
            .entry(clustering)
            .or_insert_with(|| StoredRow {
                cells: BTreeMap::new(),
                expires_at: None,
            });
        if row.is_expired(now) {
            row.cells.clear();
        }
        row.expires_at = ttl.map(|ttl| now + ttl);
        for (column, value) in cells {
            if value.is_null() {
                row.cells.remove(&column);
            } else {
                row.cells.insert(column, value);
            }
        }
        Ok(())
    }

    fn delete(&mut self, delete: &Delete) -> StoreResult<()> {
        let (partition_key, prefix) = self.resolve(&delete.restriction)?;
        if prefix.is_empty() && delete.restriction.range.is_none() {
            self.partitions.remove(&partition_key);
            return Ok(());
        }
        if let Some(partition) = self.partitions.get_mut(&partition_key) {
            partition
                .rows
                .retain(|key, _| !Self::row_matches(key, &prefix, &delete.restriction));
        }
        Ok(())
    }

    fn select(&self, select: &Select) -> StoreResult<ResultSet> {
        for column in &select.columns {
            self.kind_of(column)?;
        }
        let (partition_key, prefix) = self.resolve(&select.restriction)?;
        let Some(partition) = self.partitions.get(&partition_key) else {
            return Ok(ResultSet::empty());
        };

        let now = Instant::now();
        let base = |row: &mut Row| {
            for (column, value) in self.partition_columns.iter().zip(&partition_key) {
                row.insert(column.clone(), value.clone());
            }
            for (column, value) in &partition.statics {
                row.insert(column.clone(), value.clone());
            }
        };

        let mut rows: Vec<Row> = partition
            .rows
            .iter()
            .filter(|(key, stored)| {
                !stored.is_expired(now) && Self::row_matches(key, &prefix, &select.restriction)
            })
            .map(|(key, stored)| {
                let mut row = Row::new();
                base(&mut row);
                for (column, value) in self.clustering_columns.iter().zip(key) {
                    row.insert(column.clone(), value.clone());
                }
                for (column, value) in &stored.cells {
                    row.insert(column.clone(), value.clone());
                }
                row
            })
            .collect();

        let unrestricted = prefix.is_empty() && select.restriction.range.is_none();
        if rows.is_empty() && unrestricted && !partition.statics.is_empty() {
            let mut row = Row::new();
            base(&mut row);
            rows.push(row);
        }

        if matches!(select.order, Some((_, Order::Descending))) {
            rows.reverse();
        }
        if let Some(limit) = select.limit {
            rows.truncate(limit);
        }
        if !select.columns.is_empty() {
            rows = rows
                .into_iter()
                .map(|row| row.project(&select.columns))
                .collect();
        }
        Ok(ResultSet::new(rows))
    }
}

#[derive(Debug, Default)]
struct State {
    keyspaces: HashSet<String>,
    tables: HashMap<String, MemTable>,
    executed: Vec<String>,
    faults: Vec<Fault>,
}

impl State {
    fn table_mut(&mut self, name: &str) -> StoreResult<&mut MemTable> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StoreError::InvalidQuery(format!("unconfigured table {}", name)))
    }

    fn take_fault(&mut self, cql: &str) -> Option<StoreError> {
        let fault = self
            .faults
            .iter_mut()
            .find(|f| f.remaining > 0 && cql.contains(&f.pattern))?;
        fault.remaining -= 1;
        Some(fault.error(cql))
    }

    /// Check a batch member can be applied without touching data.
    fn validate(&self, statement: &Statement) -> StoreResult<()> {
        match statement {
            Statement::Insert(_) | Statement::Update(_) | Statement::Delete(_) => {
                let table = statement.table().unwrap_or_default();
                if self.tables.contains_key(&table) {
                    Ok(())
                } else {
                    Err(StoreError::InvalidQuery(format!("unconfigured table {}", table)))
                }
            }
            _ => Err(StoreError::InvalidQuery(
                "Only INSERT, UPDATE and DELETE are allowed in a batch".to_string(),
            )),
        }
    }

    fn apply(&mut self, statement: &Statement) -> StoreResult<ResultSet> {
        match statement {
            Statement::CreateKeyspace { name, .. } => {
                self.keyspaces.insert(name.clone());
                Ok(ResultSet::empty())
            }
            Statement::CreateTable(schema) => {
                if !self.keyspaces.contains(&schema.keyspace) {
                    return Err(StoreError::InvalidQuery(format!(
                        "Keyspace {} does not exist",
                        schema.keyspace
                    )));
                }
                self.tables
                    .entry(schema.qualified_name())
                    .or_insert_with(|| MemTable::new(schema.clone()));
                Ok(ResultSet::empty())
            }
            Statement::Insert(insert) => {
                self.table_mut(&insert.table)?.insert(insert)?;
                Ok(ResultSet::empty())
            }
            Statement::Update(update) => {
                self.table_mut(&update.table)?.update(update)?;
                Ok(ResultSet::empty())
            }
            Statement::Delete(delete) => {
                self.table_mut(&delete.table)?.delete(delete)?;
                Ok(ResultSet::empty())
            }
            Statement::Select(select) => self
                .tables
                .get(&select.table)
                .ok_or_else(|| StoreError::InvalidQuery(format!("unconfigured table {}", select.table)))?
                .select(select),
            Statement::Batch(statements) => {
                for statement in statements {
                    self.validate(statement)?;
                }
                // apply on a copy so a failing member leaves no partial batch
                let mut staged = self.tables.clone();
                std::mem::swap(&mut staged, &mut self.tables);
                for statement in statements {
                    if let Err(e) = self.apply(statement) {
                        self.tables = staged;
                        return Err(e);
                    }
                }
                Ok(ResultSet::empty())
            }
        }
    }
}

/// In-memory wide-column session (testing only).
///
/// ## Example
/// ```rust
/// use plexspaces_widecolumn::*;
///
/// # async fn example() -> StoreResult<()> {
/// let store = InMemoryWideColumnStore::new();
/// store
///     .execute(&Statement::CreateKeyspace {
///         name: "ks".to_string(),
///         replication: "{'class': 'SimpleStrategy', 'replication_factor': 1}".to_string(),
///     })
///     .await?;
/// assert_eq!(store.executed_cql().await.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryWideColumnStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryWideColumnStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` statements whose CQL contains `pattern`.
    pub async fn inject_fault(&self, pattern: impl Into<String>, kind: FaultKind, times: usize) {
        let mut state = self.state.write().await;
        state.faults.push(Fault {
            pattern: pattern.into(),
            kind,
            remaining: times,
        });
    }

    /// Drop all pending injected faults.
    pub async fn clear_faults(&self) {
        self.state.write().await.faults.clear();
    }

    /// CQL of every statement issued so far, including failed ones.
    pub async fn executed_cql(&self) -> Vec<String> {
        self.state.read().await.executed.clone()
    }

    /// Number of issued statements whose CQL contains `pattern`.
    pub async fn count_executed(&self, pattern: &str) -> usize {
        self.state
            .read()
            .await
            .executed
            .iter()
            .filter(|cql| cql.contains(pattern))
            .count()
    }

    /// Whether a table (`keyspace.table`) has been created.
    pub async fn has_table(&self, qualified_name: &str) -> bool {
        self.state.read().await.tables.contains_key(qualified_name)
    }

    /// Whether a keyspace has been created.
    pub async fn has_keyspace(&self, name: &str) -> bool {
        self.state.read().await.keyspaces.contains(name)
    }
}

#[async_trait]
impl WideColumnSession for InMemoryWideColumnStore {
    async fn execute(&self, statement: &Statement) -> StoreResult<ResultSet> {
        let cql = statement.to_cql();
        let mut state = self.state.write().await;
        state.executed.push(cql.clone());
        if let Some(error) = state.take_fault(&cql) {
            debug!(error = %error, "Injected fault");
            return Err(error);
        }
        state.apply(statement)
    }
}
