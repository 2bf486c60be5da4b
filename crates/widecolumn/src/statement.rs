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

//! Structured statements.
//!
//! ## Purpose
//! Statements are built as data (table, columns, key restrictions) instead of
//! query strings, so that any session (a CQL driver, the in-memory session)
//! can interpret them. Every statement renders to CQL via `to_cql()`; the
//! rendered DDL is the persisted-layout contract other implementations match.
//!
//! ## Restrictions
//! A [`Restriction`] is a list of equality predicates followed by at most one
//! range predicate. Equalities must cover the full partition key, then a
//! prefix of the clustering key; the range applies to the next clustering
//! column.

use crate::Value;
use std::ops::Bound;
use std::time::Duration;

/// CQL column types used by the journal layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// `text`
    Text,
    /// `int`
    Int,
    /// `bigint`
    BigInt,
    /// `boolean`
    Boolean,
    /// `blob`
    Blob,
    /// `timeuuid`
    TimeUuid,
    /// `set<text>`
    TextSet,
    /// `map<text, text>`
    TextMap,
    /// `map<text, bigint>`
    BigIntMap,
}

impl ColumnType {
    /// CQL type name.
    pub fn cql(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Int => "int",
            ColumnType::BigInt => "bigint",
            ColumnType::Boolean => "boolean",
            ColumnType::Blob => "blob",
            ColumnType::TimeUuid => "timeuuid",
            ColumnType::TextSet => "set<text>",
            ColumnType::TextMap => "map<text, text>",
            ColumnType::BigIntMap => "map<text, bigint>",
        }
    }
}

/// Role of a column in the primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Part of the partition key
    PartitionKey,
    /// Part of the clustering key
    Clustering,
    /// One value per partition
    Static,
    /// Ordinary cell
    Regular,
}

/// Column definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// CQL type
    pub column_type: ColumnType,
    /// Key role
    pub kind: ColumnKind,
}

/// Table definition, rendered as `CREATE TABLE IF NOT EXISTS`.
///
/// Columns keep declaration order; key columns keep key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Owning keyspace
    pub keyspace: String,
    /// Table name
    pub name: String,
    /// Columns in declaration order
    pub columns: Vec<ColumnDef>,
    /// Rendered `WITH` options, e.g. `gc_grace_seconds = 864000`
    pub options: Vec<String>,
}

impl TableSchema {
    /// Empty table definition.
    pub fn new(keyspace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            name: name.into(),
            columns: Vec::new(),
            options: Vec::new(),
        }
    }

    fn column(mut self, name: &str, column_type: ColumnType, kind: ColumnKind) -> Self {
        self.columns.push(ColumnDef {
            name: name.to_string(),
            column_type,
            kind,
        });
        self
    }

    /// Add a partition key column.
    pub fn partition_key(self, name: &str, column_type: ColumnType) -> Self {
        self.column(name, column_type, ColumnKind::PartitionKey)
    }

    /// Add a clustering column.
    pub fn clustering(self, name: &str, column_type: ColumnType) -> Self {
        self.column(name, column_type, ColumnKind::Clustering)
    }

    /// Add a static column.
    pub fn static_column(self, name: &str, column_type: ColumnType) -> Self {
        self.column(name, column_type, ColumnKind::Static)
    }

    /// Add a regular column.
    pub fn regular(self, name: &str, column_type: ColumnType) -> Self {
        self.column(name, column_type, ColumnKind::Regular)
    }

    /// Add a rendered table option.
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    /// `keyspace.table`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.keyspace, self.name)
    }

    /// Names of the columns with the given role, in order.
    pub fn columns_of(&self, kind: ColumnKind) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Definition of a column.
    pub fn column_def(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Render the `CREATE TABLE IF NOT EXISTS` statement.
    pub fn to_cql(&self) -> String {
        let mut definitions: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                if c.kind == ColumnKind::Static {
                    format!("{} {} static", c.name, c.column_type.cql())
                } else {
                    format!("{} {}", c.name, c.column_type.cql())
                }
            })
            .collect();

        let partition = self.columns_of(ColumnKind::PartitionKey);
        let partition = if partition.len() == 1 {
            partition[0].to_string()
        } else {
            format!("({})", partition.join(", "))
        };
        let mut key = vec![partition];
        key.extend(
            self.columns_of(ColumnKind::Clustering)
                .into_iter()
                .map(str::to_string),
        );
        definitions.push(format!("PRIMARY KEY ({})", key.join(", ")));

        let mut cql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.qualified_name(),
            definitions.join(", ")
        );
        if !self.options.is_empty() {
            cql.push_str(" WITH ");
            cql.push_str(&self.options.join(" AND "));
        }
        cql
    }
}

/// Range predicate on one clustering column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusteringRange {
    /// Clustering column name
    pub column: String,
    /// Lower bound
    pub lower: Bound<Value>,
    /// Upper bound
    pub upper: Bound<Value>,
}

impl ClusteringRange {
    /// Whether a value falls within the range.
    pub fn contains(&self, value: &Value) -> bool {
        let above = match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(v) => value >= v,
            Bound::Excluded(v) => value > v,
        };
        let below = match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(v) => value <= v,
            Bound::Excluded(v) => value < v,
        };
        above && below
    }

    fn to_cql(&self) -> Vec<String> {
        let mut parts = Vec::new();
        match &self.lower {
            Bound::Included(v) => parts.push(format!("{} >= {}", self.column, v.to_cql_literal())),
            Bound::Excluded(v) => parts.push(format!("{} > {}", self.column, v.to_cql_literal())),
            Bound::Unbounded => {}
        }
        match &self.upper {
            Bound::Included(v) => parts.push(format!("{} <= {}", self.column, v.to_cql_literal())),
            Bound::Excluded(v) => parts.push(format!("{} < {}", self.column, v.to_cql_literal())),
            Bound::Unbounded => {}
        }
        parts
    }
}

/// `WHERE` clause: equalities then an optional clustering range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Restriction {
    /// Equality predicates in key order
    pub equalities: Vec<(String, Value)>,
    /// Range on the clustering column after the equality prefix
    pub range: Option<ClusteringRange>,
}

impl Restriction {
    /// Value of an equality predicate.
    pub fn equality(&self, column: &str) -> Option<&Value> {
        self.equalities
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v)
    }

    fn to_cql(&self) -> String {
        let mut parts: Vec<String> = self
            .equalities
            .iter()
            .map(|(c, v)| format!("{} = {}", c, v.to_cql_literal()))
            .collect();
        if let Some(range) = &self.range {
            parts.extend(range.to_cql());
        }
        if parts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", parts.join(" AND "))
        }
    }
}

/// Clustering order of a select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Table clustering order
    Ascending,
    /// Reverse clustering order
    Descending,
}

/// `INSERT` (an upsert: existing cells are merged).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insert {
    /// Qualified table name
    pub table: String,
    /// Column values
    pub values: Vec<(String, Value)>,
    /// `USING TTL`
    pub ttl: Option<Duration>,
}

impl Insert {
    /// Insert into a qualified table.
    pub fn into_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: Vec::new(),
            ttl: None,
        }
    }

    /// Add a column value.
    pub fn value(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.values.push((column.to_string(), value.into()));
        self
    }

    /// Expire the written row after `ttl`.
    pub fn ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }
}

/// `UPDATE ... SET` (also an upsert).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    /// Qualified table name
    pub table: String,
    /// Assignments
    pub assignments: Vec<(String, Value)>,
    /// Full primary key
    pub restriction: Restriction,
}

impl Update {
    /// Update a qualified table.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            assignments: Vec::new(),
            restriction: Restriction::default(),
        }
    }

    /// Add an assignment.
    pub fn set(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.assignments.push((column.to_string(), value.into()));
        self
    }

    /// Add a key equality.
    pub fn where_eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.restriction
            .equalities
            .push((column.to_string(), value.into()));
        self
    }
}

/// `DELETE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    /// Qualified table name
    pub table: String,
    /// Rows to delete
    pub restriction: Restriction,
}

impl Delete {
    /// Delete from a qualified table.
    pub fn from_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            restriction: Restriction::default(),
        }
    }

    /// Add a key equality.
    pub fn where_eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.restriction
            .equalities
            .push((column.to_string(), value.into()));
        self
    }

    /// Restrict a clustering column to a range.
    pub fn where_range(mut self, column: &str, lower: Bound<Value>, upper: Bound<Value>) -> Self {
        self.restriction.range = Some(ClusteringRange {
            column: column.to_string(),
            lower,
            upper,
        });
        self
    }
}

/// `SELECT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    /// Qualified table name
    pub table: String,
    /// Projection; empty selects all columns
    pub columns: Vec<String>,
    /// Rows to read
    pub restriction: Restriction,
    /// Order by clustering key
    pub order: Option<(String, Order)>,
    /// Maximum number of rows
    pub limit: Option<usize>,
}

impl Select {
    /// Select from a qualified table.
    pub fn from_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            restriction: Restriction::default(),
            order: None,
            limit: None,
        }
    }

    /// Project onto columns.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add a key equality.
    pub fn where_eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.restriction
            .equalities
            .push((column.to_string(), value.into()));
        self
    }

    /// Restrict a clustering column to a range.
    pub fn where_range(mut self, column: &str, lower: Bound<Value>, upper: Bound<Value>) -> Self {
        self.restriction.range = Some(ClusteringRange {
            column: column.to_string(),
            lower,
            upper,
        });
        self
    }

    /// Order by a clustering column.
    pub fn order_by(mut self, column: &str, order: Order) -> Self {
        self.order = Some((column.to_string(), order));
        self
    }

    /// Cap the number of rows.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A statement the session executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `CREATE KEYSPACE IF NOT EXISTS`
    CreateKeyspace {
        /// Keyspace name
        name: String,
        /// Rendered replication map
        replication: String,
    },
    /// `CREATE TABLE IF NOT EXISTS`
    CreateTable(TableSchema),
    /// `INSERT`
    Insert(Insert),
    /// `UPDATE`
    Update(Update),
    /// `DELETE`
    Delete(Delete),
    /// `SELECT`
    Select(Select),
    /// Unlogged batch; callers keep a batch within one partition
    Batch(Vec<Statement>),
}

impl Statement {
    /// Table the statement targets (`None` for keyspaces and batches).
    pub fn table(&self) -> Option<String> {
        match self {
            Statement::CreateKeyspace { .. } | Statement::Batch(_) => None,
            Statement::CreateTable(schema) => Some(schema.qualified_name()),
            Statement::Insert(s) => Some(s.table.clone()),
            Statement::Update(s) => Some(s.table.clone()),
            Statement::Delete(s) => Some(s.table.clone()),
            Statement::Select(s) => Some(s.table.clone()),
        }
    }

    /// Whether the statement changes the schema.
    pub fn is_schema_change(&self) -> bool {
        matches!(self, Statement::CreateKeyspace { .. } | Statement::CreateTable(_))
    }

    /// Render as CQL with inlined literals.
    pub fn to_cql(&self) -> String {
        match self {
            Statement::CreateKeyspace { name, replication } => format!(
                "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {}",
                name, replication
            ),
            Statement::CreateTable(schema) => schema.to_cql(),
            Statement::Insert(insert) => {
                let columns: Vec<&str> = insert.values.iter().map(|(c, _)| c.as_str()).collect();
                let values: Vec<String> =
                    insert.values.iter().map(|(_, v)| v.to_cql_literal()).collect();
                let mut cql = format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    insert.table,
                    columns.join(", "),
                    values.join(", ")
                );
                if let Some(ttl) = insert.ttl {
                    cql.push_str(&format!(" USING TTL {}", ttl.as_secs()));
                }
                cql
            }
            Statement::Update(update) => {
                let assignments: Vec<String> = update
                    .assignments
                    .iter()
                    .map(|(c, v)| format!("{} = {}", c, v.to_cql_literal()))
                    .collect();
                format!(
                    "UPDATE {} SET {}{}",
                    update.table,
                    assignments.join(", "),
                    update.restriction.to_cql()
                )
            }
            Statement::Delete(delete) => {
                format!("DELETE FROM {}{}", delete.table, delete.restriction.to_cql())
            }
            Statement::Select(select) => {
                let projection = if select.columns.is_empty() {
                    "*".to_string()
                } else {
                    select.columns.join(", ")
                };
                let mut cql = format!(
                    "SELECT {} FROM {}{}",
                    projection,
                    select.table,
                    select.restriction.to_cql()
                );
                if let Some((column, order)) = &select.order {
                    let direction = match order {
                        Order::Ascending => "ASC",
                        Order::Descending => "DESC",
                    };
                    cql.push_str(&format!(" ORDER BY {} {}", column, direction));
                }
                if let Some(limit) = select.limit {
                    cql.push_str(&format!(" LIMIT {}", limit));
                }
                cql
            }
            Statement::Batch(statements) => {
                let inner: Vec<String> = statements.iter().map(|s| s.to_cql()).collect();
                format!("BEGIN UNLOGGED BATCH {}; APPLY BATCH", inner.join("; "))
            }
        }
    }
}

impl From<Insert> for Statement {
    fn from(s: Insert) -> Self {
        Statement::Insert(s)
    }
}

impl From<Update> for Statement {
    fn from(s: Update) -> Self {
        Statement::Update(s)
    }
}

impl From<Delete> for Statement {
    fn from(s: Delete) -> Self {
        Statement::Delete(s)
    }
}

impl From<Select> for Statement {
    fn from(s: Select) -> Self {
        Statement::Select(s)
    }
}

impl From<TableSchema> for Statement {
    fn from(s: TableSchema) -> Self {
        Statement::CreateTable(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table_composite_partition_key() {
        let schema = TableSchema::new("ks", "t")
            .partition_key("a", ColumnType::Text)
            .partition_key("b", ColumnType::BigInt)
            .clustering("c", ColumnType::BigInt)
            .static_column("used", ColumnType::Boolean)
            .regular("tags", ColumnType::TextSet)
            .with_option("gc_grace_seconds = 10");

        assert_eq!(
            schema.to_cql(),
            "CREATE TABLE IF NOT EXISTS ks.t (a text, b bigint, c bigint, used boolean static, \
             tags set<text>, PRIMARY KEY ((a, b), c)) WITH gc_grace_seconds = 10"
        );
    }

    #[test]
    fn test_create_table_single_key() {
        let schema = TableSchema::new("ks", "meta")
            .partition_key("id", ColumnType::Text)
            .regular("props", ColumnType::TextMap);
        assert_eq!(
            schema.to_cql(),
            "CREATE TABLE IF NOT EXISTS ks.meta (id text, props map<text, text>, PRIMARY KEY (id))"
        );
    }

    #[test]
    fn test_dml_rendering() {
        let insert: Statement = Insert::into_table("ks.t")
            .value("a", "x")
            .value("b", 1i64)
            .ttl(Some(Duration::from_secs(60)))
            .into();
        assert_eq!(
            insert.to_cql(),
            "INSERT INTO ks.t (a, b) VALUES ('x', 1) USING TTL 60"
        );

        let delete: Statement = Delete::from_table("ks.t")
            .where_eq("a", "x")
            .where_range("c", Bound::Unbounded, Bound::Included(Value::BigInt(3)))
            .into();
        assert_eq!(delete.to_cql(), "DELETE FROM ks.t WHERE a = 'x' AND c <= 3");

        let select: Statement = Select::from_table("ks.t")
            .columns(["used", "c"])
            .where_eq("a", "x")
            .order_by("c", Order::Descending)
            .limit(1)
            .into();
        assert_eq!(
            select.to_cql(),
            "SELECT used, c FROM ks.t WHERE a = 'x' ORDER BY c DESC LIMIT 1"
        );
    }

    #[test]
    fn test_range_contains() {
        let range = ClusteringRange {
            column: "c".into(),
            lower: Bound::Excluded(Value::BigInt(1)),
            upper: Bound::Included(Value::BigInt(3)),
        };
        assert!(!range.contains(&Value::BigInt(1)));
        assert!(range.contains(&Value::BigInt(2)));
        assert!(range.contains(&Value::BigInt(3)));
        assert!(!range.contains(&Value::BigInt(4)));
    }
}
