use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::query_builder::Separated;
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder, Row as _};
use tracing::{debug, info, warn};

use crate::StoreError;

/// Postgres refuses statements with more bind parameters than this.
pub const PG_MAX_BIND_PARAMS: usize = 65_535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Float,
    Timestamp,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    /// Part of the natural key and the `ON CONFLICT` target.
    Key,
    /// Overwritten with the incoming value on conflict.
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub role: ColumnRole,
}

impl Column {
    pub const fn key(name: &'static str, kind: ColumnKind) -> Self {
        Self {
            name,
            kind,
            role: ColumnRole::Key,
        }
    }

    pub const fn update(name: &'static str, kind: ColumnKind) -> Self {
        Self {
            name,
            kind,
            role: ColumnRole::Update,
        }
    }
}

/// `[schema.]table` identifier restricted to ASCII alphanumerics and `_`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: Option<String>,
    name: String,
}

impl TableName {
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let raw = raw.trim();
        let valid = |part: &str| {
            !part.is_empty()
                && !part.starts_with(|c: char| c.is_ascii_digit())
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        };
        let (schema, name) = match raw.split_once('.') {
            Some((schema, name)) => (Some(schema), name),
            None => (None, raw),
        };
        if !valid(name) || schema.is_some_and(|s| !valid(s)) {
            return Err(StoreError::InvalidTableName(raw.to_string()));
        }
        Ok(Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        })
    }

    pub fn schema(&self) -> &str {
        self.schema.as_deref().unwrap_or("public")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("\"{schema}\".\"{}\"", self.name),
            None => format!("\"{}\"", self.name),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Explicit column layout of a destination table. Row values are positional
/// and follow `columns`.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub table: TableName,
    pub version: u32,
    pub columns: &'static [Column],
}

impl TableSchema {
    pub fn key_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.role == ColumnRole::Key)
    }

    pub fn update_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.role == ColumnRole::Update)
    }

    pub fn rows_per_statement(&self) -> usize {
        (PG_MAX_BIND_PARAMS / self.columns.len().max(1)).max(1)
    }

    pub fn insert_prefix(&self) -> String {
        format!(
            "INSERT INTO {} ({}) ",
            self.table.quoted(),
            quote_list(self.columns.iter())
        )
    }

    pub fn conflict_clause(&self) -> String {
        let updates = self
            .update_columns()
            .map(|c| format!("\"{0}\" = EXCLUDED.\"{0}\"", c.name))
            .collect::<Vec<_>>();
        let target = quote_list(self.key_columns());
        if updates.is_empty() {
            format!(" ON CONFLICT ({target}) DO NOTHING")
        } else {
            format!(" ON CONFLICT ({target}) DO UPDATE SET {}", updates.join(", "))
        }
    }

    pub fn validate_row(&self, row: &[SqlValue]) -> Result<(), StoreError> {
        if row.len() != self.columns.len() {
            return Err(StoreError::RowShape {
                table: self.table.to_string(),
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        for (column, value) in self.columns.iter().zip(row) {
            if column.kind != value.kind() {
                return Err(StoreError::ColumnKind {
                    table: self.table.to_string(),
                    column: column.name,
                    expected: column.kind,
                    actual: value.kind(),
                });
            }
        }
        Ok(())
    }

    /// Shape and kind checks plus key uniqueness: Postgres rejects an
    /// `ON CONFLICT DO UPDATE` that touches the same row twice.
    pub fn validate_batch(&self, rows: &[Row]) -> Result<(), StoreError> {
        let mut seen = HashSet::with_capacity(rows.len());
        for row in rows {
            self.validate_row(row)?;
            let key = self.key_of(row);
            if !seen.insert(key.clone()) {
                return Err(StoreError::DuplicateKey {
                    table: self.table.to_string(),
                    key,
                });
            }
        }
        Ok(())
    }

    /// Key column values of `row`, one element per key column.
    pub fn key_of(&self, row: &[SqlValue]) -> Vec<String> {
        self.columns
            .iter()
            .zip(row)
            .filter(|(c, _)| c.role == ColumnRole::Key)
            .map(|(_, v)| v.to_string())
            .collect()
    }
}

fn quote_list<'a>(columns: impl Iterator<Item = &'a Column>) -> String {
    columns
        .map(|c| format!("\"{}\"", c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Float(Option<f64>),
    Timestamp(NaiveDateTime),
    Bool(bool),
}

impl SqlValue {
    pub fn kind(&self) -> ColumnKind {
        match self {
            SqlValue::Text(_) => ColumnKind::Text,
            SqlValue::Float(_) => ColumnKind::Float,
            SqlValue::Timestamp(_) => ColumnKind::Timestamp,
            SqlValue::Bool(_) => ColumnKind::Bool,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Text(v) => f.write_str(v),
            SqlValue::Float(Some(v)) => write!(f, "{v}"),
            SqlValue::Float(None) => f.write_str("NULL"),
            SqlValue::Timestamp(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S")),
            SqlValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

pub type Row = Vec<SqlValue>;

fn push_value(b: &mut Separated<'_, 'static, Postgres, &'static str>, value: &SqlValue) {
    match value.clone() {
        SqlValue::Text(v) => b.push_bind(v),
        SqlValue::Float(v) => b.push_bind(v),
        SqlValue::Timestamp(v) => b.push_bind(v),
        SqlValue::Bool(v) => b.push_bind(v),
    };
}

/// One `INSERT .. VALUES .. ON CONFLICT` statement for `rows`.
pub fn build_upsert(schema: &TableSchema, rows: &[Row]) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new(schema.insert_prefix());
    qb.push_values(rows, |mut b, row| {
        for value in row {
            push_value(&mut b, value);
        }
    });
    qb.push(schema.conflict_clause());
    qb
}

/// Destination of the pipeline's stage outputs.
#[async_trait]
pub trait TableWriter: Send + Sync {
    /// Inserts `rows`, overwriting the update columns of rows whose key
    /// already exists. All-or-nothing per call; an empty batch is a no-op.
    async fn upsert(&self, schema: &TableSchema, rows: &[Row]) -> Result<u64, StoreError>;
}

/// Postgres writer that opens a fresh connection per call and closes it
/// before returning.
#[derive(Debug, Clone)]
pub struct PgTableWriter {
    database_url: String,
}

impl PgTableWriter {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// Columns of `schema` that the live table does not have.
    pub async fn missing_columns(
        &self,
        schema: &TableSchema,
    ) -> Result<Vec<&'static str>, StoreError> {
        let mut conn = PgConnection::connect(&self.database_url)
            .await
            .map_err(StoreError::Connect)?;
        let rows = sqlx::query(
            r#"
            SELECT column_name::text AS column_name
              FROM information_schema.columns
             WHERE table_schema = $1
               AND table_name = $2
            "#,
        )
        .bind(schema.table.schema())
        .bind(schema.table.name())
        .fetch_all(&mut conn)
        .await;
        close_quietly(conn).await;

        let mut present = HashSet::new();
        for row in rows.map_err(StoreError::Query)? {
            let name: String = row.try_get("column_name").map_err(StoreError::Query)?;
            present.insert(name);
        }
        Ok(schema
            .columns
            .iter()
            .map(|c| c.name)
            .filter(|name| !present.contains(*name))
            .collect())
    }
}

#[async_trait]
impl TableWriter for PgTableWriter {
    async fn upsert(&self, schema: &TableSchema, rows: &[Row]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            debug!(table = %schema.table, "empty batch, skipping upsert");
            return Ok(0);
        }
        schema.validate_batch(rows)?;

        let mut conn = PgConnection::connect(&self.database_url)
            .await
            .map_err(StoreError::Connect)?;
        let result = write_in_transaction(&mut conn, schema, rows).await;
        close_quietly(conn).await;

        let affected = result?;
        info!(
            table = %schema.table,
            schema_version = schema.version,
            rows = rows.len(),
            affected,
            "upsert committed"
        );
        Ok(affected)
    }
}

async fn write_in_transaction(
    conn: &mut PgConnection,
    schema: &TableSchema,
    rows: &[Row],
) -> Result<u64, StoreError> {
    let mut tx = conn.begin().await.map_err(StoreError::Query)?;
    let mut affected = 0u64;
    for chunk in rows.chunks(schema.rows_per_statement()) {
        let mut qb = build_upsert(schema, chunk);
        affected += qb
            .build()
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Query)?
            .rows_affected();
    }
    tx.commit().await.map_err(StoreError::Query)?;
    Ok(affected)
}

async fn close_quietly(conn: PgConnection) {
    if let Err(err) = conn.close().await {
        warn!(error = %err, "closing database connection");
    }
}

/// In-process writer with the same conflict semantics as [`PgTableWriter`].
/// Backs dry runs and pipeline tests.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, BTreeMap<Vec<String>, Row>>,
    calls: BTreeMap<String, usize>,
    failing: HashSet<String>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later upsert into `table` fail as if the store were down.
    #[cfg(any(test, feature = "test-util"))]
    pub fn fail_table(&self, table: &str) {
        self.lock().failing.insert(table.to_string());
    }

    /// Rows of `table` ordered by natural key.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock()
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, BTreeMap::len)
    }

    /// Number of non-empty upsert calls that reached `table`.
    pub fn calls(&self, table: &str) -> usize {
        self.lock().calls.get(table).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TableWriter for MemoryWriter {
    async fn upsert(&self, schema: &TableSchema, rows: &[Row]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        schema.validate_batch(rows)?;

        let table = schema.table.to_string();
        let mut state = self.lock();
        if state.failing.contains(&table) {
            return Err(StoreError::Unavailable(table));
        }
        *state.calls.entry(table.clone()).or_default() += 1;

        let stored = state.tables.entry(table).or_default();
        for row in rows {
            let key = schema.key_of(row);
            match stored.get_mut(&key) {
                Some(existing) => {
                    for (i, column) in schema.columns.iter().enumerate() {
                        if column.role == ColumnRole::Update {
                            existing[i] = row[i].clone();
                        }
                    }
                }
                None => {
                    stored.insert(key, row.clone());
                }
            }
        }
        Ok(rows.len() as u64)
    }
}
