//! Database and HTTP plumbing for the water-quality sync: endpoint client,
//! table upserts and the station directory.

mod http;
mod stations;
mod upsert;

use thiserror::Error;

pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, HttpClientConfig,
    HttpFetcher, RetryDisposition,
};
pub use stations::{PgStationDirectory, StaticStationDirectory, StationDirectory};
pub use upsert::{
    build_upsert, Column, ColumnKind, ColumnRole, MemoryWriter, PgTableWriter, Row, SqlValue,
    TableName, TableSchema, TableWriter, PG_MAX_BIND_PARAMS,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connecting to database: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("database query failed: {0}")]
    Query(#[source] sqlx::Error),
    #[error("table {0} is unavailable")]
    Unavailable(String),
    #[error("invalid table name {0:?}")]
    InvalidTableName(String),
    #[error("row for {table} has {actual} values, schema has {expected} columns")]
    RowShape {
        table: String,
        expected: usize,
        actual: usize,
    },
    #[error("column {table}.{column} expects {expected:?}, got {actual:?}")]
    ColumnKind {
        table: String,
        column: &'static str,
        expected: ColumnKind,
        actual: ColumnKind,
    },
    #[error("batch for {table} repeats key {key:?}")]
    DuplicateKey { table: String, key: Vec<String> },
}
