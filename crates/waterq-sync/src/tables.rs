//! Destination table layouts. Bump a table's version whenever its column
//! list changes.

use waterq_core::{IndexRecord, Measurement, RawCapture};
use waterq_storage::{Column, ColumnKind, Row, SqlValue, StoreError, TableName, TableSchema};

pub const RAW_SCHEMA_VERSION: u32 = 1;
pub const BRONZE_SCHEMA_VERSION: u32 = 1;
pub const SILVER_SCHEMA_VERSION: u32 = 1;

const RAW_COLUMNS: &[Column] = &[
    Column::key("timestamp", ColumnKind::Timestamp),
    Column::key("codigo", ColumnKind::Text),
    Column::update("response", ColumnKind::Text),
];

const BRONZE_COLUMNS: &[Column] = &[
    Column::key("codigo", ColumnKind::Text),
    Column::key("parametro", ColumnKind::Text),
    Column::update("abreviacion", ColumnKind::Text),
    Column::key("fecha", ColumnKind::Timestamp),
    Column::update("valor", ColumnKind::Float),
];

const SILVER_COLUMNS: &[Column] = &[
    Column::key("cod_estacion", ColumnKind::Text),
    Column::key("fecha_reg", ColumnKind::Timestamp),
    Column::update("valorbmwp", ColumnKind::Float),
    Column::update("origen", ColumnKind::Text),
    Column::update("habilitado", ColumnKind::Bool),
];

#[derive(Debug, Clone)]
pub struct PipelineTables {
    pub raw: TableSchema,
    pub bronze: TableSchema,
    pub silver: TableSchema,
}

impl PipelineTables {
    pub fn new(raw: &str, bronze: &str, silver: &str) -> Result<Self, StoreError> {
        Ok(Self {
            raw: TableSchema {
                table: TableName::parse(raw)?,
                version: RAW_SCHEMA_VERSION,
                columns: RAW_COLUMNS,
            },
            bronze: TableSchema {
                table: TableName::parse(bronze)?,
                version: BRONZE_SCHEMA_VERSION,
                columns: BRONZE_COLUMNS,
            },
            silver: TableSchema {
                table: TableName::parse(silver)?,
                version: SILVER_SCHEMA_VERSION,
                columns: SILVER_COLUMNS,
            },
        })
    }

    pub fn all(&self) -> [&TableSchema; 3] {
        [&self.raw, &self.bronze, &self.silver]
    }
}

pub fn raw_row(capture: &RawCapture) -> Row {
    vec![
        SqlValue::Timestamp(capture.period.starts_at()),
        SqlValue::Text(capture.station_code.clone()),
        SqlValue::Text(capture.response_body.clone()),
    ]
}

pub fn bronze_row(measurement: &Measurement) -> Row {
    vec![
        SqlValue::Text(measurement.station_code.clone()),
        SqlValue::Text(measurement.parameter_name.clone()),
        SqlValue::Text(measurement.parameter_abbreviation.clone()),
        SqlValue::Timestamp(measurement.observed_at),
        SqlValue::Float(measurement.value),
    ]
}

pub fn silver_row(record: &IndexRecord) -> Row {
    vec![
        SqlValue::Text(record.station_code.clone()),
        SqlValue::Timestamp(record.recorded_at),
        SqlValue::Float(record.index_value),
        SqlValue::Text(record.source.clone()),
        SqlValue::Bool(record.enabled),
    ]
}
