use async_trait::async_trait;
use sqlx::{Connection, PgConnection, Row};
use tracing::{info, warn};
use waterq_core::Station;

use crate::{StoreError, TableName};

/// Read-only source of the stations to poll, in polling order.
#[async_trait]
pub trait StationDirectory: Send + Sync {
    async fn stations(&self) -> Result<Vec<Station>, StoreError>;
}

/// Stations table in the monitoring database (`codigo`, `estacion`).
#[derive(Debug, Clone)]
pub struct PgStationDirectory {
    database_url: String,
    table: TableName,
}

impl PgStationDirectory {
    pub fn new(database_url: impl Into<String>, table: TableName) -> Self {
        Self {
            database_url: database_url.into(),
            table,
        }
    }

    fn query(&self) -> String {
        format!(
            "SELECT trim(codigo)::text AS codigo, trim(estacion)::text AS estacion FROM {} ORDER BY 1",
            self.table.quoted()
        )
    }
}

#[async_trait]
impl StationDirectory for PgStationDirectory {
    async fn stations(&self) -> Result<Vec<Station>, StoreError> {
        let mut conn = PgConnection::connect(&self.database_url)
            .await
            .map_err(StoreError::Connect)?;
        let rows = sqlx::query(&self.query()).fetch_all(&mut conn).await;
        if let Err(err) = conn.close().await {
            warn!(error = %err, "closing database connection");
        }

        let mut stations = Vec::new();
        for row in rows.map_err(StoreError::Query)? {
            let code: Option<String> = row.try_get("codigo").map_err(StoreError::Query)?;
            let name: Option<String> = row.try_get("estacion").map_err(StoreError::Query)?;
            match code.filter(|c| !c.trim().is_empty()) {
                Some(code) => stations.push(Station::new(code, name.unwrap_or_default())),
                None => warn!(table = %self.table, "skipping station row without code"),
            }
        }
        info!(table = %self.table, count = stations.len(), "loaded stations");
        Ok(stations)
    }
}

/// Fixed station list, for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticStationDirectory {
    stations: Vec<Station>,
}

impl StaticStationDirectory {
    pub fn new(stations: Vec<Station>) -> Self {
        Self { stations }
    }

    /// Parses `code[:name]` entries separated by commas.
    pub fn from_list(list: &str) -> Self {
        let stations = list
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once(':') {
                Some((code, name)) => Station::new(code, name),
                None => Station::new(entry, entry),
            })
            .collect();
        Self { stations }
    }
}

#[async_trait]
impl StationDirectory for StaticStationDirectory {
    async fn stations(&self) -> Result<Vec<Station>, StoreError> {
        Ok(self.stations.clone())
    }
}
