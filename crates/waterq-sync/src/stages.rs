use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use tracing::{info, info_span, warn, Instrument};
use waterq_adapters::{parse_capture, MeasurementSource};
use waterq_core::{IndexRecord, Measurement, Period, RawCapture, Station};
use waterq_storage::{TableSchema, TableWriter};

use crate::tables::{bronze_row, raw_row, silver_row};

#[derive(Debug, Clone, Default)]
pub struct PollOutcome {
    pub captures: Vec<RawCapture>,
    pub failed_stations: Vec<String>,
}

/// Requests every station in order, one at a time, pausing `pacing` between
/// requests. Each successful response is written to the raw table before
/// the next request; a failed request is logged and skipped.
pub async fn poll_stations(
    source: &dyn MeasurementSource,
    writer: &dyn TableWriter,
    raw: &TableSchema,
    stations: &[Station],
    period: Period,
    pacing: Duration,
) -> Result<PollOutcome> {
    let mut outcome = PollOutcome::default();

    for (i, station) in stations.iter().enumerate() {
        if i > 0 && !pacing.is_zero() {
            tokio::time::sleep(pacing).await;
        }

        let span = info_span!("poll_station", station = %station.code);
        let body = match source.fetch_station(station).instrument(span).await {
            Ok(body) => body,
            Err(err) => {
                warn!(station = %station.code, error = %err, "station request failed, skipping");
                outcome.failed_stations.push(station.code.clone());
                continue;
            }
        };

        let capture = RawCapture {
            period,
            station_code: station.code.clone(),
            response_body: body,
        };
        writer
            .upsert(raw, &[raw_row(&capture)])
            .await
            .with_context(|| format!("writing raw capture for station {}", station.code))?;
        info!(station = %station.code, bytes = capture.response_body.len(), "raw capture stored");
        outcome.captures.push(capture);
    }

    Ok(outcome)
}

#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub measurements: Vec<Measurement>,
    pub failed_stations: Vec<String>,
}

/// Normalizes every capture; a capture that cannot be parsed contributes
/// nothing and is reported by station code.
pub fn parse_captures(captures: &[RawCapture]) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    for capture in captures {
        match parse_capture(capture) {
            Ok(rows) => outcome.measurements.extend(rows),
            Err(err) => {
                warn!(station = %capture.station_code, error = %err, "unparseable response, skipping");
                outcome.failed_stations.push(capture.station_code.clone());
            }
        }
    }
    outcome.measurements = dedup_measurements(outcome.measurements);
    outcome
}

/// Keeps the last reading per `(station, parameter, observed_at)`, at the
/// position of the first one.
pub fn dedup_measurements(measurements: Vec<Measurement>) -> Vec<Measurement> {
    let mut positions: HashMap<(String, String, NaiveDateTime), usize> = HashMap::new();
    let mut out: Vec<Measurement> = Vec::with_capacity(measurements.len());
    for m in measurements {
        let key = (m.station_code.clone(), m.parameter_name.clone(), m.observed_at);
        match positions.get(&key) {
            Some(&i) => out[i] = m,
            None => {
                positions.insert(key, out.len());
                out.push(m);
            }
        }
    }
    out
}

/// Projects the index parameter's readings onto silver rows.
pub fn to_index_records(measurements: &[Measurement], index_parameter: &str) -> Vec<IndexRecord> {
    measurements
        .iter()
        .filter(|m| m.parameter_name == index_parameter)
        .cloned()
        .map(IndexRecord::from_measurement)
        .collect()
}

pub async fn write_bronze(
    writer: &dyn TableWriter,
    bronze: &TableSchema,
    measurements: &[Measurement],
) -> Result<u64> {
    let rows = measurements.iter().map(bronze_row).collect::<Vec<_>>();
    writer
        .upsert(bronze, &rows)
        .await
        .with_context(|| format!("upserting {} measurements into {}", rows.len(), bronze.table))
}

pub async fn write_silver(
    writer: &dyn TableWriter,
    silver: &TableSchema,
    records: &[IndexRecord],
) -> Result<u64> {
    let rows = records.iter().map(silver_row).collect::<Vec<_>>();
    writer
        .upsert(silver, &rows)
        .await
        .with_context(|| format!("upserting {} index records into {}", rows.len(), silver.table))
}
