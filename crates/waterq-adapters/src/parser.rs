use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use waterq_core::{Measurement, RawCapture};

use crate::coerce::{coerce_value, is_truthy};

/// The endpoint only reports dates; every reading is pinned to midnight.
pub const OBSERVATION_TIME_SUFFIX: &str = " 00:00:00";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed response payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unparseable fecha {fecha:?} for parameter {parameter}")]
    Date { parameter: String, fecha: String },
}

#[derive(Debug, Deserialize)]
struct BmwpResponse {
    parametros: Vec<Parametro>,
}

#[derive(Debug, Deserialize)]
struct Parametro {
    nombre: String,
    abreviacion: String,
    mediciones: Vec<Medicion>,
}

#[derive(Debug, Deserialize)]
struct Medicion {
    #[serde(default)]
    fecha: Option<String>,
    #[serde(default)]
    valor: JsonValue,
}

/// Builds the observation timestamp from a date-only `fecha`. Year-month
/// dates resolve to the first of the month.
pub fn parse_observed_at(fecha: &str) -> Option<NaiveDateTime> {
    let fecha = fecha.trim();
    let stamped = format!("{fecha}{OBSERVATION_TIME_SUFFIX}");
    NaiveDateTime::parse_from_str(&stamped, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(&format!("{fecha}-01"), "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// Normalizes one raw capture into measurements. Readings without a `fecha`
/// or with a falsy `valor` are skipped; a non-numeric `valor` is kept as
/// `None`.
pub fn parse_capture(capture: &RawCapture) -> Result<Vec<Measurement>, ParseError> {
    let response: BmwpResponse = serde_json::from_str(&capture.response_body)?;

    let mut out = Vec::new();
    for parametro in response.parametros {
        let parameter_name = parametro.nombre.trim().to_string();
        let parameter_abbreviation = parametro.abreviacion.trim().to_string();

        for medicion in parametro.mediciones {
            let Some(fecha) = medicion.fecha.filter(|f| !f.trim().is_empty()) else {
                continue;
            };
            if !is_truthy(&medicion.valor) {
                continue;
            }
            let observed_at = parse_observed_at(&fecha).ok_or_else(|| ParseError::Date {
                parameter: parameter_name.clone(),
                fecha: fecha.clone(),
            })?;

            out.push(Measurement {
                station_code: capture.station_code.clone(),
                parameter_name: parameter_name.clone(),
                parameter_abbreviation: parameter_abbreviation.clone(),
                observed_at,
                value: coerce_value(&medicion.valor),
            });
        }
    }
    Ok(out)
}
