use serde_json::Value as JsonValue;

/// Truthiness of a raw `valor`: null, `false`, `""`, zero and empty
/// containers are absent readings.
pub fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
    }
}

/// Numeric value of a raw `valor`, or `None` when it is not a number.
pub fn coerce_value(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        JsonValue::String(s) => coerce_str(s),
        _ => None,
    }
}

/// Parses a numeric string that may use `,` or `.` as decimal marker and
/// the other one (or spaces) as thousands separator.
pub fn coerce_str(raw: &str) -> Option<f64> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\'')
        .collect();
    if compact.is_empty() {
        return None;
    }
    normalize_separators(&compact)
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

fn normalize_separators(s: &str) -> String {
    match (s.rfind(','), s.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => s.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => s.replace(',', ""),
        (Some(_), None) if s.matches(',').count() == 1 => s.replace(',', "."),
        (Some(_), None) => s.replace(',', ""),
        (None, Some(_)) if s.matches('.').count() > 1 => s.replace('.', ""),
        _ => s.to_string(),
    }
}
