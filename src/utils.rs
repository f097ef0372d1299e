use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Parse a label query string (`key=value,key2=value2`) into a BTreeMap.
/// The `key==value` form is accepted as an alias for `=`.
pub fn parse_labels(query: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for pair in query.split(',') {
        let pair = pair.trim();
        if let Some((key, value)) = pair.split_once('=') {
            let value = value.strip_prefix('=').unwrap_or(value);
            map.insert(key.to_string(), value.to_string());
        }
    }
    map
}

/// Render a label map as the `key=value,...` form the API server expects.
pub fn labels_to_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse an RFC 3339 timestamp, with or without fractional seconds.
pub fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

/// Parse a duration like `5s`, `2m`, `3h` or `1d`. A bare number is seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty duration".to_string());
    }
    let (number, multiplier) = if let Some(rest) = raw.strip_suffix("ms") {
        (rest, 0.001)
    } else if let Some(rest) = raw.strip_suffix('s') {
        (rest, 1.0)
    } else if let Some(rest) = raw.strip_suffix('m') {
        (rest, 60.0)
    } else if let Some(rest) = raw.strip_suffix('h') {
        (rest, 3600.0)
    } else if let Some(rest) = raw.strip_suffix('d') {
        (rest, 86400.0)
    } else {
        (raw, 1.0)
    };
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid duration: {raw:?}"))?;
    if value < 0.0 {
        return Err(format!("negative duration: {raw:?}"));
    }
    Ok(Duration::from_secs_f64(value * multiplier))
}

/// Whole seconds, rounded, for the since-seconds log option.
pub fn duration_to_seconds(duration: Duration) -> i64 {
    duration.as_secs_f64().round() as i64
}
