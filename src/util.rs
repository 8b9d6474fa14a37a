/// Utility helpers used by all collectors.
///
/// This module contains:
/// - Loose JSON field accessors (providers mix numbers and strings)
/// - Time helpers
/// - Small formatting helpers for log output
///
/// IMPORTANT:
/// - No provider-specific business logic should live here.
/// - This module must remain lightweight and deterministic.
///

use serde_json::Value;

/// Scale used for the coordinate part of the POI identity key.
///
/// 1e5 corresponds to five decimal places (~1.1 m at the equator).
pub const COORD_KEY_SCALE: f64 = 100_000.0;

/// Returns the current Unix timestamp in milliseconds.
///
/// Used for credential lease stamps and checkpoint bookkeeping.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Rounds a coordinate to the fixed-point integer used in identity keys.
///
/// Examples:
/// - 119.553612 -> 11955361
/// - 33.782549  -> 3378255
pub fn coord_key(value: f64) -> i64 {
    (value * COORD_KEY_SCALE).round() as i64
}

/// Reads a string field by JSON pointer.
///
/// Returns `None` for missing fields and for non-string values.
/// Amap in particular returns `[]` instead of `""` for empty
/// address/phone fields, which must not leak into records.
pub fn json_str<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

/// Reads a trimmed, non-empty string field by JSON pointer.
pub fn json_text(value: &Value, pointer: &str) -> Option<String> {
    json_str(value, pointer)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Reads a number that may be encoded either as a JSON number or as a
/// numeric string ("count": "120" vs "total": 120).
pub fn json_f64(value: &Value, pointer: &str) -> Option<f64> {
    match value.pointer(pointer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parses a "lon,lat" pair as used by Tianditu and Amap.
///
/// Returns `None` unless exactly two finite numbers are present.
pub fn parse_lon_lat(raw: &str) -> Option<(f64, f64)> {
    let mut parts = raw.split(',');
    let lon: f64 = parts.next()?.trim().parse().ok()?;
    let lat: f64 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() || !lon.is_finite() || !lat.is_finite() {
        return None;
    }
    Some((lon, lat))
}

/// Shortens a payload for log output without splitting a UTF-8 character.
pub fn truncate_for_log(raw: &str, max_chars: usize) -> String {
    let mut out: String = raw.chars().take(max_chars).collect();
    if raw.chars().count() > max_chars {
        out.push('…');
    }
    out
}
