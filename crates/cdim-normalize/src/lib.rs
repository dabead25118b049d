//! Pure transform from raw source records into curated country rows.
//!
//! No I/O happens here: the normalizer maps each loosely-typed source
//! record onto the curated schema with default-on-missing lookups and
//! best-effort coercion, and drops records lacking the natural key.

use serde_json::Value;
use tracing::debug;

use cdim_core::{CuratedBatch, CuratedRecord};

pub const CRATE_NAME: &str = "cdim-normalize";

/// Optional-chain lookup over an untyped JSON tree. Returns `None` at the
/// first missing key or type-mismatched step instead of erroring.
pub fn json_value<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

pub fn json_str<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    json_value(value, path)?.as_str()
}

pub fn json_bool(value: &Value, path: &[&str]) -> Option<bool> {
    json_value(value, path)?.as_bool()
}

/// Best-effort integer coercion: JSON numbers pass through, numeric
/// strings parse, everything else is `None`. Never raises.
pub fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// First element of a list-typed field, if present and non-empty.
fn first_list_str(value: &Value, path: &[&str]) -> Option<String> {
    json_value(value, path)?
        .as_array()?
        .first()?
        .as_str()
        .map(ToString::to_string)
}

/// Maps one raw record onto the curated schema. `None` means the record
/// carries no usable country code and is excluded from the batch.
pub fn normalize_record(record: &Value) -> Option<CuratedRecord> {
    let country_code = json_str(record, &["cca2"])?.trim();
    if country_code.is_empty() {
        return None;
    }

    Some(CuratedRecord {
        country_code: country_code.to_string(),
        name_common: json_str(record, &["name", "common"]).map(ToString::to_string),
        name_official: json_str(record, &["name", "official"]).map(ToString::to_string),
        region: json_str(record, &["region"]).map(ToString::to_string),
        subregion: json_str(record, &["subregion"]).map(ToString::to_string),
        capital: first_list_str(record, &["capital"]),
        population: json_value(record, &["population"]).and_then(coerce_i64),
        area: json_value(record, &["area"]).and_then(coerce_f64),
        independent: json_bool(record, &["independent"]),
        landlocked: json_bool(record, &["landlocked"]),
        flag_png: json_str(record, &["flags", "png"]).map(ToString::to_string),
    })
}

/// Deterministic, order-preserving transform of one raw dataset.
///
/// Duplicate country codes survive normalization; the upsert resolves
/// them last-wins by batch order.
pub fn normalize(raw_records: &[Value]) -> CuratedBatch {
    let mut records = Vec::with_capacity(raw_records.len());
    let mut dropped = 0usize;

    for record in raw_records {
        match normalize_record(record) {
            Some(curated) => records.push(curated),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!(dropped, "skipped raw records without a country code");
    }

    CuratedBatch { records, dropped }
}
