//! Core domain model for the country dimension pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CRATE_NAME: &str = "cdim-core";

/// Timestamped envelope around one fetch of the source dataset.
///
/// Immutable once constructed; persisted verbatim into the raw sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPayload {
    pub fetched_at: DateTime<Utc>,
    pub source: String,
    pub data: Vec<Value>,
}

impl RawPayload {
    pub fn new(source: impl Into<String>, data: Vec<Value>) -> Self {
        Self {
            fetched_at: Utc::now(),
            source: source.into(),
            data,
        }
    }
}

/// Typed curated representation of one country, keyed by `country_code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuratedRecord {
    pub country_code: String,
    pub name_common: Option<String>,
    pub name_official: Option<String>,
    pub region: Option<String>,
    pub subregion: Option<String>,
    pub capital: Option<String>,
    pub population: Option<i64>,
    pub area: Option<f64>,
    pub independent: Option<bool>,
    pub landlocked: Option<bool>,
    pub flag_png: Option<String>,
}

/// Ordered output of one normalize pass, consumed once by the upsert.
///
/// `dropped` counts raw records excluded for lacking a country code; it
/// feeds the run summary and is never treated as an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CuratedBatch {
    pub records: Vec<CuratedRecord>,
    pub dropped: usize,
}

impl CuratedBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
