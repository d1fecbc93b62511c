//! Core data types for the TickDB storage engine
//!
//! - `Point`: a single measurement sample
//! - `series_key`: deterministic grouping key for a measurement + tag set

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single time-series sample
///
/// Immutable once handed to the engine. Tags arrive unordered; they are only
/// normalized when a series key is derived.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Point {
    /// Measurement name (e.g. "cpu")
    pub measurement: String,
    /// Tag key/value pairs identifying the series
    #[serde(default)]
    pub tags: HashMap<String, String>,
    /// Field key/value pairs holding the measured values
    #[serde(default)]
    pub fields: HashMap<String, f64>,
    /// Nanoseconds since the Unix epoch
    pub timestamp_unix_nano: i64,
}

impl Point {
    /// Create a point with no tags or fields
    pub fn new(measurement: impl Into<String>, timestamp_unix_nano: i64) -> Self {
        Self {
            measurement: measurement.into(),
            tags: HashMap::new(),
            fields: HashMap::new(),
            timestamp_unix_nano,
        }
    }

    /// Builder method: add a tag
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Builder method: add a field
    pub fn field(mut self, key: impl Into<String>, value: f64) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// The series this point belongs to
    pub fn series_key(&self) -> String {
        series_key(&self.measurement, &self.tags)
    }
}

/// Build the series key for a measurement and tag set.
///
/// Renders `measurement` followed by `|k=v` for every tag, with tag keys in
/// ascending byte order so the key never depends on map iteration order.
pub fn series_key(measurement: &str, tags: &HashMap<String, String>) -> String {
    let mut pairs: Vec<(&String, &String)> = tags.iter().collect();
    pairs.sort_unstable_by(|a, b| a.0.cmp(b.0));

    let capacity = measurement.len()
        + pairs
            .iter()
            .map(|(k, v)| k.len() + v.len() + 2)
            .sum::<usize>();
    let mut key = String::with_capacity(capacity);
    key.push_str(measurement);
    for (k, v) in pairs {
        key.push('|');
        key.push_str(k);
        key.push('=');
        key.push_str(v);
    }
    key
}
