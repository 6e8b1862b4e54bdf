//! Core data types used throughout the query engine
//!
//! This module defines the fundamental data structures shared across the
//! system:
//!
//! - **`Timestamp`**: seconds or milliseconds since the Unix epoch
//! - **`TsResolution`**: the process-wide timestamp resolution
//! - **`TimeRange`**: inclusive time window for queries
//! - **`TagSet`**: key/value metadata tags with trailing-`*` wildcard
//!   matching on values
//!
//! Two timestamp resolutions coexist in one process: values at or above
//! [`MAX_SEC_SINCE_EPOCH`] are interpreted as milliseconds, values below it
//! as seconds. [`TsResolution::normalize`] coerces every timestamp consumed
//! by a query to the configured process resolution, so the rest of the
//! pipeline never has to guess.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Timestamp in seconds or milliseconds since the Unix epoch
pub type Timestamp = u64;

/// A materialized run of data points belonging to one series
pub type DataPoints = Vec<(Timestamp, f64)>;

/// Boundary between second-resolution and millisecond-resolution timestamps
///
/// Any timestamp at or above `2^32` cannot be a plausible number of seconds
/// since the epoch and is treated as milliseconds.
pub const MAX_SEC_SINCE_EPOCH: Timestamp = 1 << 32;

/// Convert a timestamp of either resolution to milliseconds
pub fn to_ms(tstamp: Timestamp) -> Timestamp {
    if tstamp < MAX_SEC_SINCE_EPOCH {
        tstamp * 1000
    } else {
        tstamp
    }
}

/// Convert a timestamp of either resolution to seconds
pub fn to_sec(tstamp: Timestamp) -> Timestamp {
    if tstamp < MAX_SEC_SINCE_EPOCH {
        tstamp
    } else {
        tstamp / 1000
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Process-wide timestamp resolution, configured once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TsResolution {
    /// Timestamps are seconds since the epoch
    #[default]
    #[serde(rename = "s")]
    Seconds,
    /// Timestamps are milliseconds since the epoch
    #[serde(rename = "ms")]
    Milliseconds,
}

impl TsResolution {
    /// Coerce a timestamp of either resolution to this resolution
    ///
    /// This is the normalization step applied to every timestamp entering a
    /// query (`start`, `end`, relative offsets) so that the whole pipeline
    /// operates in one unit.
    pub fn normalize(&self, tstamp: Timestamp) -> Timestamp {
        match self {
            TsResolution::Seconds => to_sec(tstamp),
            TsResolution::Milliseconds => to_ms(tstamp),
        }
    }

    /// Number of timestamp units per second (1 or 1000)
    pub fn units_per_second(&self) -> u64 {
        match self {
            TsResolution::Seconds => 1,
            TsResolution::Milliseconds => 1000,
        }
    }

    /// Current wall-clock time in this resolution
    pub fn now(&self) -> Timestamp {
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        match self {
            TsResolution::Seconds => now_ms / 1000,
            TsResolution::Milliseconds => now_ms,
        }
    }
}

impl fmt::Display for TsResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TsResolution::Seconds => write!(f, "s"),
            TsResolution::Milliseconds => write!(f, "ms"),
        }
    }
}

// ============================================================================
// Time Range
// ============================================================================

/// Inclusive-inclusive time window, OpenTSDB-compatible
///
/// Invariant: `start <= end`, both in the same resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Inclusive lower bound
    pub start: Timestamp,
    /// Inclusive upper bound
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a time range, validating `start <= end`
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self, String> {
        if start > end {
            return Err(format!("invalid time range: start {} > end {}", start, end));
        }
        Ok(Self { start, end })
    }

    /// Whether `tstamp` falls inside the range (inclusive on both ends)
    pub fn contains(&self, tstamp: Timestamp) -> bool {
        self.start <= tstamp && tstamp <= self.end
    }

    /// Whether two ranges overlap
    pub fn intersects(&self, other: &TimeRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Range with both bounds coerced to the given resolution
    pub fn normalized(&self, resolution: TsResolution) -> TimeRange {
        TimeRange {
            start: resolution.normalize(self.start),
            end: resolution.normalize(self.end),
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

// ============================================================================
// Tags
// ============================================================================

/// Whether a queried tag value is a trailing-`*` wildcard
///
/// A value is a wildcard iff its last character is `*`. `host=web*` matches
/// any value starting with `web`; a bare `*` matches any value.
pub fn is_wildcard_value(value: &str) -> bool {
    value.ends_with('*')
}

/// Match a queried tag value (possibly a trailing-`*` wildcard) against a
/// concrete series tag value
pub fn tag_value_matches(pattern: &str, value: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => pattern == value,
    }
}

/// Keyed collection of tags; duplicate keys are disallowed
///
/// Keys are kept in canonical (sorted) order, which makes the derived series
/// key stable regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TagSet {
    tags: BTreeMap<String, String>,
}

impl TagSet {
    /// Create an empty tag set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tag, returning the previous value if the key was present
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.tags.insert(key.into(), value.into())
    }

    /// Look up a tag value by key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(|v| v.as_str())
    }

    /// Remove a tag by key, returning its value
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.tags.remove(key)
    }

    /// Whether the key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.tags.contains_key(key)
    }

    /// Number of tags
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Iterate tags in canonical key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Keys whose queried value is a trailing-`*` wildcard
    pub fn wildcard_keys(&self) -> Vec<&str> {
        self.tags
            .iter()
            .filter(|(_, v)| is_wildcard_value(v))
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Whether this tag set, used as a filter, matches a series' tags
    ///
    /// Every filter entry must be satisfied: the series must carry the key,
    /// and the value must match exactly or by trailing-`*` prefix.
    pub fn matches(&self, series_tags: &TagSet) -> bool {
        self.iter().all(|(key, pattern)| {
            series_tags
                .get(key)
                .map(|v| tag_value_matches(pattern, v))
                .unwrap_or(false)
        })
    }

    /// Canonical series key for a metric and this tag set
    ///
    /// Stable across insertion orders because tags iterate sorted by key.
    pub fn series_key(&self, metric: &str) -> String {
        let mut key = String::with_capacity(metric.len() + 16 * self.len());
        key.push_str(metric);
        for (k, v) in self.iter() {
            key.push(';');
            key.push_str(k);
            key.push('=');
            key.push_str(v);
        }
        key
    }
}

impl FromIterator<(String, String)> for TagSet {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            tags: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_boundary() {
        assert_eq!(to_ms(10), 10_000);
        assert_eq!(to_ms(1_700_000_000_000), 1_700_000_000_000);
        assert_eq!(to_sec(1_700_000_000_000), 1_700_000_000);
        assert_eq!(to_sec(1_700_000_000), 1_700_000_000);
    }

    #[test]
    fn test_normalize_to_process_resolution() {
        assert_eq!(TsResolution::Seconds.normalize(1_700_000_000_000), 1_700_000_000);
        assert_eq!(TsResolution::Milliseconds.normalize(1_700_000_000), 1_700_000_000_000);
        // already in the right unit: unchanged
        assert_eq!(TsResolution::Seconds.normalize(1_700_000_000), 1_700_000_000);
    }

    #[test]
    fn test_time_range_validation() {
        assert!(TimeRange::new(10, 5).is_err());
        let range = TimeRange::new(5, 10).unwrap();
        assert!(range.contains(5));
        assert!(range.contains(10));
        assert!(!range.contains(11));
    }

    #[test]
    fn test_time_range_intersection() {
        let a = TimeRange::new(0, 10).unwrap();
        let b = TimeRange::new(10, 20).unwrap();
        let c = TimeRange::new(11, 20).unwrap();
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_wildcard_matching() {
        assert!(tag_value_matches("web*", "web01"));
        assert!(tag_value_matches("*", "anything"));
        assert!(!tag_value_matches("web*", "db01"));
        assert!(tag_value_matches("web01", "web01"));
        assert!(!tag_value_matches("web01", "web02"));
    }

    #[test]
    fn test_tagset_filter_match() {
        let mut series = TagSet::new();
        series.insert("host", "web01");
        series.insert("dc", "us-east");

        let mut filter = TagSet::new();
        filter.insert("host", "web*");
        assert!(filter.matches(&series));

        filter.insert("dc", "eu-west");
        assert!(!filter.matches(&series));

        let mut missing = TagSet::new();
        missing.insert("rack", "*");
        assert!(!missing.matches(&series));
    }

    #[test]
    fn test_series_key_is_order_independent() {
        let mut a = TagSet::new();
        a.insert("host", "web01");
        a.insert("dc", "us-east");

        let mut b = TagSet::new();
        b.insert("dc", "us-east");
        b.insert("host", "web01");

        assert_eq!(a.series_key("cpu"), b.series_key("cpu"));
        assert_eq!(a.series_key("cpu"), "cpu;dc=us-east;host=web01");
    }

    #[test]
    fn test_insert_reports_duplicate() {
        let mut tags = TagSet::new();
        assert!(tags.insert("host", "a").is_none());
        assert_eq!(tags.insert("host", "b").as_deref(), Some("a"));
    }
}
