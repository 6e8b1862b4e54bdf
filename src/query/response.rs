//! OpenTSDB-compatible response rendering
//!
//! Serializes result sets as the JSON array of
//! `{"metric", "tags", "aggregateTags", "dps"}` objects OpenTSDB clients
//! expect. `dps` entries are written in point order with the timestamp as
//! the key; NaN values render as JSON `null`. Results with no points are
//! omitted from the array.

use crate::error::{Error, Result};
use crate::query::group::ResultSet;
use crate::types::Timestamp;
use serde::ser::{Serialize, SerializeMap, SerializeStruct, Serializer};

struct Dps<'a>(&'a [(Timestamp, f64)]);

impl Serialize for Dps<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for &(tstamp, value) in self.0 {
            let key = tstamp.to_string();
            if value.is_nan() {
                map.serialize_entry(&key, &None::<f64>)?;
            } else {
                map.serialize_entry(&key, &value)?;
            }
        }
        map.end()
    }
}

struct Entry<'a>(&'a ResultSet);

impl Serialize for Entry<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut entry = serializer.serialize_struct("Entry", 4)?;
        entry.serialize_field("metric", &self.0.metric)?;
        entry.serialize_field("tags", &self.0.tags)?;
        entry.serialize_field("aggregateTags", &self.0.aggregate_tags)?;
        entry.serialize_field("dps", &Dps(&self.0.points))?;
        entry.end()
    }
}

/// Render result sets as the response body, enforcing the size limit
pub fn render_results(results: &[ResultSet], max_size: usize) -> Result<String> {
    let entries: Vec<Entry<'_>> = results.iter().filter(|r| !r.is_empty()).map(Entry).collect();
    let body = serde_json::to_string(&entries)
        .map_err(|e| Error::Internal(format!("response serialization failed: {}", e)))?;
    if body.len() > max_size {
        return Err(Error::ResponseTooLarge {
            size: body.len(),
            limit: max_size,
        });
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TagSet;
    use std::collections::BTreeSet;

    fn result(points: Vec<(Timestamp, f64)>) -> ResultSet {
        let mut tags = TagSet::new();
        tags.insert("host", "a");
        ResultSet {
            metric: "cpu".into(),
            tags,
            aggregate_tags: BTreeSet::new(),
            series_points: Vec::new(),
            points,
        }
    }

    #[test]
    fn test_opentsdb_shape() {
        let body = render_results(&[result(vec![(0, 1.0), (1, 3.5)])], 1 << 20).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed[0]["metric"], "cpu");
        assert_eq!(parsed[0]["tags"]["host"], "a");
        assert_eq!(parsed[0]["aggregateTags"], serde_json::json!([]));
        assert_eq!(parsed[0]["dps"]["0"], 1.0);
        assert_eq!(parsed[0]["dps"]["1"], 3.5);
    }

    #[test]
    fn test_nan_serializes_as_null() {
        let body = render_results(&[result(vec![(0, f64::NAN)])], 1 << 20).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(parsed[0]["dps"]["0"].is_null());
    }

    #[test]
    fn test_empty_results_omitted() {
        let body = render_results(&[result(vec![]), result(vec![(0, 1.0)])], 1 << 20).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 1);

        let body = render_results(&[], 1 << 20).unwrap();
        assert_eq!(body, "[]");
    }

    #[test]
    fn test_size_limit_enforced() {
        let points: Vec<_> = (0..1000).map(|i| (i as Timestamp, i as f64)).collect();
        let err = render_results(&[result(points)], 64).unwrap_err();
        assert!(matches!(err, Error::ResponseTooLarge { limit: 64, .. }));
    }

    #[test]
    fn test_aggregate_tags_listed() {
        let mut r = result(vec![(0, 1.0)]);
        r.aggregate_tags.insert("host".into());
        r.tags.remove("host");
        let body = render_results(&[r], 1 << 20).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed[0]["aggregateTags"], serde_json::json!(["host"]));
        assert_eq!(parsed[0]["tags"], serde_json::json!({}));
    }
}
