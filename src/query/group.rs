//! Result grouping
//!
//! Partitions completed [`SeriesTask`]s into result sets according to the
//! queried tags. Without wildcard tags every task lands in one result; each
//! trailing-`*` tag forces one result per distinct concrete value. Tags the
//! grouped series disagree on are promoted out of `tags` into
//! `aggregateTags`.
//!
//! With the `none` aggregator the grouper bypasses all of this and emits one
//! result per task, skipping cross-series aggregation entirely.

use crate::query::ast::{AggKind, Query};
use crate::query::task::SeriesTask;
use crate::types::{is_wildcard_value, tag_value_matches, DataPoints, TagSet};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// One OpenTSDB result object: a metric, the resolved tags, the keys whose
/// values varied across grouped series, and the final points
#[derive(Debug, Default)]
pub struct ResultSet {
    /// Metric name
    pub metric: String,
    /// Tags common to every grouped series (wildcards resolved to concrete
    /// values)
    pub tags: TagSet,
    /// Keys whose values varied among the grouped series
    pub aggregate_tags: BTreeSet<String>,
    /// Per-task downsampled streams awaiting cross-series aggregation
    pub series_points: Vec<DataPoints>,
    /// Final output points
    pub points: DataPoints,
}

impl ResultSet {
    fn from_query(query: &Query) -> Self {
        Self {
            metric: query.metric.clone(),
            tags: query.tags.clone(),
            aggregate_tags: BTreeSet::new(),
            series_points: Vec::new(),
            points: Vec::new(),
        }
    }

    /// Whether the result carries no points (omitted from serialization)
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Fold one task into this result, applying the tag promotion rule
    fn attach(&mut self, task: &SeriesTask) {
        for (key, value) in task.tags().iter() {
            let existing = self
                .tags
                .get(key)
                .map(|v| (is_wildcard_value(v), v == value));
            match existing {
                // resolve the queried wildcard to this task's value
                Some((true, _)) => {
                    self.tags.insert(key, value);
                }
                // values disagree: promote the key out of tags
                Some((false, false)) => {
                    self.tags.remove(key);
                    self.aggregate_tags.insert(key.to_string());
                }
                Some((false, true)) => {}
                None => {
                    if !self.aggregate_tags.contains(key) {
                        self.tags.insert(key, value);
                    }
                }
            }
        }
        self.series_points.push(task.take_points());
    }

    /// Whether this result's queried tags match a task's series tags
    ///
    /// Only keys the user actually queried participate; wildcard values that
    /// have not been resolved yet match by prefix, resolved and literal
    /// values by equality.
    fn matches(&self, task: &SeriesTask, query: &Query) -> bool {
        for (key, pattern) in self.tags.iter() {
            if !query.tags.contains_key(key) {
                continue;
            }
            let matched = task
                .tags()
                .get(key)
                .map(|v| tag_value_matches(pattern, v))
                .unwrap_or(false);
            if !matched {
                return false;
            }
        }
        true
    }
}

/// Partition completed tasks into result sets
pub fn create_results(tasks: &[Arc<SeriesTask>], query: &Query) -> Vec<ResultSet> {
    // none aggregator: one result per series key, points passed through
    if query.aggregate == AggKind::None {
        return tasks
            .iter()
            .map(|task| ResultSet {
                metric: query.metric.clone(),
                tags: task.tags().clone(),
                aggregate_tags: BTreeSet::new(),
                series_points: Vec::new(),
                points: task.take_points(),
            })
            .collect();
    }

    let star_keys = query.tags.wildcard_keys();
    let mut results: Vec<ResultSet> = Vec::new();

    if star_keys.is_empty() {
        // exactly one result; every task folds into it
        let mut result = ResultSet::from_query(query);
        for task in tasks {
            result.attach(task);
        }
        results.push(result);
    } else {
        for task in tasks {
            match results.iter_mut().find(|r| r.matches(task, query)) {
                Some(result) => result.attach(task),
                None => {
                    let mut result = ResultSet::from_query(query);
                    result.attach(task);
                    results.push(result);
                }
            }
        }
    }

    debug!(tasks = tasks.len(), results = results.len(), "grouped tasks");
    results
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::query::ast::AggKind;
    use crate::storage::{PointSink, Series, SinkStatus};
    use crate::types::{TimeRange, Timestamp};

    struct StubSeries {
        key: String,
        tags: TagSet,
        points: Vec<(Timestamp, f64)>,
    }

    impl Series for StubSeries {
        fn key(&self) -> &str {
            &self.key
        }
        fn tags(&self) -> &TagSet {
            &self.tags
        }
        fn read(&self, _range: &TimeRange, sink: &mut dyn PointSink) -> Result<(), StorageError> {
            for &(ts, v) in &self.points {
                if sink.offer(ts, v) == SinkStatus::AboveRange {
                    break;
                }
            }
            Ok(())
        }
    }

    fn tags(pairs: &[(&str, &str)]) -> TagSet {
        let mut tags = TagSet::new();
        for (k, v) in pairs {
            tags.insert(*k, *v);
        }
        tags
    }

    fn task(metric: &str, series_tags: TagSet, points: Vec<(Timestamp, f64)>) -> Arc<SeriesTask> {
        let series = Arc::new(StubSeries {
            key: series_tags.series_key(metric),
            tags: series_tags,
            points,
        });
        let task = Arc::new(SeriesTask::new(
            TimeRange { start: 0, end: 100 },
            None,
            series,
        ));
        task.perform();
        task
    }

    fn query(aggregate: AggKind, filter: TagSet) -> Query {
        Query {
            metric: "cpu".into(),
            time_range: TimeRange { start: 0, end: 100 },
            aggregate,
            downsample: None,
            rate: None,
            ms_resolution: true,
            tags: filter,
        }
    }

    #[test]
    fn test_no_wildcard_yields_single_result() {
        let tasks = vec![
            task("cpu", tags(&[("host", "a"), ("dc", "east")]), vec![(0, 1.0)]),
            task("cpu", tags(&[("host", "b"), ("dc", "east")]), vec![(0, 2.0)]),
        ];
        let q = query(AggKind::Sum, TagSet::new());
        let results = create_results(&tasks, &q);
        assert_eq!(results.len(), 1);

        let r = &results[0];
        // host varied: promoted to aggregateTags; dc agreed: kept
        assert!(r.aggregate_tags.contains("host"));
        assert!(!r.tags.contains_key("host"));
        assert_eq!(r.tags.get("dc"), Some("east"));
        assert_eq!(r.series_points.len(), 2);
    }

    #[test]
    fn test_wildcard_splits_per_value() {
        let tasks = vec![
            task("cpu", tags(&[("host", "a")]), vec![(0, 1.0)]),
            task("cpu", tags(&[("host", "b")]), vec![(0, 2.0)]),
            task("cpu", tags(&[("host", "a"), ("core", "1")]), vec![(0, 3.0)]),
        ];
        let q = query(AggKind::Sum, tags(&[("host", "*")]));
        let results = create_results(&tasks, &q);
        assert_eq!(results.len(), 2);

        let host_a = results.iter().find(|r| r.tags.get("host") == Some("a")).unwrap();
        assert_eq!(host_a.series_points.len(), 2);
        let host_b = results.iter().find(|r| r.tags.get("host") == Some("b")).unwrap();
        assert_eq!(host_b.series_points.len(), 1);
    }

    #[test]
    fn test_queried_literal_kept_in_tags() {
        let tasks = vec![task("cpu", tags(&[("host", "a")]), vec![(0, 1.0)])];
        let q = query(AggKind::Sum, tags(&[("host", "a")]));
        let results = create_results(&tasks, &q);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].tags.get("host"), Some("a"));
        assert!(results[0].aggregate_tags.is_empty());
    }

    #[test]
    fn test_tag_keys_partition_invariant() {
        // queried keys end up in tags or aggregate_tags, never both
        let tasks = vec![
            task("cpu", tags(&[("host", "a"), ("dc", "east")]), vec![(0, 1.0)]),
            task("cpu", tags(&[("host", "b"), ("dc", "west")]), vec![(0, 2.0)]),
        ];
        let q = query(AggKind::Sum, tags(&[("dc", "*")]));
        let results = create_results(&tasks, &q);
        for r in &results {
            for key in &r.aggregate_tags {
                assert!(!r.tags.contains_key(key));
            }
        }
    }

    #[test]
    fn test_none_aggregator_bypasses_grouping() {
        let tasks = vec![
            task("cpu", tags(&[("host", "a")]), vec![(0, 1.0)]),
            task("cpu", tags(&[("host", "b")]), vec![(0, 2.0)]),
        ];
        let q = query(AggKind::None, TagSet::new());
        let results = create_results(&tasks, &q);
        assert_eq!(results.len(), 2);
        // points flow straight through, one result per task
        assert_eq!(results[0].points, vec![(0, 1.0)]);
        assert_eq!(results[1].points, vec![(0, 2.0)]);
        assert_eq!(results[0].tags.get("host"), Some("a"));
    }
}
