//! Query planner: shard fan-out and per-key task deduplication
//!
//! Planning turns one parsed [`Query`] into the set of [`SeriesTask`]s to
//! execute. Every shard overlapping the query window is pinned and searched;
//! series found in different shards but sharing one series key are folded
//! into a single task, so its downsampler sees one monotonic stream across
//! segment boundaries.
//!
//! Shards that match no series are released immediately and excluded from
//! the returned guard list; the guards for retained shards release when the
//! request finishes, on success or error alike.

use crate::query::ast::Query;
use crate::query::downsample::Downsampler;
use crate::query::task::SeriesTask;
use crate::storage::{SeriesStore, ShardGuard};
use crate::types::TsResolution;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Plan a query against storage
///
/// Returns the deduplicated task list and the guards pinning every shard
/// that contributed at least one series.
pub fn plan(
    query: &Query,
    store: &dyn SeriesStore,
    resolution: TsResolution,
) -> (Vec<Arc<SeriesTask>>, Vec<ShardGuard>) {
    let shards = store.open_shards(&query.time_range);
    debug!(shards = shards.len(), range = %query.time_range, "planning query");

    let mut guards = Vec::new();
    let mut tasks: Vec<SeriesTask> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();

    for shard in shards {
        let guard = ShardGuard::acquire(shard);
        let found = guard.shard().find_series(&query.metric, &query.tags);
        if found.is_empty() {
            // dropping the guard releases the shard right away
            continue;
        }

        for series in found {
            match by_key.get(series.key()) {
                Some(&idx) => tasks[idx].add_series(series),
                None => {
                    let downsampler = query
                        .downsample
                        .as_ref()
                        .and_then(|spec| Downsampler::new(spec, &query.time_range, resolution));
                    by_key.insert(series.key().to_string(), tasks.len());
                    tasks.push(SeriesTask::new(query.time_range, downsampler, series));
                }
            }
        }
        guards.push(guard);
    }

    debug!(tasks = tasks.len(), shards_retained = guards.len(), "plan complete");
    (tasks.into_iter().map(Arc::new).collect(), guards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::AggKind;
    use crate::storage::MemoryStore;
    use crate::types::{TagSet, TimeRange};

    fn tags(pairs: &[(&str, &str)]) -> TagSet {
        let mut tags = TagSet::new();
        for (k, v) in pairs {
            tags.insert(*k, *v);
        }
        tags
    }

    fn query(metric: &str, range: TimeRange, filter: TagSet) -> Query {
        Query {
            metric: metric.into(),
            time_range: range,
            aggregate: AggKind::Sum,
            downsample: None,
            rate: None,
            ms_resolution: true,
            tags: filter,
        }
    }

    #[test]
    fn test_cross_shard_series_folds_into_one_task() {
        // shard span 100: two shards each holding a segment of cpu{host=a}
        let store = MemoryStore::new(100);
        let t = tags(&[("host", "a")]);
        store.put("cpu", &t, 10, 1.0);
        store.put("cpu", &t, 150, 2.0);

        let q = query("cpu", TimeRange { start: 0, end: 200 }, TagSet::new());
        let (tasks, guards) = plan(&q, &store, TsResolution::Seconds);
        assert_eq!(tasks.len(), 1);
        assert_eq!(guards.len(), 2);

        tasks[0].perform();
        assert_eq!(tasks[0].take_points(), vec![(10, 1.0), (150, 2.0)]);
    }

    #[test]
    fn test_empty_shards_released_immediately() {
        let store = MemoryStore::new(100);
        store.put("cpu", &tags(&[("host", "a")]), 10, 1.0);
        store.put("mem", &tags(&[("host", "a")]), 150, 2.0);

        let q = query("cpu", TimeRange { start: 0, end: 200 }, TagSet::new());
        let (tasks, guards) = plan(&q, &store, TsResolution::Seconds);
        assert_eq!(tasks.len(), 1);
        // only the shard that held cpu stays pinned
        assert_eq!(guards.len(), 1);

        drop(guards);
        for shard in store.shards() {
            assert_eq!(shard.reader_count(), 0);
        }
    }

    #[test]
    fn test_tag_filter_limits_fanout() {
        let store = MemoryStore::new(1000);
        store.put("cpu", &tags(&[("host", "web01")]), 1, 1.0);
        store.put("cpu", &tags(&[("host", "web02")]), 1, 2.0);
        store.put("cpu", &tags(&[("host", "db01")]), 1, 3.0);

        let q = query(
            "cpu",
            TimeRange { start: 0, end: 10 },
            tags(&[("host", "web*")]),
        );
        let (tasks, _guards) = plan(&q, &store, TsResolution::Seconds);
        assert_eq!(tasks.len(), 2);
    }

    #[test]
    fn test_downsampler_built_per_task() {
        let store = MemoryStore::new(1000);
        store.put("cpu", &tags(&[("host", "a")]), 0, 1.0);
        store.put("cpu", &tags(&[("host", "a")]), 1, 2.0);

        let mut q = query("cpu", TimeRange { start: 0, end: 10 }, TagSet::new());
        q.ms_resolution = false;
        q.apply_default_downsample();

        let (tasks, _guards) = plan(&q, &store, TsResolution::Seconds);
        tasks[0].perform();
        assert_eq!(tasks[0].take_points(), vec![(0, 1.0), (1, 2.0)]);
    }
}
