//! In-memory storage backend
//!
//! A shard-per-time-window store that satisfies the [`SeriesStore`] /
//! [`Shard`] / [`Series`] contracts without any on-disk format. Backs the
//! server binary and the integration tests.
//!
//! Writes land in the shard whose window contains the point's timestamp;
//! windows are created on demand. Points within a series are kept sorted by
//! timestamp, with duplicate timestamps preserved in insertion order, so
//! reads always satisfy the nondecreasing-order contract.

use crate::error::StorageError;
use crate::storage::{PointSink, Series, SeriesStore, Shard, SinkStatus};
use crate::types::{TagSet, TimeRange, Timestamp};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// One series held in memory
struct MemorySeries {
    key: String,
    metric: String,
    tags: TagSet,
    points: RwLock<Vec<(Timestamp, f64)>>,
}

impl MemorySeries {
    fn push(&self, tstamp: Timestamp, value: f64) {
        let mut points = self.points.write();
        // insert after any equal timestamps to preserve arrival order
        let idx = points.partition_point(|(ts, _)| *ts <= tstamp);
        points.insert(idx, (tstamp, value));
    }
}

impl Series for MemorySeries {
    fn key(&self) -> &str {
        &self.key
    }

    fn tags(&self) -> &TagSet {
        &self.tags
    }

    fn read(&self, range: &TimeRange, sink: &mut dyn PointSink) -> Result<(), StorageError> {
        let points = self.points.read();
        let from = points.partition_point(|(ts, _)| *ts < range.start);
        for &(ts, value) in &points[from..] {
            if sink.offer(ts, value) == SinkStatus::AboveRange {
                break;
            }
        }
        Ok(())
    }
}

/// An in-memory shard covering one time window
pub struct MemoryShard {
    range: TimeRange,
    readers: AtomicI64,
    series: DashMap<String, Arc<MemorySeries>>,
}

impl MemoryShard {
    fn new(range: TimeRange) -> Self {
        Self {
            range,
            readers: AtomicI64::new(0),
            series: DashMap::new(),
        }
    }

    fn put(&self, metric: &str, tags: &TagSet, tstamp: Timestamp, value: f64) {
        let key = tags.series_key(metric);
        let series = self
            .series
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(MemorySeries {
                    key,
                    metric: metric.to_string(),
                    tags: tags.clone(),
                    points: RwLock::new(Vec::new()),
                })
            })
            .clone();
        series.push(tstamp, value);
    }

    /// Number of outstanding readability pins; used to verify that queries
    /// balance acquire/release
    pub fn reader_count(&self) -> i64 {
        self.readers.load(Ordering::SeqCst)
    }
}

impl Shard for MemoryShard {
    fn time_range(&self) -> TimeRange {
        self.range
    }

    fn acquire(&self) {
        self.readers.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        let prev = self.readers.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "shard released more times than acquired");
    }

    fn find_series(&self, metric: &str, filter: &TagSet) -> Vec<Arc<dyn Series>> {
        self.series
            .iter()
            .filter(|entry| entry.value().metric == metric && filter.matches(&entry.value().tags))
            .map(|entry| entry.value().clone() as Arc<dyn Series>)
            .collect()
    }
}

/// In-memory store: one shard per fixed time window
pub struct MemoryStore {
    shard_span: u64,
    shards: RwLock<BTreeMap<Timestamp, Arc<MemoryShard>>>,
}

impl MemoryStore {
    /// Create a store with the given shard window span (in timestamp units)
    pub fn new(shard_span: u64) -> Self {
        Self {
            shard_span: shard_span.max(1),
            shards: RwLock::new(BTreeMap::new()),
        }
    }

    /// Write one point, creating the covering shard on demand
    pub fn put(&self, metric: &str, tags: &TagSet, tstamp: Timestamp, value: f64) {
        let shard_start = tstamp - tstamp % self.shard_span;
        let shard = {
            let shards = self.shards.read();
            shards.get(&shard_start).cloned()
        };
        let shard = match shard {
            Some(shard) => shard,
            None => {
                let mut shards = self.shards.write();
                shards
                    .entry(shard_start)
                    .or_insert_with(|| {
                        debug!(shard_start, span = self.shard_span, "creating shard");
                        Arc::new(MemoryShard::new(TimeRange {
                            start: shard_start,
                            end: shard_start + self.shard_span - 1,
                        }))
                    })
                    .clone()
            }
        };
        shard.put(metric, tags, tstamp, value);
    }

    /// All shards, for introspection in tests and stats
    pub fn shards(&self) -> Vec<Arc<MemoryShard>> {
        self.shards.read().values().cloned().collect()
    }
}

impl SeriesStore for MemoryStore {
    fn open_shards(&self, range: &TimeRange) -> Vec<Arc<dyn Shard>> {
        self.shards
            .read()
            .values()
            .filter(|shard| shard.range.intersects(range))
            .map(|shard| shard.clone() as Arc<dyn Shard>)
            .collect()
    }
}
