//! Unit of query work: one logical series across all its shard segments
//!
//! A [`SeriesTask`] owns every physical [`Series`] handle sharing one series
//! key, a time range, an optional per-series downsampler, and its output
//! vector. Reading all segments through one task keeps the downsampler's
//! input a single monotonic point stream.
//!
//! Tasks execute at most once, on a worker thread or on the caller. Storage
//! errors never fail the request: the task logs, degrades to an empty
//! output, and still signals its completion barrier.

use crate::error::StorageError;
use crate::query::downsample::Downsampler;
use crate::query::executor::CountingBarrier;
use crate::storage::{PointSink, Series, SinkStatus};
use crate::types::{DataPoints, TagSet, TimeRange, Timestamp};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::error;

/// One schedulable unit of query execution
pub struct SeriesTask {
    time_range: TimeRange,
    /// Shard segments of one logical series; non-empty, all sharing a key
    series: Vec<Arc<dyn Series>>,
    downsampler: Mutex<Option<Downsampler>>,
    out: Mutex<DataPoints>,
    signal: Mutex<Option<Arc<CountingBarrier>>>,
}

impl SeriesTask {
    /// Create a task for the logical series `first` belongs to
    pub fn new(
        time_range: TimeRange,
        downsampler: Option<Downsampler>,
        first: Arc<dyn Series>,
    ) -> Self {
        Self {
            time_range,
            series: vec![first],
            downsampler: Mutex::new(downsampler),
            out: Mutex::new(Vec::new()),
            signal: Mutex::new(None),
        }
    }

    /// Attach another shard segment of the same logical series
    pub fn add_series(&mut self, series: Arc<dyn Series>) {
        debug_assert_eq!(series.key(), self.key());
        self.series.push(series);
    }

    /// The shared series key
    pub fn key(&self) -> &str {
        self.series[0].key()
    }

    /// Concrete tags of the underlying series
    pub fn tags(&self) -> &TagSet {
        self.series[0].tags()
    }

    /// Register the completion barrier this task must count down
    pub fn attach_signal(&self, signal: Arc<CountingBarrier>) {
        *self.signal.lock() = Some(signal);
    }

    /// Execute the task: read every segment through the sink, flush the
    /// downsampler, and signal completion
    ///
    /// Errors are confined to this task; the output is cleared so a failed
    /// task contributes an empty series rather than partial data.
    pub fn perform(&self) {
        if let Err(e) = self.run() {
            error!(key = self.key(), error = %e, "series task failed, returning empty output");
            self.out.lock().clear();
        }
        if let Some(signal) = self.signal.lock().as_ref() {
            signal.count_down();
        }
    }

    fn run(&self) -> Result<(), StorageError> {
        let mut out = self.out.lock();
        let mut downsampler = self.downsampler.lock().take();
        {
            let mut sink = TaskSink {
                range: &self.time_range,
                downsampler: &mut downsampler,
                out: &mut *out,
            };
            for series in &self.series {
                series.read(&self.time_range, &mut sink)?;
            }
        }
        if let Some(downsampler) = downsampler {
            downsampler.flush_and_fill(&mut out);
        }
        Ok(())
    }

    /// Drain the task's output; called once by the grouper post-barrier
    pub fn take_points(&self) -> DataPoints {
        std::mem::take(&mut *self.out.lock())
    }
}

/// Sink routing accepted points through the downsampler, or straight to the
/// output when the query runs raw
struct TaskSink<'a> {
    range: &'a TimeRange,
    downsampler: &'a mut Option<Downsampler>,
    out: &'a mut DataPoints,
}

impl PointSink for TaskSink<'_> {
    fn offer(&mut self, tstamp: Timestamp, value: f64) -> SinkStatus {
        if tstamp < self.range.start {
            return SinkStatus::BelowRange;
        }
        if tstamp > self.range.end {
            return SinkStatus::AboveRange;
        }
        match self.downsampler {
            Some(downsampler) => downsampler.add(tstamp, value, self.out),
            None => self.out.push((tstamp, value)),
        }
        SinkStatus::Accepted
    }
}
