//! Streaming per-series downsampler
//!
//! Reduces the raw points falling in each fixed-width time bucket to a
//! single point, optionally filling empty buckets. The downsampler is a
//! small state machine: either no bucket is open, or one bucket accumulates
//! points until a timestamp at or past its end arrives, at which point the
//! bucket is finalized and emitted with its aligned start as the timestamp.
//!
//! Buckets are aligned to multiples of the interval from the epoch. The
//! query range is aligned down on both ends at construction; a point whose
//! bucket would start before the unaligned query start is dropped.
//!
//! Fill policies apply to empty buckets between the (aligned) range start
//! and the last bucket of the range: `zero` emits `0.0`, `nan`/`null` emit
//! NaN (rendered as JSON `null`), `none` leaves the gap.

use crate::query::ast::{DownsampleFunction, DownsampleSpec, FillPolicy};
use crate::types::{DataPoints, TimeRange, Timestamp, TsResolution};

/// Accumulator state of the currently open bucket
#[derive(Debug)]
enum BucketState {
    /// Single running value (sum, min, max, count, first, last)
    Value(f64),
    /// Running sum and count, for `avg`
    SumCount { sum: f64, count: u64 },
    /// All samples, for `dev` and percentiles
    Samples(Vec<f64>),
}

#[derive(Debug)]
struct Bucket {
    start: Timestamp,
    state: BucketState,
}

/// Streaming bucketizer for one series
#[derive(Debug)]
pub struct Downsampler {
    function: DownsampleFunction,
    fill: FillPolicy,
    /// Bucket width in process-resolution units
    interval: u64,
    /// Query start aligned down to a bucket boundary
    range_start: Timestamp,
    /// Query end aligned down to a bucket boundary; the last bucket of the
    /// range starts here
    range_end: Timestamp,
    /// Original, unaligned query start; buckets before it are dropped
    query_start: Timestamp,
    /// Start of the most recently emitted bucket
    last_emitted: Option<Timestamp>,
    current: Option<Bucket>,
}

impl Downsampler {
    /// Build a downsampler for one task, or `None` for the identity
    /// function (`none` passes raw points through)
    pub fn new(
        spec: &DownsampleSpec,
        range: &TimeRange,
        resolution: TsResolution,
    ) -> Option<Self> {
        if spec.function == DownsampleFunction::None {
            return None;
        }
        let interval = spec.interval_in(resolution);
        Some(Self {
            function: spec.function,
            fill: spec.fill,
            interval,
            range_start: range.start - range.start % interval,
            range_end: range.end - range.end % interval,
            query_start: range.start,
            last_emitted: None,
            current: None,
        })
    }

    /// Feed one raw point; finished buckets are appended to `out`
    ///
    /// Points must arrive in nondecreasing timestamp order (the storage
    /// contract, preserved across shard segments by the planner grouping).
    pub fn add(&mut self, tstamp: Timestamp, value: f64, out: &mut DataPoints) {
        let bucket_start = tstamp - tstamp % self.interval;
        if bucket_start < self.query_start {
            return;
        }

        match &mut self.current {
            Some(bucket) if bucket.start == bucket_start => {
                accumulate(&mut bucket.state, self.function, value);
            }
            _ => {
                if let Some(bucket) = self.current.take() {
                    self.emit(bucket, out);
                }
                self.fill_to(bucket_start, out);
                self.current = Some(Bucket {
                    start: bucket_start,
                    state: open_state(self.function, value),
                });
            }
        }
    }

    /// Emit the final open bucket, then extend fillers to the end of the
    /// range for policies other than `none`
    pub fn flush_and_fill(mut self, out: &mut DataPoints) {
        if let Some(bucket) = self.current.take() {
            self.emit(bucket, out);
        }
        if self.fill == FillPolicy::None {
            return;
        }
        let mut tstamp = self.fill_start();
        while tstamp <= self.range_end {
            out.push((tstamp, self.fill.fill_value()));
            tstamp += self.interval;
        }
    }

    /// Emit fillers for the empty buckets strictly before `to`
    fn fill_to(&self, to: Timestamp, out: &mut DataPoints) {
        if self.fill == FillPolicy::None {
            return;
        }
        let mut tstamp = self.fill_start();
        while tstamp < to {
            out.push((tstamp, self.fill.fill_value()));
            tstamp += self.interval;
        }
    }

    /// First bucket the fill should cover: right after the last emitted
    /// bucket, or the first in-range bucket when nothing was emitted yet
    fn fill_start(&self) -> Timestamp {
        match self.last_emitted {
            Some(last) => last + self.interval,
            None => {
                let mut start = self.range_start;
                if start < self.query_start {
                    start += self.interval;
                }
                start
            }
        }
    }

    fn emit(&mut self, bucket: Bucket, out: &mut DataPoints) {
        out.push((bucket.start, finalize(bucket.state, self.function)));
        self.last_emitted = Some(bucket.start);
    }
}

fn open_state(function: DownsampleFunction, value: f64) -> BucketState {
    match function {
        DownsampleFunction::Avg => BucketState::SumCount {
            sum: value,
            count: 1,
        },
        DownsampleFunction::Dev | DownsampleFunction::Percentile(_) => {
            BucketState::Samples(vec![value])
        }
        DownsampleFunction::Count => BucketState::Value(1.0),
        _ => BucketState::Value(value),
    }
}

fn accumulate(state: &mut BucketState, function: DownsampleFunction, value: f64) {
    match (state, function) {
        (BucketState::Value(v), DownsampleFunction::Sum) => *v += value,
        (BucketState::Value(v), DownsampleFunction::Min) => *v = v.min(value),
        (BucketState::Value(v), DownsampleFunction::Max) => *v = v.max(value),
        (BucketState::Value(v), DownsampleFunction::Count) => *v += 1.0,
        (BucketState::Value(_), DownsampleFunction::First) => {}
        (BucketState::Value(v), DownsampleFunction::Last) => *v = value,
        (BucketState::SumCount { sum, count }, _) => {
            *sum += value;
            *count += 1;
        }
        (BucketState::Samples(samples), _) => samples.push(value),
        // open_state guarantees the state matches the function
        (BucketState::Value(_), _) => unreachable!("bucket state mismatch"),
    }
}

fn finalize(state: BucketState, function: DownsampleFunction) -> f64 {
    match state {
        BucketState::Value(v) => v,
        BucketState::SumCount { sum, count } => sum / count as f64,
        BucketState::Samples(mut samples) => match function {
            DownsampleFunction::Dev => stddev(&samples),
            DownsampleFunction::Percentile(q) => {
                samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                percentile(&samples, q)
            }
            _ => unreachable!("bucket state mismatch"),
        },
    }
}

/// Sample standard deviation; 0 for fewer than two samples
pub(crate) fn stddev(samples: &[f64]) -> f64 {
    let n = samples.len();
    if n < 2 {
        return 0.0;
    }
    let mean = samples.iter().sum::<f64>() / n as f64;
    let variance = samples
        .iter()
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f64>()
        / (n - 1) as f64;
    variance.sqrt()
}

/// Linear-interpolated percentile over sorted samples
pub(crate) fn percentile(sorted: &[f64], quantile: u8) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let rank = quantile as f64 / 100.0 * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            if lo == hi {
                sorted[lo]
            } else {
                let frac = rank - lo as f64;
                sorted[lo] + (sorted[hi] - sorted[lo]) * frac
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
