//! Cross-series aggregation
//!
//! Collapses the grouped per-task streams of a [`ResultSet`] into one
//! series. The per-task streams are each timestamp-ordered but unaligned
//! with one another, so aggregation performs an N-way merge: for every
//! distinct timestamp in the union, the reducer is applied across the
//! series that have a point there. A series with no point at a timestamp
//! contributes nothing (not zero).

use crate::query::ast::AggKind;
use crate::query::downsample::stddev;
use crate::query::group::ResultSet;
use crate::types::Timestamp;

/// Reduce `result.series_points` into `result.points` with the given
/// aggregator
///
/// A no-op for [`AggKind::None`]; the grouper already routed those results
/// one-per-task.
pub fn aggregate(kind: AggKind, result: &mut ResultSet) {
    if kind == AggKind::None {
        return;
    }

    let streams = std::mem::take(&mut result.series_points);
    let mut heads = vec![0usize; streams.len()];
    let mut contributors: Vec<f64> = Vec::with_capacity(streams.len());

    loop {
        // next timestamp present in any stream
        let mut next: Option<Timestamp> = None;
        for (stream, &head) in streams.iter().zip(&heads) {
            if let Some(&(ts, _)) = stream.get(head) {
                next = Some(next.map_or(ts, |n: Timestamp| n.min(ts)));
            }
        }
        let Some(ts) = next else { break };

        contributors.clear();
        for (stream, head) in streams.iter().zip(heads.iter_mut()) {
            // a stream may hold several points at one timestamp (raw
            // millisecond data); each one contributes
            while let Some(&(t, v)) = stream.get(*head) {
                if t != ts {
                    break;
                }
                contributors.push(v);
                *head += 1;
            }
        }

        result.points.push((ts, reduce(kind, &contributors)));
    }
}

fn reduce(kind: AggKind, values: &[f64]) -> f64 {
    match kind {
        AggKind::Sum => values.iter().sum(),
        AggKind::Avg => values.iter().sum::<f64>() / values.len() as f64,
        AggKind::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        AggKind::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        AggKind::Count => values.len() as f64,
        AggKind::First => values[0],
        AggKind::Last => values[values.len() - 1],
        AggKind::Dev => stddev(values),
        AggKind::None => unreachable!("none aggregator bypasses reduction"),
    }
}
