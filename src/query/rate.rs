//! Rate-of-change transform
//!
//! Converts a series of cumulative values into per-second rates. The
//! transform iterates consecutive pairs, so the first point is always
//! dropped: an input of n points yields n-1 rates.
//!
//! Counter handling: when `counter` is set and the value decreases, either
//! the wrap-around rate `(counter_max - v0 + v1) / dt` is emitted, or 0 when
//! `drop_resets` is set. A nonzero `reset_value` caps wrap-adjusted rates:
//! anything at or above it is considered a genuine reset and emitted as 0.

use crate::query::ast::RateOptions;
use crate::types::{DataPoints, TsResolution};

/// Apply the rate transform in place
///
/// `points` must be in strictly increasing timestamp order (guaranteed by
/// the downsampler/aggregator upstream). Timestamps are interpreted in the
/// process resolution for the seconds conversion.
pub fn calculate_rate(points: &mut DataPoints, options: &RateOptions, resolution: TsResolution) {
    if points.len() <= 1 {
        points.clear();
        return;
    }

    let units_per_second = resolution.units_per_second() as f64;

    for i in 1..points.len() {
        let (t0, v0) = points[i - 1];
        let (t1, v1) = points[i];
        let dt_seconds = (t1 - t0) as f64 / units_per_second;
        let dv = v1 - v0;

        let rate = if options.counter && dv < 0.0 {
            if options.drop_resets {
                0.0
            } else {
                let wrapped = (options.counter_max as f64 - v0 + v1) / dt_seconds;
                if options.reset_value != 0 && wrapped >= options.reset_value as f64 {
                    0.0
                } else {
                    wrapped
                }
            }
        } else {
            dv / dt_seconds
        };

        points[i - 1] = (t1, rate);
    }

    points.pop();
}
