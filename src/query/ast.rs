//! Canonical query plan types
//!
//! Both query grammars — the URL-style `m=` form and the JSON body form —
//! normalize into one [`Query`] value. Everything downstream (planner,
//! executor, grouper) consumes only this representation.

use crate::types::{TagSet, TimeRange, TsResolution};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Aggregators
// ============================================================================

/// Cross-series aggregation function
///
/// `None` skips cross-series aggregation entirely: the grouper emits one
/// result per series key instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggKind {
    /// No aggregation; one result per series
    #[default]
    None,
    /// Sum of contributing series
    Sum,
    /// Arithmetic mean of contributing series
    Avg,
    /// Minimum across contributing series
    Min,
    /// Maximum across contributing series
    Max,
    /// Number of contributing series
    Count,
    /// Value of the first contributing series
    First,
    /// Value of the last contributing series
    Last,
    /// Standard deviation across contributing series
    Dev,
}

impl FromStr for AggKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(AggKind::None),
            "sum" => Ok(AggKind::Sum),
            "avg" => Ok(AggKind::Avg),
            "min" => Ok(AggKind::Min),
            "max" => Ok(AggKind::Max),
            "count" => Ok(AggKind::Count),
            "first" => Ok(AggKind::First),
            "last" => Ok(AggKind::Last),
            "dev" => Ok(AggKind::Dev),
            other => Err(format!("unknown aggregator: {}", other)),
        }
    }
}

impl fmt::Display for AggKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggKind::None => "none",
            AggKind::Sum => "sum",
            AggKind::Avg => "avg",
            AggKind::Min => "min",
            AggKind::Max => "max",
            AggKind::Count => "count",
            AggKind::First => "first",
            AggKind::Last => "last",
            AggKind::Dev => "dev",
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// Downsampling
// ============================================================================

/// Per-bucket reducer applied by the downsampler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownsampleFunction {
    /// Arithmetic mean of the bucket
    Avg,
    /// Number of points in the bucket
    Count,
    /// Standard deviation of the bucket
    Dev,
    /// First point in the bucket
    First,
    /// Last point in the bucket
    Last,
    /// Maximum of the bucket
    Max,
    /// Minimum of the bucket
    Min,
    /// Percentile of the bucket (e.g. `p95`)
    Percentile(u8),
    /// Sum of the bucket
    Sum,
    /// Identity: no bucketing, points pass through unchanged
    None,
}

impl FromStr for DownsampleFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avg" => Ok(DownsampleFunction::Avg),
            "count" => Ok(DownsampleFunction::Count),
            "dev" => Ok(DownsampleFunction::Dev),
            "first" => Ok(DownsampleFunction::First),
            "last" => Ok(DownsampleFunction::Last),
            "max" => Ok(DownsampleFunction::Max),
            "min" => Ok(DownsampleFunction::Min),
            "sum" => Ok(DownsampleFunction::Sum),
            "none" => Ok(DownsampleFunction::None),
            other => {
                if let Some(digits) = other.strip_prefix('p') {
                    let quantile: u8 = digits
                        .parse()
                        .map_err(|_| format!("unknown downsample function: {}", other))?;
                    if quantile > 100 {
                        return Err(format!("percentile out of range: {}", other));
                    }
                    return Ok(DownsampleFunction::Percentile(quantile));
                }
                Err(format!("unknown downsample function: {}", other))
            }
        }
    }
}

/// Policy for buckets that received no points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillPolicy {
    /// Emit nothing; the gap appears in the output
    #[default]
    None,
    /// Emit `0.0`
    Zero,
    /// Emit NaN (serialized as JSON `null`)
    Nan,
    /// Same as `Nan`; OpenTSDB accepts both spellings
    Null,
}

impl FillPolicy {
    /// The filler value this policy emits
    pub fn fill_value(&self) -> f64 {
        match self {
            FillPolicy::Zero => 0.0,
            _ => f64::NAN,
        }
    }
}

impl FromStr for FillPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(FillPolicy::None),
            "zero" => Ok(FillPolicy::Zero),
            "nan" => Ok(FillPolicy::Nan),
            "null" => Ok(FillPolicy::Null),
            other => Err(format!("unknown fill policy: {}", other)),
        }
    }
}

/// Unit suffix of a downsample interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    /// Milliseconds
    Milliseconds,
    /// Seconds
    Seconds,
    /// Minutes
    Minutes,
    /// Hours
    Hours,
    /// Days
    Days,
    /// Weeks
    Weeks,
}

impl IntervalUnit {
    fn millis(&self) -> u64 {
        match self {
            IntervalUnit::Milliseconds => 1,
            IntervalUnit::Seconds => 1_000,
            IntervalUnit::Minutes => 60_000,
            IntervalUnit::Hours => 3_600_000,
            IntervalUnit::Days => 86_400_000,
            IntervalUnit::Weeks => 604_800_000,
        }
    }
}

/// Parsed downsample specifier, e.g. `10m-avg-zero`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownsampleSpec {
    /// Interval magnitude
    pub interval: u64,
    /// Interval unit
    pub unit: IntervalUnit,
    /// Per-bucket reducer
    pub function: DownsampleFunction,
    /// Policy for empty buckets
    pub fill: FillPolicy,
}

impl DownsampleSpec {
    /// Bucket width in milliseconds
    pub fn interval_ms(&self) -> u64 {
        self.interval * self.unit.millis()
    }

    /// Bucket width in units of the given resolution, at least 1
    pub fn interval_in(&self, resolution: TsResolution) -> u64 {
        match resolution {
            TsResolution::Milliseconds => self.interval_ms().max(1),
            TsResolution::Seconds => (self.interval_ms() / 1000).max(1),
        }
    }

    /// Try to parse a `<interval><unit>-<function>[-<fill>]` token
    ///
    /// Returns `None` when the token is not a downsample specifier at all —
    /// the URL-form grammar uses that to tell a downsample token apart from
    /// a metric name.
    pub fn try_parse(token: &str) -> Option<Self> {
        let mut parts = token.splitn(3, '-');
        let interval_part = parts.next()?;
        let function_part = parts.next()?;
        let fill_part = parts.next();

        let (interval, unit) = parse_interval(interval_part)?;
        let function = function_part.parse().ok()?;
        let fill = match fill_part {
            Some(f) => f.parse().ok()?,
            None => FillPolicy::None,
        };

        Some(Self {
            interval,
            unit,
            function,
            fill,
        })
    }
}

fn parse_interval(s: &str) -> Option<(u64, IntervalUnit)> {
    let digits_end = s.find(|c: char| !c.is_ascii_digit())?;
    let interval: u64 = s[..digits_end].parse().ok()?;
    if interval == 0 {
        return None;
    }
    let unit = match &s[digits_end..] {
        "ms" => IntervalUnit::Milliseconds,
        "s" => IntervalUnit::Seconds,
        "m" => IntervalUnit::Minutes,
        "h" => IntervalUnit::Hours,
        "d" => IntervalUnit::Days,
        "w" => IntervalUnit::Weeks,
        _ => return None,
    };
    Some((interval, unit))
}

// ============================================================================
// Rate
// ============================================================================

/// Options for the rate-of-change transform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateOptions {
    /// Treat the series as a monotonically increasing counter
    pub counter: bool,
    /// Emit 0 instead of a wrap-adjusted rate when the counter decreases
    pub drop_resets: bool,
    /// Maximum counter value, used to adjust for wrap-around
    pub counter_max: u64,
    /// Rates at or above this value are treated as resets and emitted as 0;
    /// 0 disables the check
    pub reset_value: u64,
}

impl Default for RateOptions {
    fn default() -> Self {
        Self {
            counter: false,
            drop_resets: false,
            counter_max: u64::MAX,
            reset_value: 0,
        }
    }
}

// ============================================================================
// Query
// ============================================================================

/// The canonical parsed query plan
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Metric name
    pub metric: String,
    /// Normalized query window
    pub time_range: TimeRange,
    /// Cross-series aggregation function
    pub aggregate: AggKind,
    /// Optional per-series downsample
    pub downsample: Option<DownsampleSpec>,
    /// Optional rate conversion
    pub rate: Option<RateOptions>,
    /// Whether the caller requested millisecond-resolution output; when
    /// false and no downsample was given, a default `1s-<aggregate>` is
    /// synthesized
    pub ms_resolution: bool,
    /// Queried tag filter; values may carry a trailing-`*` wildcard
    pub tags: TagSet,
}

impl Query {
    /// Synthesize the default `1s-<aggregate>` downsample when none was
    /// supplied and millisecond output was not requested
    pub fn apply_default_downsample(&mut self) {
        if !self.ms_resolution && self.downsample.is_none() {
            self.downsample = Some(DownsampleSpec {
                interval: 1,
                unit: IntervalUnit::Seconds,
                function: default_downsample_function(self.aggregate),
                fill: FillPolicy::None,
            });
        }
    }
}

/// The per-bucket reducer matching a cross-series aggregator, used when
/// synthesizing the default downsample
fn default_downsample_function(aggregate: AggKind) -> DownsampleFunction {
    match aggregate {
        AggKind::None => DownsampleFunction::None,
        AggKind::Sum => DownsampleFunction::Sum,
        AggKind::Avg => DownsampleFunction::Avg,
        AggKind::Min => DownsampleFunction::Min,
        AggKind::Max => DownsampleFunction::Max,
        AggKind::Count => DownsampleFunction::Count,
        AggKind::First => DownsampleFunction::First,
        AggKind::Last => DownsampleFunction::Last,
        AggKind::Dev => DownsampleFunction::Dev,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregator_names() {
        assert_eq!("sum".parse::<AggKind>().unwrap(), AggKind::Sum);
        assert_eq!("none".parse::<AggKind>().unwrap(), AggKind::None);
        assert!("mean".parse::<AggKind>().is_err());
    }

    #[test]
    fn test_downsample_spec_parsing() {
        let spec = DownsampleSpec::try_parse("10m-avg").unwrap();
        assert_eq!(spec.interval, 10);
        assert_eq!(spec.unit, IntervalUnit::Minutes);
        assert_eq!(spec.function, DownsampleFunction::Avg);
        assert_eq!(spec.fill, FillPolicy::None);
        assert_eq!(spec.interval_ms(), 600_000);

        let spec = DownsampleSpec::try_parse("1s-sum-zero").unwrap();
        assert_eq!(spec.fill, FillPolicy::Zero);

        let spec = DownsampleSpec::try_parse("500ms-p95").unwrap();
        assert_eq!(spec.function, DownsampleFunction::Percentile(95));
        assert_eq!(spec.interval_in(TsResolution::Milliseconds), 500);
        // sub-second interval clamps to one unit at second resolution
        assert_eq!(spec.interval_in(TsResolution::Seconds), 1);
    }

    #[test]
    fn test_downsample_spec_rejects_non_specs() {
        // metric names and rate specs must not parse as downsample specs
        assert!(DownsampleSpec::try_parse("cpu.user").is_none());
        assert!(DownsampleSpec::try_parse("rate{counter}").is_none());
        assert!(DownsampleSpec::try_parse("sys-load").is_none());
        assert!(DownsampleSpec::try_parse("0s-avg").is_none());
        assert!(DownsampleSpec::try_parse("1s-avg-bogus").is_none());
    }

    #[test]
    fn test_default_downsample_synthesis() {
        let mut query = Query {
            metric: "cpu".into(),
            time_range: TimeRange { start: 0, end: 60 },
            aggregate: AggKind::Sum,
            downsample: None,
            rate: None,
            ms_resolution: false,
            tags: TagSet::new(),
        };
        query.apply_default_downsample();
        let spec = query.downsample.unwrap();
        assert_eq!(spec.interval, 1);
        assert_eq!(spec.unit, IntervalUnit::Seconds);
        assert_eq!(spec.function, DownsampleFunction::Sum);

        // ms-resolution queries are left raw
        let mut query = Query {
            ms_resolution: true,
            downsample: None,
            metric: "cpu".into(),
            time_range: TimeRange { start: 0, end: 60 },
            aggregate: AggKind::Sum,
            rate: None,
            tags: TagSet::new(),
        };
        query.apply_default_downsample();
        assert!(query.downsample.is_none());
    }
}
