//! Dual-grammar query parsing
//!
//! Two request shapes normalize into the same [`Query`] plan:
//!
//! - the URL form, a colon-separated `m` parameter:
//!   `aggregator:[downsample:][rate[{...}]:]metric[{tagfilter}]`
//! - the JSON body form with `start`, optional `end`/`msResolution`, and a
//!   `queries` array
//!
//! Timestamps accept absolute integers in either resolution and relative
//! `<N><unit>-ago` expressions; everything is normalized to the process
//! resolution before the range is built. When no downsample is supplied and
//! millisecond output was not requested, a default `1s-<aggregator>` is
//! synthesized.
//!
//! The `m` parameter is expected to be URL-decoded already (the HTTP layer
//! decodes query strings before they reach the engine).

use crate::error::{Error, Result};
use crate::query::ast::{AggKind, DownsampleSpec, Query, RateOptions};
use crate::types::{TagSet, TimeRange, Timestamp, TsResolution};
use std::collections::HashMap;

/// Parse the URL-form query parameters into a single query plan
pub fn parse_url_form(
    params: &HashMap<String, String>,
    now: Timestamp,
    resolution: TsResolution,
) -> Result<Query> {
    let start = params
        .get("start")
        .ok_or_else(|| Error::BadRequest("must specify parameter 'start'".into()))?;
    let start = parse_timestamp(start, now, resolution)?;

    let end = match params.get("end") {
        Some(end) => parse_timestamp(end, now, resolution)?,
        None => now,
    };

    let time_range = TimeRange::new(start, end).map_err(Error::BadRequest)?;
    let ms_resolution = flag_value(params.get("msResolution"));

    let m = params
        .get("m")
        .ok_or_else(|| Error::BadRequest("must specify parameter 'm'".into()))?;

    let mut query = parse_metric_expression(m, time_range, ms_resolution)?;
    query.apply_default_downsample();
    Ok(query)
}

/// Parse the JSON body form into one query plan per subquery
///
/// `start`, `end`, and `msResolution` are shared by every subquery.
pub fn parse_json_form(
    body: &serde_json::Value,
    now: Timestamp,
    resolution: TsResolution,
) -> Result<Vec<Query>> {
    let map = body
        .as_object()
        .ok_or_else(|| Error::BadRequest("request body must be a JSON object".into()))?;

    let start = map
        .get("start")
        .ok_or_else(|| Error::BadRequest("must specify parameter 'start'".into()))?;
    let start = parse_timestamp_value(start, now, resolution)?;

    let end = match map.get("end") {
        Some(end) => parse_timestamp_value(end, now, resolution)?,
        None => now,
    };

    let time_range = TimeRange::new(start, end).map_err(Error::BadRequest)?;
    let ms_resolution = map
        .get("msResolution")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let queries = map
        .get("queries")
        .ok_or_else(|| Error::BadRequest("must specify parameter 'queries'".into()))?
        .as_array()
        .ok_or_else(|| Error::BadRequest("'queries' must be an array".into()))?;

    queries
        .iter()
        .map(|subquery| parse_subquery(subquery, time_range, ms_resolution))
        .collect()
}

fn parse_subquery(
    value: &serde_json::Value,
    time_range: TimeRange,
    ms_resolution: bool,
) -> Result<Query> {
    let map = value
        .as_object()
        .ok_or_else(|| Error::BadRequest("each subquery must be a JSON object".into()))?;

    let metric = map
        .get("metric")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::BadRequest("must specify metric name in subquery".into()))?
        .to_string();

    let aggregate = match map.get("aggregator").and_then(|v| v.as_str()) {
        Some(name) => name.parse::<AggKind>().map_err(Error::BadRequest)?,
        None => AggKind::None,
    };

    let downsample = match map.get("downsample").and_then(|v| v.as_str()) {
        Some(token) => Some(
            DownsampleSpec::try_parse(token)
                .ok_or_else(|| Error::BadRequest(format!("invalid downsample: {}", token)))?,
        ),
        None => None,
    };

    let rate = if map.get("rate").and_then(|v| v.as_bool()).unwrap_or(false) {
        let mut options = RateOptions::default();
        if let Some(rate_options) = map.get("rateOptions").and_then(|v| v.as_object()) {
            if let Some(counter) = rate_options.get("counter").and_then(|v| v.as_bool()) {
                options.counter = counter;
            }
            if let Some(drop) = rate_options.get("dropResets").and_then(|v| v.as_bool()) {
                options.drop_resets = drop;
            }
            if let Some(max) = rate_options.get("counterMax").and_then(|v| v.as_f64()) {
                options.counter_max = max as u64;
            }
            if let Some(reset) = rate_options.get("resetValue").and_then(|v| v.as_f64()) {
                options.reset_value = reset as u64;
            }
        }
        Some(options)
    } else {
        None
    };

    let mut tags = TagSet::new();
    if let Some(tag_map) = map.get("tags").and_then(|v| v.as_object()) {
        for (key, value) in tag_map {
            let value = value
                .as_str()
                .ok_or_else(|| Error::BadRequest(format!("tag '{}' must be a string", key)))?;
            if tags.insert(key.clone(), value).is_some() {
                return Err(Error::BadRequest(format!("duplicate tag key: {}", key)));
            }
        }
    }

    let mut query = Query {
        metric,
        time_range,
        aggregate,
        downsample,
        rate,
        ms_resolution,
        tags,
    };
    query.apply_default_downsample();
    Ok(query)
}

// ============================================================================
// The m= expression
// ============================================================================

/// Parse `aggregator:[downsample:][rate[{...}]:]metric[{tagfilter}]`
///
/// Token walk: token 0 is always the aggregator. A downsample token is
/// recognized by actually parsing as one; a rate token by being `rate` or
/// `rate{...}`. Both orders of downsample and rate are accepted. The first
/// unconsumed token is the metric, optionally carrying a `{...}` tag filter.
fn parse_metric_expression(m: &str, time_range: TimeRange, ms_resolution: bool) -> Result<Query> {
    let tokens: Vec<&str> = m.split(':').collect();
    if tokens.len() < 2 || tokens.iter().any(|t| t.is_empty()) {
        return Err(Error::BadRequest(format!("failed to parse query: {}", m)));
    }

    let aggregate = tokens[0].parse::<AggKind>().map_err(Error::BadRequest)?;
    let mut idx = 1;
    let mut downsample = None;
    let mut rate = None;

    if let Some(spec) = DownsampleSpec::try_parse(tokens[idx]) {
        downsample = Some(spec);
        idx += 1;
    }

    if idx < tokens.len() && is_rate_token(tokens[idx]) {
        rate = Some(parse_rate_token(tokens[idx])?);
        idx += 1;
        if downsample.is_none() {
            if let Some(spec) = tokens.get(idx).and_then(|t| DownsampleSpec::try_parse(t)) {
                downsample = Some(spec);
                idx += 1;
            }
        }
    }

    let metric_token = tokens
        .get(idx)
        .ok_or_else(|| Error::BadRequest(format!("missing metric in query: {}", m)))?;

    let (metric, tags) = parse_metric_token(metric_token)?;

    Ok(Query {
        metric,
        time_range,
        aggregate,
        downsample,
        rate,
        ms_resolution,
        tags,
    })
}

fn is_rate_token(token: &str) -> bool {
    token == "rate" || token.starts_with("rate{")
}

/// Parse `rate` or `rate{counter,counter_max,reset_value,drop_resets}`
///
/// Each field is optional and positional; empty slots keep their default.
fn parse_rate_token(token: &str) -> Result<RateOptions> {
    let mut options = RateOptions::default();
    if token == "rate" {
        return Ok(options);
    }

    let inner = token
        .strip_prefix("rate{")
        .and_then(|rest| rest.strip_suffix('}'))
        .ok_or_else(|| Error::BadRequest(format!("malformed rate options: {}", token)))?;

    for (slot, field) in inner.split(',').enumerate() {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        match slot {
            0 => options.counter = parse_bool_field(field),
            1 => {
                options.counter_max = field.parse().map_err(|_| {
                    Error::BadRequest(format!("invalid counter max: {}", field))
                })?;
            }
            2 => {
                options.reset_value = field.parse().map_err(|_| {
                    Error::BadRequest(format!("invalid reset value: {}", field))
                })?;
            }
            3 => options.drop_resets = parse_bool_field(field),
            _ => {
                return Err(Error::BadRequest(format!(
                    "too many rate options: {}",
                    token
                )))
            }
        }
    }
    Ok(options)
}

fn parse_bool_field(field: &str) -> bool {
    matches!(field.chars().next(), Some('t') | Some('T') | Some('1'))
}

fn parse_metric_token(token: &str) -> Result<(String, TagSet)> {
    match token.find('{') {
        None => Ok((token.to_string(), TagSet::new())),
        Some(brace) => {
            let metric = &token[..brace];
            if metric.is_empty() {
                return Err(Error::BadRequest(format!("missing metric name: {}", token)));
            }
            let inner = token[brace + 1..]
                .strip_suffix('}')
                .ok_or_else(|| Error::BadRequest(format!("unterminated tag filter: {}", token)))?;
            Ok((metric.to_string(), parse_tag_filter(inner)?))
        }
    }
}

/// Parse the `{...}` tag filter body
///
/// Two modes, distinguished by the presence of a `"`: unquoted
/// (`host=web01,dc=east`) and quoted (`"host"="web01"`).
fn parse_tag_filter(inner: &str) -> Result<TagSet> {
    let mut tags = TagSet::new();
    if inner.trim().is_empty() {
        return Ok(tags);
    }
    let quoted = inner.contains('"');

    for pair in inner.split(',') {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| Error::BadRequest(format!("invalid tag filter entry: {}", pair)))?;
        let key = unquote(key.trim(), quoted)?;
        let value = unquote(value.trim(), quoted)?;
        if key.is_empty() || value.is_empty() {
            return Err(Error::BadRequest(format!("empty tag in filter: {}", pair)));
        }
        if tags.insert(key, value).is_some() {
            return Err(Error::BadRequest(format!("duplicate tag key in filter: {}", pair)));
        }
    }
    Ok(tags)
}

fn unquote(s: &str, quoted: bool) -> Result<String> {
    if !quoted {
        return Ok(s.to_string());
    }
    match s.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')) {
        Some(inner) => Ok(inner.to_string()),
        // mixed quoting inside a quoted filter is accepted as-is
        None => Ok(s.to_string()),
    }
}

// ============================================================================
// Timestamps
// ============================================================================

/// Parse an absolute or relative (`<N><unit>-ago`) timestamp string and
/// normalize it to the process resolution
pub fn parse_timestamp(s: &str, now: Timestamp, resolution: TsResolution) -> Result<Timestamp> {
    if let Some(relative) = s.strip_suffix("-ago") {
        let digits_end = relative
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| Error::BadRequest(format!("invalid relative time: {}", s)))?;
        let magnitude: u64 = relative[..digits_end]
            .parse()
            .map_err(|_| Error::BadRequest(format!("invalid relative time: {}", s)))?;
        let unit_ms: u64 = match &relative[digits_end..] {
            "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            "d" => 86_400_000,
            "w" => 604_800_000,
            other => {
                return Err(Error::BadRequest(format!("unknown time unit: {}", other)));
            }
        };
        let offset = magnitude * unit_ms * resolution.units_per_second() / 1000;
        return Ok(now.saturating_sub(offset));
    }

    let absolute: Timestamp = s
        .parse()
        .map_err(|_| Error::BadRequest(format!("invalid timestamp: {}", s)))?;
    Ok(resolution.normalize(absolute))
}

fn parse_timestamp_value(
    value: &serde_json::Value,
    now: Timestamp,
    resolution: TsResolution,
) -> Result<Timestamp> {
    match value {
        serde_json::Value::Number(n) => {
            let absolute = n
                .as_u64()
                .ok_or_else(|| Error::BadRequest(format!("invalid timestamp: {}", n)))?;
            Ok(resolution.normalize(absolute))
        }
        serde_json::Value::String(s) => parse_timestamp(s, now, resolution),
        other => Err(Error::BadRequest(format!("invalid timestamp: {}", other))),
    }
}

/// Presence-style boolean query parameter: present with no value or `true`
/// counts as set
fn flag_value(value: Option<&String>) -> bool {
    match value {
        None => false,
        Some(v) => v.is_empty() || v == "true" || v == "1",
    }
}

// ============================================================================
// Tests
// ============================================================================
