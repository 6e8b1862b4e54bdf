//! End-to-end query pipeline tests over the in-memory store
//!
//! Each test drives the full driver path: parse → plan → execute → group →
//! aggregate → rate → serialize.

use basalt_tsdb::storage::MemoryStore;
use basalt_tsdb::{Config, QueryDriver, QueryExecutor, TagSet};
use std::collections::HashMap;
use std::sync::Arc;

fn tags(pairs: &[(&str, &str)]) -> TagSet {
    let mut tags = TagSet::new();
    for (k, v) in pairs {
        tags.insert(*k, *v);
    }
    tags
}

fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn driver(store: Arc<MemoryStore>, parallel: bool) -> QueryDriver {
    let mut config = Config::default();
    config.query.executor.parallel = parallel;
    config.query.executor.thread_count = 4;
    let executor = Arc::new(QueryExecutor::new(&config.query.executor));
    QueryDriver::new(store, executor, &config)
}

fn two_host_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new(3600));
    store.put("cpu", &tags(&[("host", "a")]), 0, 1.0);
    store.put("cpu", &tags(&[("host", "a")]), 1, 3.0);
    store.put("cpu", &tags(&[("host", "b")]), 0, 5.0);
    store.put("cpu", &tags(&[("host", "b")]), 1, 7.0);
    store
}

#[test]
fn wildcard_tag_groups_per_host() {
    let driver = driver(two_host_store(), false);
    let body = driver
        .handle_get(&params(&[
            ("start", "0"),
            ("end", "60"),
            ("m", "sum:1s-avg:cpu{host=*}"),
        ]))
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    let results = parsed.as_array().unwrap();
    assert_eq!(results.len(), 2);

    let by_host: HashMap<&str, &serde_json::Value> = results
        .iter()
        .map(|r| (r["tags"]["host"].as_str().unwrap(), r))
        .collect();
    assert_eq!(by_host["a"]["dps"]["0"], 1.0);
    assert_eq!(by_host["a"]["dps"]["1"], 3.0);
    assert_eq!(by_host["b"]["dps"]["0"], 5.0);
    assert_eq!(by_host["b"]["dps"]["1"], 7.0);
    for r in results {
        assert_eq!(r["metric"], "cpu");
    }
}

#[test]
fn literal_tag_yields_single_result() {
    let driver = driver(two_host_store(), false);
    let body = driver
        .handle_get(&params(&[
            ("start", "0"),
            ("end", "60"),
            ("m", "sum:1s-avg:cpu{host=a}"),
        ]))
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    let results = parsed.as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["tags"]["host"], "a");
    assert_eq!(results[0]["dps"]["0"], 1.0);
    assert_eq!(results[0]["dps"]["1"], 3.0);
}

#[test]
fn default_downsample_synthesized_without_spec() {
    let store = Arc::new(MemoryStore::new(3600));
    let t = tags(&[("host", "a")]);
    store.put("cpu", &t, 0, 1.0);
    store.put("cpu", &t, 0, 2.0);
    store.put("cpu", &t, 1, 5.0);

    let driver = driver(store, false);
    let body = driver
        .handle_get(&params(&[("start", "0"), ("end", "60"), ("m", "sum:cpu")]))
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    // the duplicate-second points collapse under the synthesized 1s-sum
    assert_eq!(parsed[0]["dps"]["0"], 3.0);
    assert_eq!(parsed[0]["dps"]["1"], 5.0);
}

#[test]
fn counter_rate_with_wrap_and_reset() {
    let store = Arc::new(MemoryStore::new(3600));
    let t = tags(&[("host", "a")]);
    store.put("req", &t, 0, 10.0);
    store.put("req", &t, 1, 20.0);
    store.put("req", &t, 2, 15.0);

    let driver = driver(store.clone(), false);
    let body = driver
        .handle_get(&params(&[
            ("start", "0"),
            ("end", "60"),
            ("m", "sum:rate{true,100}:req"),
        ]))
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    // the first point is consumed by the pairwise transform
    assert!(parsed[0]["dps"].as_object().unwrap().get("0").is_none());
    assert_eq!(parsed[0]["dps"]["1"], 10.0);
    assert_eq!(parsed[0]["dps"]["2"], 95.0);

    // with a reset value the wrapped rate is clamped to zero
    let body = driver
        .handle_get(&params(&[
            ("start", "0"),
            ("end", "60"),
            ("m", "sum:rate{true,100,50}:req"),
        ]))
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed[0]["dps"]["1"], 10.0);
    assert_eq!(parsed[0]["dps"]["2"], 0.0);
}

#[test]
fn fill_policy_renders_nulls_inside_range() {
    let store = Arc::new(MemoryStore::new(3600));
    let t = tags(&[("host", "a")]);
    store.put("cpu", &t, 0, 1.0);
    store.put("cpu", &t, 3, 4.0);

    let driver = driver(store, false);
    let body = driver
        .handle_get(&params(&[
            ("start", "0"),
            ("end", "5"),
            ("m", "sum:1s-avg-nan:cpu"),
        ]))
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    let dps = parsed[0]["dps"].as_object().unwrap();
    assert_eq!(dps.len(), 6);
    assert_eq!(dps["0"], 1.0);
    assert!(dps["1"].is_null());
    assert!(dps["2"].is_null());
    assert_eq!(dps["3"], 4.0);
    assert!(dps["4"].is_null());
    assert!(dps["5"].is_null());
}

#[test]
fn post_none_aggregator_returns_one_result_per_series() {
    let store = Arc::new(MemoryStore::new(3600));
    store.put("m", &tags(&[("host", "a")]), 1, 1.0);
    store.put("m", &tags(&[("host", "b")]), 2, 2.0);

    let driver = driver(store, false);
    let body = driver
        .handle_post(r#"{"start":0,"end":10,"queries":[{"metric":"m","aggregator":"none"}]}"#)
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    let results = parsed.as_array().unwrap();
    assert_eq!(results.len(), 2);
    for r in results {
        assert_eq!(r["dps"].as_object().unwrap().len(), 1);
    }
}

#[test]
fn parallel_and_sequential_agree() {
    let store = Arc::new(MemoryStore::new(3600));
    for host in 0..20 {
        let host_name = format!("web{:02}", host);
        let t = tags(&[("host", host_name.as_str())]);
        for ts in 0..30 {
            store.put("cpu", &t, ts, (host * 100 + ts) as f64);
        }
    }

    let p = params(&[("start", "0"), ("end", "60"), ("m", "sum:1s-sum:cpu")]);
    let sequential = driver(store.clone(), false).handle_get(&p).unwrap();
    let parallel = driver(store.clone(), true).handle_get(&p).unwrap();

    let seq: serde_json::Value = serde_json::from_str(&sequential).unwrap();
    let par: serde_json::Value = serde_json::from_str(&parallel).unwrap();
    assert_eq!(seq, par);
    // single result with host promoted to aggregateTags
    assert_eq!(seq.as_array().unwrap().len(), 1);
    assert_eq!(seq[0]["aggregateTags"], serde_json::json!(["host"]));
}

#[test]
fn points_stay_inside_query_range() {
    let store = Arc::new(MemoryStore::new(3600));
    let t = tags(&[("host", "a")]);
    for ts in 0..100 {
        store.put("cpu", &t, ts, ts as f64);
    }

    let driver = driver(store, false);
    let body = driver
        .handle_get(&params(&[("start", "20"), ("end", "40"), ("m", "sum:cpu")]))
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    for (key, _) in parsed[0]["dps"].as_object().unwrap() {
        let ts: u64 = key.parse().unwrap();
        assert!((20..=40).contains(&ts), "point {} outside range", ts);
    }
}

#[test]
fn shard_refcounts_balance_across_requests() {
    let store = Arc::new(MemoryStore::new(100));
    let t = tags(&[("host", "a")]);
    store.put("cpu", &t, 10, 1.0);
    store.put("cpu", &t, 150, 2.0);
    store.put("cpu", &t, 250, 3.0);
    store.put("mem", &t, 310, 4.0);

    let driver = driver(store.clone(), true);
    for m in ["sum:cpu", "sum:mem", "sum:gone"] {
        driver
            .handle_get(&params(&[("start", "0"), ("end", "400"), ("m", m)]))
            .unwrap();
    }
    // a parse failure must release pins too
    driver
        .handle_get(&params(&[("start", "0"), ("m", "nosuchagg:cpu")]))
        .unwrap_err();

    for shard in store.shards() {
        assert_eq!(shard.reader_count(), 0);
    }
}

#[test]
fn cross_shard_series_downsample_spans_segments() {
    // shard span 100 with a 200s downsample bucket straddling both shards
    let store = Arc::new(MemoryStore::new(100));
    let t = tags(&[("host", "a")]);
    store.put("cpu", &t, 50, 1.0);
    store.put("cpu", &t, 150, 2.0);

    let driver = driver(store, false);
    let body = driver
        .handle_get(&params(&[
            ("start", "0"),
            ("end", "399"),
            ("m", "sum:200s-sum:cpu"),
        ]))
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed[0]["dps"]["0"], 3.0);
}

#[test]
fn ms_resolution_skips_downsampling() {
    let store = Arc::new(MemoryStore::new(3600));
    let t = tags(&[("host", "a")]);
    store.put("cpu", &t, 0, 1.0);
    store.put("cpu", &t, 0, 2.0);

    let driver = driver(store, false);
    let body = driver
        .handle_get(&params(&[
            ("start", "0"),
            ("end", "60"),
            ("m", "sum:cpu"),
            ("msResolution", "true"),
        ]))
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    // raw duplicate timestamps aggregate at the cross-series merge instead
    assert_eq!(parsed[0]["dps"]["0"], 3.0);
}

#[test]
fn aggregate_tags_and_tags_stay_disjoint() {
    let store = Arc::new(MemoryStore::new(3600));
    store.put("cpu", &tags(&[("host", "a"), ("dc", "east"), ("rack", "r1")]), 0, 1.0);
    store.put("cpu", &tags(&[("host", "b"), ("dc", "east"), ("rack", "r2")]), 0, 2.0);

    let driver = driver(store, false);
    let body = driver
        .handle_get(&params(&[
            ("start", "0"),
            ("end", "60"),
            ("m", "sum:cpu{dc=east}"),
        ]))
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    let result = &parsed[0];
    assert_eq!(result["tags"]["dc"], "east");
    let agg_tags: Vec<&str> = result["aggregateTags"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert!(agg_tags.contains(&"host"));
    assert!(agg_tags.contains(&"rack"));
    for key in agg_tags {
        assert!(result["tags"].get(key).is_none());
    }
    assert_eq!(result["dps"]["0"], 3.0);
}
