//! Top-level query orchestration
//!
//! The driver owns one request end to end: parse the incoming form into
//! [`Query`] plans, plan tasks against storage, execute them (pooled or
//! sequential per configuration), group completed tasks into result sets,
//! apply cross-series aggregation and the optional rate transform, and
//! render the OpenTSDB JSON body.
//!
//! Shard pins taken during planning are held in RAII guards scoped to the
//! request, so the net refcount delta is zero on every path.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::query::aggregate::aggregate;
use crate::query::ast::Query;
use crate::query::executor::QueryExecutor;
use crate::query::group::{create_results, ResultSet};
use crate::query::parser::{parse_json_form, parse_url_form};
use crate::query::planner::plan;
use crate::query::rate::calculate_rate;
use crate::query::response::render_results;
use crate::storage::SeriesStore;
use crate::types::TsResolution;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Drives parse → plan → execute → group → aggregate → rate → serialize
pub struct QueryDriver {
    store: Arc<dyn SeriesStore>,
    executor: Arc<QueryExecutor>,
    resolution: TsResolution,
    parallel: bool,
    max_response_size: usize,
}

impl QueryDriver {
    /// Create a driver bound to a store and executor
    pub fn new(store: Arc<dyn SeriesStore>, executor: Arc<QueryExecutor>, config: &Config) -> Self {
        Self {
            store,
            executor,
            resolution: config.tsdb.timestamp_resolution,
            parallel: config.query.executor.parallel,
            max_response_size: config.query.max_response_size,
        }
    }

    /// Handle `GET /api/query`: URL-form parameters, one query
    pub fn handle_get(&self, params: &HashMap<String, String>) -> Result<String> {
        let now = self.resolution.now();
        let query = parse_url_form(params, now, self.resolution)?;
        let results = self.run_query(&query)?;
        render_results(&results, self.max_response_size)
    }

    /// Handle `POST /api/query`: JSON body, one result array across all
    /// subqueries
    pub fn handle_post(&self, body: &str) -> Result<String> {
        let value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| Error::BadRequest(format!("invalid JSON body: {}", e)))?;
        let now = self.resolution.now();
        let queries = parse_json_form(&value, now, self.resolution)?;

        let mut results = Vec::new();
        for query in &queries {
            results.extend(self.run_query(query)?);
        }
        render_results(&results, self.max_response_size)
    }

    /// Handle `GET /api/config/filters`: no extended filter types
    pub fn config_filters(&self) -> &'static str {
        "{}"
    }

    /// Execute one parsed query through the full pipeline
    pub fn run_query(&self, query: &Query) -> Result<Vec<ResultSet>> {
        let (tasks, _shard_guards) = plan(query, self.store.as_ref(), self.resolution);
        debug!(metric = %query.metric, tasks = tasks.len(), "executing query");

        if self.parallel {
            self.executor.execute_parallel(&tasks)?;
        } else {
            self.executor.execute_sequential(&tasks)?;
        }

        let mut results = create_results(&tasks, query);
        for result in &mut results {
            aggregate(query.aggregate, result);
        }
        if let Some(rate) = &query.rate {
            for result in &mut results {
                calculate_rate(&mut result.points, rate, self.resolution);
            }
        }
        Ok(results)
    }
}
