//! Basalt TSDB - OpenTSDB-compatible time-series query engine
//!
//! This library implements the query side of a time-series database
//! speaking the OpenTSDB HTTP API:
//! - Dual-grammar query parsing (URL `m=` form and JSON body form)
//! - Shard fan-out planning with per-series-key task deduplication
//! - Bounded-parallel execution over a fixed worker pool
//! - Streaming downsampling with fill policies, cross-series aggregation,
//!   and counter-aware rate conversion
//! - OpenTSDB-compatible JSON result rendering

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod query;
pub mod storage;
pub mod types;

// Re-export main types
pub use config::Config;
pub use error::{Error, Result, StorageError};
pub use query::{Query, QueryDriver, QueryExecutor};
pub use types::{TagSet, TimeRange, Timestamp, TsResolution};
