//! Host telemetry agent: ingests samples into an append-only store, raises alerts,
//! serves a query API and pushes live events to connected viewers.

pub mod aggregator;
pub mod broadcast;
pub mod classifier;
pub mod collector;
pub mod config;
pub mod dedup;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod query;
pub mod sampler;
pub mod state;
pub mod store;
pub mod tls;
pub mod types;
pub mod ws;

pub use error::Error;
