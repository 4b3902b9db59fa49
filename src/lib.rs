//! # taskscale
//!
//! Elastic worker pool driven by queue depth.
//!
//! Workers claim pending work items from a shared store, process them
//! exclusively, complete them, and fire a best-effort notification. An
//! autoscaler samples the pending count on a fixed interval and grows or
//! shrinks the pool between configured bounds.
//!
//! Stores: in-memory ([`store::InMemoryStore`]) and Postgres ([`db::Db`]).

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod notify;
pub mod store;
pub mod telemetry;
