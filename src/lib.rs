/// Breakwater - Marketplace Risk & Enforcement Engine
///
/// Ingests risk signals from upstream classifiers, folds them into a
/// per-user 0-100 score across operational, behavioral, and network
/// factors, and walks a tiered enforcement ladder with appeals,
/// alerting, and a full audit trail.
pub mod alerting;
pub mod api;
pub mod appeals;
pub mod audit;
pub mod batch;
pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod enforcement;
pub mod error;
pub mod graph;
pub mod jobs;
pub mod metrics;
pub mod rate_limit;
pub mod scoring;
pub mod server;
pub mod signals;
