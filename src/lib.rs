//! Vane - A traffic routing and policy enforcement hub.
//!
//! Vane is an embeddable request-routing core implementing a **hexagonal architecture**.
//! It matches incoming requests against wildcard route patterns, gates them through
//! prioritized traffic policies, balances them across upstream targets, and tracks the
//! health of every target with circuit breakers fed by active probes. This library
//! exposes the building blocks so you can embed the hub or compose parts of it inside
//! your own application.
//!
//! # Features
//! - Wildcard path routing with specificity-ranked pattern matching
//! - Pluggable load balancing strategies (round-robin, random, least-connections, ip-hash)
//! - Prioritized traffic policies: deny, delay, rate-limit, and audit-log actions
//! - Per-target circuit breakers driven by active health probes
//! - Bounded request history with retention-based eviction and per-route statistics
//! - Event broadcasting for routing decisions, breaker transitions, and lifecycle changes
//! - Metrics & structured tracing via `tracing`
//! - Graceful shutdown propagated to every background loop
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use vane::{RoutingHub, adapters::TracingAuditSink, core::RequestContext};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = vane::config::load_config("config.toml").await?;
//! let hub = Arc::new(RoutingHub::from_config(&config, Arc::new(TracingAuditSink))?);
//!
//! let request = RequestContext::new("GET", "/api/users/42", "203.0.113.7");
//! let outcome = hub.route_request(&request);
//! println!("{} -> {:?}", outcome.message, outcome.target_url);
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! business logic inside `core`. Routing decisions are synchronous; only the background
//! loops (health checking, statistics aggregation, history sweeping) are async. End users
//! should prefer the re‑exports documented below instead of reaching into internal modules
//! directly.
//!
//! # Minimum Supported Rust Version (MSRV)
//! The MSRV is **1.85** (edition 2024). It may be bumped in a minor release with a note
//! in the changelog.
//!
//! # Error Handling
//! All fallible APIs return `eyre::Result<T>` or a domain specific error type. A custom error
//! context is always attached using `WrapErr` for debuggability.
//!
//! # Concurrency & Data Structures
//! For shared mutable maps the project uses `scc::HashMap` instead of `dashmap` to maintain
//! predictable performance characteristics under contention. Read-heavy snapshots (the
//! routing table, the policy list) live behind `arc_swap::ArcSwap` and are rebuilt wholesale
//! on mutation.
//!
//! # Stability
//! This crate is early stage; APIs may evolve. Semantic versioning will be followed after 1.0.
//!
//! # License
//! Licensed under Apache-2.0.
//!
//! See README for more extensive usage patterns.
// Re-export public modules with explicit visibility controls
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

// These modules are implementation details and should not be directly used by users
pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{HealthChecker, HistorySweeper, HttpHealthProbe, StatsAggregator, TracingAuditSink},
    core::{RequestContext, RoutingHub, RoutingOutcome},
    ports::{AuditSink, HealthProbe},
    utils::GracefulShutdown,
};
