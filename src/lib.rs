//! kopia-exporter - Prometheus exporter for kopia backup repositories.
//!
//! Periodically shells out to the kopia CLI, decodes its JSON output and
//! republishes the results as pull-style metrics:
//! - `command` - external command invocation with deadlines
//! - `decode` - kopia JSON decoders
//! - `freespace` - statvfs probe for the repository mount
//! - `collector` - per-cycle polling of snapshots, status and free space
//! - `store` - shared metric registry behind one lock
//! - `reconcile` - maps polled facts onto metric updates
//! - `scheduler` - the periodic collection loop
//! - `server` - /metrics and /health endpoints
//! - `config` - CLI and environment configuration

pub mod collector;
pub mod command;
pub mod config;
pub mod decode;
pub mod freespace;
pub mod reconcile;
pub mod scheduler;
pub mod server;
pub mod store;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
