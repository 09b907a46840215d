//! In-process metric state shared between the collection loop and the
//! exposition endpoint.
//!
//! The store owns a private `prometheus::Registry` plus every metric family
//! the exporter publishes; nothing here is global, the store is handed
//! explicitly to the reconciler and the HTTP server. Wrapped in
//! `Arc<Mutex<…>>` so one lock covers "apply a cycle's whole batch" and
//! "render current state"; a scrape can observe the state before or after a
//! cycle, never a mix of both.
//!
//! Gauges carry replace semantics; the two cache counters only ever move
//! forward via `add_cache_*`. Source-labeled series are never removed once
//! observed.

use std::sync::{Arc, Mutex};

use prometheus::proto::MetricType;
use prometheus::{Encoder, Gauge, GaugeVec, IntCounter, Opts, Registry, TextEncoder};

/// The store behind the single lock shared by the reconciler and the server.
pub type SharedStore = Arc<Mutex<MetricStore>>;

/// All metric families published on `/metrics`.
pub struct MetricStore {
    registry: Registry,

    // Per-source backup gauges, labeled by `source`.
    backup_status: GaugeVec,
    backup_size_bytes: GaugeVec,
    backup_duration_seconds: GaugeVec,
    last_backup_timestamp: GaugeVec,
    backup_files: GaugeVec,

    // Repository-level gauges.
    repository_status: Gauge,
    repository_size_bytes: Gauge,
    repository_free_space_bytes: Gauge,

    // Cache metrics.
    cache_size_bytes: Gauge,
    cache_hits_total: IntCounter,
    cache_misses_total: IntCounter,
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<Gauge, prometheus::Error> {
    let g = Gauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

fn gauge_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<GaugeVec, prometheus::Error> {
    let g = GaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let c = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

impl MetricStore {
    /// Creates the store and registers every family with its registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let backup_status = gauge_vec(
            &registry,
            "backup_status",
            "Status of the last backup (0=error, 1=success)",
            &["source"],
        )?;
        let backup_size_bytes = gauge_vec(
            &registry,
            "backup_size_bytes",
            "Size of the last backup in bytes",
            &["source"],
        )?;
        let backup_duration_seconds = gauge_vec(
            &registry,
            "backup_duration_seconds",
            "Duration of the last backup in seconds",
            &["source"],
        )?;
        let last_backup_timestamp = gauge_vec(
            &registry,
            "last_backup_timestamp",
            "Timestamp of the last backup",
            &["source"],
        )?;
        let backup_files = gauge_vec(
            &registry,
            "backup_files",
            "Number of files in the last backup",
            &["source"],
        )?;

        let repository_status = gauge(
            &registry,
            "repository_status",
            "Repository connection status (0=disconnected, 1=connected)",
        )?;
        let repository_size_bytes = gauge(
            &registry,
            "repository_size_bytes",
            "Total size of repository in bytes",
        )?;
        let repository_free_space_bytes = gauge(
            &registry,
            "repository_free_space_bytes",
            "Available space on the repository mount in bytes",
        )?;

        let cache_size_bytes = gauge(
            &registry,
            "cache_size_bytes",
            "Size of the kopia cache in bytes",
        )?;
        let cache_hits_total = counter(
            &registry,
            "cache_hits_total",
            "Total number of cache hits",
        )?;
        let cache_misses_total = counter(
            &registry,
            "cache_misses_total",
            "Total number of cache misses",
        )?;

        Ok(Self {
            registry,
            backup_status,
            backup_size_bytes,
            backup_duration_seconds,
            last_backup_timestamp,
            backup_files,
            repository_status,
            repository_size_bytes,
            repository_free_space_bytes,
            cache_size_bytes,
            cache_hits_total,
            cache_misses_total,
        })
    }

    /// Writes the full per-source gauge set as one unit.
    ///
    /// The caller holds the store lock for the whole cycle, so a concurrent
    /// scrape can never pair this record's status with another poll's size.
    pub fn set_backup(
        &self,
        source: &str,
        status: f64,
        size_bytes: f64,
        duration_seconds: f64,
        last_timestamp: f64,
        files: f64,
    ) {
        self.backup_status.with_label_values(&[source]).set(status);
        self.backup_size_bytes
            .with_label_values(&[source])
            .set(size_bytes);
        self.backup_duration_seconds
            .with_label_values(&[source])
            .set(duration_seconds);
        self.last_backup_timestamp
            .with_label_values(&[source])
            .set(last_timestamp);
        self.backup_files.with_label_values(&[source]).set(files);
    }

    pub fn set_repository_connected(&self, connected: bool) {
        self.repository_status
            .set(if connected { 1.0 } else { 0.0 });
    }

    pub fn set_repository_size(&self, bytes: f64) {
        self.repository_size_bytes.set(bytes);
    }

    pub fn set_free_space(&self, bytes: f64) {
        self.repository_free_space_bytes.set(bytes);
    }

    pub fn set_cache_size(&self, bytes: f64) {
        self.cache_size_bytes.set(bytes);
    }

    pub fn add_cache_hits(&self, delta: u64) {
        self.cache_hits_total.inc_by(delta);
    }

    pub fn add_cache_misses(&self, delta: u64) {
        self.cache_misses_total.inc_by(delta);
    }

    /// Renders the current state in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::with_capacity(4096);
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Looks up the current value of one series without creating it.
    ///
    /// `labels` must all match; pass an empty slice for unlabeled metrics.
    /// Counters are reported as their float value.
    pub fn value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        for family in self.registry.gather() {
            if family.get_name() != name {
                continue;
            }
            'metric: for m in family.get_metric() {
                for (key, value) in labels {
                    let matched = m
                        .get_label()
                        .iter()
                        .any(|l| l.get_name() == *key && l.get_value() == *value);
                    if !matched {
                        continue 'metric;
                    }
                }
                let v = match family.get_field_type() {
                    MetricType::COUNTER => m.get_counter().get_value(),
                    _ => m.get_gauge().get_value(),
                };
                return Some(v);
            }
        }
        None
    }

    /// Number of series currently present in one family.
    pub fn series_count(&self, name: &str) -> usize {
        self.registry
            .gather()
            .iter()
            .find(|f| f.get_name() == name)
            .map(|f| f.get_metric().len())
            .unwrap_or(0)
    }
}

/// Convenience constructor for the shared form everything is wired with.
pub fn shared_store() -> Result<SharedStore, prometheus::Error> {
    Ok(Arc::new(Mutex::new(MetricStore::new()?)))
}
