//! Lock-free counters and gauges backing the observability hooks named in
//! spec §6.5. The core only exposes these — wiring them to an actual
//! Prometheus exporter is an external collaborator's job (spec §1).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Default)]
struct BackendCounters {
    active_connections: AtomicI64,
    tool_calls_ok: AtomicU64,
    tool_calls_err: AtomicU64,
    sync_failures: DashMap<&'static str, AtomicU64>,
}

#[derive(Debug, Default)]
struct ResourceReadCounters {
    ok: AtomicU64,
    err: AtomicU64,
}

pub struct Metrics {
    backends: DashMap<String, BackendCounters>,
    resource_reads: DashMap<(String, String), ResourceReadCounters>,
    subscriptions_active: AtomicI64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            backends: DashMap::new(),
            resource_reads: DashMap::new(),
            subscriptions_active: AtomicI64::new(0),
        }
    }

    pub fn connection_opened(&self, backend_id: &str) {
        self.backends
            .entry(backend_id.to_string())
            .or_default()
            .active_connections
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self, backend_id: &str) {
        if let Some(counters) = self.backends.get(backend_id) {
            counters.active_connections.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub fn tool_call(&self, backend_id: &str, success: bool) {
        let counters = self.backends.entry(backend_id.to_string()).or_default();
        if success {
            counters.tool_calls_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.tool_calls_err.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn resource_read(&self, backend_id: &str, mime: &str, success: bool) {
        let counters = self
            .resource_reads
            .entry((backend_id.to_string(), mime.to_string()))
            .or_default();
        if success {
            counters.ok.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.err.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn sync_failure(&self, backend_id: &str, kind: &'static str) {
        let counters = self.backends.entry(backend_id.to_string()).or_default();
        counters
            .sync_failures
            .entry(kind)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscription_added(&self) {
        self.subscriptions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscription_removed(&self) {
        self.subscriptions_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut backends = HashMap::new();
        for entry in self.backends.iter() {
            let counters = entry.value();
            let sync_failures = counters
                .sync_failures
                .iter()
                .map(|e| (e.key().to_string(), e.value().load(Ordering::Relaxed)))
                .collect();
            backends.insert(
                entry.key().clone(),
                BackendSnapshot {
                    active_connections: counters.active_connections.load(Ordering::Relaxed),
                    tool_calls_ok: counters.tool_calls_ok.load(Ordering::Relaxed),
                    tool_calls_err: counters.tool_calls_err.load(Ordering::Relaxed),
                    sync_failures,
                },
            );
        }

        let mut resource_reads = Vec::new();
        for entry in self.resource_reads.iter() {
            let (backend_id, mime) = entry.key().clone();
            let counters = entry.value();
            resource_reads.push(ResourceReadSnapshot {
                backend_id,
                mime,
                ok: counters.ok.load(Ordering::Relaxed),
                err: counters.err.load(Ordering::Relaxed),
            });
        }

        MetricsSnapshot {
            backends,
            resource_reads,
            subscriptions_active: self.subscriptions_active.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendSnapshot {
    pub active_connections: i64,
    pub tool_calls_ok: u64,
    pub tool_calls_err: u64,
    pub sync_failures: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceReadSnapshot {
    pub backend_id: String,
    pub mime: String,
    pub ok: u64,
    pub err: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub backends: HashMap<String, BackendSnapshot>,
    pub resource_reads: Vec<ResourceReadSnapshot>,
    pub subscriptions_active: i64,
}
