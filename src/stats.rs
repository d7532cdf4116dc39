//! Process-wide gauges
//!
//! The coordinator is the only writer; the introspection endpoint and tests
//! read snapshots. Counters mirror the `[clients/publishers/receivers]`
//! prefix carried by coordinator log lines.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Shared gauges, updated after every coordinator event.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    clients: AtomicUsize,
    publishers: AtomicUsize,
    receivers: AtomicUsize,
    frames_forwarded: AtomicU64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_gauges(&self, clients: usize, publishers: usize, receivers: usize) {
        self.clients.store(clients, Ordering::Relaxed);
        self.publishers.store(publishers, Ordering::Relaxed);
        self.receivers.store(receivers, Ordering::Relaxed);
    }

    pub fn add_frames_forwarded(&self, n: u64) {
        self.frames_forwarded.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            clients: self.clients.load(Ordering::Relaxed),
            publishers: self.publishers.load(Ordering::Relaxed),
            receivers: self.receivers.load(Ordering::Relaxed),
            frames_forwarded: self.frames_forwarded.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view served by the introspection endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub clients: usize,
    pub publishers: usize,
    pub receivers: usize,
    pub frames_forwarded: u64,
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "clients: {}", self.clients)?;
        writeln!(f, "publishers: {}", self.publishers)?;
        writeln!(f, "receivers: {}", self.receivers)?;
        writeln!(f, "frames_forwarded: {}", self.frames_forwarded)
    }
}
