//! Server metrics collection.
//!
//! Aggregate counters only — nothing here identifies a client or a
//! destination. Sessions update the counters through a shared handle;
//! everything is atomic with relaxed ordering.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server metrics collector.
pub struct ServerMetrics {
    /// Server start time
    start_time: Instant,
    /// Total sessions accepted
    total_sessions: AtomicU64,
    /// Sessions currently running
    active_sessions: AtomicU64,
    /// Sessions closed for a client protocol violation
    protocol_errors: AtomicU64,
    /// Sessions closed because resolution failed
    resolve_failures: AtomicU64,
    /// Sessions closed because every endpoint refused
    connect_failures: AtomicU64,
    /// Bytes relayed client → upstream
    bytes_to_upstream: AtomicU64,
    /// Bytes relayed upstream → client
    bytes_to_client: AtomicU64,
}

impl ServerMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_sessions: AtomicU64::new(0),
            active_sessions: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            resolve_failures: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            bytes_to_upstream: AtomicU64::new(0),
            bytes_to_client: AtomicU64::new(0),
        }
    }

    /// Record a newly accepted session.
    pub fn session_opened(&self) {
        self.total_sessions.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session that has fully terminated.
    pub fn session_closed(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a client protocol violation.
    pub fn record_protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a resolution failure.
    pub fn record_resolve_failure(&self) {
        self.resolve_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an upstream connect failure.
    pub fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Add to the client → upstream byte counter.
    pub fn add_bytes_to_upstream(&self, bytes: u64) {
        self.bytes_to_upstream.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Add to the upstream → client byte counter.
    pub fn add_bytes_to_client(&self, bytes: u64) {
        self.bytes_to_client.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Get uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Get total sessions accepted.
    pub fn total_sessions(&self) -> u64 {
        self.total_sessions.load(Ordering::Relaxed)
    }

    /// Get currently running sessions.
    pub fn active_sessions(&self) -> u64 {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Get bytes relayed client → upstream.
    pub fn bytes_to_upstream(&self) -> u64 {
        self.bytes_to_upstream.load(Ordering::Relaxed)
    }

    /// Get bytes relayed upstream → client.
    pub fn bytes_to_client(&self) -> u64 {
        self.bytes_to_client.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            total_sessions: self.total_sessions(),
            active_sessions: self.active_sessions(),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            resolve_failures: self.resolve_failures.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            bytes_to_upstream: self.bytes_to_upstream(),
            bytes_to_client: self.bytes_to_client(),
        }
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub total_sessions: u64,
    pub active_sessions: u64,
    pub protocol_errors: u64,
    pub resolve_failures: u64,
    pub connect_failures: u64,
    pub bytes_to_upstream: u64,
    pub bytes_to_client: u64,
}

impl MetricsSnapshot {
    /// Total bytes relayed in both directions.
    pub fn bytes_relayed(&self) -> u64 {
        self.bytes_to_upstream + self.bytes_to_client
    }

    /// Fraction of sessions that ended in a client protocol violation.
    pub fn protocol_error_rate(&self) -> f64 {
        if self.total_sessions == 0 {
            0.0
        } else {
            self.protocol_errors as f64 / self.total_sessions as f64
        }
    }
}
