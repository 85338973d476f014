use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Snapshot of the tunnel counters at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// SSH connections successfully established to jump hosts
    pub connections_established: u64,
    /// SSH connection attempts that failed
    pub connections_failed: u64,
    /// Forwarded streams opened through a tunnel
    pub forwardings_established: u64,
    /// Forwarding requests that failed after all attempts
    pub forwardings_failed: u64,
    /// Timestamp when the counters were created (Unix timestamp)
    pub start_time: u64,
}

/// Process-wide tunnel counters
///
/// Backed by Prometheus collectors registered in a private registry, shared between
/// every tunnel connection through an `Arc`.
#[derive(Clone)]
pub struct TunnelMetrics {
    registry: Registry,
    connections: IntCounterVec,
    forwardings: IntCounterVec,
    tunnels: IntGauge,
    start_time: u64,
}

impl TunnelMetrics {
    /// Create the collectors and register them
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let connections = IntCounterVec::new(
            Opts::new(
                "http_over_ssh_connections_total",
                "SSH connections to jump hosts.",
            ),
            &["state"],
        )?;
        registry.register(Box::new(connections.clone()))?;

        let forwardings = IntCounterVec::new(
            Opts::new(
                "http_over_ssh_forwardings_total",
                "Streams forwarded through tunnels.",
            ),
            &["state"],
        )?;
        registry.register(Box::new(forwardings.clone()))?;

        let tunnels = IntGauge::new("http_over_ssh_tunnels", "Registered tunnel identities.")?;
        registry.register(Box::new(tunnels.clone()))?;

        // 预先创建标签，保证未发生的结果也以 0 输出
        for state in [ESTABLISHED, FAILED] {
            connections.with_label_values(&[state]);
            forwardings.with_label_values(&[state]);
        }

        Ok(Self {
            registry,
            connections,
            forwardings,
            tunnels,
            start_time: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        })
    }

    /// Record the outcome of an SSH connection attempt
    pub fn record_connection(&self, success: bool) {
        self.connections.with_label_values(&[state(success)]).inc();
    }

    /// Record the outcome of a forwarding request
    pub fn record_forwarding(&self, success: bool) {
        self.forwardings.with_label_values(&[state(success)]).inc();
    }

    /// Update the number of registered tunnel identities
    pub fn set_tunnels(&self, count: usize) {
        self.tunnels.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Get current snapshot of the counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_established: self.connections.with_label_values(&[ESTABLISHED]).get(),
            connections_failed: self.connections.with_label_values(&[FAILED]).get(),
            forwardings_established: self.forwardings.with_label_values(&[ESTABLISHED]).get(),
            forwardings_failed: self.forwardings.with_label_values(&[FAILED]).get(),
            start_time: self.start_time,
        }
    }

    /// Render every collector in the Prometheus text exposition format
    pub fn encode_text(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl std::fmt::Debug for TunnelMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelMetrics")
            .field("snapshot", &self.snapshot())
            .field("tunnels", &self.tunnels.get())
            .finish()
    }
}

const ESTABLISHED: &str = "established";
const FAILED: &str = "failed";

fn state(success: bool) -> &'static str {
    if success {
        ESTABLISHED
    } else {
        FAILED
    }
}
