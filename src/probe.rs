//! Metric sources: uplink liveness and counter-derived throughput.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::command::Shell;
use crate::endpoint::{Capability, Endpoint, EndpointRegistry};
use crate::error::MetricReadError;

/// One reading taken by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MetricSample<V> {
    /// Logical timestamp: the controller's tick number.
    pub tick: u64,
    pub value: V,
}

#[async_trait]
pub trait MetricSource: Send {
    type Value: Copy + fmt::Debug + Send;

    async fn sample(&mut self) -> Result<Self::Value, MetricReadError>;
}

/// Source of a monotonically increasing byte counter.
#[async_trait]
pub trait CounterSource: Send {
    async fn read(&mut self) -> Result<u64, MetricReadError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    #[default]
    TxBytes,
    RxBytes,
}

impl CounterKind {
    fn file(self) -> &'static str {
        match self {
            CounterKind::TxBytes => "tx_bytes",
            CounterKind::RxBytes => "rx_bytes",
        }
    }
}

async fn read_sysfs(
    shell: &Shell,
    registry: &EndpointRegistry,
    node: &str,
    path: &str,
) -> Result<String, MetricReadError> {
    let managed = registry
        .resolve(node, Capability::Probe)
        .map_err(|e| MetricReadError::Unavailable(e.to_string()))?;
    let output = shell
        .output(managed.namespace.as_deref(), "cat", &[path])
        .await
        .map_err(|source| MetricReadError::Spawn {
            node: node.to_string(),
            command: format!("cat {path}"),
            source,
        })?;
    if !output.status.success() {
        return Err(MetricReadError::Command {
            node: node.to_string(),
            command: format!("cat {path}"),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Reads `operstate` of each uplink of one node.
///
/// The node is alive while any uplink is `up`. It is reported down only
/// when every uplink was read and none is up; if some reads failed and the
/// rest are down the reading is inconclusive and returned as an error.
pub struct LinkStateProbe {
    registry: Arc<EndpointRegistry>,
    shell: Shell,
    node: String,
    uplinks: Vec<String>,
}

impl LinkStateProbe {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        sudo: bool,
        node: impl Into<String>,
        uplinks: Vec<String>,
    ) -> Self {
        Self {
            registry,
            shell: Shell::new(sudo),
            node: node.into(),
            uplinks,
        }
    }
}

/// Interpret raw `operstate` values.
pub fn any_uplink_up(states: &[Result<String, MetricReadError>]) -> Option<bool> {
    if states.iter().any(|s| matches!(s, Ok(v) if v == "up")) {
        return Some(true);
    }
    if states.iter().all(Result::is_ok) && !states.is_empty() {
        return Some(false);
    }
    None
}

#[async_trait]
impl MetricSource for LinkStateProbe {
    type Value = bool;

    async fn sample(&mut self) -> Result<bool, MetricReadError> {
        let mut states = Vec::with_capacity(self.uplinks.len());
        for uplink in &self.uplinks {
            let path = format!("/sys/class/net/{uplink}/operstate");
            let state = read_sysfs(&self.shell, &self.registry, &self.node, &path).await;
            match &state {
                Ok(s) => debug!(node = %self.node, uplink = %uplink, "operstate {s}"),
                Err(e) => warn!(node = %self.node, uplink = %uplink, "operstate unreadable: {e}"),
            }
            states.push(state);
        }
        any_uplink_up(&states).ok_or_else(|| MetricReadError::NoUplinkState {
            node: self.node.clone(),
        })
    }
}

/// Reads a byte counter from `/sys/class/net/<if>/statistics`.
pub struct ByteCounterProbe {
    registry: Arc<EndpointRegistry>,
    shell: Shell,
    endpoint: Endpoint,
    kind: CounterKind,
}

impl ByteCounterProbe {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        sudo: bool,
        endpoint: Endpoint,
        kind: CounterKind,
    ) -> Self {
        Self {
            registry,
            shell: Shell::new(sudo),
            endpoint,
            kind,
        }
    }
}

#[async_trait]
impl CounterSource for ByteCounterProbe {
    async fn read(&mut self) -> Result<u64, MetricReadError> {
        let path = format!(
            "/sys/class/net/{}/statistics/{}",
            self.endpoint.interface,
            self.kind.file()
        );
        let raw = read_sysfs(&self.shell, &self.registry, &self.endpoint.node, &path).await?;
        raw.parse().map_err(|_| MetricReadError::Parse {
            what: format!("{} {}", self.endpoint, self.kind.file()),
            raw,
        })
    }
}

/// Bits per second between two counter snapshots.
///
/// Returns 0 for non-positive or non-finite elapsed time and when the
/// counter went backwards (interface reset).
pub fn bits_per_second(before: u64, after: u64, elapsed_secs: f64) -> f64 {
    if !(elapsed_secs.is_finite() && elapsed_secs > 0.0) || after < before {
        return 0.0;
    }
    (after - before) as f64 * 8.0 / elapsed_secs
}

/// Turns a counter into a throughput metric using the two latest readings.
///
/// The first reading has no predecessor and yields 0. A failed read leaves
/// the previous snapshot in place.
pub struct RateMeter<C> {
    counter: C,
    last: Option<(u64, Instant)>,
}

impl<C: CounterSource> RateMeter<C> {
    pub fn new(counter: C) -> Self {
        Self {
            counter,
            last: None,
        }
    }
}

#[async_trait]
impl<C: CounterSource> MetricSource for RateMeter<C> {
    type Value = f64;

    async fn sample(&mut self) -> Result<f64, MetricReadError> {
        let bytes = self.counter.read().await?;
        let now = Instant::now();
        let rate = match self.last {
            Some((prev, at)) => bits_per_second(prev, bytes, now.duration_since(at).as_secs_f64()),
            None => 0.0,
        };
        self.last = Some((bytes, now));
        Ok(rate)
    }
}
