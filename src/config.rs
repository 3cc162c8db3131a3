//! Controller configuration.
//!
//! Loaded once from YAML at startup and validated before any controller is
//! built. Nothing here changes while the controllers run.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::congestion::{self, DEFAULT_ENTER_RATIO, DEFAULT_EXIT_RATIO};
use crate::endpoint::{
    Capability, Cidr, Destination, Endpoint, EndpointRegistry, ManagedEndpoint, NextHop,
};
use crate::error::ConfigError;
use crate::failover;
use crate::hysteresis::Liveness;
use crate::probe::CounterKind;
use crate::sink::RateLimit;

/// Poll interval used by both controllers unless overridden.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
/// Failover steps run one at a time so they land in table order.
pub const DEFAULT_FAILOVER_CONCURRENCY: usize = 1;
pub const DEFAULT_CONGESTION_CONCURRENCY: usize = 8;
/// Most hosts a `cohort_range` may expand to.
pub const MAX_COHORT_RANGE: usize = 4096;

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_confirmations() -> u32 {
    1
}

fn default_failover_concurrency() -> usize {
    DEFAULT_FAILOVER_CONCURRENCY
}

fn default_congestion_concurrency() -> usize {
    DEFAULT_CONGESTION_CONCURRENCY
}

fn default_enter_ratio() -> f64 {
    DEFAULT_ENTER_RATIO
}

fn default_exit_ratio() -> f64 {
    DEFAULT_EXIT_RATIO
}

fn default_interface_suffix() -> String {
    "eth0".to_string()
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Prefix every command with `sudo -n`.
    #[serde(default)]
    pub sudo: bool,
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeConfig>,
    #[serde(default)]
    pub failover: Option<FailoverConfig>,
    #[serde(default)]
    pub congestion: Option<CongestionConfig>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    #[serde(default)]
    pub namespace: Option<String>,
    /// All capabilities when omitted.
    #[serde(default)]
    pub capabilities: Option<Vec<Capability>>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FailoverConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    pub primary: String,
    pub backup: String,
    /// Primary interfaces whose `operstate` decides liveness.
    pub uplinks: Vec<String>,
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default = "default_confirmations")]
    pub down_confirmations: u32,
    #[serde(default = "default_confirmations")]
    pub up_confirmations: u32,
    #[serde(default = "default_failover_concurrency")]
    pub enforcement_concurrency: usize,
}

impl FailoverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Loop parameters a controller cannot start with.
    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        check_interval("failover.poll_interval_ms", self.poll_interval_ms)?;
        check_concurrency("failover.enforcement_concurrency", self.enforcement_concurrency)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingConfig {
    pub address: Cidr,
    pub subnet: String,
    /// Backup interface that receives the address.
    pub interface: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    pub peer: String,
    pub destination: Destination,
    pub via_primary: NextHop,
    pub via_backup: NextHop,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CongestionConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    pub chokepoint: Endpoint,
    #[serde(default)]
    pub counter: CounterKind,
    pub capacity_mbit: f64,
    #[serde(default = "default_enter_ratio")]
    pub enter_ratio: f64,
    #[serde(default = "default_exit_ratio")]
    pub exit_ratio: f64,
    #[serde(default)]
    pub cohort: Vec<Endpoint>,
    #[serde(default)]
    pub cohort_range: Option<CohortRange>,
    #[serde(default)]
    pub limit: RateLimit,
    #[serde(default = "default_congestion_concurrency")]
    pub enforcement_concurrency: usize,
}

impl CongestionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Loop parameters and cohort range a controller cannot start with.
    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        check_interval("congestion.poll_interval_ms", self.poll_interval_ms)?;
        check_concurrency(
            "congestion.enforcement_concurrency",
            self.enforcement_concurrency,
        )?;
        if let Some(range) = &self.cohort_range {
            range.check()?;
        }
        Ok(())
    }

    /// Explicit members first, then the expanded range.
    pub fn cohort_endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints = self.cohort.clone();
        if let Some(range) = &self.cohort_range {
            endpoints.extend(range.endpoints());
        }
        endpoints
    }
}

/// `prefix` + number hosts, e.g. `dorm1`..`dorm40` on `dormN-eth0`.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CohortRange {
    pub prefix: String,
    pub first: u32,
    pub last: u32,
    #[serde(default = "default_interface_suffix")]
    pub interface_suffix: String,
}

impl CohortRange {
    pub fn len(&self) -> u64 {
        if self.first > self.last {
            0
        } else {
            u64::from(self.last - self.first) + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        if self.first > self.last {
            return Err(ConfigError::InvalidValue {
                field: "congestion.cohort_range",
                reason: format!("first {} is after last {}", self.first, self.last),
            });
        }
        if self.len() > MAX_COHORT_RANGE as u64 {
            return Err(ConfigError::InvalidValue {
                field: "congestion.cohort_range",
                reason: format!(
                    "{} hosts exceeds the limit of {MAX_COHORT_RANGE}",
                    self.len()
                ),
            });
        }
        Ok(())
    }

    /// Expanded members, never more than [`MAX_COHORT_RANGE`].
    pub fn endpoints(&self) -> Vec<Endpoint> {
        (self.first..=self.last)
            .take(MAX_COHORT_RANGE)
            .map(|i| {
                let node = format!("{}{}", self.prefix, i);
                let interface = format!("{node}-{}", self.interface_suffix);
                Endpoint::new(node, interface)
            })
            .collect()
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw, path)
    }

    /// Parse YAML; `origin` only labels errors.
    pub fn from_yaml(raw: &str, origin: impl AsRef<Path>) -> Result<Self, ConfigError> {
        serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.as_ref().to_path_buf(),
            source,
        })
    }

    /// Registry of declared nodes. Range-expanded cohort hosts that are not
    /// declared are added with a namespace named after the host and the
    /// shaping capability only.
    pub fn registry(&self) -> EndpointRegistry {
        let mut registry = EndpointRegistry::new();
        for (id, node) in &self.nodes {
            let mut managed = ManagedEndpoint::new(id.clone(), node.namespace.clone());
            if let Some(caps) = &node.capabilities {
                managed = managed.with_capabilities(caps);
            }
            registry.insert(managed);
        }

        let ranged = self
            .congestion
            .as_ref()
            .and_then(|c| c.cohort_range.as_ref())
            .map(CohortRange::endpoints)
            .unwrap_or_default();
        for endpoint in ranged {
            if !registry.contains(&endpoint.node) {
                registry.insert(
                    ManagedEndpoint::new(endpoint.node.clone(), Some(endpoint.node.clone()))
                        .with_capabilities(&[Capability::Shaping]),
                );
            }
        }
        registry
    }

    /// Check everything a controller would refuse at construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failover.is_none() && self.congestion.is_none() {
            return Err(ConfigError::NothingToRun);
        }
        if let Some(fo) = &self.failover {
            fo.check_bounds()?;
        }
        if let Some(cg) = &self.congestion {
            cg.check_bounds()?;
        }
        let registry = self.registry();

        let mut failover_endpoints = BTreeSet::new();
        if let Some(fo) = &self.failover {
            Liveness::new(fo.down_confirmations, fo.up_confirmations)?;

            let mut seen = BTreeSet::new();
            for route in &fo.routes {
                if !seen.insert((route.peer.as_str(), route.destination)) {
                    return Err(ConfigError::InvalidValue {
                        field: "failover.routes",
                        reason: format!("duplicate route {} on {}", route.destination, route.peer),
                    });
                }
            }

            let plan = failover::plan_from_config(fo, &registry)?;
            failover_endpoints.extend(plan.bindings().iter().map(|b| b.backup.clone()));
        }

        if let Some(cg) = &self.congestion {
            congestion::thresholds_from_config(cg)?;
            let plan = congestion::plan_from_config(cg, &registry)?;
            if let Some(shared) = plan.cohort().iter().find(|e| failover_endpoints.contains(*e)) {
                return Err(ConfigError::OverlappingCohort(shared.to_string()));
            }
        }

        Ok(())
    }
}

fn check_interval(field: &'static str, ms: u64) -> Result<(), ConfigError> {
    if ms == 0 {
        return Err(ConfigError::InvalidValue {
            field,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

fn check_concurrency(field: &'static str, n: usize) -> Result<(), ConfigError> {
    if n == 0 {
        return Err(ConfigError::InvalidValue {
            field,
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(())
}
