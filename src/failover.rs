//! Standby-router promotion on primary uplink loss.
//!
//! While every uplink of the primary is down the backup takes over the
//! virtual addresses and dependent peers route through it. When any uplink
//! comes back the addresses are withdrawn and the peers point at the primary
//! again.

use std::fmt;
use std::sync::Arc;

use crate::config::FailoverConfig;
use crate::controller::Controller;
use crate::endpoint::{
    Capability, Cidr, Destination, Endpoint, EndpointRegistry, NextHop, dedup_ordered,
};
use crate::enforcement::{Enforcement, Step};
use crate::error::ConfigError;
use crate::hysteresis::{ControllerState, Liveness, Transition};
use crate::probe::MetricSource;
use crate::sink::ActionSink;

pub type FailoverController<S> = Controller<S, Liveness, FailoverPlan>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Primary,
    Backup,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Backup => write!(f, "backup"),
        }
    }
}

/// A shared address and the backup interface that takes it over.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VirtualBinding {
    pub address: Cidr,
    pub subnet: String,
    /// Attachment point on the backup for this subnet.
    pub backup: Endpoint,
}

impl VirtualBinding {
    /// Which router is expected to hold the address in `state`.
    pub fn owner(&self, state: ControllerState) -> Role {
        match state {
            ControllerState::Normal => Role::Primary,
            ControllerState::Degraded => Role::Backup,
        }
    }
}

/// A peer route switched between the two routers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PeerRouteEntry {
    pub peer: String,
    pub destination: Destination,
    pub via_primary: NextHop,
    pub via_backup: NextHop,
}

/// Promote/demote plan over the configured bindings and peer routes.
#[derive(Debug)]
pub struct FailoverPlan {
    primary: String,
    backup: String,
    bindings: Vec<VirtualBinding>,
    routes: Vec<PeerRouteEntry>,
}

impl FailoverPlan {
    /// Bindings and routes are deduplicated; together they must not be empty.
    pub fn new(
        primary: impl Into<String>,
        backup: impl Into<String>,
        bindings: Vec<VirtualBinding>,
        routes: Vec<PeerRouteEntry>,
    ) -> Result<Self, ConfigError> {
        let bindings = dedup_ordered(bindings);
        let routes = dedup_ordered(routes);
        if bindings.is_empty() && routes.is_empty() {
            return Err(ConfigError::EmptyCohort("failover bindings and routes"));
        }
        Ok(Self {
            primary: primary.into(),
            backup: backup.into(),
            bindings,
            routes,
        })
    }

    pub fn bindings(&self) -> &[VirtualBinding] {
        &self.bindings
    }

    pub fn routes(&self) -> &[PeerRouteEntry] {
        &self.routes
    }
}

impl Enforcement for FailoverPlan {
    fn apply_steps(&self) -> Vec<Step> {
        let addresses = self.bindings.iter().map(|b| Step::AddAddress {
            endpoint: b.backup.clone(),
            address: b.address,
        });
        let routes = self.routes.iter().map(|r| Step::SetRoute {
            peer: r.peer.clone(),
            destination: r.destination,
            next_hop: r.via_backup.clone(),
        });
        addresses.chain(routes).collect()
    }

    fn remove_steps(&self) -> Vec<Step> {
        let addresses = self.bindings.iter().map(|b| Step::RemoveAddress {
            endpoint: b.backup.clone(),
            address: b.address,
        });
        let routes = self.routes.iter().map(|r| Step::SetRoute {
            peer: r.peer.clone(),
            destination: r.destination,
            next_hop: r.via_primary.clone(),
        });
        addresses.chain(routes).collect()
    }

    fn describe(&self, transition: Transition) -> String {
        match transition {
            Transition::Degrade => format!(
                "{} down, promoting {} ({} addresses, {} peer routes)",
                self.primary,
                self.backup,
                self.bindings.len(),
                self.routes.len()
            ),
            Transition::Recover => format!(
                "{} recovered, demoting {} to standby",
                self.primary, self.backup
            ),
        }
    }
}

/// Build the plan from configuration, checking every node reference.
pub fn plan_from_config(
    config: &FailoverConfig,
    registry: &EndpointRegistry,
) -> Result<FailoverPlan, ConfigError> {
    registry.require(&config.primary, Capability::Probe)?;
    if config.uplinks.is_empty() {
        return Err(ConfigError::EmptyCohort("failover uplinks"));
    }
    if !config.bindings.is_empty() {
        registry.require(&config.backup, Capability::Address)?;
    }
    for route in &config.routes {
        registry.require(&route.peer, Capability::Route)?;
    }

    let bindings = config
        .bindings
        .iter()
        .map(|b| VirtualBinding {
            address: b.address,
            subnet: b.subnet.clone(),
            backup: Endpoint::new(config.backup.clone(), b.interface.clone()),
        })
        .collect();
    let routes = config
        .routes
        .iter()
        .map(|r| PeerRouteEntry {
            peer: r.peer.clone(),
            destination: r.destination,
            via_primary: r.via_primary.clone(),
            via_backup: r.via_backup.clone(),
        })
        .collect();

    FailoverPlan::new(config.primary.clone(), config.backup.clone(), bindings, routes)
}

/// Assemble a failover controller over `source`.
pub fn build<S>(
    config: &FailoverConfig,
    registry: &EndpointRegistry,
    source: S,
    sink: Arc<dyn ActionSink>,
) -> Result<FailoverController<S>, ConfigError>
where
    S: MetricSource<Value = bool>,
{
    config.check_bounds()?;
    let plan = plan_from_config(config, registry)?;
    let policy = Liveness::new(config.down_confirmations, config.up_confirmations)?;
    Ok(Controller::new(
        "failover",
        source,
        policy,
        plan,
        sink,
        config.enforcement_concurrency,
    ))
}
