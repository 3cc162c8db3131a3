//! Enforcement primitives and their `ip`/`tc` implementation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::command::{Shell, is_benign};
use crate::endpoint::{Capability, Cidr, Destination, Endpoint, EndpointRegistry, NextHop};
use crate::error::SinkError;

const ADDR_PRESENT: &[&str] = &["File exists", "Address already assigned"];
const ADDR_ABSENT: &[&str] = &["Cannot assign requested address"];
const ROUTE_ABSENT: &[&str] = &["No such process", "No such file or directory"];
const QDISC_ABSENT: &[&str] = &[
    "Cannot delete qdisc with handle of zero",
    "Cannot find specified qdisc",
    "No such file or directory",
];

/// Token-bucket parameters installed on a shaped endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimit {
    #[serde(default = "default_rate_kbit")]
    pub rate_kbit: u64,
    #[serde(default = "default_burst_kbit")]
    pub burst_kbit: u64,
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u32,
}

fn default_rate_kbit() -> u64 {
    1000
}

fn default_burst_kbit() -> u64 {
    32
}

fn default_latency_ms() -> u32 {
    50
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            rate_kbit: default_rate_kbit(),
            burst_kbit: default_burst_kbit(),
            latency_ms: default_latency_ms(),
        }
    }
}

/// Idempotent network mutations. Every method must succeed when the
/// requested state already holds.
#[async_trait]
pub trait ActionSink: Send + Sync {
    async fn add_address(&self, endpoint: &Endpoint, address: &Cidr) -> Result<(), SinkError>;

    async fn remove_address(&self, endpoint: &Endpoint, address: &Cidr) -> Result<(), SinkError>;

    /// Point `destination` on `peer` at `next_hop`, replacing any existing route.
    async fn set_route(
        &self,
        peer: &str,
        destination: &Destination,
        next_hop: &NextHop,
    ) -> Result<(), SinkError>;

    async fn clear_route(&self, peer: &str, destination: &Destination) -> Result<(), SinkError>;

    async fn apply_rate_limit(&self, endpoint: &Endpoint, limit: &RateLimit)
    -> Result<(), SinkError>;

    async fn remove_rate_limit(&self, endpoint: &Endpoint) -> Result<(), SinkError>;
}

pub fn address_args(verb: &str, endpoint: &Endpoint, address: &Cidr) -> Vec<String> {
    vec![
        "addr".into(),
        verb.into(),
        address.to_string(),
        "dev".into(),
        endpoint.interface.clone(),
    ]
}

/// `ip route replace` installs or overwrites in one step.
pub fn route_replace_args(destination: &Destination, next_hop: &NextHop) -> Vec<String> {
    let mut args = vec![
        "route".into(),
        "replace".into(),
        destination.to_string(),
        "via".into(),
        next_hop.gateway.to_string(),
    ];
    if let Some(dev) = &next_hop.interface {
        args.extend(["dev".into(), dev.clone()]);
    }
    args
}

pub fn route_del_args(destination: &Destination) -> Vec<String> {
    vec!["route".into(), "del".into(), destination.to_string()]
}

/// `tc qdisc replace` keeps a second apply from stacking another qdisc.
pub fn tbf_args(endpoint: &Endpoint, limit: &RateLimit) -> Vec<String> {
    vec![
        "qdisc".into(),
        "replace".into(),
        "dev".into(),
        endpoint.interface.clone(),
        "root".into(),
        "tbf".into(),
        "rate".into(),
        format!("{}kbit", limit.rate_kbit),
        "burst".into(),
        format!("{}kbit", limit.burst_kbit),
        "latency".into(),
        format!("{}ms", limit.latency_ms),
    ]
}

pub fn qdisc_del_args(endpoint: &Endpoint) -> Vec<String> {
    vec![
        "qdisc".into(),
        "del".into(),
        "dev".into(),
        endpoint.interface.clone(),
        "root".into(),
    ]
}

/// [`ActionSink`] backed by iproute2 commands.
pub struct IpCommandSink {
    registry: Arc<EndpointRegistry>,
    shell: Shell,
}

impl IpCommandSink {
    pub fn new(registry: Arc<EndpointRegistry>, sudo: bool) -> Self {
        Self {
            registry,
            shell: Shell::new(sudo),
        }
    }

    async fn run(
        &self,
        node: &str,
        capability: Capability,
        program: &str,
        args: &[String],
        tolerated: &[&str],
    ) -> Result<(), SinkError> {
        let managed = self.registry.resolve(node, capability)?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let command = format!("{program} {}", args.join(" "));

        let output = self
            .shell
            .output(managed.namespace.as_deref(), program, &args)
            .await
            .map_err(|source| SinkError::Spawn {
                command: command.clone(),
                source,
            })?;

        if output.status.success() {
            debug!(node, "{command}");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_benign(&stderr, tolerated) {
            debug!(node, "{command}: already in place ({stderr})");
            return Ok(());
        }

        Err(SinkError::Command {
            command,
            status: output.status.to_string(),
            stderr,
        })
    }
}

#[async_trait]
impl ActionSink for IpCommandSink {
    async fn add_address(&self, endpoint: &Endpoint, address: &Cidr) -> Result<(), SinkError> {
        let args = address_args("add", endpoint, address);
        self.run(&endpoint.node, Capability::Address, "ip", &args, ADDR_PRESENT)
            .await
    }

    async fn remove_address(&self, endpoint: &Endpoint, address: &Cidr) -> Result<(), SinkError> {
        let args = address_args("del", endpoint, address);
        self.run(&endpoint.node, Capability::Address, "ip", &args, ADDR_ABSENT)
            .await
    }

    async fn set_route(
        &self,
        peer: &str,
        destination: &Destination,
        next_hop: &NextHop,
    ) -> Result<(), SinkError> {
        let args = route_replace_args(destination, next_hop);
        self.run(peer, Capability::Route, "ip", &args, &[]).await
    }

    async fn clear_route(&self, peer: &str, destination: &Destination) -> Result<(), SinkError> {
        let args = route_del_args(destination);
        self.run(peer, Capability::Route, "ip", &args, ROUTE_ABSENT)
            .await
    }

    async fn apply_rate_limit(
        &self,
        endpoint: &Endpoint,
        limit: &RateLimit,
    ) -> Result<(), SinkError> {
        let args = tbf_args(endpoint, limit);
        self.run(&endpoint.node, Capability::Shaping, "tc", &args, &[])
            .await
    }

    async fn remove_rate_limit(&self, endpoint: &Endpoint) -> Result<(), SinkError> {
        let args = qdisc_del_args(endpoint);
        self.run(&endpoint.node, Capability::Shaping, "tc", &args, QDISC_ABSENT)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;
    use crate::endpoint::ManagedEndpoint;

    #[test]
    fn test_tbf_args_match_default_limit() {
        let ep = Endpoint::new("dorm1", "dorm1-eth0");
        assert_eq!(
            tbf_args(&ep, &RateLimit::default()).join(" "),
            "qdisc replace dev dorm1-eth0 root tbf rate 1000kbit burst 32kbit latency 50ms"
        );
        assert_eq!(
            qdisc_del_args(&ep).join(" "),
            "qdisc del dev dorm1-eth0 root"
        );
    }

    #[test]
    fn test_address_args() {
        let ep = Endpoint::new("r2", "r2-eth0.10");
        let vip: Cidr = "192.168.10.254/24".parse().unwrap();
        assert_eq!(
            address_args("add", &ep, &vip).join(" "),
            "addr add 192.168.10.254/24 dev r2-eth0.10"
        );
    }

    #[test]
    fn test_route_args() {
        let hop = NextHop {
            gateway: IpAddr::V4(Ipv4Addr::new(8, 8, 8, 2)),
            interface: Some("internet-eth1".into()),
        };
        assert_eq!(
            route_replace_args(&Destination::Default, &hop).join(" "),
            "route replace default via 8.8.8.2 dev internet-eth1"
        );
        assert_eq!(
            route_del_args(&Destination::Default).join(" "),
            "route del default"
        );

        let hop = NextHop {
            gateway: IpAddr::V4(Ipv4Addr::new(1, 1, 1, 254)),
            interface: None,
        };
        let dst: Destination = "10.0.30.0/24".parse().unwrap();
        assert_eq!(
            route_replace_args(&dst, &hop).join(" "),
            "route replace 10.0.30.0/24 via 1.1.1.254"
        );
    }

    #[tokio::test]
    async fn test_unknown_node_is_rejected_before_spawning() {
        let sink = IpCommandSink::new(Arc::new(EndpointRegistry::new()), false);
        let err = sink
            .remove_rate_limit(&Endpoint::new("ghost", "ghost-eth0"))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::UnknownNode(node) if node == "ghost"));
    }

    #[tokio::test]
    async fn test_capability_is_enforced() {
        let mut registry = EndpointRegistry::new();
        registry.insert(
            ManagedEndpoint::new("lab1", None).with_capabilities(&[Capability::Shaping]),
        );
        let sink = IpCommandSink::new(Arc::new(registry), false);
        let vip: Cidr = "10.0.20.254/24".parse().unwrap();
        let err = sink
            .add_address(&Endpoint::new("lab1", "lab1-eth0"), &vip)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SinkError::Unsupported {
                capability: Capability::Address,
                ..
            }
        ));
    }
}
