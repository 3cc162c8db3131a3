//! Managed endpoints and the typed registry that resolves them.
//!
//! A node is anything the controllers can run `ip`/`tc` against: a router,
//! a host, a switch. Each node lives in an optional network namespace and
//! declares which kinds of enforcement it accepts.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::net::IpAddr;
use std::str::FromStr;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SinkError};

/// An attachment point: one interface on one node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub node: String,
    pub interface: String,
}

impl Endpoint {
    pub fn new(node: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            interface: interface.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.interface)
    }
}

/// An address with its prefix length, e.g. `192.168.10.254/24`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cidr {
    pub addr: IpAddr,
    pub prefix: u8,
}

impl FromStr for Cidr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidAddress(s.to_string());
        let (addr, prefix) = s.split_once('/').ok_or_else(invalid)?;
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(invalid());
        }
        Ok(Self { addr, prefix })
    }
}

impl TryFrom<String> for Cidr {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Cidr> for String {
    fn from(value: Cidr) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Route destination: the default route or an explicit prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Destination {
    Default,
    Prefix(Cidr),
}

impl FromStr for Destination {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Destination::Default),
            other => other.parse().map(Destination::Prefix),
        }
    }
}

impl TryFrom<String> for Destination {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Destination> for String {
    fn from(value: Destination) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Default => write!(f, "default"),
            Destination::Prefix(cidr) => write!(f, "{cidr}"),
        }
    }
}

/// Next hop of a static route.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NextHop {
    pub gateway: IpAddr,
    #[serde(default)]
    pub interface: Option<String>,
}

impl fmt::Display for NextHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.interface {
            Some(dev) => write!(f, "{} dev {}", self.gateway, dev),
            None => write!(f, "{}", self.gateway),
        }
    }
}

/// Kinds of enforcement a node accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Address,
    Route,
    Shaping,
    Probe,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::Address,
        Capability::Route,
        Capability::Shaping,
        Capability::Probe,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Address => write!(f, "address binding"),
            Capability::Route => write!(f, "routing"),
            Capability::Shaping => write!(f, "traffic shaping"),
            Capability::Probe => write!(f, "probing"),
        }
    }
}

/// A node registered with the controllers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagedEndpoint {
    pub id: String,
    /// Network namespace the node's commands run in; `None` is the host.
    pub namespace: Option<String>,
    capabilities: Vec<Capability>,
}

impl ManagedEndpoint {
    pub fn new(id: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            id: id.into(),
            namespace,
            capabilities: Capability::ALL.to_vec(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: &[Capability]) -> Self {
        let mut caps = capabilities.to_vec();
        caps.sort();
        caps.dedup();
        self.capabilities = caps;
        self
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Lookup table from node id to [`ManagedEndpoint`].
#[derive(Clone, Debug, Default)]
pub struct EndpointRegistry {
    nodes: BTreeMap<String, ManagedEndpoint>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node. A later registration of the same id replaces it.
    pub fn insert(&mut self, endpoint: ManagedEndpoint) {
        self.nodes.insert(endpoint.id.clone(), endpoint);
    }

    pub fn get(&self, id: &str) -> Option<&ManagedEndpoint> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Resolve a node for an action at runtime.
    pub fn resolve(&self, id: &str, capability: Capability) -> Result<&ManagedEndpoint, SinkError> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| SinkError::UnknownNode(id.to_string()))?;
        if !node.supports(capability) {
            return Err(SinkError::Unsupported {
                node: id.to_string(),
                capability,
            });
        }
        Ok(node)
    }

    /// Check a node reference at construction time.
    pub fn require(&self, id: &str, capability: Capability) -> Result<(), ConfigError> {
        match self.nodes.get(id) {
            None => Err(ConfigError::UnknownNode(id.to_string())),
            Some(node) if !node.supports(capability) => Err(ConfigError::MissingCapability {
                node: id.to_string(),
                capability,
            }),
            Some(_) => Ok(()),
        }
    }
}

/// Drop repeated items, keeping the first occurrence of each.
pub fn dedup_ordered<T: Clone + Eq + Hash>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut seen = FxHashSet::default();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Ordered, deduplicated set of enforcement targets, fixed at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cohort<T> {
    members: Vec<T>,
}

impl<T: Clone + Eq + Hash> Cohort<T> {
    /// Build a cohort keeping the first occurrence of each member.
    /// `what` names the cohort in the error when it ends up empty.
    pub fn new(
        members: impl IntoIterator<Item = T>,
        what: &'static str,
    ) -> Result<Self, ConfigError> {
        let members = dedup_ordered(members);
        if members.is_empty() {
            return Err(ConfigError::EmptyCohort(what));
        }
        Ok(Self { members })
    }
}

impl<T> Cohort<T> {
    pub fn members(&self) -> &[T] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.members.iter()
    }
}

impl<'a, T> IntoIterator for &'a Cohort<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cidr_parse() {
        let cidr: Cidr = "192.168.10.254/24".parse().unwrap();
        assert_eq!(cidr.prefix, 24);
        assert_eq!(cidr.to_string(), "192.168.10.254/24");

        assert!("192.168.10.254".parse::<Cidr>().is_err());
        assert!("192.168.10.254/33".parse::<Cidr>().is_err());
        assert!("fd00::1/64".parse::<Cidr>().is_ok());
        assert!("not-an-ip/24".parse::<Cidr>().is_err());
    }

    #[test]
    fn test_destination_parse() {
        assert_eq!("default".parse::<Destination>().unwrap(), Destination::Default);
        let dst: Destination = "10.0.30.0/24".parse().unwrap();
        assert_eq!(dst.to_string(), "10.0.30.0/24");
    }

    #[test]
    fn test_cohort_dedup_keeps_order() {
        let cohort = Cohort::new(["b", "a", "b", "c", "a"], "cohort").unwrap();
        assert_eq!(cohort.members(), &["b", "a", "c"]);
    }

    #[test]
    fn test_cohort_rejects_empty() {
        let err = Cohort::<&str>::new([], "congestion cohort").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyCohort("congestion cohort")));
    }

    #[test]
    fn test_registry_capabilities() {
        let mut registry = EndpointRegistry::new();
        registry.insert(
            ManagedEndpoint::new("dorm1", Some("dorm1".into()))
                .with_capabilities(&[Capability::Shaping]),
        );

        assert!(registry.resolve("dorm1", Capability::Shaping).is_ok());
        assert!(matches!(
            registry.resolve("dorm1", Capability::Route),
            Err(SinkError::Unsupported { .. })
        ));
        assert!(matches!(
            registry.resolve("dorm2", Capability::Shaping),
            Err(SinkError::UnknownNode(_))
        ));
        assert!(matches!(
            registry.require("dorm1", Capability::Address),
            Err(ConfigError::MissingCapability { .. })
        ));
    }
}
