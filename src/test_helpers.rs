#![cfg(any(test, feature = "test-internals"))]
#![allow(dead_code)] // Allow unused helpers - they're used by library tests but not binary tests

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rustc_hash::FxHashSet;

use crate::endpoint::{
    Capability, Cidr, Cohort, Destination, Endpoint, EndpointRegistry, ManagedEndpoint, NextHop,
};
use crate::error::{MetricReadError, SinkError};
use crate::failover::{FailoverPlan, PeerRouteEntry, VirtualBinding};
use crate::probe::MetricSource;
use crate::sink::{ActionSink, RateLimit};

/// One call received by a [`RecordingSink`].
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    AddAddress(Endpoint, Cidr),
    RemoveAddress(Endpoint, Cidr),
    SetRoute(String, Destination, NextHop),
    ClearRoute(String, Destination),
    ApplyRateLimit(Endpoint, RateLimit),
    RemoveRateLimit(Endpoint),
}

impl Call {
    pub fn node(&self) -> &str {
        match self {
            Call::AddAddress(ep, _)
            | Call::RemoveAddress(ep, _)
            | Call::ApplyRateLimit(ep, _)
            | Call::RemoveRateLimit(ep) => &ep.node,
            Call::SetRoute(peer, ..) | Call::ClearRoute(peer, _) => peer,
        }
    }
}

/// Managed configuration as the sink models it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NetworkState {
    pub addresses: BTreeSet<(Endpoint, Cidr)>,
    pub routes: BTreeMap<(String, Destination), NextHop>,
    pub rate_limits: BTreeMap<Endpoint, RateLimit>,
}

#[derive(Default)]
struct Inner {
    calls: Vec<Call>,
    state: NetworkState,
    failing: FxHashSet<String>,
}

/// In-memory [`ActionSink`] that records calls and applies them to a
/// [`NetworkState`] with the same idempotence as the real sink.
#[derive(Default)]
pub struct RecordingSink {
    inner: Mutex<Inner>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration, e.g. the primary's routes.
    pub fn with_state(state: NetworkState) -> Self {
        let sink = Self::default();
        sink.inner.lock().unwrap().state = state;
        sink
    }

    /// Every call against `node` fails from now on.
    pub fn fail_on(&self, node: &str) {
        self.inner.lock().unwrap().failing.insert(node.to_string());
    }

    pub fn heal(&self, node: &str) {
        self.inner.lock().unwrap().failing.remove(node);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    pub fn snapshot(&self) -> NetworkState {
        self.inner.lock().unwrap().state.clone()
    }

    pub fn touched_nodes(&self) -> BTreeSet<String> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|c| c.node().to_string())
            .collect()
    }

    /// Highest number of calls observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn record(
        &self,
        call: Call,
        apply: impl FnOnce(&mut NetworkState),
    ) -> Result<(), SinkError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        // Let other steps in the batch start before this one finishes.
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut inner = self.inner.lock().unwrap();
        let node = call.node().to_string();
        inner.calls.push(call);
        if inner.failing.contains(&node) {
            return Err(SinkError::Command {
                command: format!("injected failure on {node}"),
                status: "exit status: 2".to_string(),
                stderr: "RTNETLINK answers: Operation not permitted".to_string(),
            });
        }
        apply(&mut inner.state);
        Ok(())
    }
}

#[async_trait]
impl ActionSink for RecordingSink {
    async fn add_address(&self, endpoint: &Endpoint, address: &Cidr) -> Result<(), SinkError> {
        let key = (endpoint.clone(), *address);
        self.record(Call::AddAddress(endpoint.clone(), *address), |s| {
            s.addresses.insert(key);
        })
        .await
    }

    async fn remove_address(&self, endpoint: &Endpoint, address: &Cidr) -> Result<(), SinkError> {
        let key = (endpoint.clone(), *address);
        self.record(Call::RemoveAddress(endpoint.clone(), *address), |s| {
            s.addresses.remove(&key);
        })
        .await
    }

    async fn set_route(
        &self,
        peer: &str,
        destination: &Destination,
        next_hop: &NextHop,
    ) -> Result<(), SinkError> {
        let key = (peer.to_string(), *destination);
        let hop = next_hop.clone();
        self.record(
            Call::SetRoute(peer.to_string(), *destination, next_hop.clone()),
            |s| {
                s.routes.insert(key, hop);
            },
        )
        .await
    }

    async fn clear_route(&self, peer: &str, destination: &Destination) -> Result<(), SinkError> {
        let key = (peer.to_string(), *destination);
        self.record(Call::ClearRoute(peer.to_string(), *destination), |s| {
            s.routes.remove(&key);
        })
        .await
    }

    async fn apply_rate_limit(
        &self,
        endpoint: &Endpoint,
        limit: &RateLimit,
    ) -> Result<(), SinkError> {
        let key = endpoint.clone();
        let limit = *limit;
        self.record(Call::ApplyRateLimit(endpoint.clone(), limit), |s| {
            s.rate_limits.insert(key, limit);
        })
        .await
    }

    async fn remove_rate_limit(&self, endpoint: &Endpoint) -> Result<(), SinkError> {
        let key = endpoint.clone();
        self.record(Call::RemoveRateLimit(endpoint.clone()), |s| {
            s.rate_limits.remove(&key);
        })
        .await
    }
}

/// [`MetricSource`] replaying a fixed script of readings.
pub struct ScriptedSource<V> {
    script: VecDeque<Result<V, MetricReadError>>,
}

impl<V> ScriptedSource<V> {
    pub fn new(values: impl IntoIterator<Item = V>) -> Self {
        Self {
            script: values.into_iter().map(Ok).collect(),
        }
    }

    pub fn from_results(results: impl IntoIterator<Item = Result<V, MetricReadError>>) -> Self {
        Self {
            script: results.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

#[async_trait]
impl<V> MetricSource for ScriptedSource<V>
where
    V: Copy + std::fmt::Debug + Send + Sync,
{
    type Value = V;

    async fn sample(&mut self) -> Result<V, MetricReadError> {
        self.script
            .pop_front()
            .unwrap_or_else(|| Err(MetricReadError::Unavailable("script exhausted".into())))
    }
}

pub fn cidr(s: &str) -> Cidr {
    s.parse().unwrap()
}

pub fn hop(gateway: &str) -> NextHop {
    NextHop {
        gateway: gateway.parse().unwrap(),
        interface: None,
    }
}

/// Two core routers, three distribution switches and `dorms` dorm hosts.
pub fn campus_registry(dorms: u32) -> EndpointRegistry {
    let mut registry = EndpointRegistry::new();
    for router in ["r1", "r2"] {
        registry.insert(ManagedEndpoint::new(router, Some(router.to_string())));
    }
    for switch in ["d1", "d2", "d3"] {
        registry.insert(
            ManagedEndpoint::new(switch, Some(switch.to_string()))
                .with_capabilities(&[Capability::Route]),
        );
    }
    for i in 1..=dorms {
        let host = format!("dorm{i}");
        registry.insert(
            ManagedEndpoint::new(host.clone(), Some(host)).with_capabilities(&[Capability::Shaping]),
        );
    }
    registry
}

/// r2 takes over the gateway address of three subnets, and every
/// distribution switch has a default route pointing at r1.
pub fn campus_failover_plan() -> FailoverPlan {
    let bindings = [
        ("192.168.10.254/24", "admin", "r2-eth1"),
        ("192.168.20.254/24", "academic", "r2-eth2"),
        ("192.168.30.254/24", "dorms", "r2-eth3"),
    ]
    .into_iter()
    .map(|(addr, subnet, iface)| VirtualBinding {
        address: cidr(addr),
        subnet: subnet.to_string(),
        backup: Endpoint::new("r2", iface),
    })
    .collect();

    let routes = ["d1", "d2", "d3"]
        .into_iter()
        .map(|peer| PeerRouteEntry {
            peer: peer.to_string(),
            destination: Destination::Default,
            via_primary: hop("10.0.0.1"),
            via_backup: hop("10.0.0.2"),
        })
        .collect();

    FailoverPlan::new("r1", "r2", bindings, routes).unwrap()
}

/// State before any failover: peers route through the primary.
pub fn primary_routes() -> NetworkState {
    let mut state = NetworkState::default();
    for peer in ["d1", "d2", "d3"] {
        state
            .routes
            .insert((peer.to_string(), Destination::Default), hop("10.0.0.1"));
    }
    state
}

/// `dorm1`..`dormN` on `dormN-eth0`.
pub fn dorm_cohort(n: u32) -> Cohort<Endpoint> {
    Cohort::new(
        (1..=n).map(|i| Endpoint::new(format!("dorm{i}"), format!("dorm{i}-eth0"))),
        "congestion cohort",
    )
    .unwrap()
}
