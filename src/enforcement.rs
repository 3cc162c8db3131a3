//! Enforcement steps and batch execution.
//!
//! A plan describes what a transition does as a list of [`Step`]s. The batch
//! runner issues them against an [`ActionSink`] with bounded fan-out and
//! reports every failure without aborting the batch.

use std::fmt;

use futures_util::StreamExt;
use futures_util::stream;
use tracing::{debug, error};

use crate::endpoint::{Cidr, Destination, Endpoint, NextHop};
use crate::error::{EnforcementError, SinkError};
use crate::hysteresis::Transition;
use crate::sink::{ActionSink, RateLimit};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionKind {
    AddAddress,
    RemoveAddress,
    SetRoute,
    ClearRoute,
    ApplyRateLimit,
    RemoveRateLimit,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::AddAddress => "add address",
            ActionKind::RemoveAddress => "remove address",
            ActionKind::SetRoute => "set route",
            ActionKind::ClearRoute => "clear route",
            ActionKind::ApplyRateLimit => "apply rate limit",
            ActionKind::RemoveRateLimit => "remove rate limit",
        };
        f.write_str(name)
    }
}

/// One idempotent action against one managed endpoint.
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    AddAddress {
        endpoint: Endpoint,
        address: Cidr,
    },
    RemoveAddress {
        endpoint: Endpoint,
        address: Cidr,
    },
    SetRoute {
        peer: String,
        destination: Destination,
        next_hop: NextHop,
    },
    ClearRoute {
        peer: String,
        destination: Destination,
    },
    ApplyRateLimit {
        endpoint: Endpoint,
        limit: RateLimit,
    },
    RemoveRateLimit {
        endpoint: Endpoint,
    },
}

impl Step {
    pub fn kind(&self) -> ActionKind {
        match self {
            Step::AddAddress { .. } => ActionKind::AddAddress,
            Step::RemoveAddress { .. } => ActionKind::RemoveAddress,
            Step::SetRoute { .. } => ActionKind::SetRoute,
            Step::ClearRoute { .. } => ActionKind::ClearRoute,
            Step::ApplyRateLimit { .. } => ActionKind::ApplyRateLimit,
            Step::RemoveRateLimit { .. } => ActionKind::RemoveRateLimit,
        }
    }

    /// Node the step mutates.
    pub fn node(&self) -> &str {
        match self {
            Step::AddAddress { endpoint, .. }
            | Step::RemoveAddress { endpoint, .. }
            | Step::ApplyRateLimit { endpoint, .. }
            | Step::RemoveRateLimit { endpoint } => &endpoint.node,
            Step::SetRoute { peer, .. } | Step::ClearRoute { peer, .. } => peer,
        }
    }

    /// Human-readable target used in diagnostics.
    pub fn target(&self) -> String {
        match self {
            Step::AddAddress { endpoint, address } | Step::RemoveAddress { endpoint, address } => {
                format!("{address} on {endpoint}")
            }
            Step::SetRoute {
                peer,
                destination,
                next_hop,
            } => format!("{destination} via {next_hop} on {peer}"),
            Step::ClearRoute { peer, destination } => format!("{destination} on {peer}"),
            Step::ApplyRateLimit { endpoint, .. } | Step::RemoveRateLimit { endpoint } => {
                endpoint.to_string()
            }
        }
    }

    async fn run(&self, sink: &dyn ActionSink) -> Result<(), SinkError> {
        match self {
            Step::AddAddress { endpoint, address } => sink.add_address(endpoint, address).await,
            Step::RemoveAddress { endpoint, address } => {
                sink.remove_address(endpoint, address).await
            }
            Step::SetRoute {
                peer,
                destination,
                next_hop,
            } => sink.set_route(peer, destination, next_hop).await,
            Step::ClearRoute { peer, destination } => sink.clear_route(peer, destination).await,
            Step::ApplyRateLimit { endpoint, limit } => {
                sink.apply_rate_limit(endpoint, limit).await
            }
            Step::RemoveRateLimit { endpoint } => sink.remove_rate_limit(endpoint).await,
        }
    }
}

/// What a controller does when it enters or leaves DEGRADED.
pub trait Enforcement: Send + Sync {
    /// Steps run on NORMAL -> DEGRADED, in enumeration order.
    fn apply_steps(&self) -> Vec<Step>;

    /// Steps run on DEGRADED -> NORMAL, in enumeration order.
    fn remove_steps(&self) -> Vec<Step>;

    /// Operator-facing summary logged when `transition` fires.
    fn describe(&self, transition: Transition) -> String {
        match transition {
            Transition::Degrade => "applying enforcement".to_string(),
            Transition::Recover => "removing enforcement".to_string(),
        }
    }
}

/// Run `steps` with at most `concurrency` in flight.
///
/// Steps are started in order and results are reported in order. A failing
/// step is logged and collected; it never prevents later steps from running.
pub async fn execute_batch(
    sink: &dyn ActionSink,
    steps: &[Step],
    concurrency: usize,
) -> Vec<EnforcementError> {
    let pending: Vec<_> = steps
        .iter()
        .map(move |step| async move { (step, step.run(sink).await) })
        .collect();
    let results: Vec<(&Step, Result<(), SinkError>)> = stream::iter(pending)
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut failures = Vec::new();
    for (step, result) in results {
        match result {
            Ok(()) => debug!("{}: {}", step.kind(), step.target()),
            Err(source) => {
                let err = EnforcementError {
                    target: step.target(),
                    action: step.kind(),
                    source,
                };
                error!(node = step.node(), "{err}");
                failures.push(err);
            }
        }
    }
    failures
}
