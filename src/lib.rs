//! Closed-loop network controllers.
//!
//! Two controllers share one pattern: sample a metric, run it through a
//! hysteresis policy, and on a state change apply or undo a batch of
//! idempotent actions across a fixed set of managed endpoints.
//!
//! - [`failover`]: promotes a standby router when all primary uplinks die.
//! - [`congestion`]: rate-limits a low-priority cohort while a chokepoint
//!   link runs near capacity.

// Use mimalloc as the global allocator for tests (non-Windows only)
#[cfg(not(windows))]
#[cfg(test)]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod command;
pub mod config;
pub mod congestion;
pub mod controller;
pub mod endpoint;
pub mod enforcement;
pub mod error;
pub mod failover;
pub mod hysteresis;
pub mod probe;
pub mod scheduler;
pub mod sink;

// Test helpers module - available when test-internals feature is enabled
#[cfg(any(test, feature = "test-internals"))]
pub mod test_helpers;

#[cfg(test)]
pub mod tests;

pub use config::Config;
pub use controller::{Controller, TickOutcome};
pub use endpoint::{Endpoint, EndpointRegistry, ManagedEndpoint};
pub use error::{ConfigError, EnforcementError, MetricReadError, SinkError};
pub use hysteresis::{ControllerState, Transition};
pub use sink::{ActionSink, IpCommandSink, RateLimit};
