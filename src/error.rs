//! Error taxonomy shared by the controllers.
//!
//! Only [`ConfigError`] is fatal. [`MetricReadError`] and [`EnforcementError`]
//! are reported by a tick and never stop the poll loop.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::endpoint::Capability;
use crate::enforcement::ActionKind;

/// Sampling failed for this tick. The controller keeps its state.
#[derive(Debug, Error)]
pub enum MetricReadError {
    #[error("failed to spawn `{command}` on {node}: {source}")]
    Spawn {
        node: String,
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` on {node} failed: {stderr}")]
    Command {
        node: String,
        command: String,
        stderr: String,
    },
    #[error("unparseable {what} reading: {raw:?}")]
    Parse { what: String, raw: String },
    #[error("no uplink state could be read on {node}")]
    NoUplinkState { node: String },
    #[error("{0}")]
    Unavailable(String),
}

/// Failure of one primitive on an [`ActionSink`](crate::sink::ActionSink).
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("unknown node `{0}`")]
    UnknownNode(String),
    #[error("node `{node}` does not support {capability}")]
    Unsupported { node: String, capability: Capability },
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },
}

/// One cohort member's action failed. Other members are still processed.
#[derive(Debug, Error)]
#[error("{action} on {target} failed: {source}")]
pub struct EnforcementError {
    pub target: String,
    pub action: ActionKind,
    #[source]
    pub source: SinkError,
}

/// Construction-time validation failure. The controller refuses to start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid thresholds: exit {exit} must be below enter {enter}")]
    InvalidThresholds { enter: f64, exit: f64 },
    #[error("{0} must not be empty")]
    EmptyCohort(&'static str),
    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("invalid address `{0}`")]
    InvalidAddress(String),
    #[error("unknown node `{0}` (add it to `nodes`)")]
    UnknownNode(String),
    #[error("node `{node}` lacks the {capability} capability")]
    MissingCapability { node: String, capability: Capability },
    #[error("{0} is managed by both the failover and the congestion controller")]
    OverlappingCohort(String),
    #[error("no controller configured")]
    NothingToRun,
}
