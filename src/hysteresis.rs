//! Two-state hysteresis policies.
//!
//! A policy only decides; it never touches the network. The controller
//! turns a returned [`Transition`] into exactly one enforcement batch.

use std::fmt;

use serde::Serialize;

use crate::error::ConfigError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerState {
    #[default]
    Normal,
    Degraded,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerState::Normal => write!(f, "NORMAL"),
            ControllerState::Degraded => write!(f, "DEGRADED"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transition {
    /// NORMAL -> DEGRADED
    Degrade,
    /// DEGRADED -> NORMAL
    Recover,
}

impl Transition {
    pub const fn target(self) -> ControllerState {
        match self {
            Transition::Degrade => ControllerState::Degraded,
            Transition::Recover => ControllerState::Normal,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Degrade => write!(f, "NORMAL -> DEGRADED"),
            Transition::Recover => write!(f, "DEGRADED -> NORMAL"),
        }
    }
}

/// Decides state changes from a stream of metric values.
pub trait Hysteresis: Send {
    type Value: Copy + fmt::Debug + Send;

    fn state(&self) -> ControllerState;

    /// Feed one value. Returns the transition it caused, if any.
    fn observe(&mut self, value: Self::Value) -> Option<Transition>;

    /// Force the state back to NORMAL after an explicit release.
    fn reset(&mut self);
}

/// Enter/exit pair for a rising-bad metric.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    enter: f64,
    exit: f64,
}

impl Thresholds {
    pub fn new(enter: f64, exit: f64) -> Result<Self, ConfigError> {
        if !enter.is_finite() || !exit.is_finite() || exit >= enter {
            return Err(ConfigError::InvalidThresholds { enter, exit });
        }
        Ok(Self { enter, exit })
    }

    /// Thresholds as fractions of a link capacity.
    pub fn from_capacity(
        capacity: f64,
        enter_ratio: f64,
        exit_ratio: f64,
    ) -> Result<Self, ConfigError> {
        if !(capacity.is_finite() && capacity > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "capacity",
                reason: format!("{capacity} is not a positive number"),
            });
        }
        if !(exit_ratio > 0.0 && enter_ratio <= 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "threshold ratios",
                reason: format!("need 0 < exit < enter <= 1, got {exit_ratio}/{enter_ratio}"),
            });
        }
        Self::new(capacity * enter_ratio, capacity * exit_ratio)
    }

    pub fn enter(&self) -> f64 {
        self.enter
    }

    pub fn exit(&self) -> f64 {
        self.exit
    }
}

/// Rising-bad metric with a dead band between `exit` and `enter`.
#[derive(Debug)]
pub struct DeadBand {
    thresholds: Thresholds,
    state: ControllerState,
}

impl DeadBand {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            state: ControllerState::Normal,
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }
}

impl Hysteresis for DeadBand {
    type Value = f64;

    fn state(&self) -> ControllerState {
        self.state
    }

    fn observe(&mut self, value: f64) -> Option<Transition> {
        let transition = match self.state {
            ControllerState::Normal if value >= self.thresholds.enter => Transition::Degrade,
            ControllerState::Degraded if value <= self.thresholds.exit => Transition::Recover,
            _ => return None,
        };
        self.state = transition.target();
        Some(transition)
    }

    fn reset(&mut self) {
        self.state = ControllerState::Normal;
    }
}

/// Binary liveness: `true` is up, `false` is down.
///
/// With the default confirmations of 1 the state flips on the first
/// contrary reading. Larger values require that many consecutive readings;
/// an agreeing reading clears the streak.
#[derive(Debug)]
pub struct Liveness {
    down_confirmations: u32,
    up_confirmations: u32,
    streak: u32,
    state: ControllerState,
}

impl Liveness {
    pub fn new(down_confirmations: u32, up_confirmations: u32) -> Result<Self, ConfigError> {
        if down_confirmations == 0 || up_confirmations == 0 {
            return Err(ConfigError::InvalidValue {
                field: "confirmations",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(Self {
            down_confirmations,
            up_confirmations,
            streak: 0,
            state: ControllerState::Normal,
        })
    }

    /// Flip on the first contrary reading.
    pub fn immediate() -> Self {
        Self {
            down_confirmations: 1,
            up_confirmations: 1,
            streak: 0,
            state: ControllerState::Normal,
        }
    }
}

impl Hysteresis for Liveness {
    type Value = bool;

    fn state(&self) -> ControllerState {
        self.state
    }

    fn observe(&mut self, alive: bool) -> Option<Transition> {
        let (needed, transition) = match (self.state, alive) {
            (ControllerState::Normal, false) => (self.down_confirmations, Transition::Degrade),
            (ControllerState::Degraded, true) => (self.up_confirmations, Transition::Recover),
            _ => {
                self.streak = 0;
                return None;
            }
        };
        self.streak += 1;
        if self.streak < needed {
            return None;
        }
        self.streak = 0;
        self.state = transition.target();
        Some(transition)
    }

    fn reset(&mut self) {
        self.streak = 0;
        self.state = ControllerState::Normal;
    }
}
