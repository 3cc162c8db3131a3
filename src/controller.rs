//! The generic closed-loop controller.
//!
//! `Controller` glues a [`MetricSource`], a [`Hysteresis`] policy and an
//! [`Enforcement`] plan together. Enforcement runs exactly once per
//! transition; ticks that do not move the state never touch the sink.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::enforcement::{Enforcement, execute_batch};
use crate::error::{EnforcementError, MetricReadError};
use crate::hysteresis::{ControllerState, Hysteresis, Transition};
use crate::probe::{MetricSample, MetricSource};
use crate::scheduler::ControlLoop;
use crate::sink::ActionSink;

/// Result of one poll tick.
#[derive(Debug)]
pub enum TickOutcome {
    /// The metric could not be read; state is unchanged.
    Skipped { tick: u64, error: MetricReadError },
    /// The sample did not cross a threshold.
    Held { tick: u64, state: ControllerState },
    /// The state changed and the enforcement batch ran.
    Transitioned {
        tick: u64,
        transition: Transition,
        failures: Vec<EnforcementError>,
    },
}

impl TickOutcome {
    pub fn tick(&self) -> u64 {
        match self {
            TickOutcome::Skipped { tick, .. }
            | TickOutcome::Held { tick, .. }
            | TickOutcome::Transitioned { tick, .. } => *tick,
        }
    }

    pub fn transition(&self) -> Option<Transition> {
        match self {
            TickOutcome::Transitioned { transition, .. } => Some(*transition),
            _ => None,
        }
    }

    pub fn failures(&self) -> &[EnforcementError] {
        match self {
            TickOutcome::Transitioned { failures, .. } => failures,
            _ => &[],
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, TickOutcome::Skipped { .. })
    }
}

pub struct Controller<S, H, E> {
    name: String,
    source: S,
    policy: H,
    enforcement: E,
    sink: Arc<dyn ActionSink>,
    concurrency: usize,
    ticks: u64,
}

impl<S, H, E> Controller<S, H, E>
where
    S: MetricSource,
    H: Hysteresis<Value = S::Value>,
    E: Enforcement,
{
    pub fn new(
        name: impl Into<String>,
        source: S,
        policy: H,
        enforcement: E,
        sink: Arc<dyn ActionSink>,
        concurrency: usize,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            policy,
            enforcement,
            sink,
            concurrency: concurrency.max(1),
            ticks: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ControllerState {
        self.policy.state()
    }

    /// Number of polls taken so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn policy(&self) -> &H {
        &self.policy
    }

    pub fn enforcement(&self) -> &E {
        &self.enforcement
    }

    /// Evaluate one sample and enforce on a transition.
    pub async fn tick(&mut self, sample: MetricSample<S::Value>) -> TickOutcome {
        let Some(transition) = self.policy.observe(sample.value) else {
            return TickOutcome::Held {
                tick: sample.tick,
                state: self.policy.state(),
            };
        };

        let steps = match transition {
            Transition::Degrade => {
                warn!(
                    controller = %self.name,
                    "{transition} on {:?}: {}",
                    sample.value,
                    self.enforcement.describe(transition)
                );
                self.enforcement.apply_steps()
            }
            Transition::Recover => {
                info!(
                    controller = %self.name,
                    "{transition} on {:?}: {}",
                    sample.value,
                    self.enforcement.describe(transition)
                );
                self.enforcement.remove_steps()
            }
        };

        let failures = execute_batch(self.sink.as_ref(), &steps, self.concurrency).await;
        if failures.is_empty() {
            info!(controller = %self.name, "{} steps completed", steps.len());
        } else {
            warn!(
                controller = %self.name,
                "{} of {} steps failed; will not retry until the next transition",
                failures.len(),
                steps.len()
            );
        }

        TickOutcome::Transitioned {
            tick: sample.tick,
            transition,
            failures,
        }
    }

    /// Sample the metric and evaluate it.
    pub async fn poll(&mut self) -> TickOutcome {
        self.ticks += 1;
        let tick = self.ticks;
        match self.source.sample().await {
            Ok(value) => self.tick(MetricSample { tick, value }).await,
            Err(error) => {
                warn!(controller = %self.name, "metric read failed, skipping tick: {error}");
                TickOutcome::Skipped { tick, error }
            }
        }
    }

    /// Undo enforcement if currently DEGRADED and return to NORMAL.
    pub async fn release(&mut self) -> Vec<EnforcementError> {
        if self.policy.state() != ControllerState::Degraded {
            return Vec::new();
        }
        info!(controller = %self.name, "releasing enforcement");
        let steps = self.enforcement.remove_steps();
        let failures = execute_batch(self.sink.as_ref(), &steps, self.concurrency).await;
        self.policy.reset();
        failures
    }
}

#[async_trait]
impl<S, H, E> ControlLoop for Controller<S, H, E>
where
    S: MetricSource,
    H: Hysteresis<Value = S::Value>,
    E: Enforcement,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ControllerState {
        self.policy.state()
    }

    async fn poll(&mut self) -> TickOutcome {
        Controller::poll(self).await
    }

    async fn release(&mut self) -> Vec<EnforcementError> {
        Controller::release(self).await
    }
}
