//! Bandwidth governor for a low-priority host cohort.
//!
//! Throughput on a chokepoint is compared against a 90%/70% dead band of the
//! link capacity. Above the upper bound every cohort member gets a
//! token-bucket limit; at or below the lower bound the limits are removed.
//! Endpoints outside the cohort are never touched.

use std::sync::Arc;

use crate::config::CongestionConfig;
use crate::controller::Controller;
use crate::endpoint::{Capability, Cohort, Endpoint, EndpointRegistry};
use crate::enforcement::{Enforcement, Step};
use crate::error::ConfigError;
use crate::hysteresis::{DeadBand, Thresholds, Transition};
use crate::probe::MetricSource;
use crate::sink::{ActionSink, RateLimit};

pub const DEFAULT_ENTER_RATIO: f64 = 0.9;
pub const DEFAULT_EXIT_RATIO: f64 = 0.7;

pub type CongestionController<S> = Controller<S, DeadBand, RateLimitPlan>;

#[derive(Debug)]
pub struct RateLimitPlan {
    cohort: Cohort<Endpoint>,
    limit: RateLimit,
}

impl RateLimitPlan {
    pub fn new(cohort: Cohort<Endpoint>, limit: RateLimit) -> Result<Self, ConfigError> {
        if limit.rate_kbit == 0 || limit.burst_kbit == 0 || limit.latency_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "limit",
                reason: "rate, burst and latency must all be positive".to_string(),
            });
        }
        Ok(Self { cohort, limit })
    }

    pub fn cohort(&self) -> &Cohort<Endpoint> {
        &self.cohort
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }
}

impl Enforcement for RateLimitPlan {
    fn apply_steps(&self) -> Vec<Step> {
        self.cohort
            .iter()
            .map(|endpoint| Step::ApplyRateLimit {
                endpoint: endpoint.clone(),
                limit: self.limit,
            })
            .collect()
    }

    fn remove_steps(&self) -> Vec<Step> {
        self.cohort
            .iter()
            .map(|endpoint| Step::RemoveRateLimit {
                endpoint: endpoint.clone(),
            })
            .collect()
    }

    fn describe(&self, transition: Transition) -> String {
        match transition {
            Transition::Degrade => format!(
                "chokepoint saturated, limiting {} endpoints to {}kbit",
                self.cohort.len(),
                self.limit.rate_kbit
            ),
            Transition::Recover => format!(
                "load subsided, lifting limit on {} endpoints",
                self.cohort.len()
            ),
        }
    }
}

/// Thresholds in bits per second for the configured capacity.
pub fn thresholds_from_config(config: &CongestionConfig) -> Result<Thresholds, ConfigError> {
    Thresholds::from_capacity(
        config.capacity_mbit * 1_000_000.0,
        config.enter_ratio,
        config.exit_ratio,
    )
}

pub fn plan_from_config(
    config: &CongestionConfig,
    registry: &EndpointRegistry,
) -> Result<RateLimitPlan, ConfigError> {
    registry.require(&config.chokepoint.node, Capability::Probe)?;
    if let Some(range) = &config.cohort_range {
        range.check()?;
    }
    let cohort = Cohort::new(config.cohort_endpoints(), "congestion cohort")?;
    for endpoint in &cohort {
        registry.require(&endpoint.node, Capability::Shaping)?;
    }
    RateLimitPlan::new(cohort, config.limit)
}

/// Assemble a congestion controller over a throughput `source` (bits/s).
pub fn build<S>(
    config: &CongestionConfig,
    registry: &EndpointRegistry,
    source: S,
    sink: Arc<dyn ActionSink>,
) -> Result<CongestionController<S>, ConfigError>
where
    S: MetricSource<Value = f64>,
{
    config.check_bounds()?;
    let thresholds = thresholds_from_config(config)?;
    let plan = plan_from_config(config, registry)?;
    Ok(Controller::new(
        "congestion",
        source,
        DeadBand::new(thresholds),
        plan,
        sink,
        config.enforcement_concurrency,
    ))
}
