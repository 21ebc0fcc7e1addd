//! Load shedding and graceful degradation.
//!
//! Admission is a bounded semaphore with no queue: a message either
//! gets a permit immediately or is shed. Utilization of the permit
//! pool, together with the pipeline circuit breaker, determines the
//! current degradation level; the pipeline consults the level to
//! decide how much analysis each message receives.

use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::breaker::{CircuitBreaker, CircuitState};

/// How much of the pipeline runs for a given load level, ordered from
/// full analysis to none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DegradationLevel {
    /// All collectors, full scoring.
    Normal,
    /// Skip the expensive network history lookups and the similarity
    /// provider.
    Light,
    /// Local checks only: rate limiting, blocklist, whitelist,
    /// duplicate hash.
    Heavy,
    /// Nothing runs; messages pass through unexamined.
    Shed,
}

impl DegradationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DegradationLevel::Normal => "normal",
            DegradationLevel::Light => "light",
            DegradationLevel::Heavy => "heavy",
            DegradationLevel::Shed => "shed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackpressureConfig {
    /// Maximum messages in flight.
    pub max_concurrent: usize,
    /// Utilization percentages at which each level engages.
    pub light_pct: u8,
    pub heavy_pct: u8,
    pub shed_pct: u8,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        BackpressureConfig {
            max_concurrent: 100,
            light_pct: 60,
            heavy_pct: 80,
            shed_pct: 95,
        }
    }
}

pub enum Admission {
    Admitted(OwnedSemaphorePermit),
    Shed,
}

pub struct BackpressureController {
    semaphore: Arc<Semaphore>,
    config: BackpressureConfig,
}

impl BackpressureController {
    pub fn new(config: BackpressureConfig) -> Self {
        BackpressureController {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            config,
        }
    }

    /// Non-blocking admission. A message that cannot get a permit is
    /// shed rather than queued; queued work would be stale by the
    /// time it ran.
    pub fn try_admit(&self) -> Admission {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Admission::Admitted(permit),
            Err(_) => {
                warn!("admission: permit pool exhausted, shedding message");
                Admission::Shed
            }
        }
    }

    /// Permit pool utilization as a percentage.
    pub fn utilization_pct(&self) -> u8 {
        let available = self.semaphore.available_permits();
        let max = self.config.max_concurrent.max(1);
        let used = max.saturating_sub(available);
        ((used * 100) / max) as u8
    }

    /// Degradation level from pool utilization alone.
    pub fn load_level(&self) -> DegradationLevel {
        let pct = self.utilization_pct();
        if pct >= self.config.shed_pct {
            DegradationLevel::Shed
        } else if pct >= self.config.heavy_pct {
            DegradationLevel::Heavy
        } else if pct >= self.config.light_pct {
            DegradationLevel::Light
        } else {
            DegradationLevel::Normal
        }
    }

    /// Current degradation level from pool utilization and the
    /// pipeline breaker. An open breaker means repeated analysis
    /// failures and most collectors would fail anyway.
    pub fn level(&self, pipeline_breaker: &CircuitBreaker) -> DegradationLevel {
        let from_breaker = match pipeline_breaker.state() {
            CircuitState::Open => DegradationLevel::Shed,
            CircuitState::HalfOpen => DegradationLevel::Heavy,
            CircuitState::Closed => DegradationLevel::Normal,
        };
        from_breaker.max(self.load_level())
    }
}
