// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Exponential backoff with jitter for publish retries and reconnects.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{OpcUaError, OpcUaResult};
use crate::types::humantime_serde;

// =============================================================================
// ExponentialBackoff
// =============================================================================

/// Exponential backoff with optional jitter.
///
/// Delay for attempt `n` (0-based) is `initial_delay * multiplier^n`, capped
/// at `max_delay`, then spread by up to `±jitter_factor` of itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExponentialBackoff {
    /// Delay before the first retry.
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Growth per attempt.
    pub multiplier: f64,
    /// Jitter factor (0.0 = none, 1.0 = up to 100%).
    pub jitter_factor: f64,
}

impl ExponentialBackoff {
    /// Creates a backoff without jitter.
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    /// Sets the multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the jitter factor.
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    /// Delay before the capped, un-jittered attempt.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Delay for the given attempt, with jitter applied.
    pub fn delay(&self, attempt: u32) -> Duration {
        let capped = self.base_delay(attempt).as_secs_f64();
        let jittered = if self.jitter_factor > 0.0 && capped > 0.0 {
            let range = capped * self.jitter_factor;
            let jitter = rand::thread_rng().gen_range(-range..=range);
            (capped + jitter).max(0.0)
        } else {
            capped
        };
        Duration::from_secs_f64(jittered)
    }

    pub(crate) fn validate(&self, field: &str) -> OpcUaResult<()> {
        if self.max_delay < self.initial_delay {
            return Err(OpcUaError::invalid_config(
                field,
                "max_delay must not be smaller than initial_delay",
            ));
        }
        if !(self.multiplier >= 1.0) {
            return Err(OpcUaError::invalid_config(field, "multiplier must be at least 1.0"));
        }
        Ok(())
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
