//! Reconnect policy applied after transient closes

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay used by the default fixed policy.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// How long to wait before re-opening a session after a transient close.
///
/// Never consulted for a logged-out close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// The same delay before every attempt.
    Fixed {
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
    /// Bounded exponential backoff with optional jitter.
    Exponential {
        #[serde(with = "humantime_serde")]
        initial: Duration,
        #[serde(with = "humantime_serde")]
        max: Duration,
        multiplier: f64,
        /// Fraction of the delay (0.0..=1.0) that may be randomly shaved off.
        #[serde(default)]
        jitter: f64,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed {
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Fixed delay policy.
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed { delay }
    }

    /// Exponential backoff: 1s doubling up to 60s, 20% jitter.
    pub fn exponential() -> Self {
        Self::Exponential {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }

    /// Check that the tuning values are usable.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Fixed { .. } => Ok(()),
            Self::Exponential {
                multiplier, jitter, ..
            } => {
                if !multiplier.is_finite() || *multiplier < 1.0 {
                    return Err(format!(
                        "reconnect.multiplier must be a finite number >= 1.0 (got {})",
                        multiplier
                    ));
                }
                if !(0.0..=1.0).contains(jitter) {
                    return Err(format!(
                        "reconnect.jitter must be between 0.0 and 1.0 (got {})",
                        jitter
                    ));
                }
                Ok(())
            }
        }
    }

    /// Delay before the given attempt (0-indexed since the last successful open).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential {
                initial,
                max,
                multiplier,
                jitter,
            } => {
                let base = backoff(*initial, *max, *multiplier, attempt);
                apply_jitter(base, *jitter, random_unit())
            }
        }
    }
}

fn backoff(initial: Duration, max: Duration, multiplier: f64, attempt: u32) -> Duration {
    let exponent = attempt.min(i32::MAX as u32) as i32;
    let delay_ms = initial.as_millis() as f64 * multiplier.powi(exponent);
    Duration::from_millis(delay_ms.min(max.as_millis() as f64) as u64)
}

/// Shave up to `jitter * base` off `base`, scaled by `sample` in `[0, 1)`.
fn apply_jitter(base: Duration, jitter: f64, sample: f64) -> Duration {
    let jitter = if jitter.is_finite() {
        jitter.clamp(0.0, 1.0)
    } else {
        0.0
    };
    base.mul_f64(1.0 - jitter * sample)
}

fn random_unit() -> f64 {
    match getrandom::u64() {
        Ok(bits) => (bits >> 11) as f64 / (1u64 << 53) as f64,
        Err(_) => 0.0,
    }
}
