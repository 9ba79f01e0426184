//! Retry budget and backoff between polls

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{HarnessError, HarnessResult};

/// Delay before each poll, as a function of the zero-based attempt index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// No waiting at all; meant for unit tests
    None,
    Fixed { ms: u64 },
    Linear { initial_ms: u64, step_ms: u64 },
    /// Explicit delays; the last one repeats once the list runs out
    Sequence { ms: Vec<u64> },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Sequence {
            ms: vec![1000, 2000, 2000],
        }
    }
}

impl Backoff {
    pub fn delay(&self, attempt_index: u32) -> Duration {
        let ms = match self {
            Backoff::None => 0,
            Backoff::Fixed { ms } => *ms,
            Backoff::Linear { initial_ms, step_ms } => {
                initial_ms.saturating_add(step_ms.saturating_mul(u64::from(attempt_index)))
            }
            Backoff::Sequence { ms } => ms
                .get(attempt_index as usize)
                .or_else(|| ms.last())
                .copied()
                .unwrap_or(0),
        };
        Duration::from_millis(ms)
    }
}

/// Bounds for one reconciliation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of polls after the action
    pub max_attempts: u32,
    pub fetch_timeout_ms: u64,
    pub actuate_timeout_ms: u64,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            fetch_timeout_ms: 10_000,
            actuate_timeout_ms: 20_000,
        }
    }
}

impl RetryPolicy {
    /// Zero-delay policy for deterministic tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::None,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn actuate_timeout(&self) -> Duration {
        Duration::from_millis(self.actuate_timeout_ms)
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.max_attempts == 0 {
            return Err(HarnessError::InvalidConfig(
                "policy.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.fetch_timeout_ms == 0 || self.actuate_timeout_ms == 0 {
            return Err(HarnessError::InvalidConfig(
                "policy timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_repeats_last_delay() {
        let backoff = Backoff::default();
        let delays: Vec<u64> = (0..5).map(|i| backoff.delay(i).as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 2000, 2000, 2000]);

        assert_eq!(Backoff::Sequence { ms: vec![] }.delay(3), Duration::ZERO);
    }

    #[test]
    fn test_linear_and_fixed() {
        let linear = Backoff::Linear { initial_ms: 500, step_ms: 250 };
        assert_eq!(linear.delay(0), Duration::from_millis(500));
        assert_eq!(linear.delay(2), Duration::from_millis(1000));

        assert_eq!(Backoff::Fixed { ms: 2000 }.delay(9), Duration::from_secs(2));
        assert_eq!(Backoff::None.delay(9), Duration::ZERO);
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::immediate(0).validate().is_err());
    }

    #[test]
    fn test_policy_from_toml_uses_defaults() {
        let policy: RetryPolicy = toml::from_str(
            r#"
max_attempts = 5

[backoff]
kind = "fixed"
ms = 1000
"#,
        )
        .unwrap();

        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff, Backoff::Fixed { ms: 1000 });
        assert_eq!(policy.fetch_timeout(), Duration::from_secs(10));
    }
}
