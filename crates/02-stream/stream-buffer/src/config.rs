//! Stream buffer configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{StrategyKind, StreamError, StreamResult};

/// Default bound on a single fence wait.
pub const DEFAULT_FENCE_TIMEOUT_MS: u64 = 5_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Upper bound on one fence wait, in milliseconds. `None` waits forever.
    pub fence_timeout_ms: Option<u64>,
    /// Skips driver-based selection and always builds this strategy.
    pub strategy_override: Option<StrategyKind>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fence_timeout_ms: Some(DEFAULT_FENCE_TIMEOUT_MS),
            strategy_override: None,
        }
    }
}

impl StreamConfig {
    /// Configuration that blocks on fences without a bound.
    pub fn unbounded() -> Self {
        Self {
            fence_timeout_ms: None,
            ..Self::default()
        }
    }

    pub fn fence_timeout(&self) -> Option<Duration> {
        self.fence_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> StreamResult<()> {
        if self.fence_timeout_ms == Some(0) {
            return Err(StreamError::InvalidConfig(
                "fence_timeout_ms must be non-zero; use null for an unbounded wait",
            ));
        }
        Ok(())
    }
}
