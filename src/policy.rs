use std::time::Duration;

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_RETRIES: u32 = 3;

/// Per-call policy overrides. Fields left unset fall back to the gateway
/// defaults (5s aggregate timeout, 3 retries). Scoped to a single call.
#[derive(Clone, Copy, Debug, Default)]
pub struct PolicyOverrides {
    timeout: Option<Duration>,
    retries: Option<u32>,
}

impl PolicyOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregate budget for the whole call, retries included. Clamped to a
    /// minimum of one second.
    pub fn timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout = Some(Duration::from_secs(timeout_secs.max(1)));
        self
    }

    /// Number of re-issue attempts after the first failure. Zero disables
    /// retrying.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub(crate) fn resolve(self, defaults: &GatewayPolicy) -> ResolvedPolicy {
        ResolvedPolicy {
            timeout: self.timeout.unwrap_or(defaults.timeout),
            retries: self.retries.unwrap_or(defaults.retries),
        }
    }
}

/// Gateway-wide defaults, applied whenever a call carries no overrides.
#[derive(Clone, Copy, Debug)]
pub struct GatewayPolicy {
    timeout: Duration,
    retries: u32,
}

impl GatewayPolicy {
    pub fn timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout = Duration::from_secs(timeout_secs.max(1));
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

impl Default for GatewayPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct ResolvedPolicy {
    pub(crate) timeout: Duration,
    pub(crate) retries: u32,
}

impl ResolvedPolicy {
    /// Total attempts: one initial issue plus the retry budget.
    pub(crate) fn max_attempts(self) -> u32 {
        self.retries.saturating_add(1)
    }
}
