use std::time::Duration;

/// Quota state of one identity under one policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: u64,
    pub remaining: u64,
    /// Epoch milliseconds at which the current window rolls over.
    pub reset_at_ms: u64,
    pub reset_after: Duration,
}

/// Outcome of evaluating one policy for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit(Quota),
    Reject { quota: Quota, retry_after: Duration },
    Delay(Duration),
}

impl Decision {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Decision::Reject { .. })
    }

    pub fn quota(&self) -> Option<&Quota> {
        match self {
            Decision::Admit(quota) | Decision::Reject { quota, .. } => Some(quota),
            Decision::Delay(_) => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Decision::Reject { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    pub fn delay(&self) -> Duration {
        match self {
            Decision::Delay(delay) => *delay,
            _ => Duration::ZERO,
        }
    }
}
