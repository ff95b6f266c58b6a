//! Retry budget and bounded exponential backoff for connection failures.

use log::debug;

use crate::fingerprint::MatchResult;

const MAX_BACKOFF_SHIFT: u8 = 16;

/// Tunables for the retry decision.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Consecutive failures before giving up on the target.
    pub max_failures: u8,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound on a failure streak, measured from its first failure.
    /// Backoff delays and attempt deadlines are clipped to it.
    pub streak_window_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // 5s, 10s, 20s, 40s, 60s... clipped to ~5 minutes, which covers a
        // typical router cold boot.
        Self {
            max_failures: 10,
            base_delay_ms: 5_000,
            max_delay_ms: 60_000,
            streak_window_ms: 300_000,
        }
    }
}

/// Consecutive failures since the last success or reset.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RetryState {
    failures: u8,
    first_failure_ms: u64,
    last_failure_ms: u64,
}

impl RetryState {
    pub const fn new() -> Self {
        Self {
            failures: 0,
            first_failure_ms: 0,
            last_failure_ms: 0,
        }
    }

    pub fn record_failure(&mut self, now_ms: u64) {
        if self.failures == 0 {
            self.first_failure_ms = now_ms;
        }
        self.failures = self.failures.saturating_add(1);
        self.last_failure_ms = now_ms.max(self.first_failure_ms);
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub const fn failures(&self) -> u8 {
        self.failures
    }

    pub const fn in_streak(&self) -> bool {
        self.failures > 0
    }

    /// Time between the first and the latest failure of the streak.
    pub const fn elapsed_ms(&self) -> u64 {
        self.last_failure_ms.saturating_sub(self.first_failure_ms)
    }

    /// When a streak of at most `window_ms` must end. `None` outside a streak.
    pub const fn window_end_ms(&self, window_ms: u64) -> Option<u64> {
        if self.failures == 0 {
            None
        } else {
            Some(self.first_failure_ms.saturating_add(window_ms))
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PortalReason {
    /// The environment no longer matches the stored fingerprint.
    Relocated,
    BudgetExhausted,
    /// No credentials have ever been supplied.
    Unconfigured,
}

impl PortalReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Relocated => "relocated",
            Self::BudgetExhausted => "budget_exhausted",
            Self::Unconfigured => "unconfigured",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryAction {
    RetryNow,
    RetryAfterDelay { delay_ms: u64 },
    EnterConfigPortal(PortalReason),
}

impl RetryPolicy {
    /// Decides what follows the failure just folded into `state`.
    ///
    /// A relocation seen on the first failure of a streak skips the remaining
    /// budget. Otherwise the budget runs out after `max_failures` failures or
    /// once the streak has lasted `streak_window_ms`, whichever comes first.
    pub fn next_action(&self, state: &RetryState, location: MatchResult) -> RetryAction {
        if state.failures == 1 && location == MatchResult::NewLocation {
            return RetryAction::EnterConfigPortal(PortalReason::Relocated);
        }
        if state.failures >= self.max_failures || state.elapsed_ms() >= self.streak_window_ms {
            return RetryAction::EnterConfigPortal(PortalReason::BudgetExhausted);
        }

        let remaining_window = self.streak_window_ms.saturating_sub(state.elapsed_ms());
        let delay_ms = self.backoff_ms(state.failures).min(remaining_window);
        debug!(
            "retry: failures={} elapsed_ms={} delay_ms={} location={}",
            state.failures,
            state.elapsed_ms(),
            delay_ms,
            location.as_str()
        );

        if delay_ms == 0 {
            RetryAction::RetryNow
        } else {
            RetryAction::RetryAfterDelay { delay_ms }
        }
    }

    /// Uncapped-by-window delay after the `failures`-th failure.
    pub fn backoff_ms(&self, failures: u8) -> u64 {
        if failures == 0 {
            return 0;
        }
        let shift = (failures - 1).min(MAX_BACKOFF_SHIFT);
        self.base_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_ms)
    }
}
