//! Request pacing for the rate-limited photo endpoint plus the cooperative
//! stop signal every wait honours.

use crate::sync::progress::{ProgressHandle, RunPhase};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{sync::Arc, time::Duration};
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::info;

static RATE_LIMIT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\b429\b|rate.?limit|too many requests|quota|limit exceeded)")
        .expect("rate limit pattern compiles")
});

/// Rate-limit responses and real failures take different retry paths; the
/// proxy only reports text, so the split is made on the message.
pub fn is_rate_limited(message: &str) -> bool {
    RATE_LIMIT_PATTERN.is_match(message)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingPolicy {
    /// Proactive pause after this many requests in one session.
    pub pause_every: u64,
    pub pause: Duration,
    /// Minimum spacing between two requests.
    pub min_delay: Duration,
    /// Attempts per item on rate-limit responses.
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            pause_every: 290,
            pause: Duration::from_secs(180),
            min_delay: Duration::from_millis(3000),
            max_attempts: 5,
            backoff_step: Duration::from_secs(120),
        }
    }
}

impl PacingPolicy {
    /// Wait after the `attempt`-th rate-limited try (1-based): one step per
    /// attempt, so 2, 4, 6, 8, 10 minutes with the default step.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt.max(1))
    }
}

/// Cooperative stop flag. Clones share the flag.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StopHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Sleeps for `duration` unless stopped first. Returns `false` when the
    /// wait was cut short.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        if *rx.borrow_and_update() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_stopped(),
            _ = rx.wait_for(|stopped| *stopped) => false,
        }
    }
}

#[derive(Debug, Default)]
struct BudgetState {
    session_requests: u64,
    last_request: Option<Instant>,
}

/// Shared request budget: every upstream call, retries included, goes
/// through [`RateBudget::acquire`].
#[derive(Debug, Clone)]
pub struct RateBudget {
    policy: PacingPolicy,
    state: Arc<Mutex<BudgetState>>,
}

impl RateBudget {
    pub fn new(policy: PacingPolicy) -> Self {
        Self {
            policy,
            state: Arc::new(Mutex::new(BudgetState::default())),
        }
    }

    pub fn policy(&self) -> &PacingPolicy {
        &self.policy
    }

    pub async fn session_requests(&self) -> u64 {
        self.state.lock().await.session_requests
    }

    /// Waits until one more request may be sent and counts it. Returns
    /// `false` if stopped while waiting; nothing is counted then.
    pub async fn acquire(&self, stop: &StopHandle, progress: &ProgressHandle) -> bool {
        let mut state = self.state.lock().await;
        if stop.is_stopped() {
            return false;
        }

        let due_for_pause = self.policy.pause_every > 0
            && state.session_requests > 0
            && state.session_requests % self.policy.pause_every == 0;
        if due_for_pause && !self.policy.pause.is_zero() {
            info!(
                target = "supplier_sync.pacing",
                requests = state.session_requests,
                wait_secs = self.policy.pause.as_secs(),
                "proactive pause"
            );
            progress
                .set_phase(RunPhase::PausedForLimit {
                    resume_at: resume_at(self.policy.pause),
                    wait_secs: self.policy.pause.as_secs(),
                })
                .await;
            let completed = stop.sleep(self.policy.pause).await;
            progress.set_phase(RunPhase::Running).await;
            if !completed {
                return false;
            }
        }

        if let Some(last) = state.last_request {
            let ready_at = last + self.policy.min_delay;
            let now = Instant::now();
            if ready_at > now && !stop.sleep(ready_at - now).await {
                return false;
            }
        }

        state.session_requests += 1;
        state.last_request = Some(Instant::now());
        let requests = state.session_requests;
        progress.update(|counters| counters.requests = requests).await;
        true
    }
}

pub fn resume_at(wait: Duration) -> chrono::DateTime<chrono::Utc> {
    let wait = chrono::Duration::from_std(wait).unwrap_or_else(|_| chrono::Duration::zero());
    chrono::Utc::now() + wait
}
