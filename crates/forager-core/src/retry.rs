//! Per-job bookkeeping of failed URLs and their backoff schedule.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Retry limits for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts (including the first) after which a URL is given up on.
    pub max_attempts: u32,
    /// Wait after the first failure; doubled on every further failure.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    /// Backoff after the given number of attempts (1-indexed):
    /// `base_delay * 2^(attempts - 1)`.
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Failure history of a single URL.
#[derive(Debug, Clone)]
pub struct RetryRecord {
    pub url: String,
    pub attempts: u32,
    pub last_error: String,
    pub next_eligible: Instant,
}

/// Result of recording a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub can_retry: bool,
    pub attempts_made: u32,
    pub wait_time: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryStats {
    /// URLs that still have attempts left.
    pub pending_retries: usize,
    /// URLs that used up their attempts.
    pub max_retries_exceeded: usize,
}

/// Tracks failed URLs for one job. Create a fresh tracker per job and drop
/// it with the job.
#[derive(Debug, Default)]
pub struct RetryTracker {
    policy: RetryPolicy,
    records: HashMap<String, RetryRecord>,
}

impl RetryTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            records: HashMap::new(),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn set_max_retry_attempts(&mut self, max_attempts: u32) {
        self.policy.max_attempts = max_attempts;
    }

    pub fn set_base_retry_delay(&mut self, base_delay: Duration) {
        self.policy.base_delay = base_delay;
    }

    /// Record a failure of `url` and schedule its next eligible attempt.
    ///
    /// Records are keyed by URL, so repeated failures of the same URL share
    /// one budget. The executor removes duplicate URLs before a job starts.
    pub fn track_failed_url(&mut self, url: &str, error: &str) -> RetryDecision {
        let now = Instant::now();
        let cap = self.policy.max_attempts.max(1);
        let record = self
            .records
            .entry(url.to_string())
            .and_modify(|r| r.attempts = (r.attempts + 1).min(cap))
            .or_insert_with(|| RetryRecord {
                url: url.to_string(),
                attempts: 1,
                last_error: String::new(),
                next_eligible: now,
            });

        let wait_time = self.policy.delay_for_attempt(record.attempts);
        record.last_error = error.to_string();
        record.next_eligible = now + wait_time;

        let decision = RetryDecision {
            can_retry: record.attempts < self.policy.max_attempts,
            attempts_made: record.attempts,
            wait_time,
        };
        tracing::debug!(
            %url,
            attempts = decision.attempts_made,
            can_retry = decision.can_retry,
            wait_ms = %wait_time.as_millis(),
            "Tracked failed URL"
        );
        decision
    }

    /// URLs with attempts left whose backoff window has elapsed.
    pub fn urls_due_for_retry(&self) -> Vec<String> {
        let now = Instant::now();
        let mut due: Vec<&RetryRecord> = self
            .records
            .values()
            .filter(|r| r.attempts < self.policy.max_attempts && r.next_eligible <= now)
            .collect();
        due.sort_by_key(|r| r.next_eligible);
        due.into_iter().map(|r| r.url.clone()).collect()
    }

    /// Forget a URL after it succeeded on retry.
    pub fn track_successful_retry(&mut self, url: &str) {
        self.records.remove(url);
    }

    pub fn stats(&self) -> RetryStats {
        let exceeded = self
            .records
            .values()
            .filter(|r| r.attempts >= self.policy.max_attempts)
            .count();
        RetryStats {
            pending_retries: self.records.len() - exceeded,
            max_retries_exceeded: exceeded,
        }
    }

    pub fn record(&self, url: &str) -> Option<&RetryRecord> {
        self.records.get(url)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
