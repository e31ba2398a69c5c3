// src/ingest/retry.rs
//! Bounded retry for feed fetches: up to `max_attempts` tries with a short
//! linear backoff, retrying only transient failures.

use std::future::Future;
use std::time::Duration;

use crate::ingest::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    Retry { next_attempt: u32, delay: Duration },
    GiveUp { attempts: u32 },
}

/// Attempt counter for one fetch; starts at 0, ends at most at `max_attempts`.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempts: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Mark the start of an attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn on_failure(&self, err: &FetchError) -> RetryStep {
        if !err.is_transient() || self.attempts >= self.policy.max_attempts {
            return RetryStep::GiveUp {
                attempts: self.attempts,
            };
        }
        RetryStep::Retry {
            next_attempt: self.attempts + 1,
            delay: self.policy.backoff * self.attempts,
        }
    }
}

/// Run `op` under `policy`. Returns the final result and the number of
/// attempts made.
pub async fn run_with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> (Result<T, FetchError>, u32)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut state = RetryState::new(policy);
    loop {
        let attempt = state.begin_attempt();
        match op(attempt).await {
            Ok(v) => return (Ok(v), attempt),
            Err(e) => match state.on_failure(&e) {
                RetryStep::Retry { next_attempt, delay } => {
                    tracing::debug!(
                        target: "ingest",
                        attempt,
                        next_attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying fetch"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                RetryStep::GiveUp { attempts } => return (Err(e), attempts),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn state_machine_walks_to_give_up() {
        let mut st = RetryState::new(RetryPolicy::new(3, Duration::from_millis(100)));
        let err = FetchError::Network("timeout".into());

        assert_eq!(st.begin_attempt(), 1);
        assert_eq!(
            st.on_failure(&err),
            RetryStep::Retry {
                next_attempt: 2,
                delay: Duration::from_millis(100)
            }
        );
        st.begin_attempt();
        assert_eq!(
            st.on_failure(&err),
            RetryStep::Retry {
                next_attempt: 3,
                delay: Duration::from_millis(200)
            }
        );
        st.begin_attempt();
        assert_eq!(st.on_failure(&err), RetryStep::GiveUp { attempts: 3 });
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let mut st = RetryState::new(RetryPolicy::default());
        st.begin_attempt();
        let step = st.on_failure(&FetchError::Http {
            status: 404,
            body: "not found".into(),
        });
        assert_eq!(step, RetryStep::GiveUp { attempts: 1 });
    }

    #[tokio::test]
    async fn succeeds_on_second_attempt() {
        let calls = AtomicU32::new(0);
        let (res, attempts) = run_with_retry(RetryPolicy::new(3, Duration::ZERO), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(FetchError::Parse("truncated".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(res, Ok(7));
        assert_eq!(attempts, 2);
    }
}
