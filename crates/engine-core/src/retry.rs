use std::{fmt, future::Future, time::Duration};
use tokio::time::sleep;
use tracing::warn;

/// Indicates whether an error should be retried or treated as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retry,
    Stop,
}

/// Tagged result of one operation run under the retry policy.
#[derive(Debug)]
pub enum AttemptOutcome<T, E> {
    Success { value: T, attempts: usize },
    /// The error was transient every time and the attempts ran out.
    RetriedThenFailed { error: E, attempts: usize },
    /// The error could not be fixed by retrying and was returned as-is.
    FatalFailure { error: E, attempts: usize },
}

impl<T, E> AttemptOutcome<T, E> {
    pub fn attempts(&self) -> usize {
        match self {
            AttemptOutcome::Success { attempts, .. }
            | AttemptOutcome::RetriedThenFailed { attempts, .. }
            | AttemptOutcome::FatalFailure { attempts, .. } => *attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success { .. })
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            AttemptOutcome::Success { value, .. } => Ok(value),
            AttemptOutcome::RetriedThenFailed { error, .. }
            | AttemptOutcome::FatalFailure { error, .. } => Err(error),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> AttemptOutcome<U, E> {
        match self {
            AttemptOutcome::Success { value, attempts } => AttemptOutcome::Success {
                value: f(value),
                attempts,
            },
            AttemptOutcome::RetriedThenFailed { error, attempts } => {
                AttemptOutcome::RetriedThenFailed { error, attempts }
            }
            AttemptOutcome::FatalFailure { error, attempts } => {
                AttemptOutcome::FatalFailure { error, attempts }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: if max_delay.is_zero() {
                base_delay
            } else {
                max_delay
            },
        }
    }

    /// Executes the operation, sleeping between attempts while `classify` says the
    /// failure is worth retrying.
    pub async fn run<F, Fut, T, E, Classifier>(
        &self,
        mut op: F,
        classify: Classifier,
    ) -> AttemptOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Classifier: Fn(&E) -> RetryDisposition,
        E: fmt::Display,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;
            match op().await {
                Ok(value) => return AttemptOutcome::Success { value, attempts },
                Err(error) => match classify(&error) {
                    RetryDisposition::Stop => {
                        return AttemptOutcome::FatalFailure { error, attempts };
                    }
                    RetryDisposition::Retry => {
                        if attempts >= self.max_attempts {
                            return AttemptOutcome::RetriedThenFailed { error, attempts };
                        }

                        let delay = self.backoff_delay(attempts);
                        warn!(attempt = attempts, delay = ?delay, %error, "Transient failure, retrying");
                        sleep(delay).await;
                    }
                },
            }
        }
    }

    /// Delay slept after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`.
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        if self.base_delay.is_zero() || attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 1u128 << (attempt - 1).min(32);
        let delay_ms = self.base_delay.as_millis().saturating_mul(factor);
        let capped = delay_ms.min(self.max_delay.as_millis());
        Duration::from_millis(capped as u64)
    }

    /// Total time slept when the first `failures` attempts fail and the next succeeds.
    pub fn cumulative_delay(&self, failures: usize) -> Duration {
        (1..=failures).map(|k| self.backoff_delay(k)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[derive(Debug, PartialEq)]
    enum Fault {
        Transient,
        Fatal,
    }

    impl fmt::Display for Fault {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn classify(fault: &Fault) -> RetryDisposition {
        match fault {
            Fault::Transient => RetryDisposition::Retry,
            Fault::Fatal => RetryDisposition::Stop,
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(300))
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = policy();
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(300));
        assert_eq!(policy.backoff_delay(60), Duration::from_millis(300));
        assert_eq!(policy.cumulative_delay(3), Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_then_success_take_k_plus_one_attempts() {
        let policy = policy();
        let calls = AtomicUsize::new(0);
        let started = Instant::now();

        let outcome = policy
            .run(
                || {
                    let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if call <= 3 {
                            Err(Fault::Transient)
                        } else {
                            Ok(call)
                        }
                    }
                },
                classify,
            )
            .await;

        assert!(matches!(
            outcome,
            AttemptOutcome::Success {
                value: 4,
                attempts: 4
            }
        ));
        let waited = started.elapsed();
        assert!(waited >= policy.cumulative_delay(3));
        assert!(waited < policy.cumulative_delay(3) + Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_failure_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let outcome: AttemptOutcome<(), Fault> = policy()
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(Fault::Fatal) }
                },
                classify,
            )
            .await;

        assert!(matches!(
            outcome,
            AttemptOutcome::FatalFailure {
                error: Fault::Fatal,
                attempts: 1
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_report_every_attempt() {
        let outcome: AttemptOutcome<(), Fault> = policy()
            .run(|| async { Err(Fault::Transient) }, classify)
            .await;

        assert_eq!(outcome.attempts(), 5);
        assert!(matches!(
            outcome,
            AttemptOutcome::RetriedThenFailed { .. }
        ));
    }
}
