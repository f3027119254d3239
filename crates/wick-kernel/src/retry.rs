//! Bounded retry with a fixed delay between attempts.
//!
//! ```text
//! attempt ──ok──▶ return
//!    │
//!    err ── not transient ──▶ Fatal
//!    │
//!    transient ── retries left? ──no──▶ Exhausted
//!    │                    yes
//!    └──── sleep(delay) ◀──┘   (cancellable)
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Errors that can say whether another attempt might succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// How many extra attempts to make, and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub retries: u32,
    /// Sleep between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 1,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            retries: 0,
            delay: Duration::ZERO,
        }
    }
}

/// An operation that can be attempted more than once.
#[async_trait]
pub trait Retryable: Send {
    type Output: Send;
    type Error: Transient + fmt::Display + Send;

    async fn attempt(&mut self) -> Result<Self::Output, Self::Error>;
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The run was cancelled before an attempt could finish.
    Cancelled,
    /// Every allowed attempt failed with a transient error.
    Exhausted { attempts: u32, last: E },
    /// A non-transient error; no further attempts were made.
    Fatal(E),
}

impl<E> RetryError<E> {
    /// The underlying error, if any.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Cancelled => None,
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Fatal(e) => Some(e),
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Cancelled => write!(f, "cancelled"),
            RetryError::Exhausted { attempts, last } => {
                write!(f, "{} (gave up after {} attempts)", last, attempts)
            }
            RetryError::Fatal(e) => write!(f, "{}", e),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Run `op`, retrying transient failures per `policy`.
///
/// Both the attempt and the inter-attempt sleep race against `cancel`.
pub async fn with_retry<R: Retryable>(
    op: &mut R,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> Result<R::Output, RetryError<R::Error>> {
    let mut attempt: u32 = 0;
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            r = op.attempt() => r,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(RetryError::Fatal(e)),
            Err(e) if attempt >= policy.retries => {
                return Err(RetryError::Exhausted {
                    attempts: attempt + 1,
                    last: e,
                });
            }
            Err(e) => {
                attempt += 1;
                tracing::debug!(
                    "attempt {} failed: {}; retrying in {:?} ({} left)",
                    attempt,
                    e,
                    policy.delay,
                    policy.retries - attempt + 1
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(policy.delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[derive(Debug)]
    struct FakeError {
        transient: bool,
    }

    impl fmt::Display for FakeError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "fake error (transient={})", self.transient)
        }
    }

    impl Transient for FakeError {
        fn is_transient(&self) -> bool {
            self.transient
        }
    }

    /// Fails `failures` times, then succeeds. Records each attempt's time.
    struct Flaky {
        failures: u32,
        transient: bool,
        attempts: Vec<Instant>,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                transient: true,
                attempts: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Retryable for Flaky {
        type Output = &'static str;
        type Error = FakeError;

        async fn attempt(&mut self) -> Result<&'static str, FakeError> {
            self.attempts.push(Instant::now());
            if self.attempts.len() as u32 <= self.failures {
                Err(FakeError {
                    transient: self.transient,
                })
            } else {
                Ok("done")
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt_after_two_delays() {
        let delay = Duration::from_secs(3);
        let mut op = Flaky::new(2);
        let start = Instant::now();

        let result = with_retry(&mut op, RetryPolicy::new(2, delay), &CancellationToken::new()).await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(op.attempts.len(), 3);
        assert_eq!(op.attempts[1] - op.attempts[0], delay);
        assert_eq!(op.attempts[2] - op.attempts[1], delay);
        assert_eq!(start.elapsed(), delay * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_retries() {
        let mut op = Flaky::new(10);
        let result = with_retry(
            &mut op,
            RetryPolicy::new(2, Duration::from_millis(10)),
            &CancellationToken::new(),
        )
        .await;

        match result {
            Err(RetryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected Exhausted, got {:?}", other),
        }
        assert_eq!(op.attempts.len(), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let mut op = Flaky::new(5);
        op.transient = false;
        let result = with_retry(
            &mut op,
            RetryPolicy::new(3, Duration::from_millis(1)),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(RetryError::Fatal(_))));
        assert_eq!(op.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_retries_single_attempt() {
        let mut op = Flaky::new(1);
        let result = with_retry(&mut op, RetryPolicy::none(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 1, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let mut op = Flaky::new(10);
        let result = with_retry(&mut op, RetryPolicy::new(5, Duration::from_secs(60)), &cancel).await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(op.attempts.len(), 1);
    }
}
