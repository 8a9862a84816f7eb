//! Bounded retry primitive shared by the validation cascade and the quality gate.
//!
//! A [`RetryBudget`] counts failed attempts against a maximum. A
//! [`RetryPolicy`] drives an async operation until it succeeds or the budget
//! runs out, sleeping per its [`Backoff`] between attempts and handing the
//! failure history to a terminal escalation callback.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Delay before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Backoff {
    #[default]
    None,
    Fixed(Duration),
    /// `base * 2^(failed_attempts - 1)`, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay after `failed_attempts` failures (1-based).
    pub fn delay(&self, failed_attempts: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let exponent = failed_attempts.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << exponent).min(max)
            }
        }
    }
}

/// Counts failures against a fixed maximum.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryBudget {
    max_attempts: u32,
    used: u32,
}

impl RetryBudget {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            used: 0,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.used)
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.max_attempts
    }

    /// Charge `attempts` against the budget.
    pub fn consume(&mut self, attempts: u32) {
        self.used = self.used.saturating_add(attempts);
    }
}

/// Result of driving an operation under a [`RetryPolicy`].
#[derive(Debug)]
pub struct RetryOutcome<T, F, D> {
    /// Every failed attempt, oldest first
    pub failures: Vec<F>,
    pub result: RetryResult<T, D>,
}

#[derive(Debug)]
pub enum RetryResult<T, D> {
    Succeeded(T),
    /// Budget ran out; carries the escalation callback's decision
    Exhausted(D),
}

impl<T, F, D> RetryOutcome<T, F, D> {
    pub fn attempts(&self) -> u32 {
        let succeeded = matches!(self.result, RetryResult::Succeeded(_)) as u32;
        self.failures.len() as u32 + succeeded
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::None,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run `op` until it returns `Ok` or `max_attempts` failures accumulate.
    ///
    /// `op` receives the 1-based attempt number. On exhaustion `escalate` is
    /// called once with every failure and its decision is returned. A policy
    /// of zero attempts escalates without running `op`.
    pub async fn run<T, F, D, Op, Fut, Esc>(&self, mut op: Op, escalate: Esc) -> RetryOutcome<T, F, D>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, F>>,
        Esc: FnOnce(&[F]) -> D,
    {
        let mut budget = RetryBudget::new(self.max_attempts);
        let mut failures = Vec::new();

        while !budget.is_exhausted() {
            let attempt = budget.used() + 1;
            match op(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        failures,
                        result: RetryResult::Succeeded(value),
                    };
                }
                Err(failure) => {
                    failures.push(failure);
                    budget.consume(1);
                    if !budget.is_exhausted() {
                        let delay = self.backoff.delay(budget.used());
                        if !delay.is_zero() {
                            debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off before retry");
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        let decision = escalate(&failures);
        RetryOutcome {
            failures,
            result: RetryResult::Exhausted(decision),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_backoff_delays() {
        assert_eq!(Backoff::None.delay(3), Duration::ZERO);
        assert_eq!(
            Backoff::Fixed(Duration::from_millis(50)).delay(7),
            Duration::from_millis(50)
        );
        let exp = Backoff::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(500),
        };
        assert_eq!(exp.delay(1), Duration::from_millis(100));
        assert_eq!(exp.delay(2), Duration::from_millis(200));
        assert_eq!(exp.delay(3), Duration::from_millis(400));
        assert_eq!(exp.delay(4), Duration::from_millis(500));
        assert_eq!(exp.delay(40), Duration::from_millis(500));
    }

    #[test]
    fn test_budget_accounting() {
        let mut budget = RetryBudget::new(3);
        assert_eq!(budget.remaining(), 3);
        budget.consume(2);
        assert!(!budget.is_exhausted());
        budget.consume(1);
        assert!(budget.is_exhausted());
        assert_eq!(budget.remaining(), 0);
        budget.consume(5);
        assert_eq!(budget.remaining(), 0);
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let policy = RetryPolicy::new(3);
        let outcome = policy
            .run(
                |attempt| async move {
                    if attempt < 3 {
                        Err(format!("attempt {attempt} failed"))
                    } else {
                        Ok(attempt)
                    }
                },
                |_: &[String]| "escalated",
            )
            .await;

        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.attempts(), 3);
        assert!(matches!(outcome.result, RetryResult::Succeeded(3)));
    }

    #[tokio::test]
    async fn test_exhaustion_calls_escalation_once_with_history() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(2);
        let outcome = policy
            .run(
                |attempt| {
                    calls.set(calls.get() + 1);
                    async move { Err::<(), u32>(attempt) }
                },
                |failures: &[u32]| failures.to_vec(),
            )
            .await;

        assert_eq!(calls.get(), 2);
        assert_eq!(outcome.attempts(), 2);
        match outcome.result {
            RetryResult::Exhausted(history) => assert_eq!(history, vec![1, 2]),
            RetryResult::Succeeded(_) => panic!("expected exhaustion"),
        }
    }

    #[tokio::test]
    async fn test_zero_attempts_escalates_immediately() {
        let policy = RetryPolicy::new(0);
        let outcome = policy
            .run(
                |_| async { Ok::<(), ()>(()) },
                |failures: &[()]| failures.len(),
            )
            .await;

        assert_eq!(outcome.attempts(), 0);
        assert!(matches!(outcome.result, RetryResult::Exhausted(0)));
    }
}
