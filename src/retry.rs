//! Bounded re-execution of retryable failures.
//!
//! Records whose assessment is retryable and whose status is still `FAIL` are
//! re-run through a [`TestExecutor`] up to the policy's attempt budget. The
//! first passing attempt promotes the record to `PASSED_ON_RETRY`; nothing
//! else ever changes a status.

use crate::error::{Error, Result};
use crate::executor::TestExecutor;
use crate::report::{TestRecord, TestStatus};
use futures::StreamExt;
use futures::stream;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Default attempt budget per retryable record.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    /// Pause between two attempts of the same record.
    pub retry_delay: Duration,
    /// Number of records retried at once.
    pub concurrency: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::ZERO,
            concurrency: 1,
        }
    }
}

impl RetryPolicy {
    /// Build a policy; the budget must allow at least one attempt.
    pub fn new(max_attempts: u32) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::validation("max_attempts must be at least 1"));
        }
        Ok(Self {
            max_attempts,
            ..Self::default()
        })
    }

    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = if concurrency == 0 { 1 } else { concurrency };
        self
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt is allowed after `attempts_made` failed ones.
    #[must_use]
    pub const fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

/// Outcome of one re-execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Passed,
    Failed,
    /// The command could not be started; counted as a failed attempt.
    InvocationError { message: String },
}

/// A logged retry attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub selector: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub timestamp: String,
}

/// Result of a retry pass.
#[derive(Debug, Clone, Default)]
pub struct RetryReport {
    /// Every input record, in input order.
    pub records: Vec<TestRecord>,
    pub attempts: Vec<RetryAttempt>,
    /// Distinct selectors that were re-executed.
    pub retried: usize,
    /// Records promoted to `PASSED_ON_RETRY`.
    pub promoted: usize,
    pub executor_errors: usize,
}

impl RetryReport {
    /// Number of attempts made for `selector`.
    #[must_use]
    pub fn attempts_for(&self, selector: &str) -> usize {
        self.attempts
            .iter()
            .filter(|attempt| attempt.selector == selector)
            .count()
    }
}

/// Re-run every retryable failure and promote the ones that pass.
///
/// Output has the same length and order as `records`. Records sharing a
/// selector are executed once and share the outcome.
pub async fn retry_failures(
    records: Vec<TestRecord>,
    policy: &RetryPolicy,
    executor: &dyn TestExecutor,
) -> RetryReport {
    let mut seen = HashSet::new();
    let selectors: Vec<String> = records
        .iter()
        .filter(|record| record.is_retryable() && record.status == TestStatus::Fail)
        .filter(|record| seen.insert(record.test_selector.clone()))
        .map(|record| record.test_selector.clone())
        .collect();

    for record in records
        .iter()
        .filter(|r| r.is_retryable() && r.status != TestStatus::Fail)
    {
        tracing::warn!(
            selector = %record.test_selector,
            status = %record.status,
            "retryable record is not FAIL; leaving it untouched"
        );
    }

    tracing::info!(
        retryable = selectors.len(),
        max_attempts = policy.max_attempts(),
        "retrying flaky failures"
    );

    let outcomes: Vec<(String, bool, Vec<RetryAttempt>)> = stream::iter(selectors)
        .map(|selector| async move {
            let (passed, attempts) = retry_one(&selector, policy, executor).await;
            (selector, passed, attempts)
        })
        .buffered(policy.concurrency.max(1))
        .collect()
        .await;

    let mut report = RetryReport {
        retried: outcomes.len(),
        ..RetryReport::default()
    };
    let mut passed = HashMap::with_capacity(outcomes.len());
    for (selector, did_pass, attempts) in outcomes {
        report.executor_errors += attempts
            .iter()
            .filter(|a| matches!(a.outcome, AttemptOutcome::InvocationError { .. }))
            .count();
        report.attempts.extend(attempts);
        passed.insert(selector, did_pass);
    }

    let mut records = records;
    for record in &mut records {
        let promote = record.status == TestStatus::Fail
            && record.is_retryable()
            && passed.get(&record.test_selector).copied().unwrap_or(false);
        if promote {
            record.status = TestStatus::PassedOnRetry;
            report.promoted += 1;
        }
    }
    report.records = records;

    tracing::info!(
        retried = report.retried,
        promoted = report.promoted,
        executor_errors = report.executor_errors,
        "retry pass complete"
    );
    report
}

async fn retry_one(
    selector: &str,
    policy: &RetryPolicy,
    executor: &dyn TestExecutor,
) -> (bool, Vec<RetryAttempt>) {
    let mut attempts = Vec::new();
    let mut made = 0;

    while policy.should_retry(made) {
        if made > 0 && !policy.retry_delay.is_zero() {
            tokio::time::sleep(policy.retry_delay).await;
        }
        made += 1;
        tracing::debug!(selector, attempt = made, max = policy.max_attempts(), "retry attempt");

        let outcome = match executor.execute(selector).await {
            Ok(true) => AttemptOutcome::Passed,
            Ok(false) => AttemptOutcome::Failed,
            Err(err) => {
                tracing::warn!(
                    selector,
                    attempt = made,
                    error = %err,
                    "retry command could not run"
                );
                AttemptOutcome::InvocationError {
                    message: err.to_string(),
                }
            }
        };
        let passed = outcome == AttemptOutcome::Passed;
        attempts.push(RetryAttempt {
            selector: selector.to_string(),
            attempt: made,
            outcome,
            timestamp: chrono::Utc::now().to_rfc3339(),
        });

        if passed {
            tracing::info!(selector, attempt = made, "passed on retry");
            return (true, attempts);
        }
    }

    tracing::info!(selector, attempts = made, "still failing after retries");
    (false, attempts)
}
