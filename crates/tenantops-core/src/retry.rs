//! Retry policy with capped exponential backoff.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use derive_builder::Builder;

use crate::deadline::Deadline;
use crate::{Error, Result, TRACING_TARGET_RETRY};

/// Default number of attempts for one logical operation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default ceiling on a single backoff wait.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Predicate deciding whether an error is transient.
#[derive(Clone)]
pub struct RetryClassifier(Arc<dyn Fn(&Error) -> bool + Send + Sync>);

impl RetryClassifier {
    /// Wraps a custom predicate.
    pub fn new(predicate: impl Fn(&Error) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    /// Returns `true` if `error` should be retried.
    pub fn is_retryable(&self, error: &Error) -> bool {
        (self.0)(error)
    }
}

impl Default for RetryClassifier {
    /// Classifies by [`ErrorKind::is_retryable`](crate::ErrorKind::is_retryable).
    fn default() -> Self {
        Self::new(Error::is_retryable)
    }
}

impl fmt::Debug for RetryClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RetryClassifier").finish_non_exhaustive()
    }
}

/// Controls how often and how patiently a failing remote call is retried.
///
/// The wait before attempt `n + 1` is `min(base_delay * 2^(n-1), max_delay)`.
/// A `Retry-After` style hint carried by the error can lengthen the wait but
/// never beyond `max_delay`.
#[derive(Debug, Clone, Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct RetryPolicy {
    /// Ceiling on attempts, including the first one.
    #[builder(default = "DEFAULT_MAX_ATTEMPTS")]
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[builder(default = "DEFAULT_BASE_DELAY")]
    pub base_delay: Duration,

    /// Ceiling on a single backoff wait.
    #[builder(default = "DEFAULT_MAX_DELAY")]
    pub max_delay: Duration,

    /// Decides which errors are transient.
    #[builder(setter(custom), default)]
    pub classifier: RetryClassifier,
}

impl RetryPolicyBuilder {
    /// Sets a custom transient-error predicate.
    pub fn classify(
        &mut self,
        predicate: impl Fn(&Error) -> bool + Send + Sync + 'static,
    ) -> &mut Self {
        self.classifier = Some(RetryClassifier::new(predicate));
        self
    }

    fn validate(&self) -> Result<(), String> {
        if self.max_attempts == Some(0) {
            return Err("max_attempts must be at least 1".into());
        }

        let base_delay = self.base_delay.unwrap_or(DEFAULT_BASE_DELAY);
        let max_delay = self.max_delay.unwrap_or(DEFAULT_MAX_DELAY);
        if base_delay > max_delay {
            return Err(format!(
                "base_delay ({}ms) must not exceed max_delay ({}ms)",
                base_delay.as_millis(),
                max_delay.as_millis()
            ));
        }

        Ok(())
    }
}

impl From<RetryPolicyBuilderError> for Error {
    fn from(error: RetryPolicyBuilderError) -> Self {
        Self::configuration()
            .with_message(format!("invalid retry policy: {error}"))
            .with_source(error)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            classifier: RetryClassifier::default(),
        }
    }
}

impl RetryPolicy {
    /// Returns a builder seeded with the defaults.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Creates a validated policy with the default classifier.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Result<Self> {
        let policy = Self::builder()
            .max_attempts(max_attempts)
            .base_delay(base_delay)
            .max_delay(max_delay)
            .build()?;
        Ok(policy)
    }

    /// Backoff before the attempt following failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff after `error`, honouring its retry hint within `max_delay`.
    pub fn delay_after(&self, attempt: u32, error: &Error) -> Duration {
        let delay = self.delay_for(attempt);
        error
            .retry_after
            .map_or(delay, |hint| hint.max(delay))
            .min(self.max_delay)
    }

    /// Decides what happens after attempt `attempt` failed with `error`.
    ///
    /// Returns the wait before the next attempt, or the error to surface when
    /// it is permanent or the attempt budget is spent. The wait is never
    /// shorter than `previous`, so a hinted wait is not followed by a
    /// shorter one.
    pub fn backoff(&self, attempt: u32, previous: Duration, error: Error) -> Result<Duration> {
        if !self.classifier.is_retryable(&error) {
            tracing::debug!(
                target: TRACING_TARGET_RETRY,
                attempt,
                error = %error,
                "Permanent failure, not retrying"
            );
            return Err(error);
        }

        if attempt >= self.max_attempts {
            tracing::warn!(
                target: TRACING_TARGET_RETRY,
                attempt,
                error = %error,
                "Retry budget exhausted"
            );
            return Err(exhausted(error, attempt));
        }

        let delay = self
            .delay_after(attempt, &error)
            .max(previous)
            .min(self.max_delay);
        tracing::warn!(
            target: TRACING_TARGET_RETRY,
            attempt,
            max_attempts = self.max_attempts,
            delay_ms = delay.as_millis(),
            error = %error,
            "Transient failure, backing off"
        );

        Ok(delay)
    }

    /// Starts tracking the attempts of one operation.
    pub fn attempts(&self) -> RetryState<'_> {
        RetryState {
            policy: self,
            attempt: 0,
            last_delay: Duration::ZERO,
        }
    }

    /// Runs `operation` under this policy until it succeeds or gives up.
    ///
    /// The deadline is checked before every attempt and every wait.
    pub async fn retry<R, F, Fut>(&self, deadline: &Deadline, mut operation: F) -> Result<R>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let mut state = self.attempts();
        loop {
            state.start(deadline)?;

            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => state.fail(deadline, error).await?,
            }
        }
    }
}

/// Attempt count and last wait of one operation retried under a
/// [`RetryPolicy`].
#[derive(Debug)]
pub struct RetryState<'a> {
    policy: &'a RetryPolicy,
    attempt: u32,
    last_delay: Duration,
}

impl RetryState<'_> {
    /// Number of attempts started so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Begins the next attempt unless the deadline has fired.
    pub fn start(&mut self, deadline: &Deadline) -> Result<()> {
        deadline.check()?;
        self.attempt += 1;
        Ok(())
    }

    /// Records a failed attempt and waits out the backoff.
    ///
    /// Returns the error to surface when the failure is permanent, the
    /// budget is spent, or the deadline fires during the wait.
    pub async fn fail(&mut self, deadline: &Deadline, error: Error) -> Result<()> {
        let delay = self.policy.backoff(self.attempt, self.last_delay, error)?;
        self.last_delay = delay;
        deadline.sleep(delay).await
    }
}

fn exhausted(error: Error, attempts: u32) -> Error {
    let message = match &error.message {
        Some(message) => format!("gave up after {attempts} attempts: {message}"),
        None => format!("gave up after {attempts} attempts"),
    };

    Error {
        message: Some(message),
        ..error
    }
}
