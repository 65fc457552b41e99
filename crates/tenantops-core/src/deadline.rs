//! Overall cut-off for long-running fetches and batches.
//!
//! A [`Deadline`] is checked before every remote call and before every
//! backoff wait. It never interrupts a call that is already in flight.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// An optional point in time plus a cancellation signal.
///
/// Cloning shares the cancellation token, so cancelling any clone stops
/// every component holding one.
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    at: Option<Instant>,
    token: CancellationToken,
}

impl Deadline {
    /// A deadline that never expires and is never cancelled.
    pub fn none() -> Self {
        Self::default()
    }

    /// A deadline that expires `timeout` from now.
    ///
    /// A timeout too large to represent as an instant is unbounded.
    pub fn after(timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(at) => Self::at(at),
            None => Self::none(),
        }
    }

    /// A deadline that expires at `instant`.
    pub fn at(instant: Instant) -> Self {
        Self {
            at: Some(instant),
            token: CancellationToken::new(),
        }
    }

    /// Replaces the cancellation token with `token`.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Returns the expiry instant, if any.
    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    /// Time left before expiry, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Fails if the deadline was cancelled or has passed.
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::cancelled());
        }

        match self.at {
            Some(at) if Instant::now() >= at => Err(Error::deadline_exceeded()),
            _ => Ok(()),
        }
    }

    /// Waits for `delay` unless the deadline fires first.
    ///
    /// A wait that cannot finish before expiry fails straight away instead
    /// of sleeping until the deadline.
    pub async fn sleep(&self, delay: Duration) -> Result<()> {
        self.check()?;

        if let Some(at) = self.at
            && Instant::now()
                .checked_add(delay)
                .is_none_or(|end| end > at)
        {
            return Err(Error::deadline_exceeded().with_message(format!(
                "deadline exceeded: backoff of {}ms would outlast it",
                delay.as_millis()
            )));
        }

        tokio::select! {
            biased;

            () = self.token.cancelled() => Err(Error::cancelled()),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[tokio::test(start_paused = true)]
    async fn unbounded_deadline_never_fires() {
        let deadline = Deadline::none();
        assert!(deadline.check().is_ok());
        assert!(deadline.remaining().is_none());
        deadline.sleep(Duration::from_secs(3600)).await.unwrap();
        assert!(deadline.check().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn expires_after_timeout() {
        let deadline = Deadline::after(Duration::from_secs(10));
        assert!(deadline.check().is_ok());

        tokio::time::advance(Duration::from_secs(10)).await;
        let err = deadline.check().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_past_deadline_fails_without_waiting() {
        let deadline = Deadline::after(Duration::from_secs(5));
        let started = Instant::now();

        let err = deadline.sleep(Duration::from_secs(6)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_timeout_is_unbounded() {
        let deadline = Deadline::after(Duration::MAX);
        assert!(deadline.instant().is_none());
        assert!(deadline.check().is_ok());

        let deadline = Deadline::after(Duration::from_secs(u64::MAX));
        assert!(deadline.instant().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn huge_sleep_under_deadline_fails_without_waiting() {
        let deadline = Deadline::after(Duration::from_secs(5));
        let started = Instant::now();

        let err = deadline.sleep(Duration::MAX).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_sleep() {
        let token = CancellationToken::new();
        let deadline = Deadline::none().with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let err = deadline.sleep(Duration::from_secs(60)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        canceller.await.unwrap();
        assert_eq!(deadline.check().unwrap_err().kind(), ErrorKind::Cancelled);
    }
}
