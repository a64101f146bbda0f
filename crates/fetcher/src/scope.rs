//! Caller-owned execution scope for cancellation and deadlines.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, Result};

/// Cancellation token plus optional deadline, checked between storage calls.
///
/// Clones share the token, so cancelling any clone (or the token returned by
/// [`ExecScope::cancellation_token`]) ends every fetch holding the scope.
#[derive(Debug, Clone, Default)]
pub struct ExecScope {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl ExecScope {
    /// A scope that only ends when cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    /// A scope ending `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().deadline_at(Instant::now() + timeout)
    }

    /// Binds the scope to an existing token, so cancelling it (or any
    /// parent it was derived from) ends the fetch.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Returns the scope with its deadline set to `deadline`.
    #[must_use]
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Applies `timeout` as a deadline unless one is already set.
    #[must_use]
    pub fn or_timeout(self, timeout: Option<Duration>) -> Self {
        match (self.deadline, timeout) {
            (None, Some(t)) => self.deadline_at(Instant::now() + t),
            _ => self,
        }
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The token backing this scope.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// A scope cancelled together with this one that can also be cancelled
    /// on its own. The deadline is inherited.
    #[must_use]
    pub fn child(&self) -> Self {
        Self { cancellation: self.cancellation.child_token(), deadline: self.deadline }
    }

    /// Cancels the scope.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Returns true once cancelled.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Fails if the scope has been cancelled or its deadline has passed.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Cancelled`].
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(FetchError::Cancelled { reason: "scope cancelled" });
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(FetchError::Cancelled { reason: "deadline exceeded" });
        }
        Ok(())
    }
}
