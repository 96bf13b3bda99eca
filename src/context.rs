//! Cancellation and deadline context threaded through node processing

use crate::error::{EventError, Result};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-call context carried through every `Node::process`
///
/// Cloning shares the cancellation token, so cancelling any clone
/// cancels them all.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context that is cancelled through an existing token
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Give up once `timeout` has elapsed from now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail if the context was cancelled or its deadline has passed
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(EventError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(EventError::Timeout("context deadline exceeded".to_string()));
            }
        }
        Ok(())
    }

    /// Resolves when the context is cancelled or its deadline passes.
    ///
    /// Sinks that block on external calls race their work against this.
    pub async fn done(&self) -> EventError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.cancel.cancelled() => EventError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => {
                    EventError::Timeout("context deadline exceeded".to_string())
                }
            },
            None => {
                self.cancel.cancelled().await;
                EventError::Cancelled
            }
        }
    }
}
