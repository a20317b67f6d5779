//! Lifetime signals
//!
//! A [`Lifetime`] is a cancellation token with an optional deadline and a few
//! immutable annotations. The connector owns one for the whole service; every
//! inbound call brings its own.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a lifetime is over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifetimeError {
    #[error("cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Cloneable lifetime signal; clones observe and end the same lifetime
#[derive(Debug, Clone, Default)]
pub struct Lifetime {
    token: CancellationToken,
    deadline: Option<Instant>,
    values: Arc<BTreeMap<String, String>>,
    end_reason: Arc<OnceLock<String>>,
}

impl Lifetime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a lifetime that ends when this one does, but can also end on its own
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            values: self.values.clone(),
            end_reason: Arc::new(OnceLock::new()),
        }
    }

    /// Set a deadline; an earlier existing deadline is kept
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.values).insert(key.into(), value.into());
        self
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// `None` while the lifetime is still running
    pub fn err(&self) -> Option<LifetimeError> {
        if self.token.is_cancelled() {
            return Some(LifetimeError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(LifetimeError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the lifetime is over
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// End the lifetime
    ///
    /// Returns `true` only for the call that actually ended it; the first
    /// reason is kept.
    pub fn end(&self, reason: impl Into<String>) -> bool {
        let first = self.end_reason.set(reason.into()).is_ok() && !self.token.is_cancelled();
        self.token.cancel();
        first
    }

    pub fn end_reason(&self) -> Option<&str> {
        self.end_reason.get().map(String::as_str)
    }
}
