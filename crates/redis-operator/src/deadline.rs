//! Per-pass expiry
//!
//! A pass never waits or cancels itself. Each step checks the deadline
//! before issuing its store round trip and fails fast once it has elapsed.

use crate::error::{OperatorError, Result};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline {
    expires_at: Option<Instant>,
}

impl Deadline {
    /// A deadline that never expires
    pub fn none() -> Self {
        Self { expires_at: None }
    }

    pub fn at(instant: Instant) -> Self {
        Self {
            expires_at: Some(instant),
        }
    }

    /// `timeout` from now; `None` disables the deadline
    pub fn after(timeout: Option<Duration>) -> Self {
        Self {
            expires_at: timeout.map(|t| Instant::now() + t),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    /// Fail with [`OperatorError::DeadlineExceeded`] if `step` starts too late
    pub fn check(&self, step: &str) -> Result<()> {
        if self.is_expired() {
            return Err(OperatorError::DeadlineExceeded(step.to_string()));
        }
        Ok(())
    }
}
