//! Bounded retry shared by the connect step and each command exchange.

use std::fmt::Display;
use std::time::Duration;

use futures_util::future::BoxFuture;
use log::debug;

use crate::error::RetryError;
use crate::scheduler::Shutdown;

/// How often and how long to try a step before giving up on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Deadline of a single wait for the device (connection or notification)
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            attempt_timeout: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Run `attempt` until it succeeds, `max_attempts` have failed, or shutdown is requested.
    ///
    /// `attempt` is given exclusive access to `state` and the 1-based attempt number.
    pub async fn run<S, T, E, F>(
        &self,
        what: &str,
        state: &mut S,
        shutdown: &Shutdown,
        mut attempt: F,
    ) -> Result<T, RetryError<E>>
    where
        S: ?Sized + Send,
        E: Display,
        F: for<'a> FnMut(&'a mut S, u32) -> BoxFuture<'a, Result<T, E>>,
    {
        let mut last = None;
        for n in 1..=self.max_attempts {
            if shutdown.is_triggered() {
                return Err(RetryError::Cancelled);
            }

            match attempt(&mut *state, n).await {
                Ok(value) => {
                    if n > 1 {
                        debug!("{what}: succeeded on attempt {n}");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    debug!("{what}: attempt {n}/{} failed: {err}", self.max_attempts);
                    last = Some(err);
                }
            }
        }

        Err(RetryError::Exhausted {
            attempts: self.max_attempts,
            last,
        })
    }
}
