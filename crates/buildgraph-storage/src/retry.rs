use std::time::Duration;

use tracing::warn;

use buildgraph_core::config::StorageConfig;
use buildgraph_core::error::{BuildGraphError, Result};

/// Fixed-delay retry for operations on shared storage.
///
/// Only transient failures (I/O errors) are retried. Once the attempts are
/// used up the last error is escalated to `BuildGraphError::Transient`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Policy for manifest and bulk copy operations.
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.retry_attempts, config.retry_delay())
    }

    /// Same delay, different attempt count.
    pub fn with_attempts(self, attempts: u32) -> Self {
        Self::new(attempts, self.delay)
    }

    pub fn run<T>(&self, operation: &str, mut f: impl FnMut() -> Result<T>) -> Result<T> {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= attempts => {
                    return Err(BuildGraphError::Transient {
                        operation: operation.to_string(),
                        attempts,
                        message: e.to_string(),
                    })
                }
                Err(e) => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %e,
                        "Retrying temp storage operation"
                    );
                    std::thread::sleep(self.delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn immediate(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::ZERO)
    }

    fn io_error() -> BuildGraphError {
        BuildGraphError::Io(io::Error::new(io::ErrorKind::Other, "share unavailable"))
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let mut calls = 0;
        let result = immediate(3).run("copy", || {
            calls += 1;
            if calls < 3 {
                Err(io_error())
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_exhausted_attempts_escalate() {
        let mut calls = 0;
        let err = immediate(2)
            .run("write manifest", || -> Result<()> {
                calls += 1;
                Err(io_error())
            })
            .unwrap_err();
        assert_eq!(calls, 2);
        match err {
            BuildGraphError::Transient {
                operation,
                attempts,
                message,
            } => {
                assert_eq!(operation, "write manifest");
                assert_eq!(attempts, 2);
                assert!(message.contains("share unavailable"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let mut calls = 0;
        let err = immediate(5)
            .run("read manifest", || -> Result<()> {
                calls += 1;
                Err(BuildGraphError::Xml("bad".into()))
            })
            .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, BuildGraphError::Xml(_)));
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.attempts, 1);
        assert_eq!(policy.run("noop", || Ok(7)).unwrap(), 7);
    }
}
