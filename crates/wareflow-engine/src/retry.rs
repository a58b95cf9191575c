//! Retry with exponential backoff for transient failures

#![allow(clippy::result_large_err)]

use serde::Deserialize;
use std::time::Duration;
use wareflow_core::errors::{ExError, ExErrorKind};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay_ms: 300_000,
            max_delay_ms: 1_800_000,
        }
    }
}

impl RetryPolicy {
    /// # Errors
    ///
    /// `Config` if the delays are zero or inverted.
    pub fn validate(&self) -> Result<(), ExError> {
        if self.base_delay_ms == 0 {
            return Err(config_error("retry.base_delay_ms must be > 0"));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(config_error(
                "retry.max_delay_ms must be >= retry.base_delay_ms",
            ));
        }
        Ok(())
    }

    /// Delay before retry number `retry` (0-based): base * 2^retry, capped
    pub fn delay(&self, retry: u32) -> Duration {
        let shift = retry.min(63);
        let ms = (self.base_delay_ms as u128).saturating_mul(1u128 << shift);
        Duration::from_millis(ms.min(self.max_delay_ms as u128) as u64)
    }

    /// Run `attempt` until it succeeds, fails permanently, or retries run out
    ///
    /// # Errors
    ///
    /// The first non-transient error, or the last transient one.
    pub fn run<T, F>(&self, op: &str, attempt: F) -> Result<T, ExError>
    where
        F: FnMut(u32) -> Result<T, ExError>,
    {
        self.run_with_sleep(op, attempt, std::thread::sleep)
    }

    /// `run` with an injectable sleep
    pub fn run_with_sleep<T, F, S>(&self, op: &str, mut attempt: F, mut sleep: S) -> Result<T, ExError>
    where
        F: FnMut(u32) -> Result<T, ExError>,
        S: FnMut(Duration),
    {
        let mut retry = 0;
        loop {
            match attempt(retry) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && retry < self.max_retries => {
                    let delay = self.delay(retry);
                    tracing::warn!(
                        component = module_path!(),
                        op,
                        retry = retry + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        err_code = err.code(),
                        error = %err,
                        "transient failure, retrying"
                    );
                    sleep(delay);
                    retry += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn config_error(message: &str) -> ExError {
    ExError::new(ExErrorKind::Config)
        .with_op("load_config")
        .with_message(message)
}
