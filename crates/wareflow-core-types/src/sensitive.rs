//! Redacted configuration values
//!
//! `Sensitive<T>` holds secrets such as the notifier bot token. It
//! deserializes like `T` but never prints its contents.

use serde::Deserialize;
use std::fmt;

const REDACTED: &str = "***REDACTED***";

/// A value that prints as `***REDACTED***`
///
/// ```
/// use wareflow_core_types::Sensitive;
///
/// let token = Sensitive::new("123:abc");
/// assert_eq!(format!("{token:?}"), "***REDACTED***");
/// assert_eq!(*token.expose(), "123:abc");
/// ```
#[derive(Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Sensitive<T>(T);

impl<T> Sensitive<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Borrow the secret, e.g. to build a request URL
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<T> fmt::Display for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}
