//! Types shared by the error and logging facilities
//!
//! - [`RunId`] and [`RunContext`] correlate the output of one load run
//! - [`Sensitive`] keeps secrets out of Debug and Display output
//! - [`schema`] holds the event names used in operation logs

pub mod correlation;
pub mod schema;
pub mod sensitive;

pub use correlation::{RunContext, RunId};
pub use sensitive::Sensitive;
