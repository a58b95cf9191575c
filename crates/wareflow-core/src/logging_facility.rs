//! Structured logging
//!
//! Binaries call [`init`] once with the configured [`Profile`]. Library code
//! logs operations through `log_op_start!`, `log_op_end!` and
//! `log_op_error!`, which stamp every event with `component`, `op` and
//! `event`. Tests install [`init_test_capture`] instead of `init` and assert
//! on the captured events.

pub mod init;
pub mod macros;
pub mod test_capture;

pub use init::{init, Profile};
pub use test_capture::{init_test_capture, CapturedEvent, TestCapture};
