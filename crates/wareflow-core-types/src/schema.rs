//! Event names written in the `event` field of operation logs

/// An operation began
pub const EVENT_START: &str = "start";
/// An operation finished successfully
pub const EVENT_END: &str = "end";
/// An operation finished with an error
pub const EVENT_END_ERROR: &str = "end_error";
