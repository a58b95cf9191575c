//! Canonical logging macros
//!
//! Callers need `tracing` in their own dependency table.

/// Log the start of an operation
///
/// # Example
///
/// ```
/// # use wareflow_core::log_op_start;
/// log_op_start!("run_incremental");
/// log_op_start!("run_incremental", batch_id = 20250102_i64);
/// ```
#[macro_export]
macro_rules! log_op_start {
    ($op:expr) => {
        ::tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::wareflow_core_types::schema::EVENT_START,
        );
    };
    ($op:expr, $($field:tt)*) => {
        ::tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::wareflow_core_types::schema::EVENT_START,
            $($field)*
        );
    };
}

/// Log the successful end of an operation
///
/// # Example
///
/// ```
/// # use wareflow_core::log_op_end;
/// log_op_end!("rebuild", duration_ms = 42_u64);
/// ```
#[macro_export]
macro_rules! log_op_end {
    ($op:expr, duration_ms = $duration:expr) => {
        ::tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::wareflow_core_types::schema::EVENT_END,
            duration_ms = $duration,
        );
    };
    ($op:expr, duration_ms = $duration:expr, $($field:tt)*) => {
        ::tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::wareflow_core_types::schema::EVENT_END,
            duration_ms = $duration,
            $($field)*
        );
    };
}

/// Log an operation error
///
/// Takes the error by value; anything convertible into `ExError` works.
///
/// # Example
///
/// ```
/// # use wareflow_core::{log_op_error, errors::{ExError, ExErrorKind}};
/// let err = ExError::new(ExErrorKind::TransientIo).with_message("database is locked");
/// log_op_error!("apply_changes", err, duration_ms = 10_u64);
/// ```
#[macro_export]
macro_rules! log_op_error {
    ($op:expr, $err:expr, duration_ms = $duration:expr) => {{
        let ex_err: $crate::errors::ExError = ($err).into();
        ::tracing::error!(
            component = module_path!(),
            op = $op,
            event = $crate::wareflow_core_types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err_kind = ?ex_err.kind(),
            err_code = ex_err.code(),
            error = %ex_err,
        );
    }};
    ($op:expr, $err:expr, duration_ms = $duration:expr, $($field:tt)*) => {{
        let ex_err: $crate::errors::ExError = ($err).into();
        ::tracing::error!(
            component = module_path!(),
            op = $op,
            event = $crate::wareflow_core_types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err_kind = ?ex_err.kind(),
            err_code = ex_err.code(),
            error = %ex_err,
            $($field)*
        );
    }};
}
