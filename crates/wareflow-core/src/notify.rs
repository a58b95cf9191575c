//! Status notification seam

use crate::errors::ExError;

/// Deliver a textual run status to an operator channel
#[allow(clippy::result_large_err)]
pub trait Notifier: Send + Sync {
    /// # Errors
    ///
    /// Returns `ExErrorKind::ExternalService` or `ExErrorKind::TransientIo`
    /// when the channel rejects or times out.
    fn notify(&self, text: &str) -> Result<(), ExError>;
}

/// Notifier used when no channel is configured
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _text: &str) -> Result<(), ExError> {
        Ok(())
    }
}

/// Send a notification, logging and discarding any failure
///
/// Returns whether delivery succeeded.
pub fn notify_best_effort(notifier: &dyn Notifier, text: &str) -> bool {
    match notifier.notify(text) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(
                component = module_path!(),
                op = "notify",
                err_kind = ?err.kind(),
                err_code = err.code(),
                error = %err,
                "status notification not delivered"
            );
            false
        }
    }
}
