//! Registry errors

use crate::NativeHandle;

/// Handle registry error
///
/// Every variant is an integrity violation: the operation is aborted and
/// never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandleError {
    #[error("unknown native handle {0}")]
    UnknownHandle(NativeHandle),

    #[error("native handle {0} was already released")]
    AlreadyReleased(NativeHandle),

    #[error("proxy for {0} belongs to another registry")]
    ForeignProxy(NativeHandle),
}
