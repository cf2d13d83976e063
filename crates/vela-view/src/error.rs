//! Facade errors

use vela_dispatch::DispatchError;
use vela_gpu::SurfaceError;
use vela_handle::{HandleError, OwnerId};
use vela_value::MarshalError;

/// Failure reported by the native engine itself
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct NativeError(pub String);

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Engine and session error
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The session was destroyed; create a new one
    #[error("{0} is closed")]
    SessionClosed(OwnerId),

    #[error("expected {expected}, got {got}")]
    Type {
        expected: &'static str,
        got: &'static str,
    },

    #[error("native engine: {0}")]
    Native(#[from] NativeError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Marshal(#[from] MarshalError),

    #[error(transparent)]
    Handle(#[from] HandleError),

    #[error(transparent)]
    Surface(#[from] SurfaceError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// Teardown races the caller may ignore.
    pub fn is_stale(&self) -> bool {
        match self {
            BridgeError::SessionClosed(_) => true,
            BridgeError::Dispatch(DispatchError::StaleCallback(_)) => true,
            BridgeError::Marshal(MarshalError::StaleCallback(_) | MarshalError::Released(_)) => true,
            BridgeError::Surface(err) => err.is_stale(),
            _ => false,
        }
    }
}
