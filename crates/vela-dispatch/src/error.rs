//! Dispatch errors

use vela_handle::OwnerId;
use vela_value::CallbackToken;

/// Callback dispatch and engine queue error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Expected during teardown races; the invocation is dropped
    #[error("{0} is no longer registered")]
    StaleCallback(CallbackToken),

    #[error("{0} is closed and accepts no callbacks")]
    OwnerClosed(OwnerId),

    #[error("engine queue is closed")]
    QueueClosed,

    #[error("blocking call issued from the engine thread")]
    WouldDeadlock,

    #[error("re-entrant native call at depth {depth} exceeds limit {limit}")]
    ReentrancyLimit { depth: usize, limit: usize },

    /// The job unwound; the engine thread keeps running
    #[error("engine job panicked: {0}")]
    JobPanicked(String),

    #[error("failed to spawn engine thread: {0}")]
    Spawn(String),
}
