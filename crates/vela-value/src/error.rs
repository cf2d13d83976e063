//! Marshalling errors

use vela_handle::{HandleError, NativeHandle};

use crate::CallbackToken;

/// Value marshalling error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarshalError {
    #[error("proxy for {0} was already released")]
    Released(NativeHandle),

    #[error("proxy for {0} belongs to another engine")]
    ForeignProxy(NativeHandle),

    #[error("native engine returned a null reference")]
    NullHandle,

    #[error("{0} is no longer registered")]
    StaleCallback(CallbackToken),

    #[error("callback could not be bound: {0}")]
    Binding(String),

    #[error(transparent)]
    Handle(#[from] HandleError),
}
