//! Surface bridge errors

use std::fmt;

use crate::types::RenderTargetId;

/// Kind of native GPU resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture,
    RenderTarget,
    Geometry,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Texture => "texture",
            ResourceKind::RenderTarget => "render target",
            ResourceKind::Geometry => "geometry",
        })
    }
}

/// Host driver failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct DriverError(pub String);

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// GPU surface bridge error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    /// Expected after resize or destroy; the batch is dropped
    #[error("{0} was invalidated")]
    StaleTarget(RenderTargetId),

    #[error("{kind} {id} was destroyed")]
    StaleResource { kind: ResourceKind, id: u32 },

    #[error("{kind} {id} was never defined")]
    UnknownResource { kind: ResourceKind, id: u32 },

    #[error("{kind} {id} is already defined")]
    DuplicateResource { kind: ResourceKind, id: u32 },

    #[error("{kind} {id} is malformed: {reason}")]
    InvalidResource {
        kind: ResourceKind,
        id: u32,
        reason: String,
    },

    #[error("batch {got} for {target} does not follow batch {last}")]
    OutOfOrder {
        target: RenderTargetId,
        last: u64,
        got: u64,
    },

    #[error("{0} failed host creation")]
    TargetFailed(RenderTargetId),

    #[error("host creation of {target} failed: {source}")]
    TargetCreation {
        target: RenderTargetId,
        source: DriverError,
    },

    #[error("host creation of {kind} {id} failed: {source}")]
    ResourceCreation {
        kind: ResourceKind,
        id: u32,
        source: DriverError,
    },

    #[error("driver call failed during replay: {0}")]
    Driver(#[from] DriverError),
}

impl SurfaceError {
    /// Teardown races that are dropped quietly.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            SurfaceError::StaleTarget(_) | SurfaceError::StaleResource { .. }
        )
    }
}
