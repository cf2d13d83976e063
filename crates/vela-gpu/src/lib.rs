//! Vela GPU Surface Bridge
//!
//! The native engine paints by emitting draw batches against its own
//! resource identities. This crate maps those identities to host graphics
//! resources and replays each batch, in order, through a [`GpuDriver`].
//!
//! ```text
//! native engine ──ResourceNotice──▶ GpuResourceMap
//!               ──DrawBatch───────▶ SurfaceBridge ──validate──▶ resolve ──▶ replay ──▶ GpuDriver
//! ```
//!
//! Two drivers ship with the crate: [`SoftwareDriver`] rasterizes with
//! tiny-skia, [`TraceDriver`] records calls.

mod batch;
mod bridge;
mod driver;
mod error;
mod resource_map;
mod software;
mod trace;
mod types;

pub use batch::{DrawBatch, DrawCommand, GpuState, ResourceNotice};
pub use bridge::{BridgeStats, ReplayReport, SurfaceBridge, SurfaceFrame};
pub use driver::{GpuDriver, HostDraw, HostGeometry, HostRenderTarget, HostTexture};
pub use error::{DriverError, ResourceKind, SurfaceError};
pub use resource_map::{GpuResourceMap, TargetState};
pub use software::{SoftwareDriver, SoftwareSurfaces};
pub use trace::{DriverCall, TraceDriver, TraceLog};
pub use types::{
    GeometryData, GeometryId, IntRect, PixelFormat, RenderTargetDesc, RenderTargetId, ShaderKind,
    TextureData, TextureId, VertexFormat,
};
