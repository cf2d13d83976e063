//! Host graphics driver interface

use std::fmt;

use crate::batch::GpuState;
use crate::error::DriverError;
use crate::types::{GeometryData, RenderTargetDesc, TextureData};

/// Host texture handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostTexture(pub u64);

/// Host render target (surface) handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostRenderTarget(pub u64);

/// Host geometry handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostGeometry(pub u64);

impl fmt::Display for HostRenderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// One resolved draw, in host handles
#[derive(Debug, Clone, Copy)]
pub struct HostDraw<'a> {
    pub target: HostRenderTarget,
    pub geometry: HostGeometry,
    pub textures: [Option<HostTexture>; 3],
    pub state: &'a GpuState,
    pub indices_offset: u32,
    pub indices_count: u32,
}

/// Host graphics API
///
/// Called only on the engine thread, in batch order.
pub trait GpuDriver {
    fn begin_frame(&mut self) {}

    fn end_frame(&mut self) {}

    fn create_texture(&mut self, data: &TextureData) -> Result<HostTexture, DriverError>;

    fn update_texture(&mut self, texture: HostTexture, data: &TextureData) -> Result<(), DriverError>;

    fn destroy_texture(&mut self, texture: HostTexture);

    fn create_render_target(&mut self, desc: &RenderTargetDesc) -> Result<HostRenderTarget, DriverError>;

    fn destroy_render_target(&mut self, target: HostRenderTarget);

    fn create_geometry(&mut self, data: &GeometryData) -> Result<HostGeometry, DriverError>;

    fn update_geometry(&mut self, geometry: HostGeometry, data: &GeometryData) -> Result<(), DriverError>;

    fn destroy_geometry(&mut self, geometry: HostGeometry);

    fn clear_render_target(&mut self, target: HostRenderTarget) -> Result<(), DriverError>;

    fn draw_geometry(&mut self, draw: &HostDraw<'_>) -> Result<(), DriverError>;
}

impl<D: GpuDriver + ?Sized> GpuDriver for Box<D> {
    fn begin_frame(&mut self) {
        (**self).begin_frame()
    }

    fn end_frame(&mut self) {
        (**self).end_frame()
    }

    fn create_texture(&mut self, data: &TextureData) -> Result<HostTexture, DriverError> {
        (**self).create_texture(data)
    }

    fn update_texture(&mut self, texture: HostTexture, data: &TextureData) -> Result<(), DriverError> {
        (**self).update_texture(texture, data)
    }

    fn destroy_texture(&mut self, texture: HostTexture) {
        (**self).destroy_texture(texture)
    }

    fn create_render_target(&mut self, desc: &RenderTargetDesc) -> Result<HostRenderTarget, DriverError> {
        (**self).create_render_target(desc)
    }

    fn destroy_render_target(&mut self, target: HostRenderTarget) {
        (**self).destroy_render_target(target)
    }

    fn create_geometry(&mut self, data: &GeometryData) -> Result<HostGeometry, DriverError> {
        (**self).create_geometry(data)
    }

    fn update_geometry(&mut self, geometry: HostGeometry, data: &GeometryData) -> Result<(), DriverError> {
        (**self).update_geometry(geometry, data)
    }

    fn destroy_geometry(&mut self, geometry: HostGeometry) {
        (**self).destroy_geometry(geometry)
    }

    fn clear_render_target(&mut self, target: HostRenderTarget) -> Result<(), DriverError> {
        (**self).clear_render_target(target)
    }

    fn draw_geometry(&mut self, draw: &HostDraw<'_>) -> Result<(), DriverError> {
        (**self).draw_geometry(draw)
    }
}
