//! Recording driver
//!
//! Records every call it receives into a shared [`TraceLog`], so the calls
//! can be inspected after the driver has moved onto the engine thread.

use std::sync::{Arc, Mutex, PoisonError};

use crate::driver::{GpuDriver, HostDraw, HostGeometry, HostRenderTarget, HostTexture};
use crate::error::DriverError;
use crate::types::{GeometryData, RenderTargetDesc, TextureData};

/// One recorded driver call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    BeginFrame,
    EndFrame,
    CreateTexture { host: HostTexture, width: u32, height: u32 },
    UpdateTexture { host: HostTexture },
    DestroyTexture { host: HostTexture },
    CreateRenderTarget { host: HostRenderTarget, width: u32, height: u32 },
    DestroyRenderTarget { host: HostRenderTarget },
    CreateGeometry { host: HostGeometry, vertex_bytes: usize, indices: usize },
    UpdateGeometry { host: HostGeometry },
    DestroyGeometry { host: HostGeometry },
    Clear { target: HostRenderTarget },
    Draw {
        target: HostRenderTarget,
        geometry: HostGeometry,
        indices_offset: u32,
        indices_count: u32,
    },
}

/// Shared, clonable call log
#[derive(Debug, Clone, Default)]
pub struct TraceLog {
    calls: Arc<Mutex<Vec<DriverCall>>>,
}

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, call: DriverCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    /// Snapshot of the calls so far.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Draw calls only, in replay order.
    pub fn draws(&self) -> Vec<DriverCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, DriverCall::Draw { .. } | DriverCall::Clear { .. }))
            .collect()
    }
}

/// Driver that records instead of rendering
#[derive(Debug, Default)]
pub struct TraceDriver {
    log: TraceLog,
    next_handle: u64,
    fail_render_targets: bool,
}

impl TraceDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record into an existing log.
    pub fn with_log(log: TraceLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Make every render target creation fail.
    pub fn fail_render_targets(mut self, fail: bool) -> Self {
        self.fail_render_targets = fail;
        self
    }

    pub fn log(&self) -> &TraceLog {
        &self.log
    }

    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

impl GpuDriver for TraceDriver {
    fn begin_frame(&mut self) {
        self.log.push(DriverCall::BeginFrame);
    }

    fn end_frame(&mut self) {
        self.log.push(DriverCall::EndFrame);
    }

    fn create_texture(&mut self, data: &TextureData) -> Result<HostTexture, DriverError> {
        let host = HostTexture(self.next());
        self.log.push(DriverCall::CreateTexture {
            host,
            width: data.width,
            height: data.height,
        });
        Ok(host)
    }

    fn update_texture(&mut self, texture: HostTexture, _data: &TextureData) -> Result<(), DriverError> {
        self.log.push(DriverCall::UpdateTexture { host: texture });
        Ok(())
    }

    fn destroy_texture(&mut self, texture: HostTexture) {
        self.log.push(DriverCall::DestroyTexture { host: texture });
    }

    fn create_render_target(&mut self, desc: &RenderTargetDesc) -> Result<HostRenderTarget, DriverError> {
        if self.fail_render_targets {
            return Err(DriverError::new("render target creation disabled"));
        }
        let host = HostRenderTarget(self.next());
        self.log.push(DriverCall::CreateRenderTarget {
            host,
            width: desc.width,
            height: desc.height,
        });
        Ok(host)
    }

    fn destroy_render_target(&mut self, target: HostRenderTarget) {
        self.log.push(DriverCall::DestroyRenderTarget { host: target });
    }

    fn create_geometry(&mut self, data: &GeometryData) -> Result<HostGeometry, DriverError> {
        let host = HostGeometry(self.next());
        self.log.push(DriverCall::CreateGeometry {
            host,
            vertex_bytes: data.vertices.len(),
            indices: data.indices.len(),
        });
        Ok(host)
    }

    fn update_geometry(&mut self, geometry: HostGeometry, _data: &GeometryData) -> Result<(), DriverError> {
        self.log.push(DriverCall::UpdateGeometry { host: geometry });
        Ok(())
    }

    fn destroy_geometry(&mut self, geometry: HostGeometry) {
        self.log.push(DriverCall::DestroyGeometry { host: geometry });
    }

    fn clear_render_target(&mut self, target: HostRenderTarget) -> Result<(), DriverError> {
        self.log.push(DriverCall::Clear { target });
        Ok(())
    }

    fn draw_geometry(&mut self, draw: &HostDraw<'_>) -> Result<(), DriverError> {
        self.log.push(DriverCall::Draw {
            target: draw.target,
            geometry: draw.geometry,
            indices_offset: draw.indices_offset,
            indices_count: draw.indices_count,
        });
        Ok(())
    }
}
