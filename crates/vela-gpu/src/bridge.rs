//! Batch replay
//!
//! `submit` runs in three passes. Validation makes no host call, so a stale
//! batch leaves the driver untouched. Resolution creates host resources the
//! batch needs for the first time. Replay issues the commands in emission
//! order between `begin_frame` and `end_frame`.

use crate::batch::{DrawBatch, DrawCommand, ResourceNotice};
use crate::driver::{GpuDriver, HostDraw, HostRenderTarget, HostTexture};
use crate::error::{ResourceKind, SurfaceError};
use crate::resource_map::{GpuResourceMap, TargetState};
use crate::types::{GeometryData, GeometryId, RenderTargetDesc, RenderTargetId, TextureData, TextureId};

/// Repainted host surface, handed to the embedder's paint handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceFrame {
    pub target: RenderTargetId,
    pub host: HostRenderTarget,
    /// Raw native handle of the view that painted
    pub view: u64,
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
}

/// Outcome of one replayed batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    pub sequence: u64,
    pub commands: usize,
    /// Host resources created while resolving this batch
    pub created: usize,
    pub frames: Vec<SurfaceFrame>,
}

/// Counters since the bridge was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub batches_replayed: u64,
    pub batches_dropped: u64,
    pub commands_replayed: u64,
    pub host_resources_created: u64,
}

/// Replays native draw batches through a host driver
pub struct SurfaceBridge<D> {
    driver: D,
    map: GpuResourceMap,
    stats: BridgeStats,
}

impl<D: GpuDriver> SurfaceBridge<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            map: GpuResourceMap::new(),
            stats: BridgeStats::default(),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn map(&self) -> &GpuResourceMap {
        &self.map
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    // ------------------------------------------------------------------
    // Resource notices
    // ------------------------------------------------------------------

    pub fn apply(&mut self, notice: ResourceNotice) -> Result<(), SurfaceError> {
        match notice {
            ResourceNotice::DefineTexture { id, data } => self.define_texture(id, data),
            ResourceNotice::UpdateTexture { id, data } => self.update_texture(id, data),
            ResourceNotice::DestroyTexture { id } => self.destroy_texture(id),
            ResourceNotice::DefineRenderTarget { id, desc, view } => {
                self.define_render_target(id, desc, view)
            }
            ResourceNotice::ResizeRenderTarget { id, width, height } => {
                self.resize_render_target(id, width, height)
            }
            ResourceNotice::DestroyRenderTarget { id } => self.destroy_render_target(id),
            ResourceNotice::DefineGeometry { id, data } => self.define_geometry(id, data),
            ResourceNotice::UpdateGeometry { id, data } => self.update_geometry(id, data),
            ResourceNotice::DestroyGeometry { id } => self.destroy_geometry(id),
        }
    }

    pub fn define_texture(&mut self, id: TextureId, data: TextureData) -> Result<(), SurfaceError> {
        tracing::trace!("Define {} ({}x{})", id, data.width, data.height);
        self.map.define_texture(id, data)
    }

    pub fn update_texture(&mut self, id: TextureId, data: TextureData) -> Result<(), SurfaceError> {
        self.map.update_texture(id, data)
    }

    pub fn destroy_texture(&mut self, id: TextureId) -> Result<(), SurfaceError> {
        if let Some(host) = self.map.remove_texture(id)? {
            self.driver.destroy_texture(host);
        }
        Ok(())
    }

    pub fn define_render_target(
        &mut self,
        id: RenderTargetId,
        desc: RenderTargetDesc,
        view: u64,
    ) -> Result<(), SurfaceError> {
        tracing::debug!("Define {} ({}x{}) for view 0x{:x}", id, desc.width, desc.height, view);
        self.map.define_target(id, desc, view)
    }

    /// Invalidate `id`; batches still in flight for it become stale.
    pub fn resize_render_target(&mut self, id: RenderTargetId, width: u32, height: u32) -> Result<(), SurfaceError> {
        tracing::debug!("Invalidate {} on resize to {}x{}", id, width, height);
        self.retire_target(id)
    }

    pub fn destroy_render_target(&mut self, id: RenderTargetId) -> Result<(), SurfaceError> {
        self.retire_target(id)
    }

    pub fn define_geometry(&mut self, id: GeometryId, data: GeometryData) -> Result<(), SurfaceError> {
        tracing::trace!("Define {} ({} vertices)", id, data.vertex_count());
        self.map.define_geometry(id, data)
    }

    pub fn update_geometry(&mut self, id: GeometryId, data: GeometryData) -> Result<(), SurfaceError> {
        self.map.update_geometry(id, data)
    }

    pub fn destroy_geometry(&mut self, id: GeometryId) -> Result<(), SurfaceError> {
        if let Some(host) = self.map.remove_geometry(id)? {
            self.driver.destroy_geometry(host);
        }
        Ok(())
    }

    /// Invalidate every render target painted by `view`.
    pub fn invalidate_owner(&mut self, view: u64) -> Vec<RenderTargetId> {
        let ids = self.map.targets_of(view);
        for id in &ids {
            let _ = self.retire_target(*id);
        }
        if !ids.is_empty() {
            tracing::debug!("Invalidated {} render targets of view 0x{:x}", ids.len(), view);
        }
        ids
    }

    fn retire_target(&mut self, id: RenderTargetId) -> Result<(), SurfaceError> {
        if let Some(host) = self.map.invalidate_target(id)? {
            self.driver.destroy_render_target(host);
        }
        Ok(())
    }

    /// Destroy every host resource. Used when the engine shuts down.
    pub fn release_all(&mut self) {
        let targets: Vec<RenderTargetId> = self.map.targets.keys().copied().collect();
        for id in targets {
            let _ = self.retire_target(id);
        }
        let textures: Vec<TextureId> = self.map.textures.keys().copied().collect();
        for id in textures {
            let _ = self.destroy_texture(id);
        }
        let geometry: Vec<GeometryId> = self.map.geometry.keys().copied().collect();
        for id in geometry {
            let _ = self.destroy_geometry(id);
        }
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Validate, resolve and replay `batch`.
    pub fn submit(&mut self, batch: &DrawBatch) -> Result<ReplayReport, SurfaceError> {
        let result = self.run(batch);

        match &result {
            Ok(report) => {
                self.stats.batches_replayed += 1;
                self.stats.commands_replayed += report.commands as u64;
                tracing::trace!("Replayed batch {} ({} commands)", report.sequence, report.commands);
            }
            Err(err) if err.is_stale() => {
                self.stats.batches_dropped += 1;
                tracing::debug!("Dropping batch {}: {}", batch.sequence, err);
            }
            Err(err) => {
                self.stats.batches_dropped += 1;
                tracing::warn!("Rejected batch {}: {}", batch.sequence, err);
            }
        }
        result
    }

    fn run(&mut self, batch: &DrawBatch) -> Result<ReplayReport, SurfaceError> {
        let targets = self.validate(batch)?;
        let created = self.resolve(batch, &targets)?;
        self.replay(batch, targets, created)
    }

    fn validate(&self, batch: &DrawBatch) -> Result<Vec<RenderTargetId>, SurfaceError> {
        for command in &batch.commands {
            self.map.check_target(command.target())?;
            if let DrawCommand::DrawGeometry {
                state,
                geometry,
                indices_offset,
                indices_count,
            } = command
            {
                self.map.check_geometry(*geometry)?;
                for texture in state.textures.iter().flatten() {
                    self.map.check_texture(*texture)?;
                }
                let available = self
                    .map
                    .geometry
                    .get(geometry)
                    .map(|entry| entry.data.indices.len())
                    .unwrap_or(0);
                let end = *indices_offset as usize + *indices_count as usize;
                if end > available {
                    return Err(SurfaceError::InvalidResource {
                        kind: ResourceKind::Geometry,
                        id: geometry.0,
                        reason: format!("draw reads indices up to {} of {}", end, available),
                    });
                }
            }
        }

        let targets = batch.targets();
        for target in &targets {
            self.map.check_sequence(*target, batch.sequence)?;
        }
        Ok(targets)
    }

    fn resolve(&mut self, batch: &DrawBatch, targets: &[RenderTargetId]) -> Result<usize, SurfaceError> {
        let mut created = 0;
        for target in targets {
            created += usize::from(self.ensure_target(*target)?);
        }
        for command in &batch.commands {
            if let DrawCommand::DrawGeometry { state, geometry, .. } = command {
                created += usize::from(self.ensure_geometry(*geometry)?);
                for texture in state.textures.iter().flatten() {
                    created += usize::from(self.ensure_texture(*texture)?);
                }
            }
        }
        self.stats.host_resources_created += created as u64;
        Ok(created)
    }

    fn ensure_target(&mut self, id: RenderTargetId) -> Result<bool, SurfaceError> {
        let target = self.map.targets.get_mut(&id).ok_or(SurfaceError::UnknownResource {
            kind: ResourceKind::RenderTarget,
            id: id.0,
        })?;
        if target.host.is_some() {
            return Ok(false);
        }

        match self.driver.create_render_target(&target.desc) {
            Ok(host) => {
                target.host = Some(host);
                target.state = TargetState::Ready;
                self.map.host_targets.insert(host, id);
                tracing::debug!("Created {} for {}", host, id);
                Ok(true)
            }
            Err(source) => {
                target.state = TargetState::Failed;
                tracing::error!("Host creation of {} failed: {}", id, source);
                Err(SurfaceError::TargetCreation { target: id, source })
            }
        }
    }

    fn ensure_texture(&mut self, id: TextureId) -> Result<bool, SurfaceError> {
        let entry = self.map.textures.get_mut(&id).ok_or(SurfaceError::UnknownResource {
            kind: ResourceKind::Texture,
            id: id.0,
        })?;
        match entry.host {
            Some(host) => {
                if entry.dirty {
                    self.driver.update_texture(host, &entry.data)?;
                    entry.dirty = false;
                }
                Ok(false)
            }
            None => {
                let host = self
                    .driver
                    .create_texture(&entry.data)
                    .map_err(|source| SurfaceError::ResourceCreation {
                        kind: ResourceKind::Texture,
                        id: id.0,
                        source,
                    })?;
                entry.host = Some(host);
                self.map.host_textures.insert(host, id);
                Ok(true)
            }
        }
    }

    fn ensure_geometry(&mut self, id: GeometryId) -> Result<bool, SurfaceError> {
        let entry = self.map.geometry.get_mut(&id).ok_or(SurfaceError::UnknownResource {
            kind: ResourceKind::Geometry,
            id: id.0,
        })?;
        match entry.host {
            Some(host) => {
                if entry.dirty {
                    self.driver.update_geometry(host, &entry.data)?;
                    entry.dirty = false;
                }
                Ok(false)
            }
            None => {
                let host = self
                    .driver
                    .create_geometry(&entry.data)
                    .map_err(|source| SurfaceError::ResourceCreation {
                        kind: ResourceKind::Geometry,
                        id: id.0,
                        source,
                    })?;
                entry.host = Some(host);
                self.map.host_geometry.insert(host, id);
                Ok(true)
            }
        }
    }

    fn replay(
        &mut self,
        batch: &DrawBatch,
        targets: Vec<RenderTargetId>,
        created: usize,
    ) -> Result<ReplayReport, SurfaceError> {
        self.driver.begin_frame();
        let result = self.replay_commands(batch);
        self.driver.end_frame();
        result?;

        let mut frames = Vec::with_capacity(targets.len());
        for id in targets {
            if let Some(target) = self.map.targets.get_mut(&id) {
                target.last_sequence = Some(batch.sequence);
                if let Some(host) = target.host {
                    frames.push(SurfaceFrame {
                        target: id,
                        host,
                        view: target.view,
                        sequence: batch.sequence,
                        width: target.desc.width,
                        height: target.desc.height,
                    });
                }
            }
        }

        Ok(ReplayReport {
            sequence: batch.sequence,
            commands: batch.commands.len(),
            created,
            frames,
        })
    }

    fn replay_commands(&mut self, batch: &DrawBatch) -> Result<(), SurfaceError> {
        for command in &batch.commands {
            match command {
                DrawCommand::ClearRenderTarget { target } => {
                    let host = self.host_target(*target)?;
                    self.driver.clear_render_target(host)?;
                }
                DrawCommand::DrawGeometry {
                    state,
                    geometry,
                    indices_offset,
                    indices_count,
                } => {
                    let mut textures: [Option<HostTexture>; 3] = [None; 3];
                    for (slot, texture) in state.textures.iter().enumerate() {
                        textures[slot] = texture.and_then(|id| self.map.host_texture(id));
                    }
                    let draw = HostDraw {
                        target: self.host_target(state.target)?,
                        geometry: self.map.host_geometry(*geometry).ok_or(
                            SurfaceError::UnknownResource {
                                kind: ResourceKind::Geometry,
                                id: geometry.0,
                            },
                        )?,
                        textures,
                        state,
                        indices_offset: *indices_offset,
                        indices_count: *indices_count,
                    };
                    self.driver.draw_geometry(&draw)?;
                }
            }
        }
        Ok(())
    }

    fn host_target(&self, id: RenderTargetId) -> Result<HostRenderTarget, SurfaceError> {
        self.map.host_target(id).ok_or(SurfaceError::UnknownResource {
            kind: ResourceKind::RenderTarget,
            id: id.0,
        })
    }
}

impl<D> std::fmt::Debug for SurfaceBridge<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceBridge")
            .field("textures", &self.map.texture_count())
            .field("geometry", &self.map.geometry_count())
            .field("targets", &self.map.live_target_count())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::GpuState;
    use crate::trace::{DriverCall, TraceDriver};
    use crate::types::VertexFormat;

    fn quad() -> GeometryData {
        GeometryData {
            format: VertexFormat::Format2f4ub2f,
            vertices: vec![0; 80],
            indices: vec![0, 1, 2, 2, 3, 0],
        }
    }

    fn bridge_with_target() -> SurfaceBridge<TraceDriver> {
        let mut bridge = SurfaceBridge::new(TraceDriver::new());
        bridge
            .define_render_target(RenderTargetId(1), RenderTargetDesc::new(16, 16), 0x1)
            .unwrap();
        bridge.define_geometry(GeometryId(1), quad()).unwrap();
        bridge
    }

    #[test]
    fn test_first_submit_creates_resources_lazily() {
        let mut bridge = bridge_with_target();
        assert!(bridge.driver().log().calls().is_empty());

        let batch = DrawBatch::new(1)
            .clear(RenderTargetId(1))
            .draw(GpuState::new(RenderTargetId(1), 16, 16), GeometryId(1), 0, 6);
        let report = bridge.submit(&batch).unwrap();

        assert_eq!(report.created, 2);
        assert_eq!(report.frames.len(), 1);
        assert_eq!(bridge.map().target_state(RenderTargetId(1)), Some(TargetState::Ready));

        let second = bridge.submit(&DrawBatch::new(2).clear(RenderTargetId(1))).unwrap();
        assert_eq!(second.created, 0);
    }

    #[test]
    fn test_out_of_order_batch_rejected() {
        let mut bridge = bridge_with_target();
        bridge.submit(&DrawBatch::new(5).clear(RenderTargetId(1))).unwrap();

        let err = bridge.submit(&DrawBatch::new(5).clear(RenderTargetId(1))).unwrap_err();
        assert_eq!(
            err,
            SurfaceError::OutOfOrder {
                target: RenderTargetId(1),
                last: 5,
                got: 5
            }
        );
    }

    #[test]
    fn test_index_range_checked() {
        let mut bridge = bridge_with_target();
        let batch = DrawBatch::new(1).draw(GpuState::new(RenderTargetId(1), 16, 16), GeometryId(1), 3, 6);

        assert!(matches!(
            bridge.submit(&batch),
            Err(SurfaceError::InvalidResource { .. })
        ));
    }

    #[test]
    fn test_failed_target_is_isolated() {
        let mut bridge = SurfaceBridge::new(TraceDriver::new().fail_render_targets(true));
        bridge
            .define_render_target(RenderTargetId(1), RenderTargetDesc::new(4, 4), 0x1)
            .unwrap();

        assert!(matches!(
            bridge.submit(&DrawBatch::new(1).clear(RenderTargetId(1))),
            Err(SurfaceError::TargetCreation { .. })
        ));
        assert_eq!(
            bridge.submit(&DrawBatch::new(2).clear(RenderTargetId(1))),
            Err(SurfaceError::TargetFailed(RenderTargetId(1)))
        );
        assert_eq!(bridge.map().target_state(RenderTargetId(1)), Some(TargetState::Failed));
    }

    #[test]
    fn test_dirty_texture_updated_before_draw() {
        let mut bridge = bridge_with_target();
        let texture = TextureData::new(1, 1, crate::types::PixelFormat::Rgba8, vec![255; 4]);
        bridge.define_texture(TextureId(3), texture.clone()).unwrap();
        let state = GpuState::new(RenderTargetId(1), 16, 16).with_texture(0, TextureId(3));

        bridge.submit(&DrawBatch::new(1).draw(state.clone(), GeometryId(1), 0, 6)).unwrap();
        bridge.update_texture(TextureId(3), texture).unwrap();
        bridge.driver().log().clear();
        bridge.submit(&DrawBatch::new(2).draw(state, GeometryId(1), 0, 6)).unwrap();

        let calls = bridge.driver().log().calls();
        assert!(matches!(calls[0], DriverCall::UpdateTexture { .. }));
        assert!(matches!(calls[1], DriverCall::BeginFrame));
    }
}
