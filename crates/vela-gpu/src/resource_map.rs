//! Native ↔ host resource bookkeeping
//!
//! Resources are described by the native side first and created on the host
//! lazily, the first time a batch references them. Destroyed identities are
//! remembered so a late reference reports `StaleResource` rather than
//! `UnknownResource`. Only the most recent `RETIRED_LIMIT` of each kind are
//! kept; an older id reads as unknown.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

use crate::driver::{HostGeometry, HostRenderTarget, HostTexture};
use crate::error::{ResourceKind, SurfaceError};
use crate::types::{GeometryData, GeometryId, RenderTargetDesc, RenderTargetId, TextureData, TextureId};

/// Render target lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    /// Defined by the native side, not yet created on the host
    Uninitialized,
    Ready,
    /// Resized or destroyed; every later batch for it is stale
    Invalidated,
    /// Host creation failed; fatal for this target only
    Failed,
}

pub(crate) struct Resource<D, H> {
    pub(crate) data: D,
    pub(crate) host: Option<H>,
    pub(crate) dirty: bool,
}

impl<D, H> Resource<D, H> {
    fn new(data: D) -> Self {
        Self {
            data,
            host: None,
            dirty: false,
        }
    }
}

pub(crate) struct Target {
    pub(crate) desc: RenderTargetDesc,
    pub(crate) view: u64,
    pub(crate) state: TargetState,
    pub(crate) host: Option<HostRenderTarget>,
    pub(crate) last_sequence: Option<u64>,
}

/// Retired ids remembered per resource kind.
pub const RETIRED_LIMIT: usize = 4096;

/// Recently retired ids, oldest forgotten first.
pub(crate) struct Tombstones<K> {
    order: VecDeque<K>,
    ids: HashSet<K>,
}

impl<K> Default for Tombstones<K> {
    fn default() -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
        }
    }
}

impl<K: Copy + Eq + Hash> Tombstones<K> {
    fn insert(&mut self, id: K) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > RETIRED_LIMIT {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, id: &K) {
        if self.ids.remove(id) {
            self.order.retain(|kept| kept != id);
        }
    }

    fn contains(&self, id: &K) -> bool {
        self.ids.contains(id)
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Bidirectional native/host resource maps
#[derive(Default)]
pub struct GpuResourceMap {
    pub(crate) textures: HashMap<TextureId, Resource<TextureData, HostTexture>>,
    pub(crate) geometry: HashMap<GeometryId, Resource<GeometryData, HostGeometry>>,
    /// Targets not yet invalidated
    pub(crate) targets: HashMap<RenderTargetId, Target>,
    retired_textures: Tombstones<TextureId>,
    retired_geometry: Tombstones<GeometryId>,
    retired_targets: Tombstones<RenderTargetId>,
    pub(crate) host_textures: HashMap<HostTexture, TextureId>,
    pub(crate) host_geometry: HashMap<HostGeometry, GeometryId>,
    pub(crate) host_targets: HashMap<HostRenderTarget, RenderTargetId>,
}

impl GpuResourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Textures
    // ------------------------------------------------------------------

    pub(crate) fn define_texture(&mut self, id: TextureId, data: TextureData) -> Result<(), SurfaceError> {
        if self.textures.contains_key(&id) {
            return Err(SurfaceError::DuplicateResource {
                kind: ResourceKind::Texture,
                id: id.0,
            });
        }
        data.validate().map_err(|reason| SurfaceError::InvalidResource {
            kind: ResourceKind::Texture,
            id: id.0,
            reason,
        })?;
        self.retired_textures.remove(&id);
        self.textures.insert(id, Resource::new(data));
        Ok(())
    }

    pub(crate) fn update_texture(&mut self, id: TextureId, data: TextureData) -> Result<(), SurfaceError> {
        data.validate().map_err(|reason| SurfaceError::InvalidResource {
            kind: ResourceKind::Texture,
            id: id.0,
            reason,
        })?;
        self.check_texture(id)?;
        if let Some(entry) = self.textures.get_mut(&id) {
            entry.data = data;
            entry.dirty = entry.host.is_some();
        }
        Ok(())
    }

    /// Forget `id`, returning its host texture for destruction.
    pub(crate) fn remove_texture(&mut self, id: TextureId) -> Result<Option<HostTexture>, SurfaceError> {
        self.check_texture(id)?;
        let host = self.textures.remove(&id).and_then(|entry| entry.host);
        if let Some(host) = host {
            self.host_textures.remove(&host);
        }
        self.retired_textures.insert(id);
        Ok(host)
    }

    pub(crate) fn check_texture(&self, id: TextureId) -> Result<(), SurfaceError> {
        if self.textures.contains_key(&id) {
            Ok(())
        } else if self.retired_textures.contains(&id) {
            Err(SurfaceError::StaleResource {
                kind: ResourceKind::Texture,
                id: id.0,
            })
        } else {
            Err(SurfaceError::UnknownResource {
                kind: ResourceKind::Texture,
                id: id.0,
            })
        }
    }

    // ------------------------------------------------------------------
    // Geometry
    // ------------------------------------------------------------------

    pub(crate) fn define_geometry(&mut self, id: GeometryId, data: GeometryData) -> Result<(), SurfaceError> {
        if self.geometry.contains_key(&id) {
            return Err(SurfaceError::DuplicateResource {
                kind: ResourceKind::Geometry,
                id: id.0,
            });
        }
        data.validate().map_err(|reason| SurfaceError::InvalidResource {
            kind: ResourceKind::Geometry,
            id: id.0,
            reason,
        })?;
        self.retired_geometry.remove(&id);
        self.geometry.insert(id, Resource::new(data));
        Ok(())
    }

    pub(crate) fn update_geometry(&mut self, id: GeometryId, data: GeometryData) -> Result<(), SurfaceError> {
        data.validate().map_err(|reason| SurfaceError::InvalidResource {
            kind: ResourceKind::Geometry,
            id: id.0,
            reason,
        })?;
        self.check_geometry(id)?;
        if let Some(entry) = self.geometry.get_mut(&id) {
            entry.data = data;
            entry.dirty = entry.host.is_some();
        }
        Ok(())
    }

    pub(crate) fn remove_geometry(&mut self, id: GeometryId) -> Result<Option<HostGeometry>, SurfaceError> {
        self.check_geometry(id)?;
        let host = self.geometry.remove(&id).and_then(|entry| entry.host);
        if let Some(host) = host {
            self.host_geometry.remove(&host);
        }
        self.retired_geometry.insert(id);
        Ok(host)
    }

    pub(crate) fn check_geometry(&self, id: GeometryId) -> Result<(), SurfaceError> {
        if self.geometry.contains_key(&id) {
            Ok(())
        } else if self.retired_geometry.contains(&id) {
            Err(SurfaceError::StaleResource {
                kind: ResourceKind::Geometry,
                id: id.0,
            })
        } else {
            Err(SurfaceError::UnknownResource {
                kind: ResourceKind::Geometry,
                id: id.0,
            })
        }
    }

    // ------------------------------------------------------------------
    // Render targets
    // ------------------------------------------------------------------

    pub(crate) fn define_target(
        &mut self,
        id: RenderTargetId,
        desc: RenderTargetDesc,
        view: u64,
    ) -> Result<(), SurfaceError> {
        if self.targets.contains_key(&id) {
            return Err(SurfaceError::DuplicateResource {
                kind: ResourceKind::RenderTarget,
                id: id.0,
            });
        }
        self.retired_targets.remove(&id);
        self.targets.insert(
            id,
            Target {
                desc,
                view,
                state: TargetState::Uninitialized,
                host: None,
                last_sequence: None,
            },
        );
        Ok(())
    }

    /// Move `id` to `Invalidated`, returning its host target for destruction.
    pub(crate) fn invalidate_target(&mut self, id: RenderTargetId) -> Result<Option<HostRenderTarget>, SurfaceError> {
        let Some(target) = self.targets.remove(&id) else {
            if self.retired_targets.contains(&id) {
                return Ok(None);
            }
            return Err(SurfaceError::UnknownResource {
                kind: ResourceKind::RenderTarget,
                id: id.0,
            });
        };
        self.retired_targets.insert(id);
        if let Some(host) = target.host {
            self.host_targets.remove(&host);
        }
        Ok(target.host)
    }

    pub(crate) fn check_target(&self, id: RenderTargetId) -> Result<(), SurfaceError> {
        match self.target_state(id) {
            Some(TargetState::Uninitialized | TargetState::Ready) => Ok(()),
            Some(TargetState::Invalidated) => Err(SurfaceError::StaleTarget(id)),
            Some(TargetState::Failed) => Err(SurfaceError::TargetFailed(id)),
            None => Err(SurfaceError::UnknownResource {
                kind: ResourceKind::RenderTarget,
                id: id.0,
            }),
        }
    }

    pub(crate) fn check_sequence(&self, id: RenderTargetId, sequence: u64) -> Result<(), SurfaceError> {
        match self.targets.get(&id).and_then(|target| target.last_sequence) {
            Some(last) if sequence <= last => Err(SurfaceError::OutOfOrder {
                target: id,
                last,
                got: sequence,
            }),
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn target_state(&self, id: RenderTargetId) -> Option<TargetState> {
        match self.targets.get(&id) {
            Some(target) => Some(target.state),
            None if self.retired_targets.contains(&id) => Some(TargetState::Invalidated),
            None => None,
        }
    }

    pub fn target_desc(&self, id: RenderTargetId) -> Option<RenderTargetDesc> {
        self.targets.get(&id).map(|target| target.desc)
    }

    /// Raw native view handle that owns `id`.
    pub fn view_of(&self, id: RenderTargetId) -> Option<u64> {
        self.targets.get(&id).map(|target| target.view)
    }

    /// Live (not invalidated) targets painted by `view`.
    pub fn targets_of(&self, view: u64) -> Vec<RenderTargetId> {
        let mut ids: Vec<RenderTargetId> = self
            .targets
            .iter()
            .filter(|(_, target)| target.view == view)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn last_sequence(&self, id: RenderTargetId) -> Option<u64> {
        self.targets.get(&id).and_then(|target| target.last_sequence)
    }

    pub fn host_target(&self, id: RenderTargetId) -> Option<HostRenderTarget> {
        self.targets.get(&id).and_then(|target| target.host)
    }

    pub fn native_target(&self, host: HostRenderTarget) -> Option<RenderTargetId> {
        self.host_targets.get(&host).copied()
    }

    pub fn host_texture(&self, id: TextureId) -> Option<HostTexture> {
        self.textures.get(&id).and_then(|entry| entry.host)
    }

    pub fn native_texture(&self, host: HostTexture) -> Option<TextureId> {
        self.host_textures.get(&host).copied()
    }

    pub fn host_geometry(&self, id: GeometryId) -> Option<HostGeometry> {
        self.geometry.get(&id).and_then(|entry| entry.host)
    }

    pub fn native_geometry(&self, host: HostGeometry) -> Option<GeometryId> {
        self.host_geometry.get(&host).copied()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn geometry_count(&self) -> usize {
        self.geometry.len()
    }

    /// Targets not yet invalidated.
    pub fn live_target_count(&self) -> usize {
        self.targets.len()
    }

    /// Retired ids still remembered, across every kind.
    pub fn retired_count(&self) -> usize {
        self.retired_textures.len() + self.retired_geometry.len() + self.retired_targets.len()
    }
}
