//! Draw batches and resource notices

use crate::types::{
    GeometryData, GeometryId, IntRect, RenderTargetDesc, RenderTargetId, ShaderKind, TextureData,
    TextureId,
};

/// Pipeline state of one draw
#[derive(Debug, Clone, PartialEq)]
pub struct GpuState {
    pub target: RenderTargetId,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Column-major 4×4 matrix
    pub transform: [f32; 16],
    pub enable_texturing: bool,
    pub enable_blend: bool,
    pub shader: ShaderKind,
    pub textures: [Option<TextureId>; 3],
    pub uniform_scalar: [f32; 8],
    pub uniform_vector: [[f32; 4]; 8],
    pub clip: Vec<[f32; 16]>,
    pub scissor: Option<IntRect>,
}

pub(crate) const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

impl GpuState {
    /// Untextured, blended draw into `target` with an identity transform.
    pub fn new(target: RenderTargetId, viewport_width: u32, viewport_height: u32) -> Self {
        Self {
            target,
            viewport_width,
            viewport_height,
            transform: IDENTITY,
            enable_texturing: false,
            enable_blend: true,
            shader: ShaderKind::Fill,
            textures: [None; 3],
            uniform_scalar: [0.0; 8],
            uniform_vector: [[0.0; 4]; 8],
            clip: Vec::new(),
            scissor: None,
        }
    }

    pub fn with_texture(mut self, slot: usize, texture: TextureId) -> Self {
        if let Some(entry) = self.textures.get_mut(slot) {
            *entry = Some(texture);
            self.enable_texturing = true;
        }
        self
    }

    pub fn with_scissor(mut self, scissor: IntRect) -> Self {
        self.scissor = Some(scissor);
        self
    }

    pub fn with_blend(mut self, enable: bool) -> Self {
        self.enable_blend = enable;
        self
    }

    /// Column-major translation.
    pub fn with_translation(mut self, x: f32, y: f32) -> Self {
        self.transform[12] = x;
        self.transform[13] = y;
        self
    }
}

/// One replayable command
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    ClearRenderTarget {
        target: RenderTargetId,
    },
    DrawGeometry {
        state: GpuState,
        geometry: GeometryId,
        indices_offset: u32,
        indices_count: u32,
    },
}

impl DrawCommand {
    pub fn target(&self) -> RenderTargetId {
        match self {
            DrawCommand::ClearRenderTarget { target } => *target,
            DrawCommand::DrawGeometry { state, .. } => state.target,
        }
    }
}

/// Ordered command list emitted by one native paint pass
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DrawBatch {
    /// Strictly increasing per render target
    pub sequence: u64,
    pub commands: Vec<DrawCommand>,
}

impl DrawBatch {
    pub fn new(sequence: u64) -> Self {
        Self {
            sequence,
            commands: Vec::new(),
        }
    }

    pub fn clear(mut self, target: RenderTargetId) -> Self {
        self.commands.push(DrawCommand::ClearRenderTarget { target });
        self
    }

    pub fn draw(mut self, state: GpuState, geometry: GeometryId, indices_offset: u32, indices_count: u32) -> Self {
        self.commands.push(DrawCommand::DrawGeometry {
            state,
            geometry,
            indices_offset,
            indices_count,
        });
        self
    }

    /// Distinct targets in first-use order.
    pub fn targets(&self) -> Vec<RenderTargetId> {
        let mut targets = Vec::new();
        for command in &self.commands {
            let target = command.target();
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
        targets
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Resource lifecycle message from the native engine
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceNotice {
    DefineTexture { id: TextureId, data: TextureData },
    UpdateTexture { id: TextureId, data: TextureData },
    DestroyTexture { id: TextureId },
    /// `view` is the raw native handle of the view painting into the target
    DefineRenderTarget { id: RenderTargetId, desc: RenderTargetDesc, view: u64 },
    /// The target is invalidated; the native side defines a replacement
    ResizeRenderTarget { id: RenderTargetId, width: u32, height: u32 },
    DestroyRenderTarget { id: RenderTargetId },
    DefineGeometry { id: GeometryId, data: GeometryData },
    UpdateGeometry { id: GeometryId, data: GeometryData },
    DestroyGeometry { id: GeometryId },
}
