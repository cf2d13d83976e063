//! Paint state of one view
//!
//! A view paints its background color and the rectangles scripts add
//! through the `vela` global. Each repaint becomes one quad geometry and one
//! draw batch.

use vela_gpu::{GeometryData, VertexFormat};

/// Solid rectangle in view coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub color: [u8; 4],
}

#[derive(Debug, Clone)]
pub struct Scene {
    background: [u8; 4],
    rects: Vec<FillRect>,
    dirty: bool,
}

impl Scene {
    pub fn new(background: [u8; 4]) -> Self {
        Self {
            background,
            rects: Vec::new(),
            dirty: true,
        }
    }

    pub fn background(&self) -> [u8; 4] {
        self.background
    }

    pub fn set_background(&mut self, color: [u8; 4]) {
        self.background = color;
        self.dirty = true;
    }

    pub fn fill_rect(&mut self, rect: FillRect) {
        if rect.width > 0.0 && rect.height > 0.0 {
            self.rects.push(rect);
            self.dirty = true;
        }
    }

    pub fn clear_rects(&mut self) {
        self.rects.clear();
        self.dirty = true;
    }

    pub fn rects(&self) -> &[FillRect] {
        &self.rects
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty flag, returning its previous value.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    /// Quads for a `width` x `height` surface: background first, then the
    /// rectangles in paint order. `None` when there is nothing to draw.
    pub fn geometry(&self, width: u32, height: u32) -> Option<GeometryData> {
        let mut quads = Vec::with_capacity(self.rects.len() + 1);
        if self.background[3] > 0 {
            quads.push(FillRect {
                x: 0.0,
                y: 0.0,
                width: width as f32,
                height: height as f32,
                color: self.background,
            });
        }
        quads.extend_from_slice(&self.rects);
        if quads.is_empty() {
            return None;
        }

        let mut vertices = Vec::with_capacity(quads.len() * 4 * VertexFormat::Format2f4ub2f.stride());
        let mut indices = Vec::with_capacity(quads.len() * 6);
        for (i, quad) in quads.iter().enumerate() {
            let corners = [
                (quad.x, quad.y),
                (quad.x + quad.width, quad.y),
                (quad.x + quad.width, quad.y + quad.height),
                (quad.x, quad.y + quad.height),
            ];
            for (x, y) in corners {
                vertices.extend_from_slice(&x.to_le_bytes());
                vertices.extend_from_slice(&y.to_le_bytes());
                vertices.extend_from_slice(&quad.color);
                // texcoord
                vertices.extend_from_slice(&[0; 8]);
            }
            let base = (i * 4) as u32;
            indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        }

        Some(GeometryData {
            format: VertexFormat::Format2f4ub2f,
            vertices,
            indices,
        })
    }
}

/// Clamp a script number to a color channel.
pub fn channel(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 255.0) as u8
}
