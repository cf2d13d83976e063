//! Resource identities and descriptions

use std::fmt;

/// Native texture identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Native render target identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderTargetId(pub u32);

/// Native geometry identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryId(pub u32);

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "texture#{}", self.0)
    }
}

impl fmt::Display for RenderTargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target#{}", self.0)
    }
}

impl fmt::Display for GeometryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "geometry#{}", self.0)
    }
}

/// Integer rectangle (edges, not origin + size)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl IntRect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }
}

/// Shader program selected by a draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShaderKind {
    /// Quads: solid fills, images, gradients
    #[default]
    Fill,
    /// Anti-aliased path tessellations
    FillPath,
}

/// Vertex layout of a geometry buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    /// position 2×f32, color 4×u8, texcoord 2×f32
    Format2f4ub2f,
    /// position 2×f32, color 4×u8, texcoord 2×f32, object 2×f32, data 28×f32
    Format2f4ub2f2f28f,
}

impl VertexFormat {
    /// Bytes per vertex
    pub const fn stride(self) -> usize {
        match self {
            VertexFormat::Format2f4ub2f => 20,
            VertexFormat::Format2f4ub2f2f28f => 140,
        }
    }
}

/// Pixel layout of texture data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// Premultiplied RGBA, 8 bits per channel
    #[default]
    Rgba8,
    /// Single 8-bit alpha channel
    A8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::A8 => 1,
        }
    }
}

/// Texture contents as described by the native side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub row_bytes: usize,
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// Tightly packed texture.
    pub fn new(width: u32, height: u32, format: PixelFormat, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            row_bytes: width as usize * format.bytes_per_pixel(),
            pixels,
        }
    }

    /// Check the buffer covers every row.
    pub fn validate(&self) -> Result<(), String> {
        let min_row = self.width as usize * self.format.bytes_per_pixel();
        if self.row_bytes < min_row {
            return Err(format!("row_bytes {} below row width {}", self.row_bytes, min_row));
        }
        let needed = self.row_bytes * self.height as usize;
        if self.pixels.len() < needed {
            return Err(format!("{} pixel bytes, {} needed", self.pixels.len(), needed));
        }
        Ok(())
    }
}

/// Render target as described by the native side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTargetDesc {
    pub width: u32,
    pub height: u32,
    pub has_stencil: bool,
    pub has_depth: bool,
}

impl RenderTargetDesc {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            has_stencil: false,
            has_depth: false,
        }
    }
}

/// Vertex and index buffers, passed through byte-for-byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryData {
    pub format: VertexFormat,
    pub vertices: Vec<u8>,
    pub indices: Vec<u32>,
}

impl GeometryData {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / self.format.stride()
    }

    pub fn validate(&self) -> Result<(), String> {
        let stride = self.format.stride();
        if self.vertices.len() % stride != 0 {
            return Err(format!(
                "{} vertex bytes is not a multiple of stride {}",
                self.vertices.len(),
                stride
            ));
        }
        let count = self.vertex_count();
        if let Some(bad) = self.indices.iter().find(|&&i| i as usize >= count) {
            return Err(format!("index {} out of range for {} vertices", bad, count));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_strides() {
        assert_eq!(VertexFormat::Format2f4ub2f.stride(), 20);
        assert_eq!(VertexFormat::Format2f4ub2f2f28f.stride(), 140);
    }

    #[test]
    fn test_texture_validation() {
        let ok = TextureData::new(2, 2, PixelFormat::Rgba8, vec![0; 16]);
        assert!(ok.validate().is_ok());

        let short = TextureData::new(2, 2, PixelFormat::Rgba8, vec![0; 15]);
        assert!(short.validate().is_err());
    }

    #[test]
    fn test_geometry_validation() {
        let geometry = GeometryData {
            format: VertexFormat::Format2f4ub2f,
            vertices: vec![0; 60],
            indices: vec![0, 1, 2],
        };
        assert_eq!(geometry.vertex_count(), 3);
        assert!(geometry.validate().is_ok());

        let bad_index = GeometryData {
            indices: vec![0, 1, 3],
            ..geometry.clone()
        };
        assert!(bad_index.validate().is_err());
    }

    #[test]
    fn test_int_rect() {
        let rect = IntRect::new(10, 10, 30, 50);
        assert_eq!(rect.width(), 20);
        assert_eq!(rect.height(), 40);
        assert!(IntRect::new(5, 5, 5, 9).is_empty());
    }
}
