//! Software driver
//!
//! Rasterizes batches with tiny-skia. Render targets are RGBA pixmaps kept in
//! [`SoftwareSurfaces`], which the embedder can read from any thread.
//!
//! Vertex colors are flat per triangle (first vertex) and only the 2D affine
//! part of the transform is applied.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tiny_skia::{
    BlendMode, Color, FillRule, FilterQuality, Mask, Paint, PathBuilder, Pattern, Pixmap, Rect,
    SpreadMode, Transform,
};

use crate::driver::{GpuDriver, HostDraw, HostGeometry, HostRenderTarget, HostTexture};
use crate::error::DriverError;
use crate::types::{GeometryData, IntRect, PixelFormat, RenderTargetDesc, TextureData};

/// Render target pixels, shared with the embedder
#[derive(Clone, Default)]
pub struct SoftwareSurfaces {
    inner: Arc<Mutex<HashMap<HostRenderTarget, Pixmap>>>,
}

impl SoftwareSurfaces {
    fn lock(&self) -> MutexGuard<'_, HashMap<HostRenderTarget, Pixmap>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn targets(&self) -> Vec<HostRenderTarget> {
        let mut targets: Vec<_> = self.lock().keys().copied().collect();
        targets.sort_unstable();
        targets
    }

    pub fn size(&self, target: HostRenderTarget) -> Option<(u32, u32)> {
        self.lock().get(&target).map(|p| (p.width(), p.height()))
    }

    /// Premultiplied RGBA pixel at (x, y).
    pub fn pixel(&self, target: HostRenderTarget, x: u32, y: u32) -> Option<[u8; 4]> {
        let surfaces = self.lock();
        let color = surfaces.get(&target)?.pixel(x, y)?;
        Some([color.red(), color.green(), color.blue(), color.alpha()])
    }

    /// Premultiplied RGBA bytes, row-major.
    pub fn pixels(&self, target: HostRenderTarget) -> Option<Vec<u8>> {
        self.lock().get(&target).map(|p| p.data().to_vec())
    }

    pub fn encode_png(&self, target: HostRenderTarget) -> Result<Vec<u8>, DriverError> {
        let surfaces = self.lock();
        let pixmap = surfaces
            .get(&target)
            .ok_or_else(|| DriverError::new(format!("no surface {}", target)))?;
        pixmap
            .encode_png()
            .map_err(|err| DriverError::new(err.to_string()))
    }

    pub fn save_png(&self, target: HostRenderTarget, path: impl AsRef<Path>) -> Result<(), DriverError> {
        let surfaces = self.lock();
        let pixmap = surfaces
            .get(&target)
            .ok_or_else(|| DriverError::new(format!("no surface {}", target)))?;
        pixmap
            .save_png(path)
            .map_err(|err| DriverError::new(err.to_string()))
    }
}

impl std::fmt::Debug for SoftwareSurfaces {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareSurfaces")
            .field("targets", &self.lock().len())
            .finish()
    }
}

/// tiny-skia backed driver
#[derive(Default)]
pub struct SoftwareDriver {
    next_handle: u64,
    textures: HashMap<HostTexture, Pixmap>,
    geometry: HashMap<HostGeometry, GeometryData>,
    surfaces: SoftwareSurfaces,
    frames: u64,
}

impl SoftwareDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for reading render targets after the driver is moved.
    pub fn surfaces(&self) -> SoftwareSurfaces {
        self.surfaces.clone()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

fn texture_pixmap(data: &TextureData) -> Result<Pixmap, DriverError> {
    let mut pixmap = Pixmap::new(data.width, data.height)
        .ok_or_else(|| DriverError::new(format!("invalid texture size {}x{}", data.width, data.height)))?;
    let width = data.width as usize;
    let bpp = data.format.bytes_per_pixel();
    let dst = pixmap.data_mut();

    for y in 0..data.height as usize {
        let start = y * data.row_bytes;
        let row = data
            .pixels
            .get(start..start + width * bpp)
            .ok_or_else(|| DriverError::new("texture data shorter than described"))?;
        for x in 0..width {
            let out = (y * width + x) * 4;
            match data.format {
                PixelFormat::Rgba8 => {
                    let alpha = row[x * 4 + 3];
                    for channel in 0..3 {
                        dst[out + channel] = row[x * 4 + channel].min(alpha);
                    }
                    dst[out + 3] = alpha;
                }
                PixelFormat::A8 => {
                    dst[out + 3] = row[x];
                }
            }
        }
    }
    Ok(pixmap)
}

fn read_f32(bytes: &[u8], at: usize) -> Option<f32> {
    let raw: [u8; 4] = bytes.get(at..at + 4)?.try_into().ok()?;
    Some(f32::from_le_bytes(raw))
}

/// Position and color of vertex `index`.
fn vertex(geometry: &GeometryData, index: u32) -> Option<(f32, f32, [u8; 4])> {
    let at = index as usize * geometry.format.stride();
    let x = read_f32(&geometry.vertices, at)?;
    let y = read_f32(&geometry.vertices, at + 4)?;
    let color: [u8; 4] = geometry.vertices.get(at + 8..at + 12)?.try_into().ok()?;
    Some((x, y, color))
}

fn scissor_mask(width: u32, height: u32, scissor: IntRect) -> Option<Mask> {
    let mut mask = Mask::new(width, height)?;
    let rect = Rect::from_ltrb(
        scissor.left as f32,
        scissor.top as f32,
        scissor.right as f32,
        scissor.bottom as f32,
    )?;
    mask.fill_path(&PathBuilder::from_rect(rect), FillRule::Winding, false, Transform::identity());
    Some(mask)
}

impl GpuDriver for SoftwareDriver {
    fn begin_frame(&mut self) {
        self.frames += 1;
    }

    fn create_texture(&mut self, data: &TextureData) -> Result<HostTexture, DriverError> {
        let pixmap = texture_pixmap(data)?;
        let host = HostTexture(self.next());
        self.textures.insert(host, pixmap);
        Ok(host)
    }

    fn update_texture(&mut self, texture: HostTexture, data: &TextureData) -> Result<(), DriverError> {
        let pixmap = texture_pixmap(data)?;
        self.textures.insert(texture, pixmap);
        Ok(())
    }

    fn destroy_texture(&mut self, texture: HostTexture) {
        self.textures.remove(&texture);
    }

    fn create_render_target(&mut self, desc: &RenderTargetDesc) -> Result<HostRenderTarget, DriverError> {
        let pixmap = Pixmap::new(desc.width, desc.height).ok_or_else(|| {
            DriverError::new(format!("invalid render target size {}x{}", desc.width, desc.height))
        })?;
        let host = HostRenderTarget(self.next());
        self.surfaces.lock().insert(host, pixmap);
        Ok(host)
    }

    fn destroy_render_target(&mut self, target: HostRenderTarget) {
        self.surfaces.lock().remove(&target);
    }

    fn create_geometry(&mut self, data: &GeometryData) -> Result<HostGeometry, DriverError> {
        let host = HostGeometry(self.next());
        self.geometry.insert(host, data.clone());
        Ok(host)
    }

    fn update_geometry(&mut self, geometry: HostGeometry, data: &GeometryData) -> Result<(), DriverError> {
        self.geometry.insert(geometry, data.clone());
        Ok(())
    }

    fn destroy_geometry(&mut self, geometry: HostGeometry) {
        self.geometry.remove(&geometry);
    }

    fn clear_render_target(&mut self, target: HostRenderTarget) -> Result<(), DriverError> {
        let mut surfaces = self.surfaces.lock();
        let pixmap = surfaces
            .get_mut(&target)
            .ok_or_else(|| DriverError::new(format!("no surface {}", target)))?;
        pixmap.fill(Color::TRANSPARENT);
        Ok(())
    }

    fn draw_geometry(&mut self, draw: &HostDraw<'_>) -> Result<(), DriverError> {
        let geometry = self
            .geometry
            .get(&draw.geometry)
            .ok_or_else(|| DriverError::new("draw references unknown geometry"))?;
        let start = draw.indices_offset as usize;
        let end = start + draw.indices_count as usize;
        let indices = geometry
            .indices
            .get(start..end)
            .ok_or_else(|| DriverError::new("index range out of bounds"))?;

        let state = draw.state;
        let m = &state.transform;
        let transform = Transform::from_row(m[0], m[1], m[4], m[5], m[12], m[13]);
        let texture = if state.enable_texturing {
            draw.textures[0].and_then(|host| self.textures.get(&host))
        } else {
            None
        };

        let mut surfaces = self.surfaces.lock();
        let pixmap = surfaces
            .get_mut(&draw.target)
            .ok_or_else(|| DriverError::new(format!("no surface {}", draw.target)))?;
        let mask = state
            .scissor
            .and_then(|scissor| scissor_mask(pixmap.width(), pixmap.height(), scissor));

        for triangle in indices.chunks_exact(3) {
            let (Some(a), Some(b), Some(c)) = (
                vertex(geometry, triangle[0]),
                vertex(geometry, triangle[1]),
                vertex(geometry, triangle[2]),
            ) else {
                continue;
            };

            let mut builder = PathBuilder::new();
            builder.move_to(a.0, a.1);
            builder.line_to(b.0, b.1);
            builder.line_to(c.0, c.1);
            builder.close();
            // Degenerate triangles produce no path.
            let Some(path) = builder.finish() else {
                continue;
            };

            let mut paint = Paint::default();
            paint.anti_alias = false;
            paint.blend_mode = if state.enable_blend {
                BlendMode::SourceOver
            } else {
                BlendMode::Source
            };
            match texture {
                Some(texture) => {
                    paint.shader = Pattern::new(
                        texture.as_ref(),
                        SpreadMode::Pad,
                        FilterQuality::Nearest,
                        1.0,
                        Transform::identity(),
                    );
                }
                None => {
                    let [r, g, b, alpha] = a.2;
                    paint.set_color_rgba8(r, g, b, alpha);
                }
            }

            pixmap.fill_path(&path, &paint, FillRule::Winding, transform, mask.as_ref());
        }
        Ok(())
    }
}
