// texture.rs — 流式纹理：占位像素 + 每帧从帧源刷新

use crate::error::FrameError;
use crate::frame_source::FrameSource;
use crate::graphics::{GraphicsContext, TextureHandle, TextureSampling};
use image::imageops::FilterType;
use image::{Rgba, RgbaImage};

/// A frame already fitted to the device limit, carrying its mip chain when
/// the sampling policy wants one.
///
/// Built on the producer side so uploading it is a plain copy per level.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedFrame {
    base: RgbaImage,
    mips: Vec<RgbaImage>,
}

impl PreparedFrame {
    /// Scales `image` down to `max_dimension` if needed, then builds levels
    /// 1.. for power-of-two sizes. This is the expensive step; call it off
    /// the render thread.
    pub fn prepare(image: RgbaImage, max_dimension: u32) -> Self {
        let base = fit_to_limit(image, max_dimension);
        let (w, h) = base.dimensions();
        let mips = if TextureSampling::for_dimensions(w, h).mipmaps {
            mip_levels(&base)
        } else {
            Vec::new()
        };
        Self { base, mips }
    }

    pub fn base(&self) -> &RgbaImage {
        &self.base
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.base.dimensions()
    }

    pub fn sampling(&self) -> TextureSampling {
        let (w, h) = self.dimensions();
        TextureSampling::for_dimensions(w, h)
    }

    pub fn level_count(&self) -> u32 {
        1 + self.mips.len() as u32
    }

    /// Level 0 first, then each mip level.
    pub fn levels(&self) -> impl Iterator<Item = &RgbaImage> {
        std::iter::once(&self.base).chain(&self.mips)
    }
}

/// Outcome of one [`StreamingTexture::refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    Updated,
    Unchanged,
    Failed,
}

/// GPU texture fed from a [`FrameSource`].
///
/// Starts as a single placeholder pixel so the sphere has a defined colour
/// before the first frame arrives. A failing source leaves the last good
/// upload (or the placeholder) in place.
#[derive(Debug)]
pub struct StreamingTexture {
    handle: TextureHandle,
    size: (u32, u32),
    sampling: TextureSampling,
    has_frame: bool,
    last_failure: Option<FrameError>,
}

impl StreamingTexture {
    pub fn new<G: GraphicsContext + ?Sized>(ctx: &mut G, placeholder: [u8; 4]) -> Self {
        let pixel = PreparedFrame::prepare(RgbaImage::from_pixel(1, 1, Rgba(placeholder)), 1);
        let handle = ctx.create_texture(&pixel);
        Self {
            handle,
            size: (1, 1),
            sampling: pixel.sampling(),
            has_frame: false,
            last_failure: None,
        }
    }

    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn sampling(&self) -> TextureSampling {
        self.sampling
    }

    /// Whether a real frame has replaced the placeholder.
    pub fn has_frame(&self) -> bool {
        self.has_frame
    }

    pub fn last_failure(&self) -> Option<&FrameError> {
        self.last_failure.as_ref()
    }

    /// Polls `source` once without blocking and uploads a new frame if there
    /// is one. Each distinct failure is logged once.
    pub fn refresh<G: GraphicsContext + ?Sized>(
        &mut self,
        ctx: &mut G,
        source: &mut dyn FrameSource,
    ) -> Refresh {
        let uploaded = match source.poll_frame() {
            Ok(Some(frame)) => self.upload(ctx, &frame),
            Ok(None) => return Refresh::Unchanged,
            Err(e) => Err(e),
        };

        match uploaded {
            Ok(()) => {
                if let Some(previous) = self.last_failure.take() {
                    log::info!("frame source recovered (was: {previous})");
                }
                Refresh::Updated
            }
            Err(e) => {
                if self.last_failure.as_ref() != Some(&e) {
                    log::warn!("{e}; keeping the current texture");
                    self.last_failure = Some(e);
                }
                Refresh::Failed
            }
        }
    }

    /// Copies `frame` to the GPU. Frames larger than the device allows are
    /// refused rather than resampled here.
    pub fn upload<G: GraphicsContext + ?Sized>(
        &mut self,
        ctx: &mut G,
        frame: &PreparedFrame,
    ) -> Result<(), FrameError> {
        let size = frame.dimensions();
        let limit = ctx.max_texture_dimension();
        if size.0 > limit || size.1 > limit {
            return Err(FrameError::Oversized {
                width: size.0,
                height: size.1,
                limit,
            });
        }

        if size == self.size {
            ctx.write_texture(self.handle, frame);
        } else {
            // 尺寸变化：重新分配纹理，旧的释放
            let sampling = frame.sampling();
            let handle = ctx.create_texture(frame);
            ctx.release_texture(self.handle);
            log::info!(
                "streaming texture now {}x{} (mip levels: {}, wrap: {:?})",
                size.0,
                size.1,
                frame.level_count(),
                sampling.wrap
            );
            self.handle = handle;
            self.size = size;
            self.sampling = sampling;
        }
        self.has_frame = true;
        Ok(())
    }

    pub fn release<G: GraphicsContext + ?Sized>(self, ctx: &mut G) {
        ctx.release_texture(self.handle);
    }
}

/// Scales `img` down so neither side exceeds `max_dimension`.
pub fn fit_to_limit(img: RgbaImage, max_dimension: u32) -> RgbaImage {
    let (src_w, src_h) = img.dimensions();
    if src_w <= max_dimension && src_h <= max_dimension {
        return img;
    }

    let scale = max_dimension as f64 / src_w.max(src_h) as f64;
    let new_w = ((src_w as f64 * scale) as u32).clamp(1, max_dimension);
    let new_h = ((src_h as f64 * scale) as u32).clamp(1, max_dimension);
    log::debug!(
        "frame {src_w}x{src_h} exceeds GPU limit {max_dimension}, scaling to {new_w}x{new_h}"
    );
    image::imageops::resize(&img, new_w, new_h, FilterType::Triangle)
}

/// Number of levels in a full mip chain down to 1x1.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Levels 1.. of the mip chain for `base`, each half the previous size.
pub fn mip_levels(base: &RgbaImage) -> Vec<RgbaImage> {
    let (w, h) = base.dimensions();
    let count = mip_level_count(w, h) as usize;
    let mut levels: Vec<RgbaImage> = Vec::with_capacity(count.saturating_sub(1));

    for _ in 1..count {
        let prev = levels.last().unwrap_or(base);
        let w = (prev.width() / 2).max(1);
        let h = (prev.height() / 2).max(1);
        let next = image::imageops::resize(prev, w, h, FilterType::Triangle);
        levels.push(next);
    }
    levels
}
