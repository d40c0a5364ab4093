//! One-shot still export of the live scene.
//!
//! A capture borrows the renderer, switches it to the requested size and pixel
//! density, renders exactly one frame and encodes it. The previous settings are
//! put back by a guard, so they are restored on every way out of [`capture`],
//! including errors and panics inside the render call.

use std::{
    io::Cursor,
    ops::{Deref, DerefMut},
};

use anyhow::Context as _;
use image::{
    DynamicImage, ExtendedColorType, ImageEncoder, RgbaImage,
    codecs::{jpeg::JpegEncoder, png::PngEncoder, webp::WebPEncoder},
};

use crate::error::ViewerError;

/// Quality used for lossy formats when the request names none.
pub const DEFAULT_QUALITY: f32 = 0.92;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CaptureFormat {
    #[default]
    Png,
    Jpeg,
    WebP,
}

impl CaptureFormat {
    /// Unknown types fall back to PNG, like a browser canvas does.
    pub fn from_mime(mime: &str) -> Self {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => CaptureFormat::Jpeg,
            "image/webp" => CaptureFormat::WebP,
            "image/png" => CaptureFormat::Png,
            other => {
                log::warn!("Unsupported capture type {other}, using image/png");
                CaptureFormat::Png
            }
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            CaptureFormat::Png => "image/png",
            CaptureFormat::Jpeg => "image/jpeg",
            CaptureFormat::WebP => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            CaptureFormat::Png => "png",
            CaptureFormat::Jpeg => "jpg",
            CaptureFormat::WebP => "webp",
        }
    }
}

/// Overrides for one capture. Unset fields keep the renderer's current value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CaptureRequest {
    pub format: CaptureFormat,
    pub pixel_density: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// 0..1, only used by JPEG.
    pub quality: Option<f32>,
}

impl CaptureRequest {
    pub fn new(format: CaptureFormat) -> Self {
        Self {
            format,
            ..Default::default()
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_pixel_density(mut self, pixel_density: f64) -> Self {
        self.pixel_density = Some(pixel_density);
        self
    }

    pub fn with_quality(mut self, quality: f32) -> Self {
        self.quality = Some(quality);
        self
    }
}

/// The renderer state a capture is allowed to touch.
///
/// `width` and `height` are logical and may be fractional; the rendered image is
/// `width * pixel_density` by `height * pixel_density` pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderSettings {
    pub width: f64,
    pub height: f64,
    pub pixel_density: f64,
    pub xr_enabled: bool,
}

impl RenderSettings {
    /// Settings for a surface of `width` x `height` physical pixels.
    pub fn from_physical(width: u32, height: u32, pixel_density: f64, xr_enabled: bool) -> Self {
        Self {
            width: f64::from(width) / pixel_density,
            height: f64::from(height) / pixel_density,
            pixel_density,
            xr_enabled,
        }
    }

    pub fn physical_size(&self) -> (u32, u32) {
        let scale = |v: f64| ((v * self.pixel_density).round() as u32).max(1);
        (scale(self.width), scale(self.height))
    }
}

/// Something that can render the live scene into an image on demand.
pub trait CaptureTarget {
    fn settings(&self) -> RenderSettings;

    fn apply_settings(&mut self, settings: RenderSettings) -> anyhow::Result<()>;

    /// Render one frame with the current settings and read it back.
    fn render_still(&mut self) -> anyhow::Result<RgbaImage>;
}

/// Puts the saved settings back when dropped.
struct Restore<'a, C: CaptureTarget + ?Sized> {
    target: &'a mut C,
    saved: RenderSettings,
}

impl<'a, C: CaptureTarget + ?Sized> Restore<'a, C> {
    fn new(target: &'a mut C) -> Self {
        let saved = target.settings();
        Self { target, saved }
    }
}

impl<C: CaptureTarget + ?Sized> Deref for Restore<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.target
    }
}

impl<C: CaptureTarget + ?Sized> DerefMut for Restore<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.target
    }
}

impl<C: CaptureTarget + ?Sized> Drop for Restore<'_, C> {
    fn drop(&mut self) {
        if let Err(err) = self.target.apply_settings(self.saved) {
            log::error!("Could not restore render settings after capture: {err:#}");
        }
    }
}

/// Capture the current frame. Failures are logged and reported as `None`; the
/// live viewer is unaffected either way.
pub fn capture<C: CaptureTarget + ?Sized>(
    target: &mut C,
    request: &CaptureRequest,
) -> Option<Vec<u8>> {
    match try_capture(target, request) {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            log::warn!("{err}");
            None
        }
    }
}

pub fn try_capture<C: CaptureTarget + ?Sized>(
    target: &mut C,
    request: &CaptureRequest,
) -> Result<Vec<u8>, ViewerError> {
    let image = {
        let mut guard = Restore::new(target);
        let saved = guard.saved;
        let overrides = RenderSettings {
            width: request.width.map_or(saved.width, f64::from),
            height: request.height.map_or(saved.height, f64::from),
            pixel_density: request.pixel_density.unwrap_or(saved.pixel_density),
            xr_enabled: false,
        };
        guard
            .apply_settings(overrides)
            .and_then(|_| guard.render_still())
            .map_err(|err| ViewerError::Capture(format!("{err:#}")))?
    };
    encode(&image, request.format, request.quality)
        .map_err(|err| ViewerError::Capture(format!("{err:#}")))
}

/// Encode `image` in `format`. `quality` (0..1) is mapped to the JPEG scale 1..100.
pub fn encode(
    image: &RgbaImage,
    format: CaptureFormat,
    quality: Option<f32>,
) -> anyhow::Result<Vec<u8>> {
    let (width, height) = image.dimensions();
    let mut bytes = Cursor::new(Vec::new());
    let encoded = match format {
        CaptureFormat::Png => PngEncoder::new(&mut bytes).write_image(
            image.as_raw(),
            width,
            height,
            ExtendedColorType::Rgba8,
        ),
        CaptureFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            JpegEncoder::new_with_quality(&mut bytes, jpeg_quality(quality)).write_image(
                rgb.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )
        }
        CaptureFormat::WebP => WebPEncoder::new_lossless(&mut bytes).write_image(
            image.as_raw(),
            width,
            height,
            ExtendedColorType::Rgba8,
        ),
    };
    encoded.with_context(|| format!("could not encode {}", format.mime()))?;
    Ok(bytes.into_inner())
}

fn jpeg_quality(quality: Option<f32>) -> u8 {
    let quality = quality
        .filter(|q| q.is_finite() && (0.0..=1.0).contains(q))
        .unwrap_or(DEFAULT_QUALITY);
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}
