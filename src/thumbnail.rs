//! # G-code thumbnails
//!
//! Turns a scene snapshot into one QOI thumbnail per configured size and wraps each one
//! as base64 inside G-code comments:
//!
//! ```text
//! ; thumbnail_QOI begin 48x48 1234
//! ; <up to 78 base64 characters>
//! ; thumbnail_QOI end
//! ```
//!
//! Thumbnail problems never fail a job: a size that cannot be produced is skipped and a
//! missing renderer yields no thumbnails at all.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::RgbaImage;
use image::imageops::{self, FilterType};
use thiserror::Error;

use crate::qoi::{self, QoiError};
use crate::source::Renderer;

/// Longest base64 payload per comment line.
pub const MAX_ROW_LENGTH: usize = 78;

/// Marks G-code that already carries our header and thumbnails.
pub const EXPORT_MARKER: &str = ";Exported with duet-rrf";

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("invalid thumbnail size '{0}', expected WIDTHxHEIGHT with non-zero dimensions")]
    InvalidSize(String),
    #[error("snapshot is empty")]
    EmptySnapshot,
    #[error("QOI encoding failed: {0}")]
    Encode(#[from] QoiError),
}

/// Ordered list of `(width, height)` thumbnail sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailSpec {
    sizes: Vec<(u32, u32)>,
}

impl Default for ThumbnailSpec {
    fn default() -> Self {
        Self { sizes: vec![(48, 48), (240, 240), (320, 320)] }
    }
}

impl ThumbnailSpec {
    pub fn new(sizes: Vec<(u32, u32)>) -> Result<Self, ThumbnailError> {
        if let Some(&(w, h)) = sizes.iter().find(|(w, h)| *w == 0 || *h == 0) {
            return Err(ThumbnailError::InvalidSize(format!("{}x{}", w, h)));
        }
        Ok(Self { sizes })
    }

    /// Parse `"48x48, 240x240"`. Empty entries are ignored, so `""` is an empty spec.
    pub fn parse(s: &str) -> Result<Self, ThumbnailError> {
        let mut sizes = Vec::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let invalid = || ThumbnailError::InvalidSize(entry.to_string());
            let (w, h) = entry
                .split_once(['x', 'X'])
                .ok_or_else(invalid)?;
            let w: u32 = w.trim().parse().map_err(|_| invalid())?;
            let h: u32 = h.trim().parse().map_err(|_| invalid())?;
            sizes.push((w, h));
        }
        Self::new(sizes)
    }

    pub fn sizes(&self) -> &[(u32, u32)] {
        &self.sizes
    }
}

/// Whether thumbnails are embedded, and at which sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThumbnailSettings {
    pub enabled: bool,
    pub spec: ThumbnailSpec,
}

/// Crop to the bounding box of all non-transparent pixels.
pub fn crop_to_content(image: &RgbaImage) -> RgbaImage {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, px) in image.enumerate_pixels() {
        if px.0[3] == 0 {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((min_x, min_y, max_x, max_y)) => (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y)),
        });
    }
    match bounds {
        Some((min_x, min_y, max_x, max_y)) => {
            tracing::debug!("Cropped thumbnail to {}, {}, {}, {}.", min_x, min_y, max_x - min_x + 1, max_y - min_y + 1);
            imageops::crop_imm(image, min_x, min_y, max_x - min_x + 1, max_y - min_y + 1).to_image()
        }
        None => image.clone(),
    }
}

/// Scale to fit inside `width x height` keeping the aspect ratio, then center on a
/// transparent canvas of exactly that size.
pub fn fit_thumbnail(image: &RgbaImage, width: u32, height: u32) -> Result<RgbaImage, ThumbnailError> {
    let (src_w, src_h) = image.dimensions();
    if src_w == 0 || src_h == 0 {
        return Err(ThumbnailError::EmptySnapshot);
    }
    // checked before resizing so an oversized entry never allocates its canvas
    if width as u64 * height as u64 >= qoi::QOI_PIXELS_MAX {
        return Err(QoiError::TooLarge { width, height }.into());
    }

    let scaled_h = (src_h as u64 * width as u64 + src_w as u64 / 2) / src_w as u64;
    let (scaled_w, scaled_h) = if scaled_h <= height as u64 {
        (width, scaled_h.max(1) as u32)
    } else {
        let scaled_w = (src_w as u64 * height as u64 + src_h as u64 / 2) / src_h as u64;
        (scaled_w.clamp(1, width as u64) as u32, height)
    };
    let scaled = imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle);

    if scaled_w == width && scaled_h == height {
        return Ok(scaled);
    }
    let mut canvas = RgbaImage::new(width, height);
    let dx = (width - scaled_w) / 2;
    let dy = (height - scaled_h) / 2;
    imageops::replace(&mut canvas, &scaled, dx as i64, dy as i64);
    tracing::trace!("Centered {}x{} thumbnail inside {}x{} (offset {}, {})", scaled_w, scaled_h, width, height, dx, dy);
    Ok(canvas)
}

/// Wrap encoded QOI bytes as a G-code comment block.
pub fn format_block(width: u32, height: u32, qoi_data: &[u8]) -> String {
    let b64 = STANDARD.encode(qoi_data);
    let mut block = format!("; thumbnail_QOI begin {}x{} {}\n", width, height, b64.len());
    // base64 output is ASCII, so byte chunks are valid UTF-8
    for row in b64.as_bytes().chunks(MAX_ROW_LENGTH) {
        block.push_str("; ");
        block.push_str(std::str::from_utf8(row).unwrap_or_default());
        block.push('\n');
    }
    block.push_str("; thumbnail_QOI end\n");
    block
}

pub fn render_thumbnail_block(snapshot: &RgbaImage, width: u32, height: u32) -> Result<String, ThumbnailError> {
    let thumbnail = fit_thumbnail(snapshot, width, height)?;
    let qoi_data = qoi::encode_rgba_image(&thumbnail)?;
    tracing::debug!("Encoded {}x{} thumbnail in QOI format ({} bytes).", width, height, qoi_data.len());
    Ok(format_block(width, height, &qoi_data))
}

/// Produce all thumbnail blocks for `spec`. Returns an empty string when the renderer
/// cannot provide a snapshot.
pub fn generate_thumbnails(renderer: &dyn Renderer, spec: &ThumbnailSpec) -> String {
    tracing::debug!("Rendering thumbnail image...");
    let snapshot = match renderer.snapshot() {
        Ok(snapshot) => crop_to_content(&snapshot),
        Err(e) => {
            tracing::warn!("Failed to create snapshot, continuing without thumbnails: {}", e);
            return String::new();
        }
    };

    let mut out = String::new();
    for &(width, height) in spec.sizes() {
        match render_thumbnail_block(&snapshot, width, height) {
            Ok(block) => out.push_str(&block),
            Err(e) => tracing::warn!("Skipping {}x{} thumbnail: {}", width, height, e),
        }
    }
    out
}

/// Prepend the export marker and `thumbnails` to `gcode`, unless the marker is
/// already present.
pub fn embed_thumbnails(gcode: &str, thumbnails: &str) -> Option<String> {
    if gcode.contains(EXPORT_MARKER) {
        tracing::warn!("G-code already carries embedded thumbnails");
        return None;
    }
    let mut out = String::with_capacity(gcode.len() + thumbnails.len() + 64);
    out.push_str(EXPORT_MARKER);
    out.push_str(" v");
    out.push_str(env!("CARGO_PKG_VERSION"));
    out.push('\n');
    out.push_str(thumbnails);
    out.push_str(gcode);
    Some(out)
}

/// Apply `settings` to freshly serialized G-code.
pub fn prepare_gcode(gcode: String, renderer: Option<&dyn Renderer>, settings: &ThumbnailSettings) -> String {
    if !settings.enabled {
        tracing::debug!("Skipping disabled thumbnail embedding.");
        return gcode;
    }
    let thumbnails = match renderer {
        Some(renderer) => generate_thumbnails(renderer, &settings.spec),
        None => {
            tracing::warn!("No renderer available, continuing without thumbnails");
            String::new()
        }
    };
    embed_thumbnails(&gcode, &thumbnails).unwrap_or(gcode)
}
