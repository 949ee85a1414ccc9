//! # QOI encoder
//!
//! Lossless "Quite OK Image" encoder used for the G-code thumbnails.
//! The byte layout follows <https://qoiformat.org/qoi-specification.pdf> exactly,
//! so any conformant QOI decoder (PanelDue, DWC, the `image` crate) can read the output.
//!
//! ## Example
//!
//! ```rust
//! use duet_rrf::qoi::QoiEncoder;
//! let pixels = vec![0xff00_0000u32; 4];
//! let mut encoder = QoiEncoder::new();
//! assert!(encoder.encode(2, 2, &pixels, false, false));
//! let bytes = &encoder.encoded()[..encoder.encoded_size()];
//! assert_eq!(&bytes[..4], b"qoif");
//! ```

use image::RgbaImage;
use thiserror::Error;

pub const QOI_MAGIC: [u8; 4] = *b"qoif";
pub const QOI_HEADER_SIZE: usize = 14;
pub const QOI_END_MARKER: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 1];
/// Same guard as the reference encoder.
pub const QOI_PIXELS_MAX: u64 = 400_000_000;

const QOI_OP_INDEX: u8 = 0x00;
const QOI_OP_DIFF: u8 = 0x40;
const QOI_OP_LUMA: u8 = 0x80;
const QOI_OP_RUN: u8 = 0xc0;
const QOI_OP_RGB: u8 = 0xfe;
const QOI_OP_RGBA: u8 = 0xff;
const QOI_MAX_RUN: u8 = 62;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QoiError {
    #[error("image dimensions must be non-zero (got {width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("image of {width}x{height} pixels exceeds the encoder capacity")]
    TooLarge { width: u32, height: u32 },
    #[error("pixel buffer holds {actual} pixels, expected {expected}")]
    PixelCount { expected: u64, actual: usize },
}

/// RGBA quadruple as seen by the encoder.
type Rgba = [u8; 4];

#[inline]
fn color_hash(px: Rgba) -> usize {
    (px[0] as usize * 3 + px[1] as usize * 5 + px[2] as usize * 7 + px[3] as usize * 11) % 64
}

#[inline]
fn unpack_argb(argb: u32, alpha: bool) -> Rgba {
    let a = if alpha { (argb >> 24) as u8 } else { 0xff };
    [(argb >> 16) as u8, (argb >> 8) as u8, argb as u8, a]
}

/// Stateful encoder. The output buffer is preallocated for the worst case and reused
/// between calls, so `encoded()` is usually longer than `encoded_size()`.
#[derive(Debug, Default)]
pub struct QoiEncoder {
    encoded: Vec<u8>,
    encoded_size: usize,
}

impl QoiEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `pixels` (row-major, `0xAARRGGBB`). Returns `false` when the image is
    /// empty, too large, or the buffer does not match `width * height`.
    pub fn encode(&mut self, width: u32, height: u32, pixels: &[u32], alpha: bool, linear_colorspace: bool) -> bool {
        match self.try_encode(width, height, pixels, alpha, linear_colorspace) {
            Ok(size) => {
                tracing::trace!("QOI encoded {}x{} into {} bytes", width, height, size);
                true
            }
            Err(e) => {
                tracing::debug!("QOI encoding failed: {}", e);
                self.encoded_size = 0;
                false
            }
        }
    }

    pub fn encoded_size(&self) -> usize {
        self.encoded_size
    }

    /// Raw output buffer; only the first `encoded_size()` bytes are meaningful.
    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    pub fn try_encode(
        &mut self,
        width: u32,
        height: u32,
        pixels: &[u32],
        alpha: bool,
        linear_colorspace: bool,
    ) -> Result<usize, QoiError> {
        if width == 0 || height == 0 {
            return Err(QoiError::EmptyImage { width, height });
        }
        let pixel_count = width as u64 * height as u64;
        if pixel_count >= QOI_PIXELS_MAX {
            return Err(QoiError::TooLarge { width, height });
        }
        if pixels.len() as u64 != pixel_count {
            return Err(QoiError::PixelCount { expected: pixel_count, actual: pixels.len() });
        }

        let channels: u8 = if alpha { 4 } else { 3 };
        let max_size = pixels.len() * (channels as usize + 1) + QOI_HEADER_SIZE + QOI_END_MARKER.len();
        if self.encoded.len() < max_size {
            self.encoded.resize(max_size, 0);
        }

        let out = &mut self.encoded;
        let mut pos = 0usize;
        let mut put = |byte: u8| {
            out[pos] = byte;
            pos += 1;
        };

        for b in QOI_MAGIC {
            put(b);
        }
        for b in width.to_be_bytes() {
            put(b);
        }
        for b in height.to_be_bytes() {
            put(b);
        }
        put(channels);
        put(linear_colorspace as u8);

        let mut index: [Rgba; 64] = [[0; 4]; 64];
        let mut prev: Rgba = [0, 0, 0, 255];
        let mut run: u8 = 0;
        let last = pixels.len() - 1;

        for (i, &argb) in pixels.iter().enumerate() {
            let px = unpack_argb(argb, alpha);

            if px == prev {
                run += 1;
                if run == QOI_MAX_RUN || i == last {
                    put(QOI_OP_RUN | (run - 1));
                    run = 0;
                }
                continue;
            }

            if run > 0 {
                put(QOI_OP_RUN | (run - 1));
                run = 0;
            }

            let hash = color_hash(px);
            if index[hash] == px {
                put(QOI_OP_INDEX | hash as u8);
            } else {
                index[hash] = px;

                if px[3] == prev[3] {
                    let vr = px[0].wrapping_sub(prev[0]) as i8 as i32;
                    let vg = px[1].wrapping_sub(prev[1]) as i8 as i32;
                    let vb = px[2].wrapping_sub(prev[2]) as i8 as i32;
                    let vg_r = vr - vg;
                    let vg_b = vb - vg;

                    if (-2..=1).contains(&vr) && (-2..=1).contains(&vg) && (-2..=1).contains(&vb) {
                        put(QOI_OP_DIFF | ((vr + 2) << 4) as u8 | ((vg + 2) << 2) as u8 | (vb + 2) as u8);
                    } else if (-8..=7).contains(&vg_r) && (-32..=31).contains(&vg) && (-8..=7).contains(&vg_b) {
                        put(QOI_OP_LUMA | (vg + 32) as u8);
                        put((((vg_r + 8) << 4) | (vg_b + 8)) as u8);
                    } else {
                        put(QOI_OP_RGB);
                        put(px[0]);
                        put(px[1]);
                        put(px[2]);
                    }
                } else {
                    put(QOI_OP_RGBA);
                    put(px[0]);
                    put(px[1]);
                    put(px[2]);
                    put(px[3]);
                }
            }
            prev = px;
        }

        for b in QOI_END_MARKER {
            put(b);
        }

        self.encoded_size = pos;
        Ok(pos)
    }
}

/// One-shot encode returning exactly the encoded bytes.
pub fn encode(width: u32, height: u32, pixels: &[u32], alpha: bool, linear_colorspace: bool) -> Result<Vec<u8>, QoiError> {
    let mut encoder = QoiEncoder::new();
    let size = encoder.try_encode(width, height, pixels, alpha, linear_colorspace)?;
    encoder.encoded.truncate(size);
    Ok(encoder.encoded)
}

/// Pack an RGBA image into the `0xAARRGGBB` layout the encoder consumes.
pub fn argb_pixels(image: &RgbaImage) -> Vec<u32> {
    image
        .pixels()
        .map(|p| {
            let [r, g, b, a] = p.0;
            (a as u32) << 24 | (r as u32) << 16 | (g as u32) << 8 | b as u32
        })
        .collect()
}

pub fn encode_rgba_image(image: &RgbaImage) -> Result<Vec<u8>, QoiError> {
    encode(image.width(), image.height(), &argb_pixels(image), true, false)
}
