//! Image compositing for the overlay background
//!
//! Everything here works on client-side pixel buffers: the result is a
//! [`Background`] ready to be uploaded with PutImage. Uploading lives in
//! `overlay`, decoding and scaling are done by the `image` crate.

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::constants::{render, x11};
use crate::geometry::Size;

/// Byte or bit order as announced by the X server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    LsbFirst,
    MsbFirst,
}

/// How the server expects image data to be laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelLayout {
    /// Byte order of depth-32 pixels
    pub byte_order: Order,
    /// Bit order within bytes of a depth-1 bitmap
    pub bit_order: Order,
    /// Scanline padding of a depth-1 bitmap, in bits
    pub bitmap_scanline_pad: u8,
}

impl Default for PixelLayout {
    fn default() -> Self {
        Self {
            byte_order: Order::LsbFirst,
            bit_order: Order::LsbFirst,
            bitmap_scanline_pad: 32,
        }
    }
}

/// Depth-1 shape mask, one bit per pixel, rows padded to the scanline pad
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeMask {
    pub data: Vec<u8>,
    /// Bytes per row
    pub stride: usize,
}

/// Rendered window background
#[derive(Debug, Clone)]
pub struct Background {
    pub size: Size,
    /// Depth-32 pixels in server byte order, 4 bytes per pixel, no row padding
    pub pixels: Vec<u8>,
    /// `None` when every pixel is inside the shape
    pub mask: Option<ShapeMask>,
}

impl Background {
    pub fn stride(&self) -> usize {
        self.size.width as usize * x11::ARGB_BYTES_PER_PIXEL
    }
}

/// Decode an image file into straight (non-premultiplied) RGBA
pub fn load_image(path: &Path) -> Result<RgbaImage> {
    let data = fs::read(path)
        .with_context(|| format!("Failed to read image file: {}", path.display()))?;
    let image = image::load_from_memory(&data)
        .with_context(|| format!("Failed to decode image: {}", path.display()))?;
    Ok(image.to_rgba8())
}

pub fn scale(image: &RgbaImage, size: Size) -> RgbaImage {
    if image.dimensions() == (size.width, size.height) {
        return image.clone();
    }
    imageops::resize(image, size.width, size.height, FilterType::Triangle)
}

/// Lookup table scaling alpha by `alpha`; color channels are left alone
pub fn alpha_table(alpha: f64) -> [u8; 256] {
    let mut table = [0u8; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        *entry = (i as f64 * alpha) as u8;
    }
    table
}

pub fn apply_alpha_table(image: &mut RgbaImage, table: &[u8; 256]) {
    for pixel in image.pixels_mut() {
        pixel[3] = table[pixel[3] as usize];
    }
}

/// Blend onto opaque black, then restore the source alpha
pub fn premultiply(image: &mut RgbaImage) {
    for pixel in image.pixels_mut() {
        let alpha = pixel[3] as u32;
        for channel in &mut pixel.0[..3] {
            *channel = ((*channel as u32 * alpha + 127) / 255) as u8;
        }
    }
}

pub fn shape_mask(image: &RgbaImage, layout: &PixelLayout) -> Option<ShapeMask> {
    if image.pixels().all(|p| p[3] >= render::MASK_ALPHA_THRESHOLD) {
        return None;
    }

    let pad = layout.bitmap_scanline_pad.max(8) as usize;
    let stride = (image.width() as usize).div_ceil(pad) * pad / 8;
    let mut data = vec![0u8; stride * image.height() as usize];

    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel[3] < render::MASK_ALPHA_THRESHOLD {
            continue;
        }
        let x = x as usize;
        let bit = match layout.bit_order {
            Order::LsbFirst => x % 8,
            Order::MsbFirst => 7 - x % 8,
        };
        data[y as usize * stride + x / 8] |= 1 << bit;
    }

    Some(ShapeMask { data, stride })
}

/// Pack RGBA into depth-32 ZPixmap bytes
pub fn pack_pixels(image: &RgbaImage, order: Order) -> Vec<u8> {
    let mut data = Vec::with_capacity(image.as_raw().len());
    for pixel in image.pixels() {
        let [r, g, b, a] = pixel.0;
        match order {
            Order::LsbFirst => data.extend_from_slice(&[b, g, r, a]),
            Order::MsbFirst => data.extend_from_slice(&[a, r, g, b]),
        }
    }
    data
}

/// Scale the image to the window and build its background.
///
/// The mask always comes from the scaled image before translucency is
/// applied, so a faint overlay keeps its full shape. With `alpha == 1.0`
/// the pixels are the scaled image untouched.
pub fn compose(image: &RgbaImage, size: Size, alpha: f64, layout: &PixelLayout) -> Background {
    let mut scaled = scale(image, size);
    let mask = shape_mask(&scaled, layout);

    if alpha < 1.0 {
        debug!(alpha = alpha, "Applying translucency");
        apply_alpha_table(&mut scaled, &alpha_table(alpha));
        premultiply(&mut scaled);
    }

    Background {
        size,
        pixels: pack_pixels(&scaled, layout.byte_order),
        mask,
    }
}
