//! Window geometry parsing and resolution
//!
//! Accepts the usual X11 geometry syntax `[=][<width>{xX}<height>][{+-}<x>{+-}<y>]`
//! and resolves it against the image and screen sizes.

use anyhow::{bail, Result};

/// Width/height pair in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Which dimension, if any, is derived from the other to keep the image aspect ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoDimension {
    #[default]
    None,
    Width,
    Height,
}

/// Fields present in a geometry string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParsedGeometry {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub x: Option<i32>,
    pub y: Option<i32>,
    /// Offset was written with `-`: measured from the right edge
    pub x_negative: bool,
    /// Offset was written with `-`: measured from the bottom edge
    pub y_negative: bool,
}

/// Final window rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
}

impl Geometry {
    /// Inclusive containment test against `[x, x+w] × [y, y+h]`
    pub fn contains(&self, px: i32, py: i32) -> bool {
        let (x, y) = (self.x as i32, self.y as i32);
        px >= x && px <= x + self.width as i32 && py >= y && py <= y + self.height as i32
    }
}

/// Read an unsigned decimal run starting at `pos`, returning the value and the next position
fn read_number(bytes: &[u8], pos: usize) -> Option<(i64, usize)> {
    let end = bytes[pos..]
        .iter()
        .position(|b| !b.is_ascii_digit())
        .map_or(bytes.len(), |n| pos + n);
    if end == pos {
        return None;
    }
    // Digits only, so parsing can only fail on overflow
    std::str::from_utf8(&bytes[pos..end])
        .ok()?
        .parse::<i64>()
        .ok()
        .map(|value| (value, end))
}

/// Read `{+-}<number>`, returning (value, negative, next position)
fn read_offset(bytes: &[u8], pos: usize) -> Option<(i64, bool, usize)> {
    let negative = match bytes.get(pos) {
        Some(b'+') => false,
        Some(b'-') => true,
        _ => return None,
    };
    let (value, next) = read_number(bytes, pos + 1)?;
    Some((if negative { -value } else { value }, negative, next))
}

pub fn parse_geometry(input: &str) -> Result<ParsedGeometry> {
    let invalid = || anyhow::anyhow!("Invalid geometry '{}'", input);
    let bytes = input.as_bytes();
    let mut parsed = ParsedGeometry::default();
    let mut pos = usize::from(bytes.first() == Some(&b'='));

    if let Some(&b) = bytes.get(pos)
        && b != b'+'
        && b != b'-'
        && b != b'x'
        && b != b'X'
    {
        let (width, next) = read_number(bytes, pos).ok_or_else(invalid)?;
        parsed.width = Some(u32::try_from(width).map_err(|_| invalid())?);
        pos = next;
    }

    if matches!(bytes.get(pos), Some(b'x') | Some(b'X')) {
        let (height, next) = read_number(bytes, pos + 1).ok_or_else(invalid)?;
        parsed.height = Some(u32::try_from(height).map_err(|_| invalid())?);
        pos = next;
    }

    if matches!(bytes.get(pos), Some(b'+') | Some(b'-')) {
        let (x, negative, next) = read_offset(bytes, pos).ok_or_else(invalid)?;
        parsed.x = Some(i32::try_from(x).map_err(|_| invalid())?);
        parsed.x_negative = negative;
        pos = next;

        if matches!(bytes.get(pos), Some(b'+') | Some(b'-')) {
            let (y, negative, next) = read_offset(bytes, pos).ok_or_else(invalid)?;
            parsed.y = Some(i32::try_from(y).map_err(|_| invalid())?);
            parsed.y_negative = negative;
            pos = next;
        }
    }

    if pos != bytes.len() {
        bail!("Invalid geometry '{}': unexpected '{}'", input, &input[pos..]);
    }
    Ok(parsed)
}

/// Resolve a parsed geometry against the image's intrinsic size and the screen size
pub fn resolve(
    parsed: &ParsedGeometry,
    image: Size,
    screen: Size,
    auto: AutoDimension,
) -> Result<Geometry> {
    let mut x = parsed.x.unwrap_or(0) as i64;
    let mut y = parsed.y.unwrap_or(0) as i64;
    if parsed.x_negative {
        x += screen.width as i64 - image.width as i64;
    }
    if parsed.y_negative {
        y += screen.height as i64 - image.height as i64;
    }

    let (width, height) = match (parsed.width, parsed.height) {
        (Some(width), Some(height)) => match auto {
            AutoDimension::None => (width, height),
            AutoDimension::Width if image.height > 0 => (
                (image.width as f64 * (height as f64 / image.height as f64)) as u32,
                height,
            ),
            AutoDimension::Height if image.width > 0 => (
                width,
                (image.height as f64 * (width as f64 / image.width as f64)) as u32,
            ),
            _ => bail!("Invalid geometry: image has no size"),
        },
        _ => (image.width, image.height),
    };

    if width == 0 || height == 0 {
        bail!("Invalid geometry: {}x{} (must be non-zero)", width, height);
    }
    // Image uploads address rows with a signed 16-bit offset
    let limit = i16::MAX as u32;
    if width > limit || height > limit {
        bail!("Invalid geometry: {}x{} exceeds the X11 size limit of {}", width, height, limit);
    }
    let (width, height) = (width as u16, height as u16);
    let (Ok(x), Ok(y)) = (i16::try_from(x), i16::try_from(y)) else {
        bail!("Invalid geometry: position ({}, {}) is out of range", x, y);
    };

    Ok(Geometry { x, y, width, height })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCREEN: Size = Size { width: 1920, height: 1080 };

    #[test]
    fn test_parse_full_geometry() {
        let parsed = parse_geometry("300x200+10+20").unwrap();
        assert_eq!(parsed.width, Some(300));
        assert_eq!(parsed.height, Some(200));
        assert_eq!(parsed.x, Some(10));
        assert_eq!(parsed.y, Some(20));
        assert!(!parsed.x_negative);
        assert!(!parsed.y_negative);
    }

    #[test]
    fn test_parse_partial_forms() {
        let size_only = parse_geometry("=640X480").unwrap();
        assert_eq!((size_only.width, size_only.height), (Some(640), Some(480)));
        assert_eq!((size_only.x, size_only.y), (None, None));

        let position_only = parse_geometry("-0+15").unwrap();
        assert_eq!(position_only.width, None);
        assert_eq!(position_only.x, Some(0));
        assert!(position_only.x_negative);
        assert_eq!(position_only.y, Some(15));
        assert!(!position_only.y_negative);

        let width_only = parse_geometry("800").unwrap();
        assert_eq!((width_only.width, width_only.height), (Some(800), None));

        let height_only = parse_geometry("x90").unwrap();
        assert_eq!((height_only.width, height_only.height), (None, Some(90)));

        assert_eq!(parse_geometry("").unwrap(), ParsedGeometry::default());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_geometry("abc").is_err());
        assert!(parse_geometry("100x").is_err());
        assert!(parse_geometry("100x100+").is_err());
        assert!(parse_geometry("100x100+5+5junk").is_err());
        assert!(parse_geometry("99999999999x1").is_err());
    }

    #[test]
    fn test_negative_x_offset_measured_from_right_edge() {
        let parsed = parse_geometry("-0+0").unwrap();
        let geometry = resolve(&parsed, Size::new(100, 50), SCREEN, AutoDimension::None).unwrap();
        assert_eq!(geometry.x, 1820);
        assert_eq!(geometry.y, 0);
    }

    #[test]
    fn test_negative_offsets_subtract_from_far_edges() {
        let parsed = parse_geometry("-20-30").unwrap();
        let geometry = resolve(&parsed, Size::new(100, 50), SCREEN, AutoDimension::None).unwrap();
        assert_eq!(geometry.x, 1920 - 100 - 20);
        assert_eq!(geometry.y, 1080 - 50 - 30);
    }

    #[test]
    fn test_missing_size_defaults_to_image() {
        let parsed = parse_geometry("+5+6").unwrap();
        let geometry = resolve(&parsed, Size::new(320, 240), SCREEN, AutoDimension::Width).unwrap();
        assert_eq!(geometry, Geometry { x: 5, y: 6, width: 320, height: 240 });

        // Width alone is not enough to override the image size
        let parsed = parse_geometry("500").unwrap();
        let geometry = resolve(&parsed, Size::new(320, 240), SCREEN, AutoDimension::None).unwrap();
        assert_eq!((geometry.width, geometry.height), (320, 240));
    }

    #[test]
    fn test_explicit_size_without_auto() {
        let parsed = parse_geometry("50x60").unwrap();
        let geometry = resolve(&parsed, Size::new(320, 240), SCREEN, AutoDimension::None).unwrap();
        assert_eq!((geometry.width, geometry.height), (50, 60));
        assert_eq!((geometry.x, geometry.y), (0, 0));
    }

    #[test]
    fn test_size_limited_to_signed_16_bit() {
        let parsed = parse_geometry("32767x100").unwrap();
        let geometry = resolve(&parsed, Size::new(10, 10), SCREEN, AutoDimension::None).unwrap();
        assert_eq!(geometry.width, 32767);

        for input in ["32768x100", "100x40000", "65535x65535"] {
            let parsed = parse_geometry(input).unwrap();
            assert!(resolve(&parsed, Size::new(10, 10), SCREEN, AutoDimension::None).is_err(), "{input}");
        }
    }

    #[test]
    fn test_auto_width_preserves_height() {
        let parsed = parse_geometry("1x300").unwrap();
        let geometry = resolve(&parsed, Size::new(400, 200), SCREEN, AutoDimension::Width).unwrap();
        assert_eq!(geometry.height, 300);
        assert_eq!(geometry.width, 600);
    }

    #[test]
    fn test_auto_height_preserves_width() {
        let parsed = parse_geometry("100x1").unwrap();
        let geometry = resolve(&parsed, Size::new(300, 200), SCREEN, AutoDimension::Height).unwrap();
        assert_eq!(geometry.width, 100);
        // 200 * (100 / 300) = 66.66 truncated
        assert_eq!(geometry.height, 66);
    }

    #[test]
    fn test_zero_size_is_invalid() {
        let parsed = parse_geometry("0x100").unwrap();
        assert!(resolve(&parsed, Size::new(10, 10), SCREEN, AutoDimension::None).is_err());

        // Auto height truncating to zero
        let parsed = parse_geometry("1x1").unwrap();
        assert!(resolve(&parsed, Size::new(1000, 10), SCREEN, AutoDimension::Height).is_err());
    }

    #[test]
    fn test_oversized_window_is_invalid() {
        let parsed = parse_geometry("70000x10").unwrap();
        assert!(resolve(&parsed, Size::new(10, 10), SCREEN, AutoDimension::None).is_err());
    }

    #[test]
    fn test_contains_is_inclusive() {
        let geometry = Geometry { x: 0, y: 0, width: 100, height: 100 };
        assert!(geometry.contains(0, 0));
        assert!(geometry.contains(100, 100));
        assert!(geometry.contains(50, 50));
        assert!(!geometry.contains(101, 50));
        assert!(!geometry.contains(50, -1));
        assert!(!geometry.contains(150, 50));
    }
}
