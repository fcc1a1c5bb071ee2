//! Burns the capture stamp into evidence photo pixels.
//!
//! The stamp is rendered as a darkened banner across the bottom of the
//! frame with white text from an embedded 5x7 glyph raster: capture time
//! (UTC), coordinates (or `NO GPS FIX`), distance to site, and the
//! verification marker. Because the stamp is pixel data rather than
//! metadata, stripping EXIF from the stored object does not remove it —
//! the evidence stays self-describing.
//!
//! The renderer works on decoded RGB8 frames as delivered by the capture
//! device; codec concerns stay outside this module.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::EvidenceError;
use crate::geo::{GeoPoint, SiteVerification};

/// Glyph cell width in pixels (before scaling).
const GLYPH_W: usize = 5;

/// Glyph cell height in pixels (before scaling).
const GLYPH_H: usize = 7;

/// Horizontal gap between glyphs (before scaling).
const GLYPH_GAP: usize = 1;

/// Banner padding around the text block (before scaling).
const PADDING: usize = 4;

/// A decoded RGB8 camera frame.
///
/// `pixels` is row-major, three bytes per pixel, length exactly
/// `width * height * 3`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Row-major RGB8 pixel data.
    pub pixels: Vec<u8>,
}

impl PhotoFrame {
    /// Validates that the dimensions match the pixel buffer.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError::InvalidFrame`] on mismatch.
    pub fn validate(&self) -> Result<(), EvidenceError> {
        let expected = (self.width as usize) * (self.height as usize) * 3;
        if expected != self.pixels.len() || self.width == 0 || self.height == 0 {
            return Err(EvidenceError::InvalidFrame {
                width: self.width,
                height: self.height,
                actual: self.pixels.len(),
            });
        }
        Ok(())
    }

    /// Encodes the frame as binary PPM (P6), the storage format for
    /// stamped evidence. PPM is codec-free: the stored object decodes to
    /// exactly the stamped pixels.
    #[must_use]
    pub fn to_ppm(&self) -> Vec<u8> {
        let header = format!("P6\n{} {}\n255\n", self.width, self.height);
        let mut bytes = Vec::with_capacity(header.len() + self.pixels.len());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&self.pixels);
        bytes
    }

    /// Creates a solid-color frame. Test and simulator helper.
    #[must_use]
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut pixels = Vec::with_capacity((width as usize) * (height as usize) * 3);
        for _ in 0..(width as usize) * (height as usize) {
            pixels.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            pixels,
        }
    }
}

/// Burns the capture stamp into the bottom of `frame`.
///
/// The banner grows with the frame so the text stays legible at phone
/// camera resolutions. Mutates the frame in place; callers upload the
/// stamped bytes, never the raw capture.
///
/// # Errors
///
/// Returns [`EvidenceError::InvalidFrame`] if the frame fails
/// [`PhotoFrame::validate`].
pub fn stamp_frame(
    frame: &mut PhotoFrame,
    captured_at_ns: u64,
    location: Option<GeoPoint>,
    verification: SiteVerification,
) -> Result<(), EvidenceError> {
    frame.validate()?;

    let lines = stamp_lines(captured_at_ns, location, verification);
    let scale = ((frame.width as usize) / 240).clamp(1, 4);

    let line_height = (GLYPH_H + 2) * scale;
    let banner_height =
        (lines.len() * line_height + 2 * PADDING * scale).min(frame.height as usize);
    let banner_top = (frame.height as usize) - banner_height;

    darken_rows(frame, banner_top);

    let mut y = banner_top + PADDING * scale;
    for line in &lines {
        draw_text(frame, PADDING * scale, y, line, scale);
        y += line_height;
    }
    Ok(())
}

/// Formats the stamp text lines.
fn stamp_lines(
    captured_at_ns: u64,
    location: Option<GeoPoint>,
    verification: SiteVerification,
) -> Vec<String> {
    #[allow(clippy::cast_possible_wrap)]
    let secs = (captured_at_ns / 1_000_000_000) as i64;
    let when = Utc
        .timestamp_opt(secs, 0)
        .single()
        .map_or_else(|| "TIME UNKNOWN".to_string(), |t| {
            t.format("%Y-%m-%d %H:%M:%S UTC").to_string()
        });

    let where_line = location.map_or_else(
        || "NO GPS FIX".to_string(),
        |p| format!("LAT {:.6} LON {:.6}", p.latitude, p.longitude),
    );

    let verdict = match verification.distance_m {
        Some(d) if verification.verified => format!("SITE {d:.0}M VERIFIED"),
        Some(d) => format!("SITE {d:.0}M OFF-SITE"),
        None => "SITE UNKNOWN UNVERIFIED".to_string(),
    };

    vec![when, where_line, verdict]
}

/// Darkens every row from `top` to the bottom of the frame.
fn darken_rows(frame: &mut PhotoFrame, top: usize) {
    let row_bytes = (frame.width as usize) * 3;
    for byte in &mut frame.pixels[top * row_bytes..] {
        *byte /= 4;
    }
}

/// Draws `text` in white at `(x, y)` with the embedded glyph raster.
fn draw_text(frame: &mut PhotoFrame, x: usize, y: usize, text: &str, scale: usize) {
    let advance = (GLYPH_W + GLYPH_GAP) * scale;
    for (i, ch) in text.chars().enumerate() {
        draw_glyph(frame, x + i * advance, y, ch, scale);
    }
}

/// Draws one glyph; characters without a raster render as blank.
fn draw_glyph(frame: &mut PhotoFrame, x: usize, y: usize, ch: char, scale: usize) {
    let Some(rows) = glyph(ch) else { return };
    let width = frame.width as usize;
    let height = frame.height as usize;

    for (row_idx, row) in rows.iter().enumerate() {
        for col in 0..GLYPH_W {
            if row & (1 << (GLYPH_W - 1 - col)) == 0 {
                continue;
            }
            for dy in 0..scale {
                for dx in 0..scale {
                    let px = x + col * scale + dx;
                    let py = y + row_idx * scale + dy;
                    if px < width && py < height {
                        let at = (py * width + px) * 3;
                        frame.pixels[at] = 0xFF;
                        frame.pixels[at + 1] = 0xFF;
                        frame.pixels[at + 2] = 0xFF;
                    }
                }
            }
        }
    }
}

/// 5x7 raster for the stamp character set. Each byte is one row, low five
/// bits used, MSB-left.
const fn glyph(ch: char) -> Option<[u8; 7]> {
    Some(match ch.to_ascii_uppercase() {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        ' ' => [0x00; 7],
        _ => return None,
    })
}
