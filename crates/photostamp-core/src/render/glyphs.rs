use std::path::Path;

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, Blend};
use imageproc::rect::Rect;

use crate::error::ConfigError;

/// Draws a single line of text. `y` arguments are alphabetic baselines.
pub trait TextPainter: Send + Sync {
    /// Rendered width of `text` at `size` pixels.
    fn measure(&self, text: &str, size: f32) -> f32;

    fn draw(&self, surface: &mut RgbaImage, text: &str, x: i32, baseline: i32, size: f32, color: Rgba<u8>);
}

/// TrueType/OpenType text.
#[derive(Clone)]
pub struct FontPainter {
    font: FontArc,
}

/// Monospace faces tried when no font is given explicitly.
pub const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationMono-Regular.ttf",
    "/usr/share/fonts/liberation-mono/LiberationMono-Regular.ttf",
    "/System/Library/Fonts/Menlo.ttc",
    "/Library/Fonts/Courier New.ttf",
    "C:\\Windows\\Fonts\\consola.ttf",
    "C:\\Windows\\Fonts\\cour.ttf",
];

impl FontPainter {
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ConfigError> {
        let font = FontArc::try_from_vec(data).map_err(|e| ConfigError::Font(e.to_string()))?;
        Ok(Self { font })
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read(path)?;
        Ok(Self::from_bytes(data)?)
    }

    /// First loadable face from [`SYSTEM_FONT_CANDIDATES`].
    pub fn system_default() -> Option<Self> {
        SYSTEM_FONT_CANDIDATES.iter().find_map(|p| {
            let path = Path::new(p);
            if !path.exists() {
                return None;
            }
            match Self::from_path(path) {
                Ok(painter) => {
                    log::debug!("Using font {}", path.display());
                    Some(painter)
                }
                Err(e) => {
                    log::debug!("Skipping font {}: {}", path.display(), e);
                    None
                }
            }
        })
    }
}

impl TextPainter for FontPainter {
    fn measure(&self, text: &str, size: f32) -> f32 {
        let scaled = self.font.as_scaled(PxScale::from(size));
        let mut width = 0.0;
        let mut prev = None;
        for c in text.chars() {
            let id = scaled.glyph_id(c);
            if let Some(p) = prev {
                width += scaled.kern(p, id);
            }
            width += scaled.h_advance(id);
            prev = Some(id);
        }
        width
    }

    fn draw(&self, surface: &mut RgbaImage, text: &str, x: i32, baseline: i32, size: f32, color: Rgba<u8>) {
        let scale = PxScale::from(size);
        let ascent = self.font.as_scaled(scale).ascent();
        // draw_text_mut positions by the top of the line box.
        draw_text_mut(surface, color, x, baseline - ascent.round() as i32, scale, &self.font, text);
    }
}

const GLYPH_COLS: u32 = 5;
const GLYPH_ROWS: u32 = 7;
const ADVANCE_COLS: u32 = GLYPH_COLS + 1;

/// Built-in 5x7 block glyphs covering what timestamps use: digits, `/ - : . _` and space.
/// Other characters advance without drawing.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockPainter;

fn glyph_rows(c: char) -> [u8; 7] {
    match c {
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
        '/' => [0x01, 0x01, 0x02, 0x04, 0x08, 0x10, 0x10],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        _ => [0; 7],
    }
}

impl TextPainter for BlockPainter {
    fn measure(&self, text: &str, size: f32) -> f32 {
        let unit = size / GLYPH_ROWS as f32;
        text.chars().count() as f32 * ADVANCE_COLS as f32 * unit
    }

    fn draw(&self, surface: &mut RgbaImage, text: &str, x: i32, baseline: i32, size: f32, color: Rgba<u8>) {
        let unit = size / GLYPH_ROWS as f32;
        let top = baseline as f32 - size;
        let mut canvas = Blend(std::mem::take(surface));
        for (i, c) in text.chars().enumerate() {
            let origin = x as f32 + (i as u32 * ADVANCE_COLS) as f32 * unit;
            for (row, bits) in glyph_rows(c).iter().enumerate() {
                for col in 0..GLYPH_COLS {
                    if bits & (1 << (GLYPH_COLS - 1 - col)) == 0 {
                        continue;
                    }
                    let x0 = (origin + col as f32 * unit).round() as i32;
                    let x1 = (origin + (col + 1) as f32 * unit).round() as i32;
                    let y0 = (top + row as f32 * unit).round() as i32;
                    let y1 = (top + (row + 1) as f32 * unit).round() as i32;
                    if x1 > x0 && y1 > y0 {
                        let cell = Rect::at(x0, y0).of_size((x1 - x0) as u32, (y1 - y0) as u32);
                        draw_filled_rect_mut(&mut canvas, cell, color);
                    }
                }
            }
        }
        *surface = canvas.0;
    }
}
