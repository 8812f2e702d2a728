//! Timestamp overlay drawing.
//!
//! [`Renderer::render`] always redraws the whole surface from the decoded image, so calling it
//! again with the same inputs yields the same pixels. Text is drawn through a [`TextPainter`]:
//! [`FontPainter`] for real fonts, [`BlockPainter`] as the built-in fallback.

pub mod color;
pub mod glyphs;

use std::sync::Arc;

use image::{imageops, RgbaImage};
use imageproc::filter::gaussian_blur_f32;
use serde::{Deserialize, Serialize};

use crate::date::DateFormat;
use crate::error::ConfigError;

pub use color::Color;
pub use glyphs::{BlockPainter, FontPainter, TextPainter};

pub const MIN_FONT_SIZE: u32 = 12;
pub const MAX_FONT_SIZE: u32 = 150;
const FONT_SIZE_RATIO: f32 = 0.03;
const DEFAULT_SHADOW_OFFSET: f32 = 2.0;
const DEFAULT_SHADOW_COLOR: Color = Color::rgba(0, 0, 0, 128);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Position {
    #[default]
    BottomRight,
    BottomLeft,
    TopRight,
    TopLeft,
}

impl std::str::FromStr for Position {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bottom-right" => Ok(Position::BottomRight),
            "bottom-left" => Ok(Position::BottomLeft),
            "top-right" => Ok(Position::TopRight),
            "top-left" => Ok(Position::TopLeft),
            _ => Err(format!("unknown position '{}'", s)),
        }
    }
}

/// Style of the overlay, shared by every image in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimestampConfig {
    pub format: DateFormat,
    pub position: Position,
    pub color: Color,
    /// `None` (or 0) picks a size from the image width
    pub font_size: Option<u32>,
    pub shadow_blur: f32,
    pub shadow_offset_x: Option<f32>,
    pub shadow_offset_y: Option<f32>,
    pub shadow_color: Option<Color>,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            format: DateFormat::YmdSlash,
            position: Position::BottomRight,
            color: Color::rgba(0xFF, 0x6B, 0x35, 0xFF),
            font_size: Some(48),
            shadow_blur: 0.0,
            shadow_offset_x: None,
            shadow_offset_y: None,
            shadow_color: None,
        }
    }
}

impl TimestampConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.font_size {
            Some(size) if size != 0 && !(MIN_FONT_SIZE..=MAX_FONT_SIZE).contains(&size) => {
                Err(ConfigError::FontSize(size))
            }
            _ => Ok(()),
        }
    }
}

/// Partial style update. Unset fields leave the target untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigPatch {
    pub format: Option<DateFormat>,
    pub position: Option<Position>,
    pub color: Option<Color>,
    /// 0 switches back to automatic sizing; other values are clamped to 12..=150
    pub font_size: Option<u32>,
    pub shadow_blur: Option<f32>,
    pub shadow_offset_x: Option<f32>,
    pub shadow_offset_y: Option<f32>,
    pub shadow_color: Option<Color>,
}

impl ConfigPatch {
    pub fn apply(&self, config: &TimestampConfig) -> TimestampConfig {
        let mut next = config.clone();
        if let Some(format) = self.format {
            next.format = format;
        }
        if let Some(position) = self.position {
            next.position = position;
        }
        if let Some(color) = self.color {
            next.color = color;
        }
        if let Some(size) = self.font_size {
            next.font_size = (size != 0).then(|| size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE));
        }
        if let Some(blur) = self.shadow_blur {
            next.shadow_blur = blur.max(0.0);
        }
        if self.shadow_offset_x.is_some() {
            next.shadow_offset_x = self.shadow_offset_x;
        }
        if self.shadow_offset_y.is_some() {
            next.shadow_offset_y = self.shadow_offset_y;
        }
        if self.shadow_color.is_some() {
            next.shadow_color = self.shadow_color;
        }
        next
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub x: f32,
    pub y: f32,
}

/// Default font size for an image: 3% of its width, kept within 12..=150.
pub fn calculate_font_size(image_width: u32) -> u32 {
    let size = (image_width as f32 * FONT_SIZE_RATIO).round() as u32;
    size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE)
}

/// Text origin for a corner. `y` is a baseline, so top corners add the text height.
pub fn calculate_position(position: Position, image: Size, text: Size, padding: f32) -> Coordinates {
    match position {
        Position::BottomRight => Coordinates {
            x: image.width - text.width - padding,
            y: image.height - text.height - padding,
        },
        Position::BottomLeft => Coordinates {
            x: padding,
            y: image.height - text.height - padding,
        },
        Position::TopRight => Coordinates {
            x: image.width - text.width - padding,
            y: padding + text.height,
        },
        Position::TopLeft => Coordinates {
            x: padding,
            y: padding + text.height,
        },
    }
}

#[derive(Clone)]
pub struct Renderer {
    painter: Arc<dyn TextPainter>,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(Arc::new(BlockPainter))
    }
}

impl Renderer {
    pub fn new(painter: Arc<dyn TextPainter>) -> Self {
        Self { painter }
    }

    /// Redraw `surface` as `image` with `text` overlaid per `config`.
    pub fn render(&self, surface: &mut RgbaImage, image: &RgbaImage, text: &str, config: &TimestampConfig) {
        let (width, height) = image.dimensions();
        *surface = RgbaImage::new(width, height);
        imageops::replace(surface, image, 0, 0);

        let font_size = config
            .font_size
            .filter(|&s| s > 0)
            .unwrap_or_else(|| calculate_font_size(width)) as f32;
        let text_size = Size {
            width: self.painter.measure(text, font_size),
            height: font_size,
        };
        let padding = (font_size * 0.5).round();
        let at = calculate_position(
            config.position,
            Size {
                width: width as f32,
                height: height as f32,
            },
            text_size,
            padding,
        );
        let (x, y) = (at.x.round() as i32, at.y.round() as i32);

        // The shadow lives on its own layer, so nothing carries over to later draws.
        if config.shadow_blur > 0.0 {
            let offset_x = config.shadow_offset_x.unwrap_or(DEFAULT_SHADOW_OFFSET).round() as i32;
            let offset_y = config.shadow_offset_y.unwrap_or(DEFAULT_SHADOW_OFFSET).round() as i32;
            let shadow_color = config.shadow_color.unwrap_or(DEFAULT_SHADOW_COLOR).to_rgba();

            let mut layer = RgbaImage::new(width, height);
            self.painter
                .draw(&mut layer, text, x + offset_x, y + offset_y, font_size, shadow_color);
            let layer = gaussian_blur_f32(&layer, config.shadow_blur / 2.0);
            imageops::overlay(surface, &layer, 0, 0);
        }

        self.painter
            .draw(surface, text, x, y, font_size, config.color.to_rgba());
    }
}
