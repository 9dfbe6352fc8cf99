//! Border editing: crop a margin, pad one on, or trim a uniform border away

use image::{imageops, DynamicImage, GenericImageView, Rgba, RgbaImage};
use std::str::FromStr;

use super::codec::{open_image, save_image};
use super::units::{to_pixels, ScaleUnit};
use crate::color::WHITE;
use crate::config::DEFAULT_DPI;
use crate::error::TransformError;
use crate::pipeline::contract::{Outputs, Transform};
use crate::state::record::ImageRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BorderMode {
    /// Remove the given margins
    #[default]
    Crop,
    /// Add the given margins, filled with `color`
    Pad,
    /// Remove the border that matches the corner colour
    Trim,
}

impl FromStr for BorderMode {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "crop" => Ok(BorderMode::Crop),
            "pad" | "add" => Ok(BorderMode::Pad),
            "trim" | "auto" => Ok(BorderMode::Trim),
            other => Err(TransformError::unsupported("border mode", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EditBorder {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
    pub scale: ScaleUnit,
    pub dpi: u32,
    pub mode: BorderMode,
    pub color: Rgba<u8>,
    /// Per-channel distance from the corner colour still counted as border
    pub threshold: u8,
}

impl Default for EditBorder {
    fn default() -> Self {
        Self {
            left: 0.0,
            right: 0.0,
            top: 0.0,
            bottom: 0.0,
            scale: ScaleUnit::Px,
            dpi: DEFAULT_DPI,
            mode: BorderMode::Crop,
            color: WHITE,
            threshold: 10,
        }
    }
}

/// Margins in whole pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Margins {
    left: u32,
    right: u32,
    top: u32,
    bottom: u32,
}

impl EditBorder {
    fn margins(&self, width: u32, height: u32) -> Result<Margins, TransformError> {
        let px = |value: f64, name: &'static str, reference: u32| -> Result<u32, TransformError> {
            let pixels = to_pixels(value, self.scale, self.dpi, reference).round();
            if !(0.0..=u32::MAX as f64).contains(&pixels) {
                return Err(TransformError::unsupported(name, value));
            }
            Ok(pixels as u32)
        };

        Ok(Margins {
            left: px(self.left, "left", width)?,
            right: px(self.right, "right", width)?,
            top: px(self.top, "top", height)?,
            bottom: px(self.bottom, "bottom", height)?,
        })
    }

    fn crop(&self, image: &DynamicImage) -> Result<DynamicImage, TransformError> {
        let (width, height) = image.dimensions();
        let m = self.margins(width, height)?;

        let horizontal = m.left as u64 + m.right as u64;
        let vertical = m.top as u64 + m.bottom as u64;
        if horizontal >= width as u64 || vertical >= height as u64 {
            return Err(TransformError::unsupported(
                "crop",
                format!(
                    "margins {}+{} x {}+{} leave nothing of {width}x{height}",
                    m.left, m.right, m.top, m.bottom
                ),
            ));
        }

        Ok(image.crop_imm(
            m.left,
            m.top,
            width - horizontal as u32,
            height - vertical as u32,
        ))
    }

    fn pad(&self, image: &DynamicImage) -> Result<DynamicImage, TransformError> {
        let (width, height) = image.dimensions();
        let m = self.margins(width, height)?;

        let new_width = width.checked_add(m.left).and_then(|w| w.checked_add(m.right));
        let new_height = height.checked_add(m.top).and_then(|h| h.checked_add(m.bottom));
        let (Some(new_width), Some(new_height)) = (new_width, new_height) else {
            return Err(TransformError::unsupported("pad", "resulting size overflows"));
        };

        let mut canvas = RgbaImage::from_pixel(new_width, new_height, self.color);
        imageops::overlay(&mut canvas, &image.to_rgba8(), m.left as i64, m.top as i64);

        let padded = DynamicImage::ImageRgba8(canvas);
        if image.color().has_alpha() || self.color[3] < 255 {
            Ok(padded)
        } else {
            Ok(DynamicImage::ImageRgb8(padded.to_rgb8()))
        }
    }

    fn trim(&self, image: &DynamicImage) -> DynamicImage {
        match content_bounds(&image.to_rgba8(), self.threshold) {
            Some((x, y, w, h)) => image.crop_imm(x, y, w, h),
            // Uniform image: nothing distinguishes border from content
            None => image.clone(),
        }
    }
}

/// Bounding box `(x, y, w, h)` of pixels that differ from the top-left corner
fn content_bounds(image: &RgbaImage, threshold: u8) -> Option<(u32, u32, u32, u32)> {
    let reference = *image.get_pixel_checked(0, 0)?;
    let differs = |p: &Rgba<u8>| {
        p.0.iter()
            .zip(reference.0.iter())
            .any(|(a, b)| a.abs_diff(*b) > threshold)
    };

    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in image.enumerate_pixels() {
        if differs(pixel) {
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
    }

    bounds.map(|(x0, y0, x1, y1)| (x0, y0, x1 - x0 + 1, y1 - y0 + 1))
}

impl Transform for EditBorder {
    fn name(&self) -> &'static str {
        "edit-border"
    }

    fn apply(&self, record: &ImageRecord, outputs: &mut Outputs<'_>) -> Result<(), TransformError> {
        let image = open_image(&record.current_path)?;

        let edited = match self.mode {
            BorderMode::Crop => self.crop(&image)?,
            BorderMode::Pad => self.pad(&image)?,
            BorderMode::Trim => self.trim(&image),
        };

        let path = outputs.allocate_like_input();
        save_image(&edited, &path)
    }
}
