//! Resize to an explicit size, in pixels or physical units

use image::imageops::FilterType;
use image::GenericImageView;

use super::codec::{open_image, save_image};
use super::units::{to_pixels, ScaleUnit};
use crate::config::DEFAULT_DPI;
use crate::error::TransformError;
use crate::pipeline::contract::{Outputs, Transform};
use crate::state::record::ImageRecord;

/// Target size. Giving only one dimension keeps the aspect ratio.
#[derive(Debug, Clone)]
pub struct Resize {
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub dpi: u32,
    pub scale: ScaleUnit,
}

impl Default for Resize {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            dpi: DEFAULT_DPI,
            scale: ScaleUnit::Px,
        }
    }
}

impl Resize {
    pub fn pixels(width: u32, height: u32) -> Self {
        Self {
            width: Some(width as f64),
            height: Some(height as f64),
            ..Default::default()
        }
    }

    /// Final pixel size for an image of `width` x `height`
    pub fn target_size(&self, width: u32, height: u32) -> Result<(u32, u32), TransformError> {
        let to_px = |value: f64, reference: u32| to_pixels(value, self.scale, self.dpi, reference);
        let aspect = width as f64 / height.max(1) as f64;

        let (w, h) = match (self.width, self.height) {
            (Some(w), Some(h)) => (to_px(w, width), to_px(h, height)),
            (Some(w), None) => {
                let w = to_px(w, width);
                (w, w / aspect)
            }
            (None, Some(h)) => {
                let h = to_px(h, height);
                (h * aspect, h)
            }
            (None, None) => return Err(TransformError::unsupported("size", "neither width nor height given")),
        };

        let (w, h) = (w.round(), h.round());
        if !(w >= 1.0 && h >= 1.0) || w > u32::MAX as f64 || h > u32::MAX as f64 {
            return Err(TransformError::unsupported("size", format!("{w}x{h}")));
        }
        Ok((w as u32, h as u32))
    }
}

impl Transform for Resize {
    fn name(&self) -> &'static str {
        "resize"
    }

    fn apply(&self, record: &ImageRecord, outputs: &mut Outputs<'_>) -> Result<(), TransformError> {
        let image = open_image(&record.current_path)?;
        let (width, height) = image.dimensions();
        let (target_w, target_h) = self.target_size(width, height)?;

        let resized = image.resize_exact(target_w, target_h, FilterType::Lanczos3);

        let path = outputs.allocate_like_input();
        save_image(&resized, &path)
    }
}
