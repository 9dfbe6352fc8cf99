//! Median-filter noise removal

use image::DynamicImage;
use imageproc::filter::median_filter;

use super::codec::{open_image, save_image};
use crate::error::TransformError;
use crate::pipeline::contract::{Outputs, Transform};
use crate::state::record::ImageRecord;

const MAX_RADIUS: u32 = 16;

#[derive(Debug, Clone)]
pub struct Denoise {
    /// Half-size of the square median window
    pub radius: u32,
}

impl Default for Denoise {
    fn default() -> Self {
        Self { radius: 1 }
    }
}

impl Denoise {
    pub fn filter(&self, image: &DynamicImage) -> Result<DynamicImage, TransformError> {
        if self.radius == 0 || self.radius > MAX_RADIUS {
            return Err(TransformError::unsupported("radius", self.radius));
        }
        let r = self.radius;
        let filtered = if image.color().has_alpha() {
            DynamicImage::ImageRgba8(median_filter(&image.to_rgba8(), r, r))
        } else {
            DynamicImage::ImageRgb8(median_filter(&image.to_rgb8(), r, r))
        };
        Ok(filtered)
    }
}

impl Transform for Denoise {
    fn name(&self) -> &'static str {
        "denoise"
    }

    fn apply(&self, record: &ImageRecord, outputs: &mut Outputs<'_>) -> Result<(), TransformError> {
        let image = open_image(&record.current_path)?;
        let filtered = self.filter(&image)?;
        let path = outputs.allocate_like_input();
        save_image(&filtered, &path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_removes_salt_noise() {
        let mut img = RgbImage::from_pixel(9, 9, Rgb([20, 20, 20]));
        img.put_pixel(4, 4, Rgb([255, 255, 255]));

        let out = Denoise::default().filter(&DynamicImage::ImageRgb8(img)).unwrap();

        assert_eq!(*out.as_rgb8().unwrap().get_pixel(4, 4), Rgb([20, 20, 20]));
    }

    #[test]
    fn test_zero_radius_is_rejected() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(3, 3));
        assert!(Denoise { radius: 0 }.filter(&img).is_err());
    }
}
