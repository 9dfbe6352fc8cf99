//! Format conversion: JPEG, and AVIF when built with the `avif` feature

use image::Rgba;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use super::codec::{open_image, write_jpeg};
use crate::color::{flatten, WHITE};
use crate::config::DEFAULT_DPI;
use crate::error::TransformError;
use crate::pipeline::contract::{Outputs, Transform};
use crate::state::record::ImageRecord;

/// Re-encode as JPEG, compositing any transparency onto `background`
#[derive(Debug, Clone)]
pub struct ToJpeg {
    pub quality: u8,
    pub background: Rgba<u8>,
    pub dpi: u32,
}

impl Default for ToJpeg {
    fn default() -> Self {
        Self {
            quality: 95,
            background: WHITE,
            dpi: DEFAULT_DPI,
        }
    }
}

impl Transform for ToJpeg {
    fn name(&self) -> &'static str {
        "to-jpeg"
    }

    fn apply(&self, record: &ImageRecord, outputs: &mut Outputs<'_>) -> Result<(), TransformError> {
        if !(1..=100).contains(&self.quality) {
            return Err(TransformError::unsupported("quality", self.quality));
        }
        let image = open_image(&record.current_path)?;
        let flat = flatten(&image, self.background);

        let path = outputs.allocate("jpg");
        debug!(record = %record.id, quality = self.quality, "Encoding JPEG");
        write_jpeg(&flat, self.quality, self.dpi, &path)
    }
}

/// Chroma subsampling of an AVIF file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Subsampling {
    #[default]
    Yuv444,
    Yuv422,
    Yuv420,
    Yuv400,
}

impl FromStr for Subsampling {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().replace(':', "").as_str() {
            "444" => Ok(Subsampling::Yuv444),
            "422" => Ok(Subsampling::Yuv422),
            "420" => Ok(Subsampling::Yuv420),
            "400" => Ok(Subsampling::Yuv400),
            _ => Err(TransformError::unsupported("subsampling", s)),
        }
    }
}

impl fmt::Display for Subsampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Subsampling::Yuv444 => "4:4:4",
            Subsampling::Yuv422 => "4:2:2",
            Subsampling::Yuv420 => "4:2:0",
            Subsampling::Yuv400 => "4:0:0",
        };
        f.write_str(label)
    }
}

/// Re-encode as AVIF
#[derive(Debug, Clone)]
pub struct ToAvif {
    /// 1 (worst) to 100 (lossless)
    pub quality: u8,
    /// 1 (slowest, smallest) to 10 (fastest)
    pub speed: u8,
    /// Flatten transparency onto `background` instead of keeping an alpha plane
    pub no_alpha: bool,
    pub background: Rgba<u8>,
    /// The encoder writes full-resolution chroma only
    pub subsampling: Subsampling,
}

impl Default for ToAvif {
    fn default() -> Self {
        Self {
            quality: 80,
            speed: 6,
            no_alpha: false,
            background: WHITE,
            subsampling: Subsampling::Yuv444,
        }
    }
}

impl ToAvif {
    fn validate(&self) -> Result<(), TransformError> {
        if !(1..=100).contains(&self.quality) {
            return Err(TransformError::unsupported("quality", self.quality));
        }
        if !(1..=10).contains(&self.speed) {
            return Err(TransformError::unsupported("speed", self.speed));
        }
        if self.subsampling != Subsampling::Yuv444 {
            return Err(TransformError::unsupported("subsampling", self.subsampling));
        }
        Ok(())
    }
}

impl Transform for ToAvif {
    fn name(&self) -> &'static str {
        "to-avif"
    }

    #[cfg(feature = "avif")]
    fn apply(&self, record: &ImageRecord, outputs: &mut Outputs<'_>) -> Result<(), TransformError> {
        use image::codecs::avif::AvifEncoder;
        use image::{ExtendedColorType, ImageEncoder};
        use std::fs::File;
        use std::io::BufWriter;

        self.validate()?;
        let image = open_image(&record.current_path)?;

        let path = outputs.allocate("avif");
        let file = File::create(&path).map_err(|e| TransformError::resource(&path, "create", e))?;
        let encoder = AvifEncoder::new_with_speed_quality(BufWriter::new(file), self.speed, self.quality);

        let written = if image.color().has_alpha() && !self.no_alpha {
            let rgba = image.to_rgba8();
            encoder.write_image(rgba.as_raw(), rgba.width(), rgba.height(), ExtendedColorType::Rgba8)
        } else {
            let rgb = flatten(&image, self.background);
            encoder.write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
        };
        written.map_err(|e| TransformError::resource(&path, "encode", e))
    }

    #[cfg(not(feature = "avif"))]
    fn apply(&self, _record: &ImageRecord, _outputs: &mut Outputs<'_>) -> Result<(), TransformError> {
        self.validate()?;
        Err(TransformError::unsupported(
            "output format",
            "avif (built without the `avif` feature)",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::pipeline::contract::{run_unit, TransformOutcome};
    use crate::session::SessionManager;
    use image::{DynamicImage, GenericImageView, RgbaImage};
    use tempfile::TempDir;

    #[test]
    fn test_to_jpeg_flattens_transparency() {
        let data = TempDir::new().unwrap();
        let session = SessionManager::new(data.path()).create().unwrap();
        let source = data.path().join("logo.png");
        let img = RgbaImage::from_pixel(16, 16, Rgba([0, 0, 0, 0]));
        DynamicImage::ImageRgba8(img).save(&source).unwrap();
        let record = ImageRecord::pending_import(session.id().clone(), &source);

        let outcome = run_unit(&ToJpeg::default(), &session, &record);

        let TransformOutcome::Succeeded { produced, .. } = outcome else {
            panic!("expected success");
        };
        assert_eq!(produced[0].extension().as_deref(), Some("jpg"));
        let decoded = open_image(&produced[0].current_path).unwrap();
        assert!(!decoded.color().has_alpha());
        let corner = decoded.get_pixel(0, 0);
        assert!(corner[0] > 240 && corner[1] > 240 && corner[2] > 240);
    }

    #[test]
    fn test_to_jpeg_rejects_bad_quality() {
        let data = TempDir::new().unwrap();
        let session = SessionManager::new(data.path()).create().unwrap();
        let record = ImageRecord::pending_import(session.id().clone(), data.path().join("x.png"));
        let transform = ToJpeg {
            quality: 0,
            ..Default::default()
        };

        let outcome = run_unit(&transform, &session, &record);

        let TransformOutcome::Failed(failed) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failed.error().unwrap().kind(), ErrorKind::UnsupportedParameter);
    }

    #[test]
    fn test_avif_parameter_ranges() {
        let bad = ToAvif {
            speed: 11,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert!(ToAvif::default().validate().is_ok());
    }

    #[test]
    fn test_avif_subsampling() {
        assert_eq!("4:4:4".parse::<Subsampling>().unwrap(), Subsampling::Yuv444);
        assert_eq!("420".parse::<Subsampling>().unwrap(), Subsampling::Yuv420);
        assert!("4:1:1".parse::<Subsampling>().is_err());

        let chroma_420 = ToAvif {
            subsampling: Subsampling::Yuv420,
            ..Default::default()
        };
        let err = chroma_420.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedParameter);
        assert!(err.to_string().contains("4:2:0"));
    }
}
