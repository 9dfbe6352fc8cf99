//! Decoding and encoding, with `image` errors mapped onto the item error taxonomy

use image::codecs::jpeg::{JpegEncoder, PixelDensity};
use image::{DynamicImage, ImageError, ImageFormat, ImageReader, RgbImage};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::error::TransformError;

/// Decode an image, sniffing the format from its content
pub fn open_image(path: &Path) -> Result<DynamicImage, TransformError> {
    let reader = ImageReader::open(path)
        .map_err(|e| TransformError::from_io(path, "open", e))?
        .with_guessed_format()
        .map_err(|e| TransformError::from_io(path, "read", e))?;

    reader.decode().map_err(|e| map_decode_error(path, e))
}

fn map_decode_error(path: &Path, err: ImageError) -> TransformError {
    match err {
        // Truncated or malformed streams surface as I/O errors from some decoders
        ImageError::IoError(e)
            if matches!(e.kind(), io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData) =>
        {
            TransformError::invalid_content(path, e)
        }
        ImageError::IoError(e) => TransformError::from_io(path, "read", e),
        ImageError::Limits(e) => TransformError::resource(path, "decode", e),
        other => TransformError::invalid_content(path, other),
    }
}

/// Save in the format implied by the extension of `path`
pub fn save_image(image: &DynamicImage, path: &Path) -> Result<(), TransformError> {
    image.save(path).map_err(|e| map_encode_error(path, e))
}

fn map_encode_error(path: &Path, err: ImageError) -> TransformError {
    match err {
        ImageError::Unsupported(e) => TransformError::unsupported("output format", e),
        ImageError::IoError(e) => TransformError::resource(path, "write", e),
        other => TransformError::resource(path, "encode", other),
    }
}

/// Whether `image` can write the given extension
pub fn is_writable_extension(extension: &str) -> bool {
    ImageFormat::from_extension(extension)
        .map(|format| format.can_write())
        .unwrap_or(false)
}

/// Encode an opaque RGB image as baseline JPEG, stamping the JFIF density
pub fn encode_jpeg(image: &RgbImage, quality: u8, dpi: u32, writer: impl Write) -> Result<(), ImageError> {
    let mut encoder = JpegEncoder::new_with_quality(writer, quality.clamp(1, 100));
    let dpi = dpi.clamp(1, u16::MAX as u32) as u16;
    encoder.set_pixel_density(PixelDensity::dpi(dpi));
    encoder.encode_image(image)
}

/// JPEG bytes in memory, for embedding into documents
pub fn jpeg_bytes(image: &RgbImage, quality: u8, dpi: u32) -> Result<Vec<u8>, ImageError> {
    let mut bytes = Vec::new();
    encode_jpeg(image, quality, dpi, &mut bytes)?;
    Ok(bytes)
}

pub fn write_jpeg(image: &RgbImage, quality: u8, dpi: u32, path: &Path) -> Result<(), TransformError> {
    let file = File::create(path).map_err(|e| TransformError::resource(path, "create", e))?;
    let mut writer = BufWriter::new(file);
    encode_jpeg(image, quality, dpi, &mut writer).map_err(|e| map_encode_error(path, e))?;
    writer
        .flush()
        .map_err(|e| TransformError::resource(path, "write", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use image::Rgb;
    use tempfile::TempDir;

    #[test]
    fn test_open_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = open_image(&dir.path().join("missing.png")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputNotFound);
    }

    #[test]
    fn test_open_garbage_is_invalid_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not an image").unwrap();
        let err = open_image(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidContent);
    }

    #[test]
    fn test_jpeg_round_trip_keeps_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.jpg");
        let img = RgbImage::from_pixel(12, 7, Rgb([200, 10, 10]));

        write_jpeg(&img, 85, 300, &path).unwrap();

        let decoded = open_image(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (12, 7));
    }

    #[test]
    fn test_writable_extensions() {
        assert!(is_writable_extension("png"));
        assert!(!is_writable_extension("xyz"));
    }
}
