//! Colour parsing and alpha flattening
//!
//! Pad borders and JPEG/PDF backgrounds accept a colour written as a name
//! (`white`, `black`, `transparent`) or as hex: `#rgb`, `#rrggbb`,
//! `#rrggbbaa`. The leading `#` is optional.

use image::{DynamicImage, Rgb, RgbImage, Rgba};

use crate::error::TransformError;

pub const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Parse a colour argument
///
/// # Arguments
/// * `value` - `white`, `black`, `transparent`, or hex as `#rgb`, `#rrggbb` or `#rrggbbaa`
///
/// # Returns
/// * The colour as sRGB with alpha, or `UnsupportedParameter` for anything else
pub fn parse_color(value: &str) -> Result<Rgba<u8>, TransformError> {
    let trimmed = value.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "white" => return Ok(WHITE),
        "black" => return Ok(Rgba([0, 0, 0, 255])),
        "transparent" => return Ok(Rgba([0, 0, 0, 0])),
        _ => {}
    }

    let hex = trimmed.strip_prefix('#').unwrap_or(trimmed);
    let invalid = || TransformError::unsupported("color", value);

    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }

    let channel = |s: &str| u8::from_str_radix(s, 16).map_err(|_| invalid());

    match hex.len() {
        // Short form: each digit is doubled (#f0a -> #ff00aa)
        3 => {
            let mut rgb = [0u8; 3];
            for (slot, digit) in rgb.iter_mut().zip(hex.chars()) {
                *slot = channel(&digit.to_string())? * 17;
            }
            Ok(Rgba([rgb[0], rgb[1], rgb[2], 255]))
        }
        6 | 8 => {
            let r = channel(&hex[0..2])?;
            let g = channel(&hex[2..4])?;
            let b = channel(&hex[4..6])?;
            let a = if hex.len() == 8 { channel(&hex[6..8])? } else { 255 };
            Ok(Rgba([r, g, b, a]))
        }
        _ => Err(invalid()),
    }
}

/// Composite `image` over an opaque `background`, dropping alpha
pub fn flatten(image: &DynamicImage, background: Rgba<u8>) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        out.put_pixel(x, y, blend(*pixel, background));
    }
    out
}

fn blend(pixel: Rgba<u8>, background: Rgba<u8>) -> Rgb<u8> {
    let alpha = pixel[3] as u32;
    let mix = |fg: u8, bg: u8| ((fg as u32 * alpha + bg as u32 * (255 - alpha) + 127) / 255) as u8;
    Rgb([
        mix(pixel[0], background[0]),
        mix(pixel[1], background[1]),
        mix(pixel[2], background[2]),
    ])
}
