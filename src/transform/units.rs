//! Physical and relative size units

use std::fmt;
use std::str::FromStr;
use tracing::warn;

const MM_PER_INCH: f64 = 25.4;

/// Unit a size parameter is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScaleUnit {
    #[default]
    Px,
    Mm,
    Cm,
    In,
    /// Percentage of a reference length (the image's own dimension)
    Percent,
}

impl ScaleUnit {
    /// Parse a unit name, falling back to pixels for anything unrecognised
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| {
            warn!(unit = value, "Unknown scale unit, using px");
            ScaleUnit::Px
        })
    }
}

impl FromStr for ScaleUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "px" | "pixel" | "pixels" => Ok(ScaleUnit::Px),
            "mm" => Ok(ScaleUnit::Mm),
            "cm" => Ok(ScaleUnit::Cm),
            "in" | "inch" | "inches" => Ok(ScaleUnit::In),
            "%" | "percent" | "pct" => Ok(ScaleUnit::Percent),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for ScaleUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScaleUnit::Px => "px",
            ScaleUnit::Mm => "mm",
            ScaleUnit::Cm => "cm",
            ScaleUnit::In => "in",
            ScaleUnit::Percent => "%",
        };
        f.write_str(label)
    }
}

/// Convert `value` in `unit` to a pixel count.
///
/// # Arguments
/// * `value` - Length in `unit`
/// * `unit` - Physical unit, pixels or a percentage
/// * `dpi` - Resolution used for physical units
/// * `reference` - Length in pixels that percentages are taken of
///
/// # Returns
/// * Fractional pixels; callers round as their operation requires
pub fn to_pixels(value: f64, unit: ScaleUnit, dpi: u32, reference: u32) -> f64 {
    let dpi = dpi as f64;
    match unit {
        ScaleUnit::Px => value,
        ScaleUnit::Mm => value / MM_PER_INCH * dpi,
        ScaleUnit::Cm => value * 10.0 / MM_PER_INCH * dpi,
        ScaleUnit::In => value * dpi,
        ScaleUnit::Percent => value / 100.0 * reference as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_units() {
        assert_eq!(to_pixels(1.0, ScaleUnit::In, 300, 0), 300.0);
        assert!((to_pixels(25.4, ScaleUnit::Mm, 300, 0) - 300.0).abs() < 1e-9);
        assert!((to_pixels(2.54, ScaleUnit::Cm, 100, 0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_percent_uses_reference() {
        assert_eq!(to_pixels(50.0, ScaleUnit::Percent, 300, 640), 320.0);
    }

    #[test]
    fn test_unknown_unit_falls_back_to_px() {
        assert_eq!(ScaleUnit::parse_lenient("furlong"), ScaleUnit::Px);
        assert_eq!(ScaleUnit::parse_lenient("CM"), ScaleUnit::Cm);
    }
}
