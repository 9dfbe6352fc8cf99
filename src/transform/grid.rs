//! Slice each image into a rows x cols grid of tiles

use image::GenericImageView;

use super::codec::{open_image, save_image};
use crate::error::TransformError;
use crate::pipeline::contract::{Derivation, Outputs, Transform};
use crate::state::record::ImageRecord;

#[derive(Debug, Clone)]
pub struct GridSlice {
    pub rows: u32,
    pub cols: u32,
}

/// Split `length` into `parts` spans whose sizes differ by at most one pixel
fn spans(length: u32, parts: u32) -> Vec<(u32, u32)> {
    (0..parts)
        .map(|i| {
            let start = (length as u64 * i as u64 / parts as u64) as u32;
            let end = (length as u64 * (i as u64 + 1) / parts as u64) as u32;
            (start, end - start)
        })
        .collect()
}

impl Transform for GridSlice {
    fn name(&self) -> &'static str {
        "grid-slice"
    }

    fn derivation(&self) -> Derivation {
        Derivation::Split
    }

    fn apply(&self, record: &ImageRecord, outputs: &mut Outputs<'_>) -> Result<(), TransformError> {
        if self.rows == 0 {
            return Err(TransformError::unsupported("rows", self.rows));
        }
        if self.cols == 0 {
            return Err(TransformError::unsupported("cols", self.cols));
        }

        let image = open_image(&record.current_path)?;
        let (width, height) = image.dimensions();
        if self.cols > width || self.rows > height {
            return Err(TransformError::unsupported(
                "grid",
                format!("{}x{} tiles from a {width}x{height} image", self.rows, self.cols),
            ));
        }

        let extension = record.extension().unwrap_or_else(|| "png".to_string());
        // Row-major: all tiles of row 1 before row 2
        for (r, (y, h)) in spans(height, self.rows).into_iter().enumerate() {
            for (c, (x, w)) in spans(width, self.cols).into_iter().enumerate() {
                let tile = image.crop_imm(x, y, w, h);
                let path = outputs.allocate_with_suffix(&format!("_r{}c{}", r + 1, c + 1), &extension);
                save_image(&tile, &path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_cover_length_without_gaps() {
        let parts = spans(10, 3);
        assert_eq!(parts, vec![(0, 3), (3, 3), (6, 4)]);
        assert_eq!(parts.iter().map(|(_, len)| len).sum::<u32>(), 10);
    }

    #[test]
    fn test_spans_even_split() {
        assert_eq!(spans(8, 2), vec![(0, 4), (4, 4)]);
    }
}
