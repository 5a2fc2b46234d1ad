//! Prediction overlay for the report.
//!
//! Paints positive prediction pixels onto the input mosaic, writes each
//! cell's 1-based row-major number near its top-left corner and draws dashed
//! separators on the internal tile boundaries.

use image::{GrayImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use super::MosaicLayout;
use crate::error::{Result, TileGridError};

/// Dash and gap length of grid separators, in pixels
const DASH: usize = 10;
/// Offset of a cell number from the cell's top-left corner
const LABEL_OFFSET: usize = 5;
/// Size of one font bitmap pixel
const GLYPH_SCALE: usize = 2;

/// 3x5 digit bitmaps, one `u8` per row, most significant of the low three
/// bits is the leftmost column
const DIGITS: [[u8; 5]; 10] = [
    [0b111, 0b101, 0b101, 0b101, 0b111],
    [0b010, 0b110, 0b010, 0b010, 0b111],
    [0b111, 0b001, 0b111, 0b100, 0b111],
    [0b111, 0b001, 0b111, 0b001, 0b111],
    [0b101, 0b101, 0b111, 0b001, 0b001],
    [0b111, 0b100, 0b111, 0b001, 0b111],
    [0b111, 0b100, 0b111, 0b101, 0b111],
    [0b111, 0b001, 0b001, 0b001, 0b001],
    [0b111, 0b101, 0b111, 0b101, 0b111],
    [0b111, 0b101, 0b111, 0b001, 0b111],
];

/// Colours of the overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayStyle {
    /// Colour of positive prediction pixels
    pub highlight: [u8; 3],
    /// Colour of grid separators and cell numbers
    pub grid: [u8; 3],
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            highlight: [0, 255, 255],
            grid: [255, 255, 255],
        }
    }
}

/// Compose the overlay image.
///
/// # Errors
/// Returns `InvalidData` if the input, prediction and layout sizes differ.
pub fn overlay(
    input: &RgbImage,
    prediction: &GrayImage,
    layout: &MosaicLayout,
    style: &OverlayStyle,
) -> Result<RgbImage> {
    if input.dimensions() != prediction.dimensions()
        || input.width() as usize != layout.width()
        || input.height() as usize != layout.height()
    {
        return Err(TileGridError::invalid_data(format!(
            "Overlay inputs differ in size: input {:?}, prediction {:?}, grid {}x{}",
            input.dimensions(),
            prediction.dimensions(),
            layout.width(),
            layout.height()
        )));
    }

    let mut image = input.clone();
    for (out, mask) in image.pixels_mut().zip(prediction.pixels()) {
        if mask.0[0] > 0 {
            *out = Rgb(style.highlight);
        }
    }

    for (number, x, y) in layout.cell_origins() {
        draw_number(&mut image, number, x + LABEL_OFFSET, y + LABEL_OFFSET, style.grid);
    }

    let (width, height) = (layout.width(), layout.height());
    for row in 1..layout.rows {
        let y = layout.row_offset(row);
        for x in (0..width).filter(|x| x % (2 * DASH) < DASH) {
            put(&mut image, x, y, style.grid);
        }
    }
    for col in 1..layout.cols {
        let x = layout.col_offset(col);
        for y in (0..height).filter(|y| y % (2 * DASH) < DASH) {
            put(&mut image, x, y, style.grid);
        }
    }

    Ok(image)
}

fn put(image: &mut RgbImage, x: usize, y: usize, color: [u8; 3]) {
    if let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y)) {
        if x < image.width() && y < image.height() {
            image.put_pixel(x, y, Rgb(color));
        }
    }
}

/// Draw `number` with its top-left corner at `(x, y)`, clipped to the image
fn draw_number(image: &mut RgbImage, number: usize, x: usize, y: usize, color: [u8; 3]) {
    let advance = 4 * GLYPH_SCALE;
    for (i, digit) in number.to_string().bytes().enumerate() {
        let glyph = &DIGITS[usize::from(digit - b'0')];
        let gx = x + i * advance;
        for (r, bits) in glyph.iter().enumerate() {
            for c in 0..3 {
                if bits & (0b100 >> c) == 0 {
                    continue;
                }
                for dy in 0..GLYPH_SCALE {
                    for dx in 0..GLYPH_SCALE {
                        put(image, gx + c * GLYPH_SCALE + dx, y + r * GLYPH_SCALE + dy, color);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GREY: [u8; 3] = [10, 10, 10];

    fn layout(rows: usize, cols: usize, size: usize) -> MosaicLayout {
        MosaicLayout {
            rows,
            cols,
            row_heights: vec![size; rows],
            col_widths: vec![size; cols],
        }
    }

    #[test]
    fn test_highlight_positive_pixels() {
        let input = RgbImage::from_pixel(64, 64, Rgb(GREY));
        let mut prediction = GrayImage::new(64, 64);
        prediction.put_pixel(40, 40, image::Luma([255]));
        let out = overlay(&input, &prediction, &layout(1, 1, 64), &OverlayStyle::default()).unwrap();
        assert_eq!(out.get_pixel(40, 40).0, [0, 255, 255]);
        assert_eq!(out.get_pixel(41, 40).0, GREY);
    }

    #[test]
    fn test_dashed_internal_grid_lines() {
        let input = RgbImage::from_pixel(64, 64, Rgb(GREY));
        let prediction = GrayImage::new(64, 64);
        let out = overlay(&input, &prediction, &layout(2, 2, 32), &OverlayStyle::default()).unwrap();
        let white = [255, 255, 255];
        // Horizontal separator at y = 32: on for x in 0..10, off for 10..20
        assert_eq!(out.get_pixel(50, 32).0, GREY);
        assert_eq!(out.get_pixel(45, 32).0, white);
        assert_eq!(out.get_pixel(60, 32).0, white);
        // Vertical separator at x = 32
        assert_eq!(out.get_pixel(32, 55).0, GREY);
        assert_eq!(out.get_pixel(32, 41).0, white);
        // No border line on the outer edge
        assert_eq!(out.get_pixel(50, 0).0, GREY);
    }

    #[test]
    fn test_cell_numbers_at_cell_corners() {
        let input = RgbImage::from_pixel(64, 64, Rgb(GREY));
        let prediction = GrayImage::new(64, 64);
        let out = overlay(&input, &prediction, &layout(2, 2, 32), &OverlayStyle::default()).unwrap();
        let white = [255, 255, 255];
        // "1": top row of the glyph is the middle column only
        assert_eq!(out.get_pixel(7, 5).0, white);
        assert_eq!(out.get_pixel(5, 5).0, GREY);
        // "4" in cell (1, 1): top row has left and right columns set
        assert_eq!(out.get_pixel(37, 37).0, white);
        assert_eq!(out.get_pixel(39, 37).0, GREY);
        assert_eq!(out.get_pixel(41, 37).0, white);
    }

    #[test]
    fn test_size_mismatch() {
        let input = RgbImage::new(8, 8);
        let prediction = GrayImage::new(8, 4);
        assert!(overlay(&input, &prediction, &layout(1, 1, 8), &OverlayStyle::default()).is_err());
    }
}
