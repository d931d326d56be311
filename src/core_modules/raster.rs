// THEORY:
// The `raster` module owns the spatial bookkeeping of the detector. The
// algorithm itself never looks at a pixel's neighbours, so space reduces to a
// flat, row-major index over a rectangular region:
//
//     index = row * width + column
//
// Every per-pixel collection in the crate (series stacks, tracks, masks,
// output records) uses this same ordering, which is what lets the parallel
// driver cut the raster into contiguous tiles and stitch results back by
// offset alone.

use crate::core_modules::observation::PixelSeries;
use crate::error::{DetectorError, Result};
use image::GrayImage;

/// A rectangular block of the scene, addressed in scene pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterRegion {
    pub x_offset: u32,
    pub y_offset: u32,
    pub width: u32,
    pub height: u32,
}

impl RasterRegion {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            x_offset: 0,
            y_offset: 0,
            width,
            height,
        }
    }

    pub fn with_offset(mut self, x_offset: u32, y_offset: u32) -> Self {
        self.x_offset = x_offset;
        self.y_offset = y_offset;
        self
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Row-major index of the region-local pixel `(x, y)`.
    pub fn index_of(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Region-local `(x, y)` of a row-major index.
    pub fn coordinates_of(&self, index: usize) -> (u32, u32) {
        let width = self.width.max(1) as usize;
        ((index % width) as u32, (index / width) as u32)
    }

    pub(crate) fn expect_len(&self, what: &'static str, found: usize) -> Result<()> {
        let expected = self.pixel_count();
        if expected == found {
            Ok(())
        } else {
            Err(DetectorError::ShapeMismatch { what, expected, found })
        }
    }
}

/// One `PixelSeries` per pixel of a region, row-major.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesStack {
    pixels: Vec<PixelSeries>,
}

impl SeriesStack {
    pub fn new(pixels: Vec<PixelSeries>) -> Self {
        Self { pixels }
    }

    /// A stack of `count` empty series.
    pub fn empty(count: usize) -> Self {
        Self {
            pixels: vec![PixelSeries::new(); count],
        }
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PixelSeries> {
        self.pixels.get(index)
    }

    pub fn observation_count(&self) -> usize {
        self.pixels.iter().map(PixelSeries::len).sum()
    }

    pub fn into_pixels(self) -> Vec<PixelSeries> {
        self.pixels
    }
}

impl From<Vec<PixelSeries>> for SeriesStack {
    fn from(pixels: Vec<PixelSeries>) -> Self {
        Self::new(pixels)
    }
}

/// Which pixels are eligible for reporting (e.g. forested in the base year).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityMask {
    eligible: Vec<bool>,
}

impl EligibilityMask {
    pub fn new(eligible: Vec<bool>) -> Self {
        Self { eligible }
    }

    /// Every one of `count` pixels eligible.
    pub fn all(count: usize) -> Self {
        Self {
            eligible: vec![true; count],
        }
    }

    /// Builds the mask from a percent tree cover raster: a pixel is eligible
    /// when its cover is strictly greater than `threshold`.
    pub fn from_tree_cover(cover: &GrayImage, threshold: u8) -> Self {
        let eligible = cover.pixels().map(|p| p.0[0] > threshold).collect();
        Self { eligible }
    }

    pub fn is_eligible(&self, index: usize) -> bool {
        self.eligible.get(index).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.eligible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eligible.is_empty()
    }

    pub fn eligible_count(&self) -> usize {
        self.eligible.iter().filter(|e| **e).count()
    }
}
