#![allow(dead_code)]

use canopy_watch::core_modules::observation::{Observation, PixelSeries};
use canopy_watch::core_modules::raster::RasterRegion;
use canopy_watch::InMemoryProvider;
use image::{GrayImage, Luma};
use std::f64::consts::TAU;

/// Fractional year the degraded pixels drop.
pub const CLEARING: f64 = 37.3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pixel {
    Stable,
    Degraded,
    /// Only three readings in the whole record.
    Sparse,
}

/// Twenty readings a year from 1994 through 2016, every ninth one masked.
pub fn history(kind: Pixel, phase: f64) -> PixelSeries {
    if kind == Pixel::Sparse {
        return PixelSeries::from_observations(vec![
            Observation::new(25.0, 0.7),
            Observation::new(31.0, 0.2),
            Observation::new(38.0, 0.1),
        ]);
    }
    let observations = (0..(23 * 20))
        .map(|k| {
            let t = 24.0 + k as f64 / 20.0 + 0.004;
            let noise = 0.015 * ((k as f64 + phase) * 2.3).sin();
            let drop = if kind == Pixel::Degraded && t >= CLEARING { -0.35 } else { 0.0 };
            if k % 9 == 4 {
                Observation::missing(t)
            } else {
                Observation::new(t, 0.75 + 0.04 * (TAU * t).sin() + noise + drop)
            }
        })
        .collect();
    PixelSeries::from_observations(observations)
}

/// A one-row scene of `pixels`, with per-pixel tree cover percentages.
pub fn scene(pixels: &[(Pixel, u8)]) -> (RasterRegion, InMemoryProvider) {
    let region = RasterRegion::new(pixels.len() as u32, 1);
    let histories = pixels
        .iter()
        .enumerate()
        .map(|(i, (kind, _))| history(*kind, i as f64 * 3.7))
        .collect();
    let tree_cover = GrayImage::from_fn(region.width, 1, |x, _| Luma([pixels[x as usize].1]));
    (region, InMemoryProvider::new(region, histories, tree_cover))
}
