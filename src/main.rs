// Example runner for the `canopy_watch` library.
//
// Builds a small synthetic scene, clears a block of it halfway through the
// record, and runs the parallel pipeline over it. A real deployment would
// implement `SeriesProvider` on top of its archive instead.

use canopy_watch::core_modules::observation::{Observation, PixelSeries};
use canopy_watch::core_modules::raster::RasterRegion;
use canopy_watch::pipeline::BAND_NAMES;
use canopy_watch::{DetectorConfig, InMemoryProvider, ParallelPipeline, telemetry};
use image::{GrayImage, Luma};
use std::f64::consts::TAU;

const SIZE: u32 = 8;
/// Fractional year (since 1970) the cleared block starts degrading.
const CLEARING: f64 = 37.3;

fn synthetic_history(x: u32, y: u32) -> PixelSeries {
    let cleared = (2..5).contains(&x) && (3..6).contains(&y);
    let phase = (x * 7 + y * 13) as f64;
    let observations = (0..(23 * 20))
        .map(|k| {
            let t = 24.0 + k as f64 / 20.0 + 0.003 * (x + y) as f64;
            let noise = 0.015 * ((k as f64 + phase) * 2.3).sin();
            let drop = if cleared && t >= CLEARING { -0.35 } else { 0.0 };
            let value = 0.75 + 0.04 * (TAU * t).sin() + noise + drop;
            if (k + x as usize) % 9 == 0 {
                Observation::missing(t)
            } else {
                Observation::new(t, value)
            }
        })
        .collect();
    PixelSeries::from_observations(observations)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    let region = RasterRegion::new(SIZE, SIZE);
    let histories = (0..region.pixel_count())
        .map(|i| {
            let (x, y) = region.coordinates_of(i);
            synthetic_history(x, y)
        })
        .collect();
    let tree_cover = GrayImage::from_fn(SIZE, SIZE, |x, _| Luma([if x == 0 { 10 } else { 80 }]));
    let provider = InMemoryProvider::new(region, histories, tree_cover);

    let pipeline = ParallelPipeline::new(DetectorConfig::default(), provider)?.with_tile_size(16);
    let report = pipeline.run(region).await?;

    println!("{}", BAND_NAMES.join("\t"));
    for record in report.raster.records().iter().filter(|r| r.is_change()) {
        let bands: Vec<String> = record.bands().iter().map(|b| format!("{b:.4}")).collect();
        println!("{}", bands.join("\t"));
    }
    println!("{} of {} pixels changed", report.raster.changed_count(), region.pixel_count());

    pipeline.shutdown().await;
    Ok(())
}
