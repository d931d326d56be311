// THEORY:
// The compositor is the last stage: it turns the final monitoring state and
// the retraining results into a fixed five-band record per pixel, the shape
// the export layer expects. No-data is encoded as 0 in every band, and every
// band of an ineligible pixel is forced to 0.

use crate::core_modules::monitor::MonitorState;
use crate::core_modules::raster::{EligibilityMask, RasterRegion};
use crate::core_modules::retrain::Retrained;

/// Band names in output order.
pub const BAND_NAMES: [&str; 5] = [
    "change_date",
    "short_term_magnitude",
    "post_change_slope",
    "post_change_trend_midpoint",
    "pre_change_trend_midpoint",
];

/// The per-pixel output record.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChangeRecord {
    /// Fractional years since 1970, 0 when no change was detected.
    pub change_date: f64,
    /// Mean normalized residual over the confirming run.
    pub short_term_magnitude: f64,
    pub post_change_slope: f64,
    pub post_change_trend_midpoint: f64,
    pub pre_change_trend_midpoint: f64,
}

impl ChangeRecord {
    pub const NO_DATA: ChangeRecord = ChangeRecord {
        change_date: 0.0,
        short_term_magnitude: 0.0,
        post_change_slope: 0.0,
        post_change_trend_midpoint: 0.0,
        pre_change_trend_midpoint: 0.0,
    };

    /// The record's bands in output order.
    pub fn bands(&self) -> [f64; 5] {
        [
            self.change_date,
            self.short_term_magnitude,
            self.post_change_slope,
            self.post_change_trend_midpoint,
            self.pre_change_trend_midpoint,
        ]
    }

    pub fn is_change(&self) -> bool {
        self.change_date != 0.0
    }
}

/// Builds one pixel's record.
pub fn compose(
    state: &MonitorState,
    retrained: Option<&Retrained>,
    consecutive: u32,
    eligible: bool,
) -> ChangeRecord {
    if !eligible {
        return ChangeRecord::NO_DATA;
    }
    let Some(retrained) = retrained else {
        return ChangeRecord::NO_DATA;
    };

    let post = retrained.post_change;
    ChangeRecord {
        change_date: retrained.change_date,
        short_term_magnitude: state.magnitude / consecutive as f64,
        post_change_slope: post.map(|p| p.coefficients.trend).unwrap_or(0.0),
        post_change_trend_midpoint: post.map(|p| p.midpoint_prediction).unwrap_or(0.0),
        pre_change_trend_midpoint: retrained.pre_change_midpoint.unwrap_or(0.0),
    }
}

/// The final product of a run: one record per pixel, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRaster {
    pub region: RasterRegion,
    records: Vec<ChangeRecord>,
}

impl ChangeRaster {
    pub fn new(region: RasterRegion, records: Vec<ChangeRecord>) -> Self {
        Self { region, records }
    }

    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    pub fn record_at(&self, x: u32, y: u32) -> Option<&ChangeRecord> {
        self.records.get(self.region.index_of(x, y))
    }

    pub fn changed_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_change()).count()
    }

    /// Planar float32 bands in record order.
    pub fn bands(&self) -> [Vec<f32>; 5] {
        let mut bands: [Vec<f32>; 5] = Default::default();
        for band in bands.iter_mut() {
            band.reserve(self.records.len());
        }
        for record in &self.records {
            for (band, value) in bands.iter_mut().zip(record.bands()) {
                band.push(value as f32);
            }
        }
        bands
    }
}

/// Composes every pixel of a region.
pub fn compose_raster(
    region: RasterRegion,
    states: &[MonitorState],
    retrained: &[Option<Retrained>],
    mask: &EligibilityMask,
    consecutive: u32,
) -> ChangeRaster {
    let records = states
        .iter()
        .zip(retrained)
        .enumerate()
        .map(|(i, (state, r))| compose(state, r.as_ref(), consecutive, mask.is_eligible(i)))
        .collect();
    ChangeRaster::new(region, records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::harmonic::HarmonicCoefficients;
    use crate::core_modules::monitor::ChangeStatus;
    use crate::core_modules::retrain::PostChangeTrend;

    fn changed() -> (MonitorState, Retrained) {
        let state = MonitorState {
            status: ChangeStatus::Latched { date: 37.2 },
            magnitude: 20.0,
            iteration: 90,
        };
        let retrained = Retrained {
            change_date: 37.2,
            post_change: Some(PostChangeTrend {
                coefficients: HarmonicCoefficients::new(0.1, -0.02, 0.0, 0.0),
                midpoint: 40.0,
                midpoint_prediction: -0.7,
            }),
            pre_change_midpoint: Some(0.85),
        };
        (state, retrained)
    }

    #[test]
    fn record_bands_follow_output_order() {
        let (state, retrained) = changed();
        let record = compose(&state, Some(&retrained), 5, true);
        assert_eq!(record.bands(), [37.2, 4.0, -0.02, -0.7, 0.85]);
    }

    #[test]
    fn ineligible_pixels_report_no_data() {
        let (state, retrained) = changed();
        assert_eq!(compose(&state, Some(&retrained), 5, false), ChangeRecord::NO_DATA);
    }

    #[test]
    fn unchanged_pixels_report_zero_magnitude() {
        let state = MonitorState {
            status: ChangeStatus::Active { run_length: 3 },
            magnitude: 12.0,
            iteration: 10,
        };
        assert_eq!(compose(&state, None, 5, true), ChangeRecord::NO_DATA);
    }

    #[test]
    fn raster_masks_per_pixel() {
        let (state, retrained) = changed();
        let region = RasterRegion::new(2, 1);
        let raster = compose_raster(
            region,
            &[state, state],
            &[Some(retrained), Some(retrained)],
            &EligibilityMask::new(vec![true, false]),
            5,
        );
        assert_eq!(raster.changed_count(), 1);
        assert_eq!(raster.record_at(1, 0), Some(&ChangeRecord::NO_DATA));
        let bands = raster.bands();
        assert_eq!(bands[0], vec![37.2f32, 0.0]);
        assert_eq!(bands[1], vec![4.0f32, 0.0]);
    }
}
