// THEORY:
// Once a change is confirmed the pre-change model no longer describes the
// pixel. Retraining fits a fresh model on what the pixel did *after* the
// change, skipping a buffer right after the change date where the surface is
// still in transition (clearing, regrowth, burn scars settling).
//
// Both the old and new models are summarised by a trend-only prediction at
// the middle of the period they describe. Seasonal terms are dropped there on
// purpose: the comparison is between long-term levels, not between two points
// on the annual cycle.

use crate::core_modules::harmonic::{self, HarmonicCoefficients};
use crate::core_modules::monitor::MonitorState;
use crate::core_modules::observation::{FractionalYear, PixelSeries};

/// Post-change statistics for one changed pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Retrained {
    pub change_date: FractionalYear,
    /// Model fit on the post-change observations, if there were enough of them.
    pub post_change: Option<PostChangeTrend>,
    /// Baseline trend at the middle of the pre-change record.
    pub pre_change_midpoint: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostChangeTrend {
    pub coefficients: HarmonicCoefficients,
    /// Time the midpoint prediction is taken at.
    pub midpoint: FractionalYear,
    /// Trend-only prediction at `midpoint`.
    pub midpoint_prediction: f64,
}

/// Retraining rule shared by every pixel of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrainParams {
    /// Observations at or before `change_date + skip_years` are ignored.
    pub skip_years: f64,
}

/// Retrains one pixel. `None` when the pixel never latched.
pub fn retrain(
    state: &MonitorState,
    baseline: Option<&HarmonicCoefficients>,
    pool: &PixelSeries,
    params: &RetrainParams,
) -> Option<Retrained> {
    if !state.is_changed() {
        return None;
    }
    let change_date = state.change_date();

    let post_change = post_change_trend(pool, change_date, params.skip_years);
    // Halfway between t = 0 (1970-01-01) and the change.
    let pre_change_midpoint = baseline.map(|c| c.predict_trend(change_date / 2.0));

    Some(Retrained {
        change_date,
        post_change,
        pre_change_midpoint,
    })
}

fn post_change_trend(
    pool: &PixelSeries,
    change_date: FractionalYear,
    skip_years: f64,
) -> Option<PostChangeTrend> {
    let post = pool.valid_after(change_date + skip_years);
    let coefficients = harmonic::fit(&post)?;
    let last = post.last()?.timestamp;
    let midpoint = change_date + (last - change_date) / 2.0;
    Some(PostChangeTrend {
        coefficients,
        midpoint,
        midpoint_prediction: coefficients.predict_trend(midpoint),
    })
}
