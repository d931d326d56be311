// THEORY:
// An epoch is one training + monitoring cycle. The detector chains a fixed list
// of epochs, each learning a model from the trailing years and then watching
// the years that follow it.
//
// Everything a pixel needs to carry from one epoch to the next lives in its
// `PixelTrack`: the monitoring state, the model and noise scale in force, the
// pre-change baseline model, and the pool of every observation seen so far.
// `PixelTrack::advance` takes a track by value and hands back the next one,
// so an epoch is a pure function of its inputs and pixels can be advanced on
// any thread in any order. Within one pixel the order is fixed: fit, then
// noise, then every monitoring reading in timestamp order.
//
// Freezing rule: a pixel that is mid-change (run in progress or latched) keeps
// the model it was being judged against. Its noise scale is only refreshed
// while the plan is still in its baseline epochs.

use crate::core_modules::harmonic::{self, HarmonicCoefficients};
use crate::core_modules::monitor::{MonitorParams, MonitorState, Transition};
use crate::core_modules::noise;
use crate::core_modules::observation::{FractionalYear, PixelSeries, year_start};
use std::fmt;
use std::ops::AddAssign;

/// Half-open span of calendar years, `[start_year, end_year)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearWindow {
    pub start_year: i32,
    pub end_year: i32,
}

impl YearWindow {
    pub fn new(start_year: i32, end_year: i32) -> Self {
        Self {
            start_year,
            end_year,
        }
    }

    pub fn start(&self) -> FractionalYear {
        year_start(self.start_year)
    }

    pub fn end(&self) -> FractionalYear {
        year_start(self.end_year)
    }

    pub fn is_empty(&self) -> bool {
        self.end_year <= self.start_year
    }

    pub fn contains(&self, t: FractionalYear) -> bool {
        t >= self.start() && t < self.end()
    }
}

impl fmt::Display for YearWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start_year, self.end_year)
    }
}

/// One scheduled training + monitoring cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Epoch {
    pub index: usize,
    pub year: i32,
    pub training: YearWindow,
    pub monitoring: YearWindow,
    /// Noise scale is recomputed for every pixel in this epoch.
    pub baseline: bool,
    /// The model in force after this epoch becomes the pre-change baseline.
    pub closes_baseline: bool,
}

/// The ordered epochs of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochPlan {
    epochs: Vec<Epoch>,
}

impl EpochPlan {
    pub fn new(
        start_years: &[i32],
        training_years: u32,
        monitoring_years: u32,
        baseline_epochs: usize,
    ) -> Self {
        let epochs = start_years
            .iter()
            .enumerate()
            .map(|(index, &year)| Epoch {
                index,
                year,
                training: YearWindow::new(year - training_years as i32, year),
                monitoring: YearWindow::new(year, year + monitoring_years as i32),
                baseline: index < baseline_epochs,
                closes_baseline: index + 1 == baseline_epochs,
            })
            .collect();
        Self { epochs }
    }

    pub fn epochs(&self) -> &[Epoch] {
        &self.epochs
    }

    /// Year the last monitoring window ends on.
    pub fn monitoring_end_year(&self) -> Option<i32> {
        self.epochs.last().map(|e| e.monitoring.end_year)
    }
}

/// The span of years already fetched into the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCoverage {
    span: Option<YearWindow>,
}

impl PoolCoverage {
    /// Parts of `window` the pool does not hold yet.
    pub fn missing(&self, window: YearWindow) -> Vec<YearWindow> {
        let Some(span) = self.span else {
            return if window.is_empty() { Vec::new() } else { vec![window] };
        };
        let before = YearWindow::new(window.start_year, window.end_year.min(span.start_year));
        let after = YearWindow::new(window.start_year.max(span.end_year), window.end_year);
        [before, after].into_iter().filter(|w| !w.is_empty()).collect()
    }

    pub fn extend(&mut self, window: YearWindow) {
        if window.is_empty() {
            return;
        }
        self.span = Some(match self.span {
            None => window,
            Some(span) => YearWindow::new(
                span.start_year.min(window.start_year),
                span.end_year.max(window.end_year),
            ),
        });
    }
}

/// Everything carried forward for one pixel between epochs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PixelTrack {
    pub state: MonitorState,
    /// Model used for the last monitoring window.
    pub coefficients: Option<HarmonicCoefficients>,
    /// Noise scale used for the last monitoring window.
    pub noise_scale: Option<f64>,
    /// Model in force at the end of the baseline epochs.
    pub baseline: Option<HarmonicCoefficients>,
    /// Every observation seen so far, sorted.
    pub pool: PixelSeries,
}

/// Data supplied to one pixel for one epoch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochInput {
    /// Training data not already in the pool.
    pub training: PixelSeries,
    pub monitoring: PixelSeries,
}

/// Per-epoch counters, summed over pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpochSummary {
    pub pixels: usize,
    /// Pixels whose fresh fit succeeded.
    pub fitted: usize,
    /// Pixels with too few valid training observations to fit.
    pub insufficient: usize,
    /// Mid-change pixels that kept their carried model.
    pub frozen: usize,
    pub observations: usize,
    pub missing_observations: usize,
    pub newly_latched: usize,
    /// Runs still open at the end of the epoch.
    pub active_runs: usize,
    pub latched: usize,
}

impl AddAssign for EpochSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.pixels += rhs.pixels;
        self.fitted += rhs.fitted;
        self.insufficient += rhs.insufficient;
        self.frozen += rhs.frozen;
        self.observations += rhs.observations;
        self.missing_observations += rhs.missing_observations;
        self.newly_latched += rhs.newly_latched;
        self.active_runs += rhs.active_runs;
        self.latched += rhs.latched;
    }
}

impl PixelTrack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `epoch` for this pixel and returns the track to carry forward.
    pub fn advance(
        mut self,
        epoch: &Epoch,
        input: EpochInput,
        params: &MonitorParams,
    ) -> (Self, EpochSummary) {
        let mut summary = EpochSummary {
            pixels: 1,
            ..Default::default()
        };

        self.pool.merge(input.training);
        let training = self.pool.window(epoch.training.start(), epoch.training.end());

        let fresh = harmonic::fit(&training);
        if fresh.is_some() {
            summary.fitted = 1;
        } else {
            summary.insufficient = 1;
        }

        let mid_change = self.state.is_mid_change();
        if mid_change {
            summary.frozen = 1;
        } else {
            self.coefficients = fresh;
        }

        let fresh_noise = self.coefficients.and_then(|c| noise::rms_residual(&c, &training));
        if epoch.baseline || !mid_change {
            self.noise_scale = fresh_noise;
        }

        if epoch.closes_baseline {
            self.baseline = self.coefficients;
        }

        let model = self.coefficients.zip(self.noise_scale);
        for obs in input.monitoring.observations() {
            let transition = self.state.observe(obs, model.as_ref().map(|(c, n)| (c, *n)), params);
            summary.observations += 1;
            match transition {
                Transition::Skipped { .. } => summary.missing_observations += 1,
                Transition::Latched { .. } => summary.newly_latched += 1,
                _ => {}
            }
        }

        if self.state.is_changed() {
            summary.latched = 1;
        } else if self.state.run_length() > 0 {
            summary.active_runs = 1;
        }

        self.pool.merge(input.monitoring);
        (self, summary)
    }
}
