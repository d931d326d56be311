// THEORY:
// The `pipeline` module is the top-level API of the detector. It encapsulates
// the whole architectural stack behind one call: give it a provider and a
// region, get back a five-band change raster.
//
// A run has three stages:
// 1.  **Monitoring**: for every scheduled epoch, fetch whatever training data
//     the pixel pools do not already hold plus the epoch's monitoring series,
//     then advance every pixel's `PixelTrack` through the epoch.
// 2.  **Retraining**: fetch the extension years, and fit post-change models for
//     the pixels that latched.
// 3.  **Composition**: fetch the eligibility mask and assemble the records.
//
// `DetectionPipeline` runs pixels one after another on the calling thread.
// `ParallelPipeline` shares the fetch and composition steps defined here and
// only changes who advances the pixels.

use crate::config::DetectorConfig;
use crate::core_modules::compositor::{self, ChangeRaster};
use crate::core_modules::epoch::{
    Epoch, EpochInput, EpochPlan, EpochSummary, PixelTrack, PoolCoverage, YearWindow,
};
use crate::core_modules::observation::PixelSeries;
use crate::core_modules::raster::{RasterRegion, SeriesStack};
use crate::core_modules::retrain::{self, RetrainParams, Retrained};
use crate::error::{DetectorError, FetchStage, Result};
use crate::provider::SeriesProvider;
use tracing::{debug, info, warn};

// Re-export key data structures for the public API.
pub use crate::core_modules::compositor::{BAND_NAMES, ChangeRecord};
pub use crate::core_modules::monitor::{ChangeStatus, MonitorState};

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct DetectionReport {
    pub raster: ChangeRaster,
    /// Final per-pixel tracks: state, models and pooled series.
    pub tracks: Vec<PixelTrack>,
    /// Per-epoch counters, in epoch order.
    pub epochs: Vec<(Epoch, EpochSummary)>,
}

/// Sequential driver for a detection run.
pub struct DetectionPipeline<P> {
    config: DetectorConfig,
    plan: EpochPlan,
    provider: P,
}

impl<P: SeriesProvider> DetectionPipeline<P> {
    pub fn new(config: DetectorConfig, provider: P) -> Result<Self> {
        config.validate()?;
        let plan = config.epoch_plan();
        Ok(Self {
            config,
            plan,
            provider,
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn run(&self, region: RasterRegion) -> Result<DetectionReport> {
        info!(
            width = region.width,
            height = region.height,
            epochs = self.plan.epochs().len(),
            "starting detection run"
        );
        let params = self.config.monitor_params();
        let mut tracks = vec![PixelTrack::new(); region.pixel_count()];
        let mut coverage = PoolCoverage::default();
        let mut epochs = Vec::with_capacity(self.plan.epochs().len());

        for epoch in self.plan.epochs() {
            let inputs = fetch_epoch_inputs(&self.provider, &region, epoch, &mut coverage)?;
            let mut summary = EpochSummary::default();
            tracks = tracks
                .into_iter()
                .zip(inputs)
                .map(|(track, input)| {
                    let (track, pixel) = track.advance(epoch, input, &params);
                    summary += pixel;
                    track
                })
                .collect();
            log_epoch(epoch, &summary);
            epochs.push((*epoch, summary));
        }

        extend_pools(&self.provider, &region, &self.config, &self.plan, &mut tracks)?;
        let retrain_params = retrain_params(&self.config);
        let retrained: Vec<Option<Retrained>> = tracks
            .iter()
            .map(|t| retrain::retrain(&t.state, t.baseline.as_ref(), &t.pool, &retrain_params))
            .collect();

        let raster = compose(&self.provider, region, &self.config, &tracks, &retrained)?;
        info!(changed = raster.changed_count(), "detection run complete");
        Ok(DetectionReport {
            raster,
            tracks,
            epochs,
        })
    }
}

/// Fetches one epoch's data and splits it into per-pixel inputs.
pub(crate) fn fetch_epoch_inputs<P: SeriesProvider>(
    provider: &P,
    region: &RasterRegion,
    epoch: &Epoch,
    coverage: &mut PoolCoverage,
) -> Result<Vec<EpochInput>> {
    let count = region.pixel_count();
    let mut training = vec![PixelSeries::new(); count];
    for window in coverage.missing(epoch.training) {
        debug!(epoch = epoch.year, %window, "fetching training series");
        let stack = fetch(FetchStage::Training, window, || {
            provider.training_series(region, window)
        })?;
        region.expect_len("training series", stack.len())?;
        for (pool, series) in training.iter_mut().zip(stack.into_pixels()) {
            pool.merge(series);
        }
        coverage.extend(window);
    }

    debug!(epoch = epoch.year, window = %epoch.monitoring, "fetching monitoring series");
    let monitoring = fetch(FetchStage::Monitoring, epoch.monitoring, || {
        provider.monitoring_series(region, epoch.monitoring)
    })?;
    region.expect_len("monitoring series", monitoring.len())?;
    coverage.extend(epoch.monitoring);

    Ok(training
        .into_iter()
        .zip(monitoring.into_pixels())
        .map(|(training, monitoring)| EpochInput { training, monitoring })
        .collect())
}

/// Merges the retraining extension years into every pixel pool.
pub(crate) fn extend_pools<P: SeriesProvider>(
    provider: &P,
    region: &RasterRegion,
    config: &DetectorConfig,
    plan: &EpochPlan,
    tracks: &mut [PixelTrack],
) -> Result<()> {
    let Some(end) = plan.monitoring_end_year() else {
        return Ok(());
    };
    let window = YearWindow::new(end, end + config.retrain_extension_years as i32);
    if window.is_empty() {
        return Ok(());
    }
    debug!(%window, "fetching retraining extension");
    let stack = fetch(FetchStage::Retraining, window, || {
        provider.monitoring_series(region, window)
    })?;
    region.expect_len("retraining series", stack.len())?;
    for (track, series) in tracks.iter_mut().zip(stack.into_pixels()) {
        track.pool.merge(series);
    }
    Ok(())
}

pub(crate) fn retrain_params(config: &DetectorConfig) -> RetrainParams {
    RetrainParams {
        skip_years: config.post_change_skip_years,
    }
}

/// Fetches the eligibility mask and builds the output raster.
pub(crate) fn compose<P: SeriesProvider>(
    provider: &P,
    region: RasterRegion,
    config: &DetectorConfig,
    tracks: &[PixelTrack],
    retrained: &[Option<Retrained>],
) -> Result<ChangeRaster> {
    let mask = provider
        .eligibility_mask(&region, config.eligibility_threshold)
        .map_err(DetectorError::EligibilityFetch)?;
    region.expect_len("eligibility mask", mask.len())?;
    let unreported = retrained
        .iter()
        .enumerate()
        .filter(|(i, r)| r.is_some() && !mask.is_eligible(*i))
        .count();
    if unreported > 0 {
        debug!(unreported, "changes masked out by eligibility");
    }
    let states: Vec<_> = tracks.iter().map(|t| t.state).collect();
    Ok(compositor::compose_raster(region, &states, retrained, &mask, config.consecutive_threshold))
}

pub(crate) fn log_epoch(epoch: &Epoch, summary: &EpochSummary) {
    info!(
        epoch = epoch.year,
        training = %epoch.training,
        monitoring = %epoch.monitoring,
        fitted = summary.fitted,
        insufficient = summary.insufficient,
        frozen = summary.frozen,
        observations = summary.observations,
        newly_latched = summary.newly_latched,
        active_runs = summary.active_runs,
        latched = summary.latched,
        "epoch complete"
    );
    if summary.pixels > 0 && summary.insufficient == summary.pixels {
        warn!(epoch = epoch.year, "no pixel had enough training observations to fit a model");
    }
}

fn fetch<F>(stage: FetchStage, window: YearWindow, call: F) -> Result<SeriesStack>
where
    F: FnOnce() -> std::result::Result<SeriesStack, crate::error::FetchError>,
{
    call().map_err(|source| DetectorError::Fetch { stage, window, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::observation::Observation;
    use crate::core_modules::raster::EligibilityMask;
    use crate::error::FetchError;
    use crate::provider::InMemoryProvider;
    use std::cell::RefCell;

    type Fetched<T> = std::result::Result<T, FetchError>;

    /// Records every window requested from an inner provider.
    struct Recording<P> {
        inner: P,
        calls: RefCell<Vec<(FetchStage, YearWindow)>>,
    }

    impl<P: SeriesProvider> SeriesProvider for Recording<P> {
        fn training_series(
            &self,
            region: &RasterRegion,
            window: YearWindow,
        ) -> Fetched<SeriesStack> {
            self.calls.borrow_mut().push((FetchStage::Training, window));
            self.inner.training_series(region, window)
        }

        fn monitoring_series(
            &self,
            region: &RasterRegion,
            window: YearWindow,
        ) -> Fetched<SeriesStack> {
            self.calls.borrow_mut().push((FetchStage::Monitoring, window));
            self.inner.monitoring_series(region, window)
        }

        fn eligibility_mask(
            &self,
            region: &RasterRegion,
            threshold: u8,
        ) -> Fetched<EligibilityMask> {
            self.inner.eligibility_mask(region, threshold)
        }
    }

    struct Failing;

    impl SeriesProvider for Failing {
        fn training_series(&self, _: &RasterRegion, _: YearWindow) -> Fetched<SeriesStack> {
            Err("archive offline".into())
        }

        fn monitoring_series(&self, _: &RasterRegion, _: YearWindow) -> Fetched<SeriesStack> {
            Err("archive offline".into())
        }

        fn eligibility_mask(&self, _: &RasterRegion, _: u8) -> Fetched<EligibilityMask> {
            Err("archive offline".into())
        }
    }

    fn flat_history() -> PixelSeries {
        let observations = (0..(22 * 12))
            .map(|k| {
                let t = 24.0 + k as f64 / 12.0 + 0.01;
                let wobble = if k % 2 == 0 { 0.01 } else { -0.01 };
                Observation::new(t, 0.8 + wobble)
            })
            .collect();
        PixelSeries::from_observations(observations)
    }

    #[test]
    fn training_is_fetched_once_and_then_rolled_from_the_pool() {
        let region = RasterRegion::new(1, 1);
        let provider = Recording {
            inner: InMemoryProvider::fully_forested(region, vec![flat_history()]),
            calls: RefCell::new(Vec::new()),
        };
        let pipeline =
            DetectionPipeline::new(DetectorConfig::default(), &provider).expect("valid config");
        let report = pipeline.run(region).expect("run");

        let calls = provider.calls.borrow();
        let training: Vec<_> = calls.iter().filter(|(s, _)| *s == FetchStage::Training).collect();
        assert_eq!(training, vec![&(FetchStage::Training, YearWindow::new(1994, 2000))]);
        // Eight monitoring windows plus the retraining extension.
        assert_eq!(calls.len() - training.len(), 9);
        assert_eq!(calls.last(), Some(&(FetchStage::Monitoring, YearWindow::new(2016, 2017))));

        assert_eq!(report.epochs.len(), 8);
        assert_eq!(report.raster.changed_count(), 0);
        assert!(report.tracks[0].baseline.is_some());
    }

    #[test]
    fn fetch_failure_aborts_the_run() {
        let pipeline =
            DetectionPipeline::new(DetectorConfig::default(), Failing).expect("valid config");
        let err = pipeline.run(RasterRegion::new(1, 1)).unwrap_err();
        assert!(matches!(
            err,
            DetectorError::Fetch {
                stage: FetchStage::Training,
                window,
                ..
            } if window == YearWindow::new(1994, 2000)
        ));
    }

    #[test]
    fn short_provider_stack_is_a_shape_mismatch() {
        let region = RasterRegion::new(2, 1);
        let provider = InMemoryProvider::fully_forested(region, vec![flat_history()]);
        let pipeline =
            DetectionPipeline::new(DetectorConfig::default(), provider).expect("valid config");
        let err = pipeline.run(RasterRegion::new(2, 1)).unwrap_err();
        assert!(matches!(err, DetectorError::ShapeMismatch { expected: 2, found: 1, .. }));
    }

    #[test]
    fn invalid_configuration_is_rejected_up_front() {
        let config = DetectorConfig {
            epoch_start_years: Vec::new(),
            ..Default::default()
        };
        assert!(DetectionPipeline::new(config, Failing).is_err());
    }
}
