//! Detector configuration.
//!
//! Every knob has the default used by the reference Landsat run, so an empty
//! JSON object is a complete configuration.

use crate::core_modules::epoch::EpochPlan;
use crate::core_modules::monitor::MonitorParams;
use crate::error::{DetectorError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Consecutive exceeding observations that confirm a change.
    pub consecutive_threshold: u32,
    /// Absolute normalized residual an observation must exceed.
    pub change_magnitude_threshold: f64,
    /// Length of the trailing training window, in years.
    pub training_window_years: u32,
    /// Length of each monitoring window, in years.
    pub monitoring_window_years: u32,
    /// Calendar year each epoch's monitoring window starts on.
    pub epoch_start_years: Vec<i32>,
    /// Percent tree cover a pixel must exceed to be reported.
    pub eligibility_threshold: u8,
    /// Leading epochs whose noise scale is always recomputed; the model in
    /// force after the last of them is the pre-change baseline.
    pub baseline_epochs: usize,
    /// Extra years fetched after the last monitoring window for retraining.
    pub retrain_extension_years: u32,
    /// Buffer after the change date excluded from the post-change fit.
    pub post_change_skip_years: f64,
    /// Worker count for the parallel pipeline; `None` uses every core.
    pub workers: Option<usize>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            consecutive_threshold: 5,
            change_magnitude_threshold: 3.5,
            training_window_years: 6,
            monitoring_window_years: 2,
            epoch_start_years: (2000..=2014).step_by(2).collect(),
            eligibility_threshold: 30,
            baseline_epochs: 2,
            retrain_extension_years: 1,
            post_change_skip_years: 1.0,
            workers: None,
        }
    }
}

impl DetectorConfig {
    /// Parses and validates a JSON configuration. Missing fields take defaults.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.consecutive_threshold == 0 {
            return Err(invalid("consecutive_threshold must be at least 1"));
        }
        let threshold = self.change_magnitude_threshold;
        if !(threshold.is_finite() && threshold >= 0.0) {
            return Err(invalid("change_magnitude_threshold must be a finite, non-negative number"));
        }
        if self.training_window_years == 0 || self.monitoring_window_years == 0 {
            return Err(invalid("training and monitoring windows must span at least one year"));
        }
        if self.epoch_start_years.is_empty() {
            return Err(invalid("at least one epoch is required"));
        }
        for pair in self.epoch_start_years.windows(2) {
            let gap = pair[1] - pair[0];
            if gap < self.monitoring_window_years as i32 {
                return Err(invalid(format!(
                    "epochs {} and {} overlap: starts must be at least {} years apart",
                    pair[0], pair[1], self.monitoring_window_years
                )));
            }
        }
        if self.baseline_epochs == 0 || self.baseline_epochs > self.epoch_start_years.len() {
            return Err(invalid("baseline_epochs must be between 1 and the number of epochs"));
        }
        if !(self.post_change_skip_years.is_finite() && self.post_change_skip_years >= 0.0) {
            return Err(invalid("post_change_skip_years must be a finite, non-negative number"));
        }
        if self.workers == Some(0) {
            return Err(invalid("workers must be at least 1 when set"));
        }
        Ok(())
    }

    pub fn monitor_params(&self) -> MonitorParams {
        MonitorParams {
            threshold: self.change_magnitude_threshold,
            consecutive: self.consecutive_threshold,
        }
    }

    pub fn epoch_plan(&self) -> EpochPlan {
        EpochPlan::new(
            &self.epoch_start_years,
            self.training_window_years,
            self.monitoring_window_years,
            self.baseline_epochs,
        )
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }
}

fn invalid(message: impl Into<String>) -> DetectorError {
    DetectorError::InvalidConfig(message.into())
}
