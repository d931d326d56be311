// THEORY:
// The `MonitorState` is the heart of the detector. It is a stateful entity
// responsible for a single pixel, consuming that pixel's monitoring
// observations one at a time, in timestamp order, and deciding whether the
// pixel has left its learned behaviour for good.
//
// Key principles:
// 1.  **Evidence Accumulation**: A single anomalous reading is never enough. A
//     change is only confirmed after `consecutive` readings in a row exceed the
//     threshold. Each exceeding reading extends the run and adds its normalized
//     residual to the magnitude accumulator.
// 2.  **Gaps Are Not Evidence**: A cloudy or otherwise masked reading says
//     nothing about the ground. It neither extends nor breaks a run.
// 3.  **Latching**: The reading that completes a run latches the pixel. The
//     change date is written exactly once and the magnitude is frozen; nothing
//     that arrives afterwards can move either of them.
// 4.  **Resumable Cursor**: `iteration` counts every reading ever offered to
//     the pixel, whatever its outcome.

use crate::core_modules::harmonic::HarmonicCoefficients;
use crate::core_modules::observation::{FractionalYear, Observation};

/// Where a pixel is in its change lifecycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChangeStatus {
    /// No run in progress and no confirmed change.
    Unchanged,
    /// A run of `run_length` consecutive exceeding readings is in progress.
    Active { run_length: u32 },
    /// A change was confirmed by the reading taken at `date`.
    Latched { date: FractionalYear },
}

/// The trigger rule applied to each reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorParams {
    /// Absolute normalized residual a reading must exceed.
    pub threshold: f64,
    /// Length of the run that confirms a change.
    pub consecutive: u32,
}

impl Default for MonitorParams {
    fn default() -> Self {
        Self {
            threshold: 3.5,
            consecutive: 5,
        }
    }
}

/// What a single reading did to the state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    /// Masked reading; any run in progress is preserved.
    Skipped { run_length: u32 },
    /// Valid reading within threshold while no run was in progress.
    Quiet,
    /// Exceeding reading that extended the run.
    Extended { run_length: u32 },
    /// Valid reading within threshold that broke a run short of the trigger.
    Reset { broken_run: u32 },
    /// Exceeding reading that completed the run.
    Latched { date: FractionalYear, run_length: u32 },
    /// The pixel was already latched; nothing changes but the cursor.
    Frozen,
}

/// Per-pixel monitoring state carried across every epoch of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorState {
    pub status: ChangeStatus,
    /// Sum of absolute normalized residuals over the current run, frozen once latched.
    pub magnitude: f64,
    /// Number of readings processed so far.
    pub iteration: u64,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorState {
    pub fn new() -> Self {
        Self {
            status: ChangeStatus::Unchanged,
            magnitude: 0.0,
            iteration: 0,
        }
    }

    pub fn run_length(&self) -> u32 {
        match self.status {
            ChangeStatus::Active { run_length } => run_length,
            _ => 0,
        }
    }

    /// The latched change date, or 0 when no change was confirmed.
    pub fn change_date(&self) -> FractionalYear {
        match self.status {
            ChangeStatus::Latched { date } => date,
            _ => 0.0,
        }
    }

    pub fn is_changed(&self) -> bool {
        matches!(self.status, ChangeStatus::Latched { .. })
    }

    /// True while a run is in progress or after a change was confirmed.
    pub fn is_mid_change(&self) -> bool {
        !matches!(self.status, ChangeStatus::Unchanged)
    }

    /// Feeds one reading, given as its normalized residual (`None` for a masked
    /// or unscorable reading), taken at `timestamp`.
    pub fn step(
        &mut self,
        timestamp: FractionalYear,
        residual: Option<f64>,
        params: &MonitorParams,
    ) -> Transition {
        self.iteration += 1;

        let run_length = match self.status {
            ChangeStatus::Latched { .. } => return Transition::Frozen,
            ChangeStatus::Active { run_length } => run_length,
            ChangeStatus::Unchanged => 0,
        };

        let Some(score) = residual.filter(|r| r.is_finite()).map(f64::abs) else {
            return Transition::Skipped { run_length };
        };

        if score <= params.threshold {
            self.status = ChangeStatus::Unchanged;
            self.magnitude = 0.0;
            return if run_length > 0 {
                Transition::Reset {
                    broken_run: run_length,
                }
            } else {
                Transition::Quiet
            };
        }

        let run_length = run_length + 1;
        self.magnitude += score;
        if run_length == params.consecutive {
            self.status = ChangeStatus::Latched { date: timestamp };
            Transition::Latched {
                date: timestamp,
                run_length,
            }
        } else {
            self.status = ChangeStatus::Active { run_length };
            Transition::Extended { run_length }
        }
    }

    /// Scores `obs` against `model` and feeds it.
    pub fn observe(
        &mut self,
        obs: &Observation,
        model: Option<(&HarmonicCoefficients, f64)>,
        params: &MonitorParams,
    ) -> Transition {
        let residual =
            model.and_then(|(coefficients, noise)| normalized_residual(obs, coefficients, noise));
        self.step(obs.timestamp, residual, params)
    }
}

/// `(observed - predicted) / noise_scale`, or `None` for a masked reading or an
/// unusable scale.
pub fn normalized_residual(
    obs: &Observation,
    coefficients: &HarmonicCoefficients,
    noise_scale: f64,
) -> Option<f64> {
    if !obs.valid || !(noise_scale > 0.0) {
        return None;
    }
    let z = (obs.value - coefficients.predict(obs.timestamp)) / noise_scale;
    z.is_finite().then_some(z)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> MonitorParams {
        MonitorParams::default()
    }

    fn feed(state: &mut MonitorState, readings: &[(f64, Option<f64>)]) -> Vec<Transition> {
        readings.iter().map(|&(t, r)| state.step(t, r, &params())).collect()
    }

    #[test]
    fn five_exceeding_readings_latch_with_mean_magnitude() {
        let mut state = MonitorState::new();
        let readings: Vec<_> = (0..5).map(|i| (40.0 + i as f64 * 0.1, Some(4.0))).collect();
        let transitions = feed(&mut state, &readings);

        assert_eq!(transitions[3], Transition::Extended { run_length: 4 });
        let date = readings[4].0;
        assert_eq!(transitions[4], Transition::Latched { date, run_length: 5 });
        assert_eq!(state.change_date(), date);
        assert_eq!(state.magnitude / params().consecutive as f64, 4.0);
        assert_eq!(state.iteration, 5);
    }

    #[test]
    fn missing_reading_does_not_break_the_run() {
        let mut state = MonitorState::new();
        let readings = [
            (40.0, Some(4.0)),
            (40.1, Some(-4.0)),
            (40.2, None),
            (40.3, Some(4.0)),
            (40.4, Some(4.0)),
            (40.5, Some(4.0)),
        ];
        let runs: Vec<u32> = feed(&mut state, &readings)
            .into_iter()
            .map(|t| match t {
                Transition::Extended { run_length } => run_length,
                Transition::Skipped { run_length } => run_length,
                Transition::Latched { run_length, .. } => run_length,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(runs, vec![1, 2, 2, 3, 4, 5]);
        assert_eq!(state.change_date(), 40.5);
        assert_eq!(state.iteration, 6);
    }

    #[test]
    fn within_threshold_reading_resets_run_and_magnitude() {
        let mut state = MonitorState::new();
        let mut readings: Vec<_> = (0..4).map(|i| (40.0 + i as f64 * 0.1, Some(4.0))).collect();
        readings.push((40.4, Some(1.0)));
        let transitions = feed(&mut state, &readings);

        assert_eq!(transitions[4], Transition::Reset { broken_run: 4 });
        assert_eq!(state.run_length(), 0);
        assert_eq!(state.magnitude, 0.0);
        assert_eq!(state.change_date(), 0.0);
        assert!(!state.is_mid_change());
    }

    #[test]
    fn threshold_is_strict() {
        let mut state = MonitorState::new();
        assert_eq!(state.step(40.0, Some(3.5), &params()), Transition::Quiet);
        assert_eq!(
            state.step(40.1, Some(-3.5001), &params()),
            Transition::Extended { run_length: 1 }
        );
    }

    #[test]
    fn latched_state_is_frozen() {
        let mut state = MonitorState::new();
        feed(&mut state, &[(40.0, Some(5.0)); 5]);
        let latched = state;
        let after = feed(&mut state, &[(41.0, Some(9.0)), (41.1, Some(0.0)), (41.2, None)]);
        assert!(after.iter().all(|t| *t == Transition::Frozen));
        assert_eq!(state.status, latched.status);
        assert_eq!(state.magnitude, latched.magnitude);
        assert_eq!(state.iteration, latched.iteration + 3);
    }

    #[test]
    fn gaps_before_any_run_are_quiet_skips() {
        let mut state = MonitorState::new();
        assert_eq!(state.step(40.0, None, &params()), Transition::Skipped { run_length: 0 });
        assert_eq!(state.status, ChangeStatus::Unchanged);
    }

    #[test]
    fn unusable_noise_scale_is_treated_as_missing() {
        let coefs = HarmonicCoefficients::new(0.5, 0.0, 0.0, 0.0);
        let obs = Observation::new(40.0, 0.9);
        assert!(normalized_residual(&obs, &coefs, 0.0).is_none());
        assert!(normalized_residual(&Observation::missing(40.0), &coefs, 0.1).is_none());
        let z = normalized_residual(&obs, &coefs, 0.1).expect("scorable");
        assert!((z - 4.0).abs() < 1e-9);
    }

    #[test]
    fn custom_trigger_length() {
        let custom = MonitorParams {
            threshold: 2.0,
            consecutive: 2,
        };
        let mut state = MonitorState::new();
        state.step(40.0, Some(2.5), &custom);
        let latched = Transition::Latched {
            date: 40.1,
            run_length: 2,
        };
        assert_eq!(state.step(40.1, Some(2.5), &custom), latched);
    }
}
