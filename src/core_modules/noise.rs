// THEORY:
// The noise scale is the root-mean-square residual of the fitted model over the
// training period. Dividing a monitoring residual by it turns "how far off is
// this reading" into a unitless score comparable across pixels, in the same
// spirit as a z-score against a standard deviation.

use crate::core_modules::harmonic::HarmonicCoefficients;
use crate::core_modules::observation::PixelSeries;

/// RMS of `predicted - observed` over the valid observations of `series`.
///
/// `None` when the series holds no valid observation.
pub fn rms_residual(coefficients: &HarmonicCoefficients, series: &PixelSeries) -> Option<f64> {
    let (sum_sq, count) = series.valid().fold((0.0, 0usize), |(sum, n), obs| {
        let residual = coefficients.predict(obs.timestamp) - obs.value;
        (sum + residual * residual, n + 1)
    });
    if count == 0 {
        return None;
    }
    Some((sum_sq / count as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::observation::Observation;

    #[test]
    fn rms_of_known_residuals() {
        // Flat model at 0; residuals 3 and -4 -> sqrt((9 + 16) / 2).
        let model = HarmonicCoefficients::new(0.0, 0.0, 0.0, 0.0);
        let series = PixelSeries::from_observations(vec![
            Observation::new(1.0, 3.0),
            Observation::new(2.0, -4.0),
            Observation::missing(3.0),
        ]);
        let rms = rms_residual(&model, &series).expect("valid observations");
        assert!((rms - (12.5f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn rms_penalises_outliers_more_than_mean_absolute_residual() {
        let model = HarmonicCoefficients::new(0.0, 0.0, 0.0, 0.0);
        let series = PixelSeries::from_observations(vec![
            Observation::new(1.0, 1.0),
            Observation::new(2.0, 1.0),
            Observation::new(3.0, 10.0),
        ]);
        let rms = rms_residual(&model, &series).expect("valid observations");
        assert!(rms > 12.0 / 3.0);
    }

    #[test]
    fn no_valid_observations_means_no_scale() {
        let model = HarmonicCoefficients::new(1.0, 0.0, 0.0, 0.0);
        let series = PixelSeries::from_observations(vec![Observation::missing(1.0)]);
        assert!(rms_residual(&model, &series).is_none());
    }
}
