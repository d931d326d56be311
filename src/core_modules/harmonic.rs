// THEORY:
// The `harmonic` module models the "normal" behaviour of a pixel: a linear
// trend plus one annual seasonal cycle,
//
//     index(t) = constant + trend * t + sin_coef * sin(2πt) + cos_coef * cos(2πt)
//
// The fit is a closed-form least-squares solve through the Moore-Penrose
// pseudoinverse of the per-pixel design matrix. Individual pixels often have
// clustered acquisition dates, which makes the design matrix near-collinear;
// the pseudoinverse returns the minimum-norm solution there instead of failing.
//
// A four-parameter model needs at least five valid observations. Below that
// the pixel simply has no model (`None`), which downstream stages read as
// "no data" for that pixel.

use crate::core_modules::observation::{FractionalYear, PixelSeries, design_vector};
use nalgebra::{DMatrix, DVector};

/// Minimum number of valid observations required to fit a model.
pub const MIN_OBSERVATIONS: usize = 5;

/// Singular values below this are treated as zero by the pseudoinverse.
const PSEUDO_INVERSE_EPS: f64 = 1e-10;

/// Fitted harmonic regression coefficients for a single pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarmonicCoefficients {
    pub constant: f64,
    pub trend: f64,
    pub sin_coef: f64,
    pub cos_coef: f64,
}

impl HarmonicCoefficients {
    pub fn new(constant: f64, trend: f64, sin_coef: f64, cos_coef: f64) -> Self {
        Self {
            constant,
            trend,
            sin_coef,
            cos_coef,
        }
    }

    /// Full model prediction at `t`, seasonal terms included.
    pub fn predict(&self, t: FractionalYear) -> f64 {
        let [one, t, sin, cos] = design_vector(t);
        self.constant * one + self.trend * t + self.sin_coef * sin + self.cos_coef * cos
    }

    /// Prediction from the constant and the linear trend only.
    pub fn predict_trend(&self, t: FractionalYear) -> f64 {
        self.constant + self.trend * t
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.constant, self.trend, self.sin_coef, self.cos_coef]
    }
}

/// Fits the harmonic model on the valid observations of `series`.
///
/// Returns `None` when fewer than [`MIN_OBSERVATIONS`] valid observations are
/// present or the decomposition fails.
pub fn fit(series: &PixelSeries) -> Option<HarmonicCoefficients> {
    let rows = series.valid_count();
    if rows < MIN_OBSERVATIONS {
        return None;
    }

    let mut design = Vec::with_capacity(rows * 4);
    let mut response = Vec::with_capacity(rows);
    for obs in series.valid() {
        design.extend_from_slice(&obs.design_vector());
        response.push(obs.value);
    }

    let predictors = DMatrix::from_row_slice(rows, 4, &design);
    let response = DVector::from_vec(response);
    let pinv = predictors.pseudo_inverse(PSEUDO_INVERSE_EPS).ok()?;
    let solution = pinv * response;

    let coefficients =
        HarmonicCoefficients::new(solution[0], solution[1], solution[2], solution[3]);
    if coefficients.as_array().iter().all(|c| c.is_finite()) {
        Some(coefficients)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::observation::Observation;

    fn synthetic(coefs: HarmonicCoefficients, start: f64, count: usize, step: f64) -> PixelSeries {
        let observations = (0..count)
            .map(|i| {
                let t = start + i as f64 * step;
                Observation::new(t, coefs.predict(t))
            })
            .collect();
        PixelSeries::from_observations(observations)
    }

    #[test]
    fn recovers_noiseless_coefficients() {
        let truth = HarmonicCoefficients::new(0.8, -0.004, 0.05, -0.03);
        let series = synthetic(truth, 24.0, 60, 0.1);
        let fitted = fit(&series).expect("enough observations");
        for (a, b) in fitted.as_array().iter().zip(truth.as_array()) {
            assert!((a - b).abs() < 1e-6, "{a} vs {b}");
        }
    }

    #[test]
    fn fewer_than_five_valid_observations_yield_no_model() {
        let truth = HarmonicCoefficients::new(0.5, 0.0, 0.1, 0.1);
        let mut obs: Vec<Observation> = synthetic(truth, 30.0, 4, 0.2).observations().to_vec();
        obs.push(Observation::missing(31.0));
        obs.push(Observation::missing(31.2));
        assert!(fit(&PixelSeries::from_observations(obs)).is_none());
    }

    #[test]
    fn exactly_five_observations_fit() {
        let truth = HarmonicCoefficients::new(0.5, 0.01, 0.1, 0.1);
        assert!(fit(&synthetic(truth, 30.0, 5, 0.17)).is_some());
    }

    #[test]
    fn invalid_observations_do_not_influence_the_fit() {
        let truth = HarmonicCoefficients::new(0.7, 0.002, -0.04, 0.02);
        let mut obs = synthetic(truth, 24.0, 40, 0.15).observations().to_vec();
        obs.push(Observation { timestamp: 26.05, value: 50.0, valid: false });
        let fitted = fit(&PixelSeries::from_observations(obs)).expect("fit");
        assert!((fitted.constant - truth.constant).abs() < 1e-6);
    }

    #[test]
    fn collinear_design_still_produces_a_minimum_norm_solution() {
        // Every observation on the same date: rank one design matrix.
        let obs = (0..6).map(|_| Observation::new(30.0, 0.6)).collect();
        let fitted = fit(&PixelSeries::from_observations(obs))
            .expect("pseudoinverse handles rank deficiency");
        assert!((fitted.predict(30.0) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn trend_prediction_drops_seasonal_terms() {
        let c = HarmonicCoefficients::new(1.0, 0.5, 3.0, 4.0);
        assert_eq!(c.predict_trend(2.0), 2.0);
        assert!((c.predict(2.0) - (2.0 + 4.0)).abs() < 1e-9);
    }
}
