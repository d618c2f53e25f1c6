//! # Survival Curves and Mortality Scoring
//!
//! Types and logic for turning per-patient survival step functions into a
//! mortality probability at a fixed horizon.
//!
//! The predictor itself sits behind the [`SurvivalModel`] trait so the scorer
//! never depends on a concrete model representation; any implementation that
//! yields one step function per row can be substituted. The bundled
//! [`ProportionalHazards`] predictor is one such implementation, loaded from
//! the model artifact and never fitted here.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A survival step function: ordered support times with the survival
/// probability attained at each time.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFunction {
    pub times: Vec<f64>,
    pub survival: Vec<f64>,
}

/// All ways survival prediction and scoring can fail.
#[derive(Error, Debug)]
pub enum SurvivalError {
    #[error("The model produced no survival curves.")]
    NoCurves,
    #[error("The survival curve support is empty; at least one time point is required.")]
    EmptySupport,
    #[error(
        "Patient row {patient_index} has survival-curve breakpoints that differ from the first row's. All rows must share one time grid; refusing to align columns silently."
    )]
    BreakpointMismatch { patient_index: usize },
    #[error(
        "The model expects {expected} feature columns but the input has {found}. The normalized table and the model feature list are out of step."
    )]
    FeatureCountMismatch { expected: usize, found: usize },
    #[error("Baseline survival times must be strictly increasing.")]
    UnsortedBaselineTimes,
    #[error(
        "Baseline survival values must be probabilities in [0, 1], non-increasing over time; entry {index} violates this."
    )]
    InvalidBaselineSurvival { index: usize },
    #[error(
        "Baseline survival has {times} time points but {values} survival values; the two must match."
    )]
    BaselineLengthMismatch { times: usize, values: usize },
}

/// The narrow interface every survival predictor satisfies: one step
/// function per input row.
pub trait SurvivalModel {
    fn predict_survival_function(
        &self,
        x: ArrayView2<f64>,
    ) -> Result<Vec<StepFunction>, SurvivalError>;
}

/// The narrow scoring interface: one probability per input row. This is the
/// surface the explainer perturbs; it hides the survival machinery entirely.
pub trait RiskScorer {
    fn score(&self, x: ArrayView2<f64>) -> Result<Vec<f64>, SurvivalError>;
}

/// Survival curves from a whole batch, materialized on their shared support.
///
/// `survival[[i, j]]` is patient `i`'s survival probability at `times[j]`.
#[derive(Debug, Clone)]
pub struct SurvivalMatrix {
    pub times: Vec<f64>,
    pub survival: ndarray::Array2<f64>,
}

/// Collects per-patient step functions into one matrix, verifying that every
/// curve reports the identical time grid. Divergent breakpoints would
/// otherwise be misaligned silently by column position, so they are a hard
/// error naming the first offending row.
pub fn materialize_curves(curves: &[StepFunction]) -> Result<SurvivalMatrix, SurvivalError> {
    let first = curves.first().ok_or(SurvivalError::NoCurves)?;
    if first.times.is_empty() {
        return Err(SurvivalError::EmptySupport);
    }

    for (patient_index, curve) in curves.iter().enumerate().skip(1) {
        if curve.times != first.times {
            return Err(SurvivalError::BreakpointMismatch { patient_index });
        }
    }

    let n_times = first.times.len();
    let mut survival = ndarray::Array2::zeros((curves.len(), n_times));
    for (i, curve) in curves.iter().enumerate() {
        for (j, &s) in curve.survival.iter().enumerate() {
            survival[[i, j]] = s;
        }
    }

    Ok(SurvivalMatrix {
        times: first.times.clone(),
        survival,
    })
}

/// Index of the support time nearest to `t`. Strict comparison keeps the
/// earliest point on a distance tie; a horizon beyond the observed range
/// clamps to the nearest endpoint.
pub fn nearest_time_index(times: &[f64], t: f64) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (j, &time) in times.iter().enumerate() {
        let distance = (time - t).abs();
        if distance < best_distance {
            best = j;
            best_distance = distance;
        }
    }
    best
}

/// `1 - survival` at the support point nearest the horizon, per patient.
pub fn mortality_at(matrix: &SurvivalMatrix, horizon: f64) -> Vec<f64> {
    let j = nearest_time_index(&matrix.times, horizon);
    matrix
        .survival
        .column(j)
        .iter()
        .map(|&s| 1.0 - s)
        .collect()
}

/// The bundled predictor: a tabulated baseline survival curve shifted per
/// patient by a linear risk score, `S_i(t) = S0(t) ^ exp(beta . x_i)`.
/// Every row shares the baseline time grid by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProportionalHazards {
    pub baseline_times: Vec<f64>,
    pub baseline_survival: Vec<f64>,
    pub coefficients: Vec<f64>,
}

impl ProportionalHazards {
    /// Structural checks applied when the artifact is loaded.
    pub fn validate(&self) -> Result<(), SurvivalError> {
        if self.baseline_times.is_empty() {
            return Err(SurvivalError::EmptySupport);
        }
        if self.baseline_times.len() != self.baseline_survival.len() {
            return Err(SurvivalError::BaselineLengthMismatch {
                times: self.baseline_times.len(),
                values: self.baseline_survival.len(),
            });
        }
        if self.baseline_times.windows(2).any(|w| w[0] >= w[1]) {
            return Err(SurvivalError::UnsortedBaselineTimes);
        }
        for (index, window) in self.baseline_survival.windows(2).enumerate() {
            if window[1] > window[0] {
                return Err(SurvivalError::InvalidBaselineSurvival { index: index + 1 });
            }
        }
        if let Some(index) = self
            .baseline_survival
            .iter()
            .position(|&s| !(0.0..=1.0).contains(&s))
        {
            return Err(SurvivalError::InvalidBaselineSurvival { index });
        }
        Ok(())
    }

    fn linear_predictor(&self, row: ndarray::ArrayView1<f64>) -> f64 {
        row.iter()
            .zip(&self.coefficients)
            .map(|(x, beta)| x * beta)
            .sum()
    }
}

impl SurvivalModel for ProportionalHazards {
    fn predict_survival_function(
        &self,
        x: ArrayView2<f64>,
    ) -> Result<Vec<StepFunction>, SurvivalError> {
        if x.ncols() != self.coefficients.len() {
            return Err(SurvivalError::FeatureCountMismatch {
                expected: self.coefficients.len(),
                found: x.ncols(),
            });
        }

        let mut curves = Vec::with_capacity(x.nrows());
        for row in x.rows() {
            let relative_hazard = self.linear_predictor(row).exp();
            let survival = self
                .baseline_survival
                .iter()
                .map(|&s0| s0.powf(relative_hazard))
                .collect();
            curves.push(StepFunction {
                times: self.baseline_times.clone(),
                survival,
            });
        }
        Ok(curves)
    }
}

/// Adapts any [`SurvivalModel`] into the scalar [`RiskScorer`] surface by
/// evaluating mortality at a fixed horizon.
pub struct MortalityScorer<'a> {
    model: &'a dyn SurvivalModel,
    horizon: f64,
}

impl<'a> MortalityScorer<'a> {
    pub fn new(model: &'a dyn SurvivalModel, horizon: f64) -> Self {
        Self { model, horizon }
    }
}

impl RiskScorer for MortalityScorer<'_> {
    fn score(&self, x: ArrayView2<f64>) -> Result<Vec<f64>, SurvivalError> {
        let curves = self.model.predict_survival_function(x)?;
        let matrix = materialize_curves(&curves)?;
        Ok(mortality_at(&matrix, self.horizon))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn toy_model() -> ProportionalHazards {
        ProportionalHazards {
            baseline_times: vec![1000.0, 5000.0, 6000.0, 7000.0],
            baseline_survival: vec![0.95, 0.80, 0.70, 0.55],
            coefficients: vec![0.4, -0.2],
        }
    }

    #[test]
    fn nearest_time_prefers_smaller_distance() {
        let times = [1000.0, 5000.0, 6000.0, 7000.0];
        // 6142 is 142 from 6000 and 858 from 7000.
        assert_eq!(nearest_time_index(&times, 6142.0), 2);
    }

    #[test]
    fn nearest_time_tie_takes_earlier_point() {
        let times = [2000.0, 4000.0];
        assert_eq!(nearest_time_index(&times, 3000.0), 0);
    }

    #[test]
    fn horizon_beyond_range_clamps_to_endpoint() {
        let times = [1000.0, 5000.0, 6000.0, 7000.0];
        assert_eq!(nearest_time_index(&times, 50_000.0), 3);
        assert_eq!(nearest_time_index(&times, 3.0), 0);
    }

    #[test]
    fn mortality_is_one_minus_survival_and_in_range() {
        let model = toy_model();
        let x = array![[0.0, 0.0], [1.0, 0.5]];
        let curves = model.predict_survival_function(x.view()).unwrap();
        let matrix = materialize_curves(&curves).unwrap();
        let mortality = mortality_at(&matrix, 6142.0);

        // Zero covariates reproduce the baseline exactly.
        assert_abs_diff_eq!(mortality[0], 1.0 - 0.70, epsilon = 1e-12);
        for (i, &m) in mortality.iter().enumerate() {
            assert!((0.0..=1.0).contains(&m), "row {i} out of range: {m}");
            assert_abs_diff_eq!(m, 1.0 - matrix.survival[[i, 2]], epsilon = 1e-12);
        }
    }

    #[test]
    fn higher_risk_score_lowers_survival() {
        let model = toy_model();
        let x = array![[0.0, 0.0], [2.0, 0.0]];
        let curves = model.predict_survival_function(x.view()).unwrap();
        assert!(curves[1].survival[2] < curves[0].survival[2]);
    }

    #[test]
    fn materialize_rejects_divergent_breakpoints() {
        let shared = StepFunction {
            times: vec![1.0, 2.0],
            survival: vec![0.9, 0.8],
        };
        let divergent = StepFunction {
            times: vec![1.0, 3.0],
            survival: vec![0.9, 0.8],
        };
        match materialize_curves(&[shared.clone(), shared, divergent]) {
            Err(SurvivalError::BreakpointMismatch { patient_index }) => {
                assert_eq!(patient_index, 2);
            }
            other => panic!("Expected BreakpointMismatch, got {other:?}"),
        }
    }

    #[test]
    fn scorer_wraps_model_end_to_end() {
        let model = toy_model();
        let scorer = MortalityScorer::new(&model, 6142.0);
        let x = array![[0.0, 0.0]];
        let scores = scorer.score(x.view()).unwrap();
        assert_abs_diff_eq!(scores[0], 0.30, epsilon = 1e-12);
    }

    #[test]
    fn validate_rejects_rising_survival() {
        let model = ProportionalHazards {
            baseline_times: vec![1.0, 2.0],
            baseline_survival: vec![0.5, 0.9],
            coefficients: vec![],
        };
        match model.validate() {
            Err(SurvivalError::InvalidBaselineSurvival { index }) => assert_eq!(index, 1),
            other => panic!("Expected InvalidBaselineSurvival, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_unsorted_times() {
        let model = ProportionalHazards {
            baseline_times: vec![2.0, 1.0],
            baseline_survival: vec![0.9, 0.8],
            coefficients: vec![],
        };
        assert!(matches!(
            model.validate(),
            Err(SurvivalError::UnsortedBaselineTimes)
        ));
    }

    #[test]
    fn model_rejects_wrong_feature_count() {
        let model = toy_model();
        let x = array![[1.0, 2.0, 3.0]];
        assert!(matches!(
            model.predict_survival_function(x.view()),
            Err(SurvivalError::FeatureCountMismatch {
                expected: 2,
                found: 3
            })
        ));
    }
}
