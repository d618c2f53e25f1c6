//! # Per-Patient Contribution Vectors
//!
//! The explanation side of the engine: a container for signed per-feature
//! contributions plus a baseline expectation, the narrow [`Explainer`]
//! interface the pipeline consumes, and the bundled permutation explainer
//! that produces contributions for any [`RiskScorer`].
//!
//! The additivity invariant is the load-bearing property here: for every
//! sample, `base_value + sum(contributions)` must equal the scorer's output
//! for that sample. [`Explanations::verify`] checks it explicitly, and the
//! permutation estimator satisfies it by construction (every sampled walk
//! telescopes from a background row to the full sample).

use crate::survival::{RiskScorer, SurvivalError};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use thiserror::Error;

/// Signed contribution vectors for a batch of samples.
#[derive(Debug, Clone)]
pub struct Explanations {
    /// Per-sample, per-feature contributions, shape `[samples, features]`.
    values: Array2<f64>,
    /// Per-sample baseline expectation.
    base_values: Vec<f64>,
}

impl Explanations {
    pub fn new(values: Array2<f64>, base_values: Vec<f64>) -> Self {
        debug_assert_eq!(values.nrows(), base_values.len());
        Self {
            values,
            base_values,
        }
    }

    pub fn n_samples(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.values.ncols()
    }

    /// Contributions for one sample.
    pub fn contributions(&self, sample: usize) -> ArrayView1<'_, f64> {
        self.values.row(sample)
    }

    /// Baseline expectation for one sample.
    pub fn base_value(&self, sample: usize) -> f64 {
        self.base_values[sample]
    }

    /// The prediction implied by additivity: baseline plus contribution sum.
    pub fn reconstructed_prediction(&self, sample: usize) -> f64 {
        self.base_value(sample) + self.contributions(sample).sum()
    }

    /// Checks the additivity invariant against the scorer's own outputs.
    pub fn verify(&self, predictions: &[f64], tolerance: f64) -> bool {
        if predictions.len() != self.n_samples() {
            return false;
        }
        predictions
            .iter()
            .enumerate()
            .all(|(i, &p)| (self.reconstructed_prediction(i) - p).abs() <= tolerance)
    }
}

#[derive(Error, Debug)]
pub enum ExplainError {
    #[error("Scoring failed while computing contributions: {0}")]
    Score(#[from] SurvivalError),
    #[error(
        "The explainer background has {expected} feature columns but the samples to explain have {found}."
    )]
    FeatureMismatch { expected: usize, found: usize },
    #[error("The explainer background is empty; at least one reference row is required.")]
    EmptyBackground,
}

/// The narrow explanation interface: baseline + contributions per row.
pub trait Explainer {
    fn explain(&self, x: ArrayView2<f64>) -> Result<Explanations, ExplainError>;
}

/// Number of feature permutations sampled per explained row.
pub const DEFAULT_PERMUTATIONS: usize = 16;

/// Model-agnostic permutation explainer.
///
/// For each sample it walks random feature orderings, replacing background
/// values with the sample's values one feature at a time and attributing the
/// score deltas. Averaging over orderings and background rows estimates the
/// Shapley contribution of each feature; the baseline is the mean score of
/// the background rows. Seeded, so a given bundle explains deterministically.
pub struct PermutationExplainer<'a> {
    scorer: &'a dyn RiskScorer,
    background: &'a Array2<f64>,
    n_permutations: usize,
    seed: u64,
}

impl<'a> PermutationExplainer<'a> {
    pub fn new(
        scorer: &'a dyn RiskScorer,
        background: &'a Array2<f64>,
        n_permutations: usize,
        seed: u64,
    ) -> Self {
        Self {
            scorer,
            background,
            n_permutations,
            seed,
        }
    }

    fn score_row(&self, row: ArrayView1<f64>) -> Result<f64, SurvivalError> {
        let matrix = row.insert_axis(ndarray::Axis(0));
        Ok(self.scorer.score(matrix)?[0])
    }
}

impl Explainer for PermutationExplainer<'_> {
    fn explain(&self, x: ArrayView2<f64>) -> Result<Explanations, ExplainError> {
        let k = self.background.ncols();
        if self.background.nrows() == 0 {
            return Err(ExplainError::EmptyBackground);
        }
        if x.ncols() != k {
            return Err(ExplainError::FeatureMismatch {
                expected: k,
                found: x.ncols(),
            });
        }

        // The baseline is the expected score over the background; computed
        // once, shared by every explained sample.
        let background_scores = self.scorer.score(self.background.view())?;
        let baseline =
            background_scores.iter().sum::<f64>() / background_scores.len() as f64;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut values = Array2::zeros((x.nrows(), k));
        let mut order: Vec<usize> = (0..k).collect();

        for (i, sample) in x.rows().into_iter().enumerate() {
            let mut contributions = Array1::<f64>::zeros(k);
            for _ in 0..self.n_permutations {
                order.shuffle(&mut rng);
                for (b, start_score) in self.background.rows().into_iter().zip(&background_scores)
                {
                    let mut current = b.to_owned();
                    let mut previous = *start_score;
                    for &j in &order {
                        current[j] = sample[j];
                        let score = self.score_row(current.view())?;
                        contributions[j] += score - previous;
                        previous = score;
                    }
                }
            }
            let walks = (self.n_permutations * self.background.nrows()) as f64;
            values
                .row_mut(i)
                .assign(&contributions.mapv(|v| v / walks));
        }

        Ok(Explanations::new(
            values,
            vec![baseline; x.nrows()],
        ))
    }
}
