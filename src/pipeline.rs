//! # Scoring and Explanation Pipeline
//!
//! Drives one batch through the engine: normalize once, score every
//! surviving row at the bundle's horizon, write the predictions table, then
//! explain and render each patient sequentially, in input order.
//!
//! The pipeline only talks to the model through the [`RiskScorer`] and
//! [`Explainer`] interfaces, so any compatible implementations can be wired
//! in by the caller. Patients are independent units of work; a rendering
//! failure aborts the run at that patient, leaving earlier patients' files
//! in place.

use crate::artifact::ModelBundle;
use crate::data::FeatureTable;
use crate::explain::{ExplainError, Explainer};
use crate::normalize::{normalize, NormalizeError};
use crate::survival::{RiskScorer, SurvivalError};
use crate::waterfall::{render_waterfall, WaterfallError};
use std::fmt::Write as FmtWrite;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Tolerance for the additivity cross-check between explainer output and
/// scorer output.
const RECONSTRUCTION_TOLERANCE: f64 = 1e-6;

/// Header of the predictions table.
const PREDICTIONS_HEADER: &str = "patient_id\t16.8-year mortality probability";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Survival(#[from] SurvivalError),
    #[error(transparent)]
    Explain(#[from] ExplainError),
    #[error(transparent)]
    Waterfall(#[from] WaterfallError),
    #[error("IO error writing predictions: {0}")]
    Io(#[from] io::Error),
}

/// Mortality probabilities for the rows that survived normalization.
#[derive(Debug, Clone)]
pub struct Predictions {
    pub ids: Vec<String>,
    pub probabilities: Vec<f64>,
    /// Rows removed by the missing-value policy.
    pub dropped: usize,
}

/// What one full run produced.
#[derive(Debug)]
pub struct RunSummary {
    pub predictions: Predictions,
    pub plots: Vec<PathBuf>,
}

/// Scores a batch and returns one mortality probability per surviving row.
pub fn score_batch(
    bundle: &ModelBundle,
    scorer: &dyn RiskScorer,
    table: &FeatureTable,
) -> Result<Predictions, PipelineError> {
    let batch = normalize(table, &bundle.zscaler, &bundle.features)?;
    let probabilities = scorer.score(batch.normalized.view())?;
    Ok(Predictions {
        ids: batch.ids,
        probabilities,
        dropped: batch.dropped,
    })
}

/// Runs the whole batch: predictions table plus one waterfall per patient.
pub fn run(
    bundle: &ModelBundle,
    scorer: &dyn RiskScorer,
    explainer: &dyn Explainer,
    table: &FeatureTable,
    predictions_path: &Path,
    plots_dir: &Path,
) -> Result<RunSummary, PipelineError> {
    let batch = normalize(table, &bundle.zscaler, &bundle.features)?;
    if batch.dropped > 0 {
        eprintln!(
            "> Warning: {} row(s) containing missing values (NaNs) were removed!",
            batch.dropped
        );
    }

    let probabilities = scorer.score(batch.normalized.view())?;
    let predictions = Predictions {
        ids: batch.ids.clone(),
        probabilities,
        dropped: batch.dropped,
    };
    write_predictions(predictions_path, &predictions)?;

    eprintln!("> Constructing explainability plots...");
    let explanations = explainer.explain(batch.normalized.view())?;
    if !explanations.verify(&predictions.probabilities, RECONSTRUCTION_TOLERANCE) {
        log::warn!(
            "contribution vectors do not reconstruct the predicted probabilities within {RECONSTRUCTION_TOLERANCE}"
        );
    }

    let mut plots = Vec::with_capacity(batch.ids.len());
    for (i, patient_id) in batch.ids.iter().enumerate() {
        let path = render_waterfall(
            plots_dir,
            patient_id,
            &batch.features,
            batch.raw.row(i),
            explanations.contributions(i),
            explanations.base_value(i),
        )?;
        plots.push(path);
    }

    Ok(RunSummary { predictions, plots })
}

/// Writes the two-column predictions table, tab-separated, via a temporary
/// file renamed into place so a failed run never leaves a half-written
/// table behind.
pub fn write_predictions(path: &Path, predictions: &Predictions) -> Result<(), io::Error> {
    let output_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(output_dir)?;

    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Output path '{}' has no file name.", path.display()),
        )
    })?;
    let temp_path = output_dir.join(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        std::process::id()
    ));

    let write_result = (|| -> io::Result<()> {
        let mut writer = BufWriter::new(fs::File::create(&temp_path)?);
        writeln!(writer, "{PREDICTIONS_HEADER}")?;

        let mut line = String::new();
        let mut ryu_buffer = ryu::Buffer::new();
        for (id, &probability) in predictions.ids.iter().zip(&predictions.probabilities) {
            line.clear();
            write!(&mut line, "{id}\t{}", ryu_buffer.format(probability))
                .expect("writing to a String cannot fail");
            writeln!(writer, "{line}")?;
        }

        writer.flush()?;
        let file = writer.into_inner().map_err(io::Error::other)?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }

    fs::rename(&temp_path, path).inspect_err(|_| {
        let _ = fs::remove_file(&temp_path);
    })
}
