//! # Feature Normalization
//!
//! Applies the bundle's z-scaling table to a raw feature table and restricts
//! it to the model's required feature list, in the model's column order.
//!
//! Scaled features become `(v - mean) / std`; features without a scaling
//! entry pass through unchanged. Rows left with any NaN after the transform
//! are dropped from the batch, and the drop count is reported to the caller
//! as well as the log. The surviving rows' raw values are carried alongside
//! the normalized ones because the waterfall plot annotates original,
//! human-readable values rather than z-scores.

use crate::artifact::FeatureScale;
use crate::data::FeatureTable;
use ndarray::Array2;
use std::collections::HashMap;
use thiserror::Error;

/// A normalized batch, reduced to the model's features and to the rows that
/// survived the missing-value drop.
#[derive(Debug, Clone)]
pub struct NormalizedBatch {
    /// Surviving patient ids, in input order.
    pub ids: Vec<String>,
    /// Feature names, in the model's required order.
    pub features: Vec<String>,
    /// Normalized values, shape `[survivors, features]`.
    pub normalized: Array2<f64>,
    /// Raw (untransformed) values for the same rows and columns.
    pub raw: Array2<f64>,
    /// Number of input rows dropped because of missing values.
    pub dropped: usize,
}

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error(
        "The model requires feature '{0}', which is not a column of the input file. Please add the column or check its spelling."
    )]
    MissingFeature(String),
}

/// Normalizes `table` against `scales` and selects `features`, dropping rows
/// that contain missing values after the transform.
pub fn normalize(
    table: &FeatureTable,
    scales: &[FeatureScale],
    features: &[String],
) -> Result<NormalizedBatch, NormalizeError> {
    let scale_by_name: HashMap<&str, &FeatureScale> = scales
        .iter()
        .map(|entry| (entry.feature.as_str(), entry))
        .collect();

    // Resolve every required feature to its input column up front so a
    // missing column is reported before any work is done.
    let mut column_indices = Vec::with_capacity(features.len());
    for feature in features {
        let index = table
            .column_index(feature)
            .ok_or_else(|| NormalizeError::MissingFeature(feature.clone()))?;
        column_indices.push(index);
    }

    let n = table.n_patients();
    let k = features.len();
    let mut normalized = Array2::zeros((n, k));
    let mut raw = Array2::zeros((n, k));
    for (j, (feature, &column)) in features.iter().zip(&column_indices).enumerate() {
        for i in 0..n {
            let v = table.values[[i, column]];
            raw[[i, j]] = v;
            normalized[[i, j]] = match scale_by_name.get(feature.as_str()) {
                Some(scale) => (v - scale.mean) / scale.std,
                None => v,
            };
        }
    }

    // Missing-value policy: a NaN anywhere in a row removes the whole row.
    let mut keep = Vec::with_capacity(n);
    for i in 0..n {
        if normalized.row(i).iter().any(|v| v.is_nan()) {
            log::debug!("dropped patient '{}' due to missing values", table.ids[i]);
        } else {
            keep.push(i);
        }
    }
    let dropped = n - keep.len();
    if dropped > 0 {
        log::warn!("{dropped} row(s) containing missing values (NaNs) were removed");
    }

    let ids = keep.iter().map(|&i| table.ids[i].clone()).collect();
    let select = |source: &Array2<f64>| {
        let mut out = Array2::zeros((keep.len(), k));
        for (row, &i) in keep.iter().enumerate() {
            out.row_mut(row).assign(&source.row(i));
        }
        out
    };

    Ok(NormalizedBatch {
        ids,
        features: features.to_vec(),
        normalized: select(&normalized),
        raw: select(&raw),
        dropped,
    })
}
