//! # Patient Data Loading
//!
//! This module is the exclusive entry point for user-provided patient data.
//! It reads a tab-separated table, validates it against the expected shape
//! (one `patient_id` column, all remaining columns numeric), and converts it
//! into the `ndarray` structures used by the rest of the pipeline.
//!
//! - Missing cells are legal at this stage: they are mapped to `f64::NAN`
//!   and the normalizer decides which rows survive. Only structural problems
//!   (absent id column, non-numeric text, duplicate ids) are load errors.
//! - Failures are assumed to be user-input errors; `DataError` messages are
//!   written to be actionable without reading the source.

use ndarray::{Array2, ShapeBuilder};
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Name of the identifier column every input file must carry.
pub const PATIENT_ID_COLUMN: &str = "patient_id";

/// A raw feature table: one row per patient, one column per named feature.
///
/// `values[[i, j]]` is the value of feature `names[j]` for patient `ids[i]`,
/// with `NAN` encoding a missing cell.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub ids: Vec<String>,
    pub names: Vec<String>,
    pub values: Array2<f64>,
}

impl FeatureTable {
    pub fn n_patients(&self) -> usize {
        self.values.nrows()
    }

    /// Index of a named column, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// All ways loading a patient table can fail.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error("IO error reading '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error(
        "The required identifier column '{PATIENT_ID_COLUMN}' was not found in the input file. Please check spelling and case."
    )]
    PatientIdColumnMissing,
    #[error("Patient id '{0}' appears more than once; identifiers must be unique.")]
    DuplicatePatientId(String),
    #[error(
        "Feature column '{column_name}' contains non-numeric data and could not be converted to f64. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        found_type: String,
    },
    #[error("The input file contains no feature columns besides '{PATIENT_ID_COLUMN}'.")]
    NoFeatureColumns,
    #[error("The input file contains no data rows.")]
    NoRows,
}

/// Reads a tab-separated patient table from `path`.
pub fn load_feature_table(path: &Path) -> Result<FeatureTable, DataError> {
    let file = File::open(path).map_err(|source| DataError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let df = CsvReader::new(file)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
        )
        .finish()?;

    if df.height() == 0 {
        return Err(DataError::NoRows);
    }

    let column_names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    if !column_names.iter().any(|c| c == PATIENT_ID_COLUMN) {
        return Err(DataError::PatientIdColumnMissing);
    }

    let ids = extract_patient_ids(&df)?;

    let names: Vec<String> = column_names
        .into_iter()
        .filter(|c| c != PATIENT_ID_COLUMN)
        .collect();
    if names.is_empty() {
        return Err(DataError::NoFeatureColumns);
    }

    // Column-by-column conversion; cells polars parsed as null become NAN.
    let n = df.height();
    let mut buffer = Vec::with_capacity(n * names.len());
    for name in &names {
        buffer.extend(extract_numeric_column(&df, name)?);
    }
    let values = Array2::from_shape_vec((n, names.len()).f(), buffer)
        .expect("column vectors have uniform length");

    Ok(FeatureTable { ids, names, values })
}

/// Pulls the identifier column out as strings and enforces uniqueness.
fn extract_patient_ids(df: &DataFrame) -> Result<Vec<String>, DataError> {
    let series = df.column(PATIENT_ID_COLUMN)?;
    let n = df.height();

    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        let value = series.get(i).unwrap_or(AnyValue::Null);
        let text = match value {
            AnyValue::Null => String::new(),
            AnyValue::String(s) => s.to_string(),
            other => other.to_string(),
        };
        ids.push(text);
    }

    let mut seen: HashSet<&str> = HashSet::with_capacity(n);
    for id in &ids {
        if !seen.insert(id.as_str()) {
            return Err(DataError::DuplicatePatientId(id.clone()));
        }
    }
    Ok(ids)
}

/// Converts one feature column to `Vec<f64>`, mapping nulls to NAN.
///
/// A cast that *introduces* nulls means the column held non-numeric text,
/// which is a hard error; nulls present before the cast were genuinely
/// missing cells and pass through as NAN.
fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
    let series = df.column(column_name)?;
    let nulls_before = series.null_count();

    let casted = match series.cast(&DataType::Float64) {
        Ok(casted) => casted,
        Err(_) => {
            return Err(DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                found_type: format!("{:?}", series.dtype()),
            });
        }
    };
    if casted.null_count() > nulls_before {
        return Err(DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            found_type: format!("{:?}", series.dtype()),
        });
    }

    Ok(casted
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_table(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn loads_ids_and_features_in_input_order() {
        let file = write_table(
            "patient_id\tage\tbmi\thba1c\n\
             P001\t61\t27.4\t7.1\n\
             P002\t48\t31.0\t8.9\n",
        );
        let table = load_feature_table(file.path()).unwrap();

        assert_eq!(table.ids, vec!["P001", "P002"]);
        assert_eq!(table.names, vec!["age", "bmi", "hba1c"]);
        assert_eq!(table.values.shape(), &[2, 3]);
        assert_abs_diff_eq!(table.values[[0, 0]], 61.0, epsilon = 1e-12);
        assert_abs_diff_eq!(table.values[[1, 2]], 8.9, epsilon = 1e-12);
    }

    #[test]
    fn missing_cells_become_nan_not_errors() {
        let file = write_table(
            "patient_id\tage\tbmi\n\
             P001\t61\t\n\
             P002\t48\t31.0\n",
        );
        let table = load_feature_table(file.path()).unwrap();
        assert!(table.values[[0, 1]].is_nan());
        assert_abs_diff_eq!(table.values[[1, 1]], 31.0, epsilon = 1e-12);
    }

    #[test]
    fn rejects_missing_id_column() {
        let file = write_table("age\tbmi\n61\t27.4\n");
        match load_feature_table(file.path()) {
            Err(DataError::PatientIdColumnMissing) => {}
            other => panic!("Expected PatientIdColumnMissing, got {other:?}"),
        }
    }

    #[test]
    fn rejects_duplicate_ids() {
        let file = write_table(
            "patient_id\tage\n\
             P001\t61\n\
             P001\t48\n",
        );
        match load_feature_table(file.path()) {
            Err(DataError::DuplicatePatientId(id)) => assert_eq!(id, "P001"),
            other => panic!("Expected DuplicatePatientId, got {other:?}"),
        }
    }

    #[test]
    fn rejects_textual_feature_column() {
        let file = write_table(
            "patient_id\tage\tsmoker\n\
             P001\t61\tyes\n\
             P002\t48\tno\n",
        );
        match load_feature_table(file.path()) {
            Err(DataError::ColumnWrongType { column_name, .. }) => {
                assert_eq!(column_name, "smoker");
            }
            other => panic!("Expected ColumnWrongType, got {other:?}"),
        }
    }

    #[test]
    fn numeric_ids_are_read_as_text() {
        let file = write_table(
            "patient_id\tage\n\
             1001\t61\n\
             1002\t48\n",
        );
        let table = load_feature_table(file.path()).unwrap();
        assert_eq!(table.ids, vec!["1001", "1002"]);
    }
}
