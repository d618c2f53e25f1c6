use std::fs;
use std::path::Path;
use std::process::Command;

use lachesis::artifact::{FeatureScale, ModelBundle};
use lachesis::survival::ProportionalHazards;
use ndarray::array;
use tempfile::tempdir;

/// Lays out a working directory the binary expects: `model/model.toml` and
/// `data/<file>`.
fn write_fixture(dir: &Path, data: &str) {
    let bundle = ModelBundle {
        features: vec!["age".to_string(), "bmi".to_string()],
        zscaler: vec![
            FeatureScale {
                feature: "age".to_string(),
                mean: 60.0,
                std: 10.0,
            },
            FeatureScale {
                feature: "bmi".to_string(),
                mean: 28.0,
                std: 4.0,
            },
        ],
        predictor: ProportionalHazards {
            baseline_times: vec![1000.0, 5000.0, 6000.0, 7000.0],
            baseline_survival: vec![0.95, 0.80, 0.70, 0.55],
            coefficients: vec![0.4, 0.25],
        },
        background: array![[0.0, 0.0], [0.5, -0.25], [-1.0, 1.0]],
        seed: 42,
        horizon_days: 6142.0,
    };

    fs::create_dir_all(dir.join("model")).expect("create model dir");
    bundle
        .save(&dir.join("model").join("model.toml"))
        .expect("write model bundle");

    fs::create_dir_all(dir.join("data")).expect("create data dir");
    fs::write(dir.join("data").join("data.tsv"), data).expect("write patient data");
}

#[test]
fn scores_and_renders_surviving_patients_and_warns_about_dropped_rows() {
    let tmp = tempdir().expect("temporary directory");
    // P002 is missing its bmi value and must be dropped with a warning.
    write_fixture(
        tmp.path(),
        "patient_id\tage\tbmi\n\
         P001\t61\t27.4\n\
         P002\t48\t\n\
         P003\t70\t33.5\n",
    );

    let exe = env!("CARGO_BIN_EXE_lachesis");
    let output = Command::new(exe)
        .current_dir(tmp.path())
        .args(["--file-name", "data.tsv"])
        .output()
        .expect("run lachesis");

    assert!(
        output.status.success(),
        "binary failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("1 row(s) containing missing values"),
        "expected dropped-row warning, got:\n{stderr}"
    );

    let predictions =
        fs::read_to_string(tmp.path().join("results").join("predictions.tsv"))
            .expect("predictions table");
    let lines: Vec<&str> = predictions.lines().collect();
    assert_eq!(lines.len(), 3, "header plus exactly two data rows");
    assert_eq!(lines[0], "patient_id\t16.8-year mortality probability");
    assert!(lines[1].starts_with("P001\t"));
    assert!(lines[2].starts_with("P003\t"));

    for line in &lines[1..] {
        let probability: f64 = line
            .split('\t')
            .nth(1)
            .expect("probability column")
            .parse()
            .expect("numeric probability");
        assert!((0.0..=1.0).contains(&probability));
    }

    let plots = tmp.path().join("results").join("local_expl");
    assert!(plots.join("P001.svg").is_file());
    assert!(plots.join("P003.svg").is_file());
    assert!(!plots.join("P002.svg").exists(), "dropped patient must not be plotted");
}

#[test]
fn complete_input_produces_no_warning_and_all_plots() {
    let tmp = tempdir().expect("temporary directory");
    write_fixture(
        tmp.path(),
        "patient_id\tage\tbmi\n\
         P010\t55\t24.0\n\
         P011\t67\t30.2\n",
    );

    let exe = env!("CARGO_BIN_EXE_lachesis");
    let output = Command::new(exe)
        .current_dir(tmp.path())
        .output()
        .expect("run lachesis");

    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("missing values"));

    let predictions =
        fs::read_to_string(tmp.path().join("results").join("predictions.tsv"))
            .expect("predictions table");
    assert_eq!(predictions.lines().count(), 3);

    let plots = tmp.path().join("results").join("local_expl");
    assert!(plots.join("P010.svg").is_file());
    assert!(plots.join("P011.svg").is_file());
}

#[test]
fn missing_required_feature_column_is_a_fatal_named_error() {
    let tmp = tempdir().expect("temporary directory");
    // The model requires `bmi`, which this file does not carry at all.
    write_fixture(
        tmp.path(),
        "patient_id\tage\n\
         P001\t61\n",
    );

    let exe = env!("CARGO_BIN_EXE_lachesis");
    let output = Command::new(exe)
        .current_dir(tmp.path())
        .output()
        .expect("run lachesis");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("requires feature 'bmi'"),
        "expected a named missing-feature error, got:\n{stderr}"
    );
}
