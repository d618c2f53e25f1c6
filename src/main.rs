// The orchestrator: owns the fixed file layout, loads the model bundle once
// into an immutable value, and runs the sequential scoring + explanation
// pipeline over one input batch. All tunables besides the input file name
// are deliberate constants.

use clap::Parser;
use lachesis::artifact::ModelBundle;
use lachesis::data::load_feature_table;
use lachesis::explain::{DEFAULT_PERMUTATIONS, PermutationExplainer};
use lachesis::pipeline;
use lachesis::survival::MortalityScorer;
use std::error::Error;
use std::path::Path;
use std::process;
use std::time::Instant;

#[derive(Parser, Debug)]
#[clap(
    name = "lachesis",
    version,
    about = "Scores patient records for 16.8-year mortality probability and renders per-patient explanation plots."
)]
struct Args {
    /// Data file name, resolved inside the `data/` directory.
    #[clap(long, default_value = "data.tsv")]
    file_name: String,
}

const MODEL_PATH: &str = "model/model.toml";
const DATA_DIR: &str = "data";
const PREDICTIONS_PATH: &str = "results/predictions.tsv";
const PLOTS_DIR: &str = "results/local_expl";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = run(Args::parse()) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let overall_start_time = Instant::now();

    // --- Phase 1: Model bundle ---
    eprintln!("> Loading model bundle from '{MODEL_PATH}'");
    let bundle = ModelBundle::load(Path::new(MODEL_PATH))?;
    eprintln!(
        "> Model expects {} feature(s); scoring horizon is {} days.",
        bundle.features.len(),
        bundle.horizon_days
    );

    // --- Phase 2: Patient data ---
    let data_path = Path::new(DATA_DIR).join(&args.file_name);
    eprintln!("> Reading patient data from '{}'", data_path.display());
    let table = load_feature_table(&data_path)?;
    eprintln!(
        "> Loaded {} patient(s) with {} feature column(s).",
        table.n_patients(),
        table.names.len()
    );

    // --- Phase 3: Scoring and explanation ---
    let scorer = MortalityScorer::new(&bundle.predictor, bundle.horizon_days);
    let explainer = PermutationExplainer::new(
        &scorer,
        &bundle.background,
        DEFAULT_PERMUTATIONS,
        bundle.seed,
    );
    let summary = pipeline::run(
        &bundle,
        &scorer,
        &explainer,
        &table,
        Path::new(PREDICTIONS_PATH),
        Path::new(PLOTS_DIR),
    )?;

    eprintln!(
        "> Wrote {} prediction(s) to '{PREDICTIONS_PATH}'.",
        summary.predictions.ids.len()
    );
    eprintln!(
        "> Rendered {} explanation plot(s) into '{PLOTS_DIR}'.",
        summary.plots.len()
    );
    eprintln!(
        "\nSuccess! Total execution time: {:.2?}",
        overall_start_time.elapsed()
    );
    Ok(())
}
