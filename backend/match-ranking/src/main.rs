use anyhow::{bail, Result};
use match_ranking::jobs::{run_evaluation_job, run_inference_job, run_training_job};
use match_ranking::Config;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "usage: match-ranking <train|evaluate|infer> [config.toml]";

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args();
    let _bin = args.next();
    let Some(mode) = args.next() else {
        bail!(USAGE);
    };
    let config_path = args.next().map(PathBuf::from);

    // Load config
    let config = Config::load(config_path.as_deref())?;
    info!(mode = %mode, run = config.run_number, "Starting match-ranking");

    match mode.as_str() {
        "train" => {
            let artifacts = run_training_job(&config)?;
            info!(model = %artifacts.model_path.display(), "Model saved");
        }
        "evaluate" => {
            let summary = run_evaluation_job(&config)?;
            println!(
                "precision@100={:.4} mrr@100={:.4} r1={:.4} ({} banks)",
                summary.metrics.precision,
                summary.metrics.mrr,
                summary.metrics.r1,
                summary.metrics.evaluated
            );
        }
        "infer" => {
            let output = run_inference_job(&config)?;
            info!(path = %output.submission_path.display(), "Submission written");
        }
        other => bail!("unknown mode {:?}; {}", other, USAGE),
    }

    Ok(())
}
