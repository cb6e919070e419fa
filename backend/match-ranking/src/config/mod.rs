use crate::models::NoMatchPlacement;
use crate::services::learner::{BoostingParams, ModelKind};
use crate::services::trainer::TrainingConfig;
use anyhow::{anyhow, Context, Result};
use match_features::FeatureSetConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use validator::Validate;

const DEFAULTS: &str = include_str!("../../config/defaults.toml");

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Suffix of the model and column artifacts written by `train`
    #[validate(range(min = 1))]
    pub run_number: u32,

    #[validate(nested)]
    pub data: DataConfig,

    /// Feature recipe used by `train` and `evaluate`
    pub features: FeatureSetConfig,

    #[validate(nested)]
    pub training: TrainingConfig,

    #[validate(nested)]
    pub boosting: BoostingParams,

    #[validate(nested)]
    pub evaluation: EvaluationConfig,

    #[validate(nested)]
    pub inference: InferenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DataConfig {
    pub data_dir: PathBuf,
    #[validate(length(min = 1))]
    pub transactions: String,
    #[validate(length(min = 1))]
    pub clickstream: String,
    #[validate(length(min = 1))]
    pub click_categories: String,
    #[validate(length(min = 1))]
    pub matching: String,
    pub output_dir: PathBuf,
    #[validate(length(min = 1))]
    pub submission: String,
}

impl DataConfig {
    pub fn transactions_path(&self) -> PathBuf {
        self.data_dir.join(&self.transactions)
    }

    pub fn clickstream_path(&self) -> PathBuf {
        self.data_dir.join(&self.clickstream)
    }

    pub fn click_categories_path(&self) -> PathBuf {
        self.data_dir.join(&self.click_categories)
    }

    pub fn matching_path(&self) -> PathBuf {
        self.data_dir.join(&self.matching)
    }

    pub fn submission_path(&self) -> PathBuf {
        self.output_dir.join(&self.submission)
    }

    pub fn model_path(&self, run_number: u32) -> PathBuf {
        self.output_dir.join(format!("model_{}.json", run_number))
    }

    pub fn columns_path(&self, run_number: u32) -> PathBuf {
        self.output_dir.join(format!("features_{}.json", run_number))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EvaluationConfig {
    /// Share of labelled pairs held out for ranking evaluation
    #[validate(range(min = 0.0, max = 1.0))]
    pub holdout_fraction: f64,
    pub holdout_seed: u64,
    #[validate(range(min = 1))]
    pub batch_size: usize,
    #[validate(range(min = 1))]
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InferenceConfig {
    #[validate(range(min = 1))]
    pub batch_size: usize,
    #[validate(range(min = 1))]
    pub top_k: usize,
    pub no_match: NoMatchPlacement,
    /// Ordered ensemble; the first member defines the bank and rtk universes
    #[validate(nested)]
    pub members: Vec<EnsembleMemberConfig>,
}

/// One trained model of the inference ensemble
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EnsembleMemberConfig {
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(default)]
    pub kind: ModelKind,
    #[serde(default)]
    pub features: FeatureSetConfig,
    pub model_path: PathBuf,
    pub columns_path: PathBuf,
    #[validate(range(min = 0.0))]
    pub weight: Option<f64>,
}

impl Config {
    /// Load configuration
    ///
    /// # Loading Order
    /// 1. Built-in defaults (`config/defaults.toml`)
    /// 2. TOML file from `path`, or from `MATCHING_CONFIG` when `path` is None
    /// 3. Environment variables (highest priority)
    ///
    /// # Environment Variables
    /// `MATCHING_<SECTION>__<KEY>`, e.g. `MATCHING_TRAINING__ITERATIONS=500`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder().add_source(config::File::from_str(
            DEFAULTS,
            config::FileFormat::Toml,
        ));

        let file = path
            .map(Path::to_path_buf)
            .or_else(|| env::var_os("MATCHING_CONFIG").map(PathBuf::from));
        if let Some(file) = &file {
            builder = builder.add_source(config::File::from(file.as_path()).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("MATCHING")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .context("Failed to load configuration")?;
        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

        if self.training.validation
            && !(self.training.validation_fraction > 0.0 && self.training.validation_fraction < 1.0)
        {
            return Err(anyhow!("Validation fraction must be between 0 and 1"));
        }

        if !(self.evaluation.holdout_fraction > 0.0 && self.evaluation.holdout_fraction < 1.0) {
            return Err(anyhow!("Holdout fraction must be between 0 and 1"));
        }

        let weighted = self
            .inference
            .members
            .iter()
            .filter(|m| m.weight.is_some())
            .count();
        if weighted != 0 && weighted != self.inference.members.len() {
            return Err(anyhow!(
                "Ensemble weights must be set for all members or none ({} of {} set)",
                weighted,
                self.inference.members.len()
            ));
        }

        Ok(())
    }

    /// Checks that only matter for `infer`
    pub fn validate_for_inference(&self) -> Result<()> {
        if self.inference.members.is_empty() {
            return Err(anyhow!("Inference needs at least one ensemble member"));
        }
        Ok(())
    }
}
