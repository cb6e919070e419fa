pub mod config;
pub mod error;
pub mod jobs;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{MatchingError, Result};
pub use models::{CandidatePair, MatchPair, MatchTarget, NoMatchPlacement, RankedList};
pub use services::{
    CandidateSampler, EnsembleScorer, ObliviousBoosting, ResamplingTrainer, TopKEngine,
};
