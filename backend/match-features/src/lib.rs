// Feature pipeline for bank ↔ rtk identity matching
//
// aggregator: raw event logs → per-identity aggregate tables
// builder:    aggregate tables → filtered, normalized feature matrices

pub mod aggregator;
pub mod builder;
pub mod config;
pub mod error;
pub mod models;
pub mod table;

// Re-export common types
pub use aggregator::{
    aggregate_clickstream, aggregate_transactions, ClickAggregates, ClickStat,
    TransactionAggregates, TransactionStat,
};
pub use builder::{build_click_features, build_transaction_features, FeatureSet, FeatureSetColumns};
pub use config::{
    ClickFeatureConfig, ClickTimeView, ClickView, FeatureSetConfig, SignMode,
    TransactionFeatureConfig, TransactionTimeView, TransactionView,
};
pub use error::{FeatureError, Result};
pub use models::{
    CategoryHierarchy, ClickCategory, ClickEvent, ClickLevel, IdentityId, Sign, TransactionEvent,
};
pub use table::{FeatureColumns, FeatureTable};
