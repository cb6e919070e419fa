use crate::error::FeatureError;
use crate::models::ClickLevel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which transaction signs feed the category features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SignMode {
    /// All transactions in one block
    Combined,
    /// Only outgoing transactions, suffixed `-negative`
    Negative,
    /// Separate `-negative` and `-positive` blocks
    Both,
}

impl FromStr for SignMode {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "combined" => Ok(SignMode::Combined),
            "negative" => Ok(SignMode::Negative),
            "both" => Ok(SignMode::Both),
            other => Err(FeatureError::Configuration(format!(
                "Unsupported sign mode: {}",
                other
            ))),
        }
    }
}

impl TryFrom<String> for SignMode {
    type Error = FeatureError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SignMode> for String {
    fn from(mode: SignMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for SignMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignMode::Combined => "combined",
            SignMode::Negative => "negative",
            SignMode::Both => "both",
        };
        f.write_str(s)
    }
}

/// Transaction aggregate table used for category features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionView {
    Grouped,
    GroupedWeek,
    GroupedDate,
    WeeklyNormed,
}

/// Clickstream aggregate table used for category features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickView {
    GroupedWeek,
    GroupedDate,
    WeeklyNormed,
}

/// Transaction time-of-day histogram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionTimeView {
    #[serde(rename = "hour")]
    Hour,
    #[serde(rename = "hour_neg")]
    HourNeg,
    #[serde(rename = "hour_pos")]
    HourPos,
    #[serde(rename = "45min")]
    Min45,
    #[serde(rename = "90min")]
    Min90,
}

/// Clickstream time-of-day histogram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClickTimeView {
    #[serde(rename = "hour")]
    Hour,
    #[serde(rename = "45min")]
    Min45,
    #[serde(rename = "90min")]
    Min90,
}

/// Bank-side (transaction) feature recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionFeatureConfig {
    pub view: TransactionView,
    pub counts: bool,
    pub sums: bool,
    pub sign: SignMode,
    /// Minimum number of identities a column must be nonzero for (0 disables)
    pub filter_count: usize,
    pub normed: bool,
    pub convert_currency: bool,
    pub converted_currencies: Vec<i32>,
    pub currency_factor: f64,
    pub time_features: Vec<TransactionTimeView>,
}

impl Default for TransactionFeatureConfig {
    fn default() -> Self {
        Self {
            view: TransactionView::Grouped,
            counts: true,
            sums: false,
            sign: SignMode::Combined,
            filter_count: 10,
            normed: false,
            convert_currency: false,
            converted_currencies: vec![50, 60],
            currency_factor: 100.0,
            time_features: Vec::new(),
        }
    }
}

/// Rtk-side (clickstream) feature recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickFeatureConfig {
    pub view: ClickView,
    pub cat_id: bool,
    pub level_0: bool,
    pub level_1: bool,
    pub level_2: bool,
    pub filter_count: usize,
    pub normed: bool,
    pub time_features: Vec<ClickTimeView>,
}

impl Default for ClickFeatureConfig {
    fn default() -> Self {
        Self {
            view: ClickView::GroupedWeek,
            cat_id: true,
            level_0: false,
            level_1: false,
            level_2: false,
            filter_count: 10,
            normed: true,
            time_features: Vec::new(),
        }
    }
}

impl ClickFeatureConfig {
    /// Selected category breakdowns, in column order
    pub fn levels(&self) -> Vec<ClickLevel> {
        [
            (self.cat_id, ClickLevel::CatId),
            (self.level_0, ClickLevel::Level0),
            (self.level_1, ClickLevel::Level1),
            (self.level_2, ClickLevel::Level2),
        ]
        .into_iter()
        .filter(|(enabled, _)| *enabled)
        .map(|(_, level)| level)
        .collect()
    }
}

/// Full recipe for one model's bank and rtk feature tables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSetConfig {
    pub transactions: TransactionFeatureConfig,
    pub clickstream: ClickFeatureConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_mode_parsing() {
        assert_eq!("both".parse::<SignMode>().unwrap(), SignMode::Both);
        assert_eq!(SignMode::Negative.to_string(), "negative");

        let err = "sideways".parse::<SignMode>().unwrap_err();
        assert!(matches!(err, FeatureError::Configuration(_)));
    }

    #[test]
    fn test_unsupported_sign_mode_fails_deserialization() {
        let result: Result<TransactionFeatureConfig, _> =
            serde_json::from_str(r#"{"sign": "sideways"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_deserialization_with_defaults() {
        let config: FeatureSetConfig = serde_json::from_str(
            r#"{
                "transactions": {"view": "weekly_normed", "sums": true, "sign": "both",
                                 "time_features": ["hour_pos", "45min"]},
                "clickstream": {"cat_id": false, "level_0": true, "level_2": true}
            }"#,
        )
        .unwrap();

        assert_eq!(config.transactions.view, TransactionView::WeeklyNormed);
        assert_eq!(config.transactions.sign, SignMode::Both);
        assert!(config.transactions.counts);
        assert_eq!(config.transactions.filter_count, 10);
        assert_eq!(
            config.transactions.time_features,
            vec![TransactionTimeView::HourPos, TransactionTimeView::Min45]
        );
        assert_eq!(
            config.clickstream.levels(),
            vec![ClickLevel::Level0, ClickLevel::Level2]
        );
    }
}
