//! Feature Builder
//!
//! Pivots aggregate tables into the final per-identity feature matrices
//! described by a [`FeatureSetConfig`]. Column filtering and row
//! normalization run per block (one block per statistic, sign and category
//! level), never across the concatenated result.
//!
//! Filtering is data dependent, so the retained columns are captured as
//! [`FeatureSetColumns`] at training time and re-applied with
//! [`FeatureSet::reindexed`] at inference time.

use crate::aggregator::{ClickAggregates, ClickStat, TransactionAggregates, TransactionStat};
use crate::config::{
    ClickFeatureConfig, FeatureSetConfig, SignMode, TransactionFeatureConfig, TransactionView,
};
use crate::error::{FeatureError, Result};
use crate::models::{CategoryHierarchy, ClickLevel, Sign};
use crate::table::{FeatureColumns, FeatureTable};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Bank-side and rtk-side feature tables built from one configuration
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub transactions: FeatureTable,
    pub clickstream: FeatureTable,
}

/// Column allow-lists of a [`FeatureSet`], persisted next to the model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSetColumns {
    pub transactions: FeatureColumns,
    pub clickstream: FeatureColumns,
}

impl FeatureSet {
    pub fn build(
        transactions: &TransactionAggregates,
        clickstream: &ClickAggregates,
        categories: &CategoryHierarchy,
        config: &FeatureSetConfig,
    ) -> Result<Self> {
        let transactions = build_transaction_features(transactions, &config.transactions)?;
        let clickstream = build_click_features(clickstream, categories, &config.clickstream)?;

        info!(
            trans_rows = transactions.n_rows(),
            trans_cols = transactions.n_cols(),
            click_rows = clickstream.n_rows(),
            click_cols = clickstream.n_cols(),
            "Built feature set"
        );

        Ok(Self {
            transactions,
            clickstream,
        })
    }

    pub fn columns(&self) -> FeatureSetColumns {
        FeatureSetColumns {
            transactions: FeatureColumns::capture(&self.transactions),
            clickstream: FeatureColumns::capture(&self.clickstream),
        }
    }

    /// Restrict both tables to a previously captured column layout
    pub fn reindexed(&self, columns: &FeatureSetColumns) -> Self {
        Self {
            transactions: self.transactions.reindex_columns(&columns.transactions),
            clickstream: self.clickstream.reindex_columns(&columns.clickstream),
        }
    }

    /// Width of a bank × rtk pair row (bank features first)
    pub fn pair_width(&self) -> usize {
        self.transactions.n_cols() + self.clickstream.n_cols()
    }

    pub fn pair_feature_names(&self) -> Vec<String> {
        self.transactions
            .columns()
            .iter()
            .chain(self.clickstream.columns())
            .cloned()
            .collect()
    }
}

fn validate_transaction_config(config: &TransactionFeatureConfig) -> Result<()> {
    if !config.counts && !config.sums {
        return Err(FeatureError::Configuration(
            "Transaction features need counts, sums or both".to_string(),
        ));
    }

    let has_sums = matches!(
        config.view,
        TransactionView::Grouped | TransactionView::WeeklyNormed
    );
    if config.sums && !has_sums {
        return Err(FeatureError::Configuration(format!(
            "View {:?} has no sums",
            config.view
        )));
    }

    if config.convert_currency && config.view != TransactionView::Grouped {
        return Err(FeatureError::Configuration(format!(
            "Currency conversion needs a currency breakdown, view {:?} has none",
            config.view
        )));
    }

    Ok(())
}

fn convert_currency(rows: &[TransactionStat], config: &TransactionFeatureConfig) -> Vec<TransactionStat> {
    rows.iter()
        .map(|row| {
            let mut row = row.clone();
            let converted = row
                .currency_rk
                .map_or(false, |c| config.converted_currencies.contains(&c));
            if converted {
                row.sum = row.sum.map(|s| s * config.currency_factor);
                row.mean = row.mean.map(|m| m * config.currency_factor);
            }
            row
        })
        .collect()
}

pub fn build_transaction_features(
    aggregates: &TransactionAggregates,
    config: &TransactionFeatureConfig,
) -> Result<FeatureTable> {
    validate_transaction_config(config)?;

    let rows = if config.convert_currency {
        convert_currency(aggregates.view(config.view), config)
    } else {
        aggregates.view(config.view).to_vec()
    };

    let by_sign = |sign: Sign| -> Vec<&TransactionStat> {
        rows.iter().filter(|r| r.sign == sign).collect()
    };

    let blocks = match config.sign {
        SignMode::Combined => {
            let all: Vec<&TransactionStat> = rows.iter().collect();
            stat_blocks(&all, config, None)
        }
        SignMode::Negative => stat_blocks(&by_sign(Sign::Negative), config, Some(Sign::Negative)),
        SignMode::Both => {
            let mut blocks = stat_blocks(&by_sign(Sign::Negative), config, Some(Sign::Negative));
            blocks.extend(stat_blocks(&by_sign(Sign::Positive), config, Some(Sign::Positive)));
            blocks
        }
    };

    let mut table = FeatureTable::concat(blocks)?;
    for view in &config.time_features {
        table = table.left_join(aggregates.time_features(*view))?;
    }

    Ok(table)
}

fn stat_blocks(
    rows: &[&TransactionStat],
    config: &TransactionFeatureConfig,
    suffix: Option<Sign>,
) -> Vec<FeatureTable> {
    let mut blocks = Vec::new();
    if config.counts {
        blocks.push(stat_block(rows, "count", |r| Some(r.count), config, suffix));
    }
    if config.sums {
        blocks.push(stat_block(rows, "sum", |r| r.sum, config, suffix));
    }
    blocks
}

fn stat_block(
    rows: &[&TransactionStat],
    stat: &str,
    value: impl Fn(&TransactionStat) -> Option<f64>,
    config: &TransactionFeatureConfig,
    suffix: Option<Sign>,
) -> FeatureTable {
    let table = FeatureTable::from_sparse(
        rows.iter()
            .filter_map(|r| value(*r).map(|v| (r.user_id, r.mcc_code, v))),
        |mcc| format!("{}-mcc{}", stat, mcc),
    );
    let table = finish_block(table, config.filter_count, config.normed);
    match suffix {
        Some(sign) => table.with_suffix(sign.as_str()),
        None => table,
    }
}

fn finish_block(table: FeatureTable, filter_count: usize, normed: bool) -> FeatureTable {
    let table = if filter_count > 0 {
        table.filter_columns(filter_count)
    } else {
        table
    };
    if normed {
        table.normalize_rows()
    } else {
        table
    }
}

pub fn build_click_features(
    aggregates: &ClickAggregates,
    categories: &CategoryHierarchy,
    config: &ClickFeatureConfig,
) -> Result<FeatureTable> {
    let levels = config.levels();
    if levels.is_empty() {
        return Err(FeatureError::Configuration(
            "Click features need at least one category level".to_string(),
        ));
    }

    let stats = aggregates.view(config.view);
    let blocks = levels
        .iter()
        .map(|level| {
            let table = click_level_table(stats, categories, *level);
            finish_block(table, config.filter_count, config.normed)
        })
        .collect();

    let mut table = FeatureTable::concat(blocks)?;
    for view in &config.time_features {
        table = table.left_join(aggregates.time_features(*view))?;
    }

    Ok(table)
}

fn click_level_table(
    stats: &[ClickStat],
    categories: &CategoryHierarchy,
    level: ClickLevel,
) -> FeatureTable {
    let prefix = level.as_str();
    match level {
        ClickLevel::CatId => FeatureTable::from_sparse(
            stats.iter().map(|s| (s.user_id, s.cat_id, s.value)),
            |cat_id| format!("{}-{}", prefix, cat_id),
        ),
        _ => FeatureTable::from_sparse(
            stats.iter().filter_map(|s| {
                categories
                    .level_name(s.cat_id, level)
                    .map(|name| (s.user_id, name.to_string(), s.value))
            }),
            |name| format!("{}-{}", prefix, name),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{aggregate_clickstream, aggregate_transactions};
    use crate::config::{ClickTimeView, ClickView, TransactionTimeView};
    use crate::models::{ClickCategory, ClickEvent, IdentityId, TransactionEvent};
    use chrono::NaiveDateTime;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn tx(user_id: IdentityId, mcc: i32, currency: i32, amount: f64) -> TransactionEvent {
        TransactionEvent {
            user_id,
            mcc_code: mcc,
            currency_rk: currency,
            amount,
            timestamp: ts("2020-08-03 10:00:00"),
        }
    }

    fn transactions() -> TransactionAggregates {
        aggregate_transactions(&[
            tx(1, 10, 48, -10.0),
            tx(1, 10, 48, -30.0),
            tx(1, 20, 48, 5.0),
            tx(2, 10, 50, -2.0),
            tx(2, 20, 48, 7.0),
            tx(3, 30, 48, -1.0),
        ])
    }

    fn config(sign: SignMode) -> TransactionFeatureConfig {
        TransactionFeatureConfig {
            sign,
            filter_count: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_combined_counts() {
        let table = build_transaction_features(&transactions(), &config(SignMode::Combined)).unwrap();

        assert_eq!(
            table.columns(),
            &["count-mcc10".to_string(), "count-mcc20".to_string(), "count-mcc30".to_string()]
        );
        assert_eq!(table.row(1).unwrap().to_vec(), vec![2.0, 1.0, 0.0]);
    }

    #[test]
    fn test_negative_mode_single_suffixed_block() {
        let table = build_transaction_features(&transactions(), &config(SignMode::Negative)).unwrap();

        assert_eq!(
            table.columns(),
            &["count-mcc10-negative".to_string(), "count-mcc30-negative".to_string()]
        );
        assert_eq!(table.ids(), &[1, 2, 3]);
    }

    #[test]
    fn test_both_mode_filters_blocks_independently() {
        let mut cfg = config(SignMode::Both);
        cfg.filter_count = 2;
        cfg.normed = true;
        let table = build_transaction_features(&transactions(), &cfg).unwrap();

        // mcc10 is negative for two users; mcc20 is positive for two users
        assert_eq!(
            table.columns(),
            &["count-mcc10-negative".to_string(), "count-mcc20-positive".to_string()]
        );
        // User 1 has activity in both blocks; each block is normalized on its own
        let row = table.row(1).unwrap();
        assert_eq!(row[0], 1.0);
        assert_eq!(row[1], 1.0);
        // User 3 only has mcc30, which was filtered out: zero total becomes NaN
        assert!(table.row(3).unwrap()[0].is_nan());
    }

    #[test]
    fn test_sums_with_currency_conversion() {
        let cfg = TransactionFeatureConfig {
            counts: false,
            sums: true,
            filter_count: 0,
            convert_currency: true,
            ..Default::default()
        };
        let table = build_transaction_features(&transactions(), &cfg).unwrap();

        let col = table.column_index("sum-mcc10").unwrap();
        assert_eq!(table.row(2).unwrap()[col], -200.0);
        assert_eq!(table.row(1).unwrap()[col], -40.0);
    }

    #[test]
    fn test_invalid_combinations_are_configuration_errors() {
        let aggs = transactions();

        let nothing = TransactionFeatureConfig {
            counts: false,
            sums: false,
            ..Default::default()
        };
        assert!(matches!(
            build_transaction_features(&aggs, &nothing),
            Err(FeatureError::Configuration(_))
        ));

        let sums_without_amounts = TransactionFeatureConfig {
            view: TransactionView::GroupedDate,
            sums: true,
            ..Default::default()
        };
        assert!(matches!(
            build_transaction_features(&aggs, &sums_without_amounts),
            Err(FeatureError::Configuration(_))
        ));

        let conversion_without_currency = TransactionFeatureConfig {
            view: TransactionView::WeeklyNormed,
            convert_currency: true,
            ..Default::default()
        };
        assert!(matches!(
            build_transaction_features(&aggs, &conversion_without_currency),
            Err(FeatureError::Configuration(_))
        ));
    }

    #[test]
    fn test_time_features_are_left_joined() {
        let mut cfg = config(SignMode::Negative);
        cfg.time_features = vec![TransactionTimeView::HourPos];
        let table = build_transaction_features(&transactions(), &cfg).unwrap();

        assert_eq!(table.ids(), &[1, 2, 3]);
        let total = table.column_index("trans_pos_hour_total").unwrap();
        assert_eq!(table.row(1).unwrap()[total], 1.0);
        assert!(table.row(3).unwrap()[total].is_nan());
    }

    fn clicks() -> (ClickAggregates, CategoryHierarchy) {
        let at = ts("2020-08-03 10:00:00");
        let events: Vec<ClickEvent> = [(100, 1), (100, 2), (100, 2), (200, 3), (200, 9)]
            .iter()
            .map(|(user_id, cat_id)| ClickEvent {
                user_id: *user_id,
                cat_id: *cat_id,
                timestamp: at,
            })
            .collect();
        let categories = CategoryHierarchy::new(vec![
            ClickCategory {
                cat_id: 1,
                level_0: "shop".into(),
                level_1: "food".into(),
                level_2: "NaN".into(),
            },
            ClickCategory {
                cat_id: 2,
                level_0: "shop".into(),
                level_1: "cars".into(),
                level_2: "NaN".into(),
            },
            ClickCategory {
                cat_id: 3,
                level_0: "news".into(),
                level_1: "sport".into(),
                level_2: "football".into(),
            },
        ]);
        (aggregate_clickstream(&events), categories)
    }

    #[test]
    fn test_click_hierarchy_levels() {
        let (aggs, categories) = clicks();
        let cfg = ClickFeatureConfig {
            view: ClickView::GroupedDate,
            cat_id: false,
            level_0: true,
            filter_count: 0,
            normed: false,
            ..Default::default()
        };
        let table = build_click_features(&aggs, &categories, &cfg).unwrap();

        assert_eq!(
            table.columns(),
            &["level_0-news".to_string(), "level_0-shop".to_string()]
        );
        // Unknown cat_id 9 is dropped from level views
        assert_eq!(table.row(200).unwrap().to_vec(), vec![1.0, 0.0]);
        assert_eq!(table.row(100).unwrap().to_vec(), vec![0.0, 2.0]);
    }

    #[test]
    fn test_click_cat_id_normalized_with_time_features() {
        let (aggs, categories) = clicks();
        let cfg = ClickFeatureConfig {
            filter_count: 0,
            time_features: vec![ClickTimeView::Hour],
            ..Default::default()
        };
        let table = build_click_features(&aggs, &categories, &cfg).unwrap();

        let n_cat = table.columns().iter().filter(|c| c.starts_with("cat_id-")).count();
        for id in table.ids() {
            let row = table.row(*id).unwrap();
            let total: f32 = row.iter().take(n_cat).sum();
            assert!((total - 1.0).abs() < 1e-6);
        }
        assert!(table.column_index("click_hour_10").is_some());
    }

    #[test]
    fn test_click_requires_a_level() {
        let (aggs, categories) = clicks();
        let cfg = ClickFeatureConfig {
            cat_id: false,
            ..Default::default()
        };
        assert!(matches!(
            build_click_features(&aggs, &categories, &cfg),
            Err(FeatureError::Configuration(_))
        ));
    }

    #[test]
    fn test_feature_parity_across_datasets() {
        let (click_aggs, categories) = clicks();
        let cfg = FeatureSetConfig {
            transactions: TransactionFeatureConfig {
                filter_count: 2,
                ..Default::default()
            },
            clickstream: ClickFeatureConfig {
                filter_count: 0,
                ..Default::default()
            },
        };

        let train = FeatureSet::build(&transactions(), &click_aggs, &categories, &cfg).unwrap();
        let captured = train.columns();

        // A different dataset where filtering keeps other columns
        let other_trans = aggregate_transactions(&[
            tx(5, 99, 48, -1.0),
            tx(6, 99, 48, -1.0),
            tx(5, 10, 48, -1.0),
        ]);
        let inference = FeatureSet::build(&other_trans, &click_aggs, &categories, &cfg)
            .unwrap()
            .reindexed(&captured);

        assert_eq!(inference.columns(), captured);
        assert_eq!(inference.transactions.n_cols(), train.transactions.n_cols());
        // mcc10 was kept at training time but filtered out here: filled with 0
        let col = inference.transactions.column_index("count-mcc10").unwrap();
        assert_eq!(inference.transactions.row(5).unwrap()[col], 0.0);
    }
}
