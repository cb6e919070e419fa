// Integration tests for the feature pipeline: events → aggregates → feature set

use chrono::NaiveDateTime;
use match_features::{
    aggregate_clickstream, aggregate_transactions, CategoryHierarchy, ClickCategory, ClickEvent,
    ClickTimeView, ClickView, FeatureSet, FeatureSetConfig, SignMode, TransactionEvent,
    TransactionTimeView, TransactionView,
};

fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
}

fn transactions() -> Vec<TransactionEvent> {
    let mut events = Vec::new();
    for user in 0..6 {
        for day in 3..10 {
            events.push(TransactionEvent {
                user_id: user,
                mcc_code: 5411,
                currency_rk: 48,
                amount: -10.0 * (user + 1) as f64,
                timestamp: ts(&format!("2020-08-{:02} 1{}:00:00", day, user)),
            });
        }
        events.push(TransactionEvent {
            user_id: user,
            mcc_code: 6011,
            currency_rk: if user % 2 == 0 { 48 } else { 50 },
            amount: 500.0,
            timestamp: ts("2020-08-12 09:30:00"),
        });
    }
    // A rare category seen by one user only
    events.push(TransactionEvent {
        user_id: 0,
        mcc_code: 7995,
        currency_rk: 48,
        amount: -1.0,
        timestamp: ts("2020-08-04 23:00:00"),
    });
    events
}

fn clicks() -> Vec<ClickEvent> {
    let mut events = Vec::new();
    for user in 100..106 {
        for day in 3..10 {
            events.push(ClickEvent {
                user_id: user,
                cat_id: 1 + (user as i32 % 2),
                timestamp: ts(&format!("2020-08-{:02} 0{}:15:00", day, user - 100)),
            });
        }
    }
    events.push(ClickEvent {
        user_id: 100,
        cat_id: 99,
        timestamp: ts("2020-08-05 12:00:00"),
    });
    events
}

fn categories() -> CategoryHierarchy {
    let category = |cat_id, level_0: &str, level_1: &str| ClickCategory {
        cat_id,
        level_0: level_0.to_string(),
        level_1: level_1.to_string(),
        level_2: "NaN".to_string(),
    };
    CategoryHierarchy::new(vec![
        category(1, "shopping", "food"),
        category(2, "shopping", "clothes"),
    ])
}

fn build(config: &FeatureSetConfig) -> FeatureSet {
    FeatureSet::build(
        &aggregate_transactions(&transactions()),
        &aggregate_clickstream(&clicks()),
        &categories(),
        config,
    )
    .unwrap()
}

#[test]
fn test_default_recipe() {
    let mut config = FeatureSetConfig::default();
    config.transactions.filter_count = 2;
    config.clickstream.filter_count = 2;

    let features = build(&config);

    assert_eq!(
        features.transactions.columns(),
        &["count-mcc5411".to_string(), "count-mcc6011".to_string()]
    );
    assert_eq!(
        features.clickstream.columns(),
        &["cat_id-1".to_string(), "cat_id-2".to_string()]
    );
    assert_eq!(features.transactions.n_rows(), 6);
    assert_eq!(features.clickstream.n_rows(), 6);
    assert_eq!(features.pair_width(), 4);

    // Normalized click rows sum to one
    let row = features.clickstream.row(100).unwrap();
    assert!((row.sum() - 1.0).abs() < 1e-6);
}

#[test]
fn test_signed_weekly_recipe_with_time_features() {
    let mut config = FeatureSetConfig::default();
    config.transactions.view = TransactionView::WeeklyNormed;
    config.transactions.sums = true;
    config.transactions.sign = SignMode::Both;
    config.transactions.filter_count = 0;
    config.transactions.time_features = vec![TransactionTimeView::HourPos, TransactionTimeView::HourNeg];
    config.clickstream.view = ClickView::WeeklyNormed;
    config.clickstream.cat_id = false;
    config.clickstream.level_1 = true;
    config.clickstream.filter_count = 0;
    config.clickstream.time_features = vec![ClickTimeView::Min90];

    let features = build(&config);
    let trans = features.transactions.columns();

    assert!(trans.contains(&"count-mcc5411-negative".to_string()));
    assert!(trans.contains(&"sum-mcc6011-positive".to_string()));
    assert!(trans.iter().any(|c| c.starts_with("trans_pos_hour_")));
    assert!(trans.contains(&"trans_neg_hour_total".to_string()));

    let clicks = features.clickstream.columns();
    assert!(clicks.contains(&"level_1-food".to_string()));
    assert!(clicks.contains(&"level_1-clothes".to_string()));
    // Category 99 is not in the hierarchy
    assert!(!clicks.iter().any(|c| c.contains("99")));
    assert!(clicks.contains(&"click_90min_total".to_string()));
}

#[test]
fn test_columns_reindex_a_new_dataset() {
    let mut config = FeatureSetConfig::default();
    config.transactions.filter_count = 0;
    config.clickstream.filter_count = 0;

    let train = build(&config);
    let columns = train.columns();

    // A later dataset without the rare category and with an unseen one
    let mut events = transactions();
    events.retain(|e| e.mcc_code != 7995);
    events.push(TransactionEvent {
        user_id: 3,
        mcc_code: 4111,
        currency_rk: 48,
        amount: -3.0,
        timestamp: ts("2020-08-20 08:00:00"),
    });
    let test = FeatureSet::build(
        &aggregate_transactions(&events),
        &aggregate_clickstream(&clicks()),
        &categories(),
        &config,
    )
    .unwrap()
    .reindexed(&columns);

    assert_eq!(test.columns(), columns);
    assert_eq!(test.pair_feature_names(), train.pair_feature_names());
    let rare = test.transactions.column_index("count-mcc7995").unwrap();
    assert_eq!(test.transactions.row(0).unwrap()[rare], 0.0);
    assert!(test.transactions.column_index("count-mcc4111").is_none());
}

#[test]
fn test_unsupported_recipes_are_rejected() {
    let mut config = FeatureSetConfig::default();
    config.transactions.view = TransactionView::GroupedWeek;
    config.transactions.sums = true;

    let result = FeatureSet::build(
        &aggregate_transactions(&transactions()),
        &aggregate_clickstream(&clicks()),
        &categories(),
        &config,
    );
    assert!(result.is_err());
}
