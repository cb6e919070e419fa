// ============================================
// Event Aggregator (事件聚合)
// ============================================
//
// Turns raw per-event logs into per-identity summary tables:
// - count / sum / mean of amounts per (user, mcc, currency, sign)
// - distinct-day and distinct-week presence per category
// - mean weekly share of each category
// - time-of-day histograms over distinct active days
//
// Aggregate tables are long-format rows; the feature builder pivots them.

use crate::config::{ClickTimeView, ClickView, TransactionTimeView, TransactionView};
use crate::models::{ClickEvent, EventTime, IdentityId, Sign, TimeBucket, TransactionEvent};
use crate::table::FeatureTable;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// ISO (year, week) pair
type WeekKey = (i32, u32);

fn week_key(time: &EventTime) -> WeekKey {
    (time.week.year(), time.week.week())
}

/// Aggregated transaction statistic for one (user, mcc, currency?, sign)
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionStat {
    pub user_id: IdentityId,
    pub mcc_code: i32,
    /// Only present in views broken down by currency
    pub currency_rk: Option<i32>,
    pub sign: Sign,
    pub count: f64,
    /// Only present in views that aggregate amounts
    pub sum: Option<f64>,
    pub mean: Option<f64>,
}

/// Aggregated click statistic for one (user, cat_id)
#[derive(Debug, Clone, PartialEq)]
pub struct ClickStat {
    pub user_id: IdentityId,
    pub cat_id: i32,
    pub value: f64,
}

/// Named transaction aggregate tables
#[derive(Debug, Clone)]
pub struct TransactionAggregates {
    pub grouped: Vec<TransactionStat>,
    pub grouped_week: Vec<TransactionStat>,
    pub grouped_date: Vec<TransactionStat>,
    pub weekly_normed: Vec<TransactionStat>,
    pub hour: FeatureTable,
    pub hour_neg: FeatureTable,
    pub hour_pos: FeatureTable,
    pub min45: FeatureTable,
    pub min90: FeatureTable,
}

impl TransactionAggregates {
    pub fn view(&self, view: TransactionView) -> &[TransactionStat] {
        match view {
            TransactionView::Grouped => &self.grouped,
            TransactionView::GroupedWeek => &self.grouped_week,
            TransactionView::GroupedDate => &self.grouped_date,
            TransactionView::WeeklyNormed => &self.weekly_normed,
        }
    }

    pub fn time_features(&self, view: TransactionTimeView) -> &FeatureTable {
        match view {
            TransactionTimeView::Hour => &self.hour,
            TransactionTimeView::HourNeg => &self.hour_neg,
            TransactionTimeView::HourPos => &self.hour_pos,
            TransactionTimeView::Min45 => &self.min45,
            TransactionTimeView::Min90 => &self.min90,
        }
    }
}

/// Named clickstream aggregate tables
#[derive(Debug, Clone)]
pub struct ClickAggregates {
    pub grouped_week: Vec<ClickStat>,
    pub grouped_date: Vec<ClickStat>,
    pub weekly_normed: Vec<ClickStat>,
    pub hour: FeatureTable,
    pub min45: FeatureTable,
    pub min90: FeatureTable,
}

impl ClickAggregates {
    pub fn view(&self, view: ClickView) -> &[ClickStat] {
        match view {
            ClickView::GroupedWeek => &self.grouped_week,
            ClickView::GroupedDate => &self.grouped_date,
            ClickView::WeeklyNormed => &self.weekly_normed,
        }
    }

    pub fn time_features(&self, view: ClickTimeView) -> &FeatureTable {
        match view {
            ClickTimeView::Hour => &self.hour,
            ClickTimeView::Min45 => &self.min45,
            ClickTimeView::Min90 => &self.min90,
        }
    }
}

/// Number of distinct periods seen per key
fn presence_counts<K, P>(pairs: impl IntoIterator<Item = (K, P)>) -> BTreeMap<K, usize>
where
    K: Ord + Clone,
    P: Ord,
{
    let distinct: BTreeSet<(K, P)> = pairs.into_iter().collect();
    let mut counts = BTreeMap::new();
    for (key, _) in distinct {
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}

pub fn aggregate_transactions(events: &[TransactionEvent]) -> TransactionAggregates {
    let times: Vec<EventTime> = events.iter().map(|e| EventTime::from(&e.timestamp)).collect();

    let mut grouped: BTreeMap<(IdentityId, i32, i32, Sign), (f64, f64)> = BTreeMap::new();
    for event in events {
        let cell = grouped
            .entry((event.user_id, event.mcc_code, event.currency_rk, event.sign()))
            .or_insert((0.0, 0.0));
        cell.0 += 1.0;
        cell.1 += event.amount;
    }
    let grouped = grouped
        .into_iter()
        .map(|((user_id, mcc_code, currency_rk, sign), (count, sum))| TransactionStat {
            user_id,
            mcc_code,
            currency_rk: Some(currency_rk),
            sign,
            count,
            sum: Some(sum),
            mean: Some(sum / count),
        })
        .collect();

    let grouped_week = presence_stats(
        events
            .iter()
            .zip(&times)
            .map(|(e, t)| ((e.user_id, e.mcc_code, e.sign()), week_key(t))),
    );
    let grouped_date = presence_stats(
        events
            .iter()
            .zip(&times)
            .map(|(e, t)| ((e.user_id, e.mcc_code, e.sign()), t.date)),
    );

    let weekly_normed = transaction_weekly_normed(events, &times);

    let hour = transaction_histogram(events, &times, None, TimeBucket::Hour, "trans_hour");
    let hour_neg = transaction_histogram(
        events,
        &times,
        Some(Sign::Negative),
        TimeBucket::Hour,
        "trans_neg_hour",
    );
    let hour_pos = transaction_histogram(
        events,
        &times,
        Some(Sign::Positive),
        TimeBucket::Hour,
        "trans_pos_hour",
    );
    let min45 = transaction_histogram(events, &times, None, TimeBucket::Min45, "trans_45min");
    let min90 = transaction_histogram(events, &times, None, TimeBucket::Min90, "trans_90min");

    let aggregates = TransactionAggregates {
        grouped,
        grouped_week,
        grouped_date,
        weekly_normed,
        hour,
        hour_neg,
        hour_pos,
        min45,
        min90,
    };

    debug!(
        events = events.len(),
        grouped = aggregates.grouped.len(),
        weekly_normed = aggregates.weekly_normed.len(),
        identities = aggregates.hour.n_rows(),
        "Aggregated transactions"
    );

    aggregates
}

fn presence_stats<P: Ord>(
    pairs: impl IntoIterator<Item = ((IdentityId, i32, Sign), P)>,
) -> Vec<TransactionStat> {
    presence_counts(pairs)
        .into_iter()
        .map(|((user_id, mcc_code, sign), count)| TransactionStat {
            user_id,
            mcc_code,
            currency_rk: None,
            sign,
            count: count as f64,
            sum: None,
            mean: None,
        })
        .collect()
}

/// Mean weekly share of each mcc within the user's (sign, week) activity.
///
/// Shares are summed over the weeks the user was active and divided by the
/// number of distinct weeks in the whole log.
fn transaction_weekly_normed(events: &[TransactionEvent], times: &[EventTime]) -> Vec<TransactionStat> {
    let total_weeks = times.iter().map(week_key).collect::<BTreeSet<_>>().len();
    if total_weeks == 0 {
        return Vec::new();
    }

    let mut by_week: BTreeMap<(IdentityId, Sign, WeekKey), BTreeMap<i32, (f64, f64)>> =
        BTreeMap::new();
    for (event, time) in events.iter().zip(times) {
        let cell = by_week
            .entry((event.user_id, event.sign(), week_key(time)))
            .or_default()
            .entry(event.mcc_code)
            .or_insert((0.0, 0.0));
        cell.0 += 1.0;
        cell.1 += event.amount;
    }

    let mut shares: BTreeMap<(IdentityId, i32, Sign), (f64, f64)> = BTreeMap::new();
    for ((user_id, sign, _), cells) in by_week {
        let week_count: f64 = cells.values().map(|(c, _)| c).sum();
        let week_sum: f64 = cells.values().map(|(_, s)| s).sum();
        for (mcc_code, (count, sum)) in cells {
            let acc = shares.entry((user_id, mcc_code, sign)).or_insert((0.0, 0.0));
            acc.0 += count / week_count;
            let sum_share = sum / week_sum;
            if sum_share.is_finite() {
                acc.1 += sum_share;
            }
        }
    }

    let weeks = total_weeks as f64;
    shares
        .into_iter()
        .map(|((user_id, mcc_code, sign), (count, sum))| TransactionStat {
            user_id,
            mcc_code,
            currency_rk: None,
            sign,
            count: count / weeks,
            sum: Some(sum / weeks),
            mean: None,
        })
        .collect()
}

fn transaction_histogram(
    events: &[TransactionEvent],
    times: &[EventTime],
    sign: Option<Sign>,
    bucket: TimeBucket,
    prefix: &str,
) -> FeatureTable {
    let observations = events
        .iter()
        .zip(times)
        .filter(|(e, _)| sign.map_or(true, |s| e.sign() == s))
        .map(|(e, t)| (e.user_id, bucket.bucket(t), t.date));
    time_histogram(observations, prefix, true)
}

/// Share of an identity's distinct (bucket, day) activity falling in each bucket.
///
/// Columns are `{prefix}_{bucket}` in bucket order, plus `{prefix}_total`
/// holding the raw number of distinct (bucket, day) pairs when `add_total`.
/// Identities without observations do not appear.
pub fn time_histogram(
    observations: impl IntoIterator<Item = (IdentityId, u32, NaiveDate)>,
    prefix: &str,
    add_total: bool,
) -> FeatureTable {
    let counts = presence_counts(
        observations
            .into_iter()
            .map(|(user_id, bucket, date)| ((user_id, bucket), date)),
    );

    let raw = FeatureTable::from_sparse(
        counts
            .into_iter()
            .map(|((user_id, bucket), days)| (user_id, bucket, days as f64)),
        |bucket| format!("{}_{}", prefix, bucket),
    );
    if add_total {
        raw.normalize_rows_with_total(format!("{}_total", prefix))
    } else {
        raw.normalize_rows()
    }
}

pub fn aggregate_clickstream(events: &[ClickEvent]) -> ClickAggregates {
    let times: Vec<EventTime> = events.iter().map(|e| EventTime::from(&e.timestamp)).collect();

    let grouped_week = click_presence(
        events
            .iter()
            .zip(&times)
            .map(|(e, t)| ((e.user_id, e.cat_id), week_key(t))),
    );
    let grouped_date = click_presence(
        events
            .iter()
            .zip(&times)
            .map(|(e, t)| ((e.user_id, e.cat_id), t.date)),
    );

    let weekly_normed = click_weekly_normed(events, &times);

    let histogram = |bucket: TimeBucket, prefix: &str| {
        time_histogram(
            events
                .iter()
                .zip(&times)
                .map(|(e, t)| (e.user_id, bucket.bucket(t), t.date)),
            prefix,
            true,
        )
    };

    let aggregates = ClickAggregates {
        grouped_week,
        grouped_date,
        weekly_normed,
        hour: histogram(TimeBucket::Hour, "click_hour"),
        min45: histogram(TimeBucket::Min45, "click_45min"),
        min90: histogram(TimeBucket::Min90, "click_90min"),
    };

    debug!(
        events = events.len(),
        grouped_week = aggregates.grouped_week.len(),
        identities = aggregates.hour.n_rows(),
        "Aggregated clickstream"
    );

    aggregates
}

fn click_presence<P: Ord>(pairs: impl IntoIterator<Item = ((IdentityId, i32), P)>) -> Vec<ClickStat> {
    presence_counts(pairs)
        .into_iter()
        .map(|((user_id, cat_id), count)| ClickStat {
            user_id,
            cat_id,
            value: count as f64,
        })
        .collect()
}

/// Mean weekly share of each category, counted over distinct active days.
fn click_weekly_normed(events: &[ClickEvent], times: &[EventTime]) -> Vec<ClickStat> {
    let days: BTreeSet<(IdentityId, i32, NaiveDate, WeekKey)> = events
        .iter()
        .zip(times)
        .map(|(e, t)| (e.user_id, e.cat_id, t.date, week_key(t)))
        .collect();

    let total_weeks = days.iter().map(|d| d.3).collect::<BTreeSet<_>>().len();
    if total_weeks == 0 {
        return Vec::new();
    }

    let mut by_week: BTreeMap<(IdentityId, WeekKey), BTreeMap<i32, f64>> = BTreeMap::new();
    for (user_id, cat_id, _, week) in days {
        *by_week
            .entry((user_id, week))
            .or_default()
            .entry(cat_id)
            .or_insert(0.0) += 1.0;
    }

    let mut shares: BTreeMap<(IdentityId, i32), f64> = BTreeMap::new();
    for ((user_id, _), cells) in by_week {
        let week_total: f64 = cells.values().sum();
        for (cat_id, count) in cells {
            *shares.entry((user_id, cat_id)).or_insert(0.0) += count / week_total;
        }
    }

    let weeks = total_weeks as f64;
    shares
        .into_iter()
        .map(|((user_id, cat_id), share)| ClickStat {
            user_id,
            cat_id,
            value: share / weeks,
        })
        .collect()
}
