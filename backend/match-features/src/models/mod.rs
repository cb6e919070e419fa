// Domain models for the matching feature pipeline

use chrono::{Datelike, IsoWeek, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque identity key (bank customer or rtk clickstream user)
pub type IdentityId = i64;

/// Transaction direction derived from the amount
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Sign {
    Negative,
    Positive,
}

impl Sign {
    /// Strictly positive amounts are incoming, everything else is outgoing.
    pub fn of_amount(amount: f64) -> Self {
        if amount > 0.0 {
            Sign::Positive
        } else {
            Sign::Negative
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sign::Negative => "negative",
            Sign::Positive => "positive",
        }
    }
}

/// One bank transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub user_id: IdentityId,
    pub mcc_code: i32,
    pub currency_rk: i32,
    pub amount: f64,
    pub timestamp: NaiveDateTime,
}

impl TransactionEvent {
    pub fn sign(&self) -> Sign {
        Sign::of_amount(self.amount)
    }
}

/// One clickstream event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickEvent {
    pub user_id: IdentityId,
    pub cat_id: i32,
    pub timestamp: NaiveDateTime,
}

/// Hierarchical names for a click category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickCategory {
    pub cat_id: i32,
    pub level_0: String,
    pub level_1: String,
    pub level_2: String,
}

/// Level of the click category hierarchy used as a feature breakdown
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClickLevel {
    CatId,
    Level0,
    Level1,
    Level2,
}

impl ClickLevel {
    /// Column prefix for features broken down by this level
    pub fn as_str(&self) -> &'static str {
        match self {
            ClickLevel::CatId => "cat_id",
            ClickLevel::Level0 => "level_0",
            ClickLevel::Level1 => "level_1",
            ClickLevel::Level2 => "level_2",
        }
    }
}

/// Lookup table from `cat_id` to its hierarchy levels
#[derive(Debug, Clone, Default)]
pub struct CategoryHierarchy {
    by_id: HashMap<i32, ClickCategory>,
}

impl CategoryHierarchy {
    pub fn new(categories: impl IntoIterator<Item = ClickCategory>) -> Self {
        Self {
            by_id: categories.into_iter().map(|c| (c.cat_id, c)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Name of `cat_id` at one of the named levels. `CatId` has no name here.
    pub fn level_name(&self, cat_id: i32, level: ClickLevel) -> Option<&str> {
        let category = self.by_id.get(&cat_id)?;
        match level {
            ClickLevel::CatId => None,
            ClickLevel::Level0 => Some(category.level_0.as_str()),
            ClickLevel::Level1 => Some(category.level_1.as_str()),
            ClickLevel::Level2 => Some(category.level_2.as_str()),
        }
    }
}

/// Calendar breakdown of an event timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventTime {
    pub date: NaiveDate,
    pub week: IsoWeek,
    pub hour: u32,
    pub minute_of_day: u32,
}

impl From<&NaiveDateTime> for EventTime {
    fn from(ts: &NaiveDateTime) -> Self {
        Self {
            date: ts.date(),
            week: ts.date().iso_week(),
            hour: ts.hour(),
            minute_of_day: ts.hour() * 60 + ts.minute(),
        }
    }
}

/// Time-of-day bucket granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeBucket {
    Hour,
    Min45,
    Min90,
}

impl TimeBucket {
    pub fn bucket(&self, time: &EventTime) -> u32 {
        match self {
            TimeBucket::Hour => time.hour,
            TimeBucket::Min45 => time.minute_of_day / 45,
            TimeBucket::Min90 => time.minute_of_day / 90,
        }
    }
}
