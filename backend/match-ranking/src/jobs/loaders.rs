// ============================================
// Data Loaders (資料載入)
// ============================================
//
// CSV inputs:
// - transactions.csv:       user_id, mcc_code, currency_rk, transaction_amt, transaction_dttm
// - clickstream.csv:        user_id, cat_id, timestamp
// - click_categories.csv:   cat_id, level_0, level_1, level_2
// - train_matching.csv:     bank, rtk ("0" = no match)
//
// String identifiers are interned into integer keys per side and mapped
// back when the submission is written.

use crate::config::DataConfig;
use crate::error::{MatchingError, Result};
use crate::models::{MatchPair, MatchTarget, RankedList};
use chrono::NaiveDateTime;
use match_features::{CategoryHierarchy, ClickCategory, ClickEvent, IdentityId, TransactionEvent};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::info;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Identifier written for the "no match" sentinel
pub const NO_MATCH_ID: &str = "0";

/// Bidirectional map between raw string ids and integer keys
#[derive(Debug, Clone, Default)]
pub struct IdentityRegistry {
    keys: HashMap<String, IdentityId>,
    names: Vec<String>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> IdentityId {
        if let Some(id) = self.keys.get(name) {
            return *id;
        }
        let id = self.names.len() as IdentityId;
        self.keys.insert(name.to_string(), id);
        self.names.push(name.to_string());
        id
    }

    pub fn get(&self, name: &str) -> Option<IdentityId> {
        self.keys.get(name).copied()
    }

    pub fn name(&self, id: IdentityId) -> Option<&str> {
        usize::try_from(id)
            .ok()
            .and_then(|i| self.names.get(i))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct TransactionRecord {
    user_id: String,
    mcc_code: i32,
    currency_rk: i32,
    transaction_amt: f64,
    transaction_dttm: String,
}

#[derive(Debug, Deserialize)]
struct ClickRecord {
    user_id: String,
    cat_id: i32,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct CategoryRecord {
    cat_id: i32,
    level_0: Option<String>,
    level_1: Option<String>,
    level_2: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MatchRecord {
    bank: String,
    rtk: String,
}

/// Raw event logs with the registries their ids were interned into
#[derive(Debug, Clone, Default)]
pub struct EventData {
    pub transactions: Vec<TransactionEvent>,
    pub clicks: Vec<ClickEvent>,
    pub categories: CategoryHierarchy,
    pub banks: IdentityRegistry,
    pub rtks: IdentityRegistry,
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT)
        .map_err(|e| MatchingError::InvalidInput(format!("Bad timestamp {:?}: {}", raw, e)))
}

pub fn read_transactions<R: Read>(
    reader: R,
    banks: &mut IdentityRegistry,
) -> Result<Vec<TransactionEvent>> {
    let mut events = Vec::new();
    for record in csv::Reader::from_reader(reader).deserialize() {
        let record: TransactionRecord = record?;
        events.push(TransactionEvent {
            user_id: banks.intern(&record.user_id),
            mcc_code: record.mcc_code,
            currency_rk: record.currency_rk,
            amount: record.transaction_amt,
            timestamp: parse_timestamp(&record.transaction_dttm)?,
        });
    }
    Ok(events)
}

pub fn read_clickstream<R: Read>(reader: R, rtks: &mut IdentityRegistry) -> Result<Vec<ClickEvent>> {
    let mut events = Vec::new();
    for record in csv::Reader::from_reader(reader).deserialize() {
        let record: ClickRecord = record?;
        events.push(ClickEvent {
            user_id: rtks.intern(&record.user_id),
            cat_id: record.cat_id,
            timestamp: parse_timestamp(&record.timestamp)?,
        });
    }
    Ok(events)
}

/// Empty level names become the literal "NaN"
pub fn read_categories<R: Read>(reader: R) -> Result<CategoryHierarchy> {
    let level = |name: Option<String>| {
        name.filter(|n| !n.is_empty())
            .unwrap_or_else(|| "NaN".to_string())
    };

    let mut categories = Vec::new();
    for record in csv::Reader::from_reader(reader).deserialize() {
        let record: CategoryRecord = record?;
        categories.push(ClickCategory {
            cat_id: record.cat_id,
            level_0: level(record.level_0),
            level_1: level(record.level_1),
            level_2: level(record.level_2),
        });
    }
    Ok(CategoryHierarchy::new(categories))
}

pub fn read_matching<R: Read>(
    reader: R,
    banks: &mut IdentityRegistry,
    rtks: &mut IdentityRegistry,
) -> Result<Vec<MatchPair>> {
    let mut pairs = Vec::new();
    for record in csv::Reader::from_reader(reader).deserialize() {
        let record: MatchRecord = record?;
        let target = if record.rtk == NO_MATCH_ID {
            MatchTarget::NoMatch
        } else {
            MatchTarget::Rtk(rtks.intern(&record.rtk))
        };
        pairs.push(MatchPair::new(banks.intern(&record.bank), target));
    }
    Ok(pairs)
}

fn open(path: &Path) -> Result<File> {
    File::open(path)
        .map_err(|e| MatchingError::Io(format!("Failed to open {}: {}", path.display(), e)))
}

/// Load transactions, clickstream and the category table
pub fn load_event_data(data: &DataConfig) -> Result<EventData> {
    let mut banks = IdentityRegistry::new();
    let mut rtks = IdentityRegistry::new();

    let transactions = read_transactions(open(&data.transactions_path())?, &mut banks)?;
    let clicks = read_clickstream(open(&data.clickstream_path())?, &mut rtks)?;
    let categories = read_categories(open(&data.click_categories_path())?)?;

    info!(
        transactions = transactions.len(),
        clicks = clicks.len(),
        categories = categories.len(),
        banks = banks.len(),
        rtks = rtks.len(),
        "Loaded event data"
    );

    Ok(EventData {
        transactions,
        clicks,
        categories,
        banks,
        rtks,
    })
}

pub fn load_matching(
    path: &Path,
    banks: &mut IdentityRegistry,
    rtks: &mut IdentityRegistry,
) -> Result<Vec<MatchPair>> {
    let pairs = read_matching(open(path)?, banks, rtks)?;
    info!(
        pairs = pairs.len(),
        no_match = pairs.iter().filter(|p| p.target.is_no_match()).count(),
        "Loaded matching"
    );
    Ok(pairs)
}

/// One bank's ranked rtk ids as submitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionEntry {
    pub bank: String,
    pub rtk: Vec<String>,
}

pub fn submission_entries(
    lists: &[RankedList],
    banks: &IdentityRegistry,
    rtks: &IdentityRegistry,
) -> Result<Vec<SubmissionEntry>> {
    let unknown = |side: &str, id: IdentityId| {
        MatchingError::Inference(format!("Unknown {} key {}", side, id))
    };

    lists
        .iter()
        .map(|list| {
            let bank = banks.name(list.bank).ok_or_else(|| unknown("bank", list.bank))?;
            let rtk = list
                .candidates
                .iter()
                .map(|c| match c {
                    MatchTarget::Rtk(id) => rtks
                        .name(*id)
                        .map(str::to_string)
                        .ok_or_else(|| unknown("rtk", *id)),
                    MatchTarget::NoMatch => Ok(NO_MATCH_ID.to_string()),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(SubmissionEntry {
                bank: bank.to_string(),
                rtk,
            })
        })
        .collect()
}

/// Serialize `value` as JSON, creating parent directories
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let value = serde_json::from_reader(BufReader::new(open(path)?))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_registry_interns_once() {
        let mut registry = IdentityRegistry::new();
        let a = registry.intern("a3f1");
        let b = registry.intern("77bc");

        assert_eq!(registry.intern("a3f1"), a);
        assert_ne!(a, b);
        assert_eq!(registry.name(b), Some("77bc"));
        assert_eq!(registry.name(99), None);
        assert_eq!(registry.name(-1), None);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_read_transactions() {
        let csv = "user_id,mcc_code,currency_rk,transaction_amt,transaction_dttm\n\
                   u1,5411,48,-120.5,2020-08-01 10:15:00\n\
                   u2,4829,50,300.0,2020-08-02 23:59:59.123\n\
                   u1,5411,48,-10.0,2020-08-03 00:00:00\n";
        let mut banks = IdentityRegistry::new();
        let events = read_transactions(csv.as_bytes(), &mut banks).unwrap();

        assert_eq!(events.len(), 3);
        assert_eq!(banks.len(), 2);
        assert_eq!(events[0].user_id, events[2].user_id);
        assert_eq!(events[0].mcc_code, 5411);
        assert_eq!(events[1].amount, 300.0);
        assert_eq!(events[1].timestamp.second(), 59);
    }

    #[test]
    fn test_bad_timestamp_is_invalid_input() {
        let csv = "user_id,cat_id,timestamp\nr1,3,yesterday\n";
        let mut rtks = IdentityRegistry::new();
        let result = read_clickstream(csv.as_bytes(), &mut rtks);

        assert!(matches!(result, Err(MatchingError::InvalidInput(_))));
    }

    #[test]
    fn test_missing_category_levels_become_nan() {
        let csv = "cat_id,level_0,level_1,level_2\n1,sport,,\n";
        let hierarchy = read_categories(csv.as_bytes()).unwrap();

        assert_eq!(hierarchy.level_name(1, match_features::ClickLevel::Level0), Some("sport"));
        assert_eq!(hierarchy.level_name(1, match_features::ClickLevel::Level2), Some("NaN"));
    }

    #[test]
    fn test_read_matching_with_no_match() {
        let csv = "bank,rtk\nb1,r1\nb2,0\n";
        let mut banks = IdentityRegistry::new();
        let mut rtks = IdentityRegistry::new();
        let pairs = read_matching(csv.as_bytes(), &mut banks, &mut rtks).unwrap();

        assert_eq!(pairs[0].target, MatchTarget::Rtk(rtks.get("r1").unwrap()));
        assert_eq!(pairs[1].target, MatchTarget::NoMatch);
        assert_eq!(rtks.len(), 1);
    }

    #[test]
    fn test_submission_entries_map_back_to_raw_ids() {
        let mut banks = IdentityRegistry::new();
        let mut rtks = IdentityRegistry::new();
        let bank = banks.intern("b1");
        let r1 = rtks.intern("r1");
        let r2 = rtks.intern("r2");

        let lists = vec![RankedList {
            bank,
            candidates: vec![MatchTarget::Rtk(r2), MatchTarget::Rtk(r1), MatchTarget::NoMatch],
        }];
        let entries = submission_entries(&lists, &banks, &rtks).unwrap();

        assert_eq!(
            entries,
            vec![SubmissionEntry {
                bank: "b1".to_string(),
                rtk: vec!["r2".to_string(), "r1".to_string(), "0".to_string()],
            }]
        );

        let bad = vec![RankedList {
            bank,
            candidates: vec![MatchTarget::Rtk(42)],
        }];
        assert!(submission_entries(&bad, &banks, &rtks).is_err());
    }

    #[test]
    fn test_json_round_trip_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("entries.json");
        let entries = vec![SubmissionEntry {
            bank: "b".to_string(),
            rtk: vec!["0".to_string()],
        }];

        write_json(&path, &entries).unwrap();
        let loaded: Vec<SubmissionEntry> = read_json(&path).unwrap();
        assert_eq!(loaded, entries);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_write_json_reports_a_failed_flush() {
        // Every write to /dev/full fails with ENOSPC once the buffer is flushed
        let entries = vec![SubmissionEntry {
            bank: "b".to_string(),
            rtk: vec!["0".to_string()],
        }];
        let result = write_json(Path::new("/dev/full"), &entries);
        assert!(matches!(result, Err(MatchingError::Io(_))));
    }
}
