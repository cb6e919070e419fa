use match_features::IdentityId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Candidate key of the "no match" sentinel when it is ranked as a scored
/// candidate. No feature table holds a row for it, so its rtk side is all NaN.
pub const NO_MATCH_KEY: IdentityId = IdentityId::MIN;

/// Right-hand side of a labelled match: an rtk identity or "no match"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatchTarget {
    Rtk(IdentityId),
    NoMatch,
}

impl MatchTarget {
    pub fn rtk(&self) -> Option<IdentityId> {
        match self {
            MatchTarget::Rtk(id) => Some(*id),
            MatchTarget::NoMatch => None,
        }
    }

    pub fn is_no_match(&self) -> bool {
        matches!(self, MatchTarget::NoMatch)
    }

    /// Target for a candidate key; `NO_MATCH_KEY` maps to the sentinel
    pub fn from_key(key: IdentityId) -> Self {
        if key == NO_MATCH_KEY {
            MatchTarget::NoMatch
        } else {
            MatchTarget::Rtk(key)
        }
    }
}

/// Verified bank → rtk correspondence (ground truth row)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchPair {
    pub bank: IdentityId,
    pub target: MatchTarget,
}

impl MatchPair {
    pub fn new(bank: IdentityId, target: MatchTarget) -> Self {
        Self { bank, target }
    }
}

/// Labelled (bank, rtk) pair fed to the ranking model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidatePair {
    pub bank: IdentityId,
    pub rtk: IdentityId,
    /// 1 = verified match, 0 = sampled negative
    pub label: u8,
}

/// Ranked rtk candidates for one bank identity, best first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedList {
    pub bank: IdentityId,
    pub candidates: Vec<MatchTarget>,
}

/// Ground truth keyed by bank. A bank listed twice keeps its last target.
pub type GroundTruth = HashMap<IdentityId, MatchTarget>;

pub fn ground_truth(pairs: &[MatchPair]) -> GroundTruth {
    pairs.iter().map(|p| (p.bank, p.target)).collect()
}

/// Where the "no match" sentinel goes in a ranked list.
///
/// Only applies when the sentinel is not itself a scored candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoMatchPlacement {
    /// After every real candidate; only kept when fewer than top-k real candidates exist
    #[default]
    Fallback,
    /// First entry, ahead of every real candidate
    Leading,
    /// Never emitted
    Omit,
}
