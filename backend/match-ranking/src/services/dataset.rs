//! Query-grouped training matrix
//!
//! Joins labelled candidate pairs with the bank and rtk feature tables and
//! lays the rows out grouped by bank, the unit the ranking loss works on.

use crate::models::CandidatePair;
use match_features::FeatureTable;
use ndarray::{Array2, ArrayView2};
use std::ops::Range;

#[derive(Debug, Clone)]
pub struct QueryDataset {
    pairs: Vec<CandidatePair>,
    features: Array2<f32>,
    groups: Vec<Range<usize>>,
}

impl QueryDataset {
    /// Inner-join `pairs` with both feature tables and sort by bank.
    ///
    /// Pairs whose bank or rtk has no feature row are dropped. Rows are
    /// bank features followed by rtk features. The sort is stable, so the
    /// relative order of a bank's candidates is preserved.
    pub fn build(
        pairs: &[CandidatePair],
        bank_features: &FeatureTable,
        rtk_features: &FeatureTable,
    ) -> Self {
        let mut kept: Vec<CandidatePair> = pairs
            .iter()
            .filter(|p| bank_features.contains(p.bank) && rtk_features.contains(p.rtk))
            .copied()
            .collect();
        kept.sort_by_key(|p| p.bank);

        let bank_width = bank_features.n_cols();
        let width = bank_width + rtk_features.n_cols();
        let mut features = Array2::<f32>::zeros((kept.len(), width));

        for (row, pair) in kept.iter().enumerate() {
            if let (Some(bank), Some(rtk)) = (bank_features.row(pair.bank), rtk_features.row(pair.rtk)) {
                let mut dst = features.row_mut(row);
                dst.slice_mut(ndarray::s![..bank_width]).assign(&bank);
                dst.slice_mut(ndarray::s![bank_width..]).assign(&rtk);
            }
        }

        let groups = group_ranges(&kept);
        Self {
            pairs: kept,
            features,
            groups,
        }
    }

    pub fn pairs(&self) -> &[CandidatePair] {
        &self.pairs
    }

    pub fn features(&self) -> ArrayView2<'_, f32> {
        self.features.view()
    }

    pub fn labels(&self) -> Vec<f64> {
        self.pairs.iter().map(|p| p.label as f64).collect()
    }

    /// Contiguous row ranges sharing one bank identity
    pub fn groups(&self) -> &[Range<usize>] {
        &self.groups
    }

    pub fn n_rows(&self) -> usize {
        self.pairs.len()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

fn group_ranges(sorted: &[CandidatePair]) -> Vec<Range<usize>> {
    let mut groups = Vec::new();
    let mut start = 0;
    for row in 1..=sorted.len() {
        if row == sorted.len() || sorted[row].bank != sorted[start].bank {
            groups.push(start..row);
            start = row;
        }
    }
    groups
}
