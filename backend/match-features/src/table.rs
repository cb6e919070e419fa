//! Dense per-identity feature tables.
//!
//! A [`FeatureTable`] maps identity → fixed-width `f32` row. Rows are unique per
//! identity and the column order is fixed when the table is built, so the same
//! configuration always yields the same layout. Blocks are combined column-wise
//! with [`FeatureTable::concat`] (outer union of identities) or
//! [`FeatureTable::left_join`] (identities of the primary block only); cells an
//! identity has no data for are NaN.

use crate::error::{FeatureError, Result};
use crate::models::IdentityId;
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    ids: Vec<IdentityId>,
    index: HashMap<IdentityId, usize>,
    columns: Vec<String>,
    values: Array2<f32>,
}

impl Default for FeatureTable {
    fn default() -> Self {
        Self::empty()
    }
}

impl FeatureTable {
    /// Build a table from explicit parts, rejecting duplicate identities or columns.
    pub fn new(ids: Vec<IdentityId>, columns: Vec<String>, values: Array2<f32>) -> Result<Self> {
        if values.nrows() != ids.len() || values.ncols() != columns.len() {
            return Err(FeatureError::Validation(format!(
                "Shape mismatch: {} ids x {} columns vs values {:?}",
                ids.len(),
                columns.len(),
                values.shape()
            )));
        }

        ensure_unique_columns(&columns)?;

        let mut index = HashMap::with_capacity(ids.len());
        for (row, id) in ids.iter().enumerate() {
            if index.insert(*id, row).is_some() {
                return Err(FeatureError::Validation(format!(
                    "Duplicate identity row: {}",
                    id
                )));
            }
        }

        Ok(Self {
            ids,
            index,
            columns,
            values,
        })
    }

    pub fn empty() -> Self {
        Self {
            ids: Vec::new(),
            index: HashMap::new(),
            columns: Vec::new(),
            values: Array2::zeros((0, 0)),
        }
    }

    /// Densify `(identity, key, value)` triples into a table.
    ///
    /// Values sharing an `(identity, key)` are summed. Rows are ordered by
    /// identity and columns by key; absent cells are 0.
    pub fn from_sparse<K, I, F>(entries: I, column_name: F) -> Self
    where
        K: Ord + Clone,
        I: IntoIterator<Item = (IdentityId, K, f64)>,
        F: Fn(&K) -> String,
    {
        let mut keys: BTreeSet<K> = BTreeSet::new();
        let mut rows: BTreeMap<IdentityId, BTreeMap<K, f64>> = BTreeMap::new();

        for (id, key, value) in entries {
            keys.insert(key.clone());
            *rows.entry(id).or_default().entry(key).or_insert(0.0) += value;
        }

        let keys: Vec<K> = keys.into_iter().collect();
        let mut values = Array2::<f32>::zeros((rows.len(), keys.len()));

        for (row, cells) in rows.values().enumerate() {
            for (key, value) in cells {
                if let Ok(col) = keys.binary_search(key) {
                    values[[row, col]] = *value as f32;
                }
            }
        }

        let ids: Vec<IdentityId> = rows.keys().copied().collect();
        let columns = keys.iter().map(column_name).collect();
        Self::assemble(ids, columns, values)
    }

    fn assemble(ids: Vec<IdentityId>, columns: Vec<String>, values: Array2<f32>) -> Self {
        let index = ids.iter().enumerate().map(|(row, id)| (*id, row)).collect();
        Self {
            ids,
            index,
            columns,
            values,
        }
    }

    pub fn ids(&self) -> &[IdentityId] {
        &self.ids
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    pub fn n_rows(&self) -> usize {
        self.ids.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: IdentityId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn row(&self, id: IdentityId) -> Option<ArrayView1<'_, f32>> {
        self.index.get(&id).map(|&row| self.values.row(row))
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Number of identities with a nonzero value in each column.
    ///
    /// NaN counts as nonzero.
    pub fn column_support(&self) -> Vec<usize> {
        self.values
            .axis_iter(Axis(1))
            .map(|col| col.iter().filter(|v| **v != 0.0).count())
            .collect()
    }

    /// Drop every column observed as nonzero for fewer than `min_support` identities.
    pub fn filter_columns(&self, min_support: usize) -> Self {
        if min_support == 0 {
            return self.clone();
        }

        let keep: Vec<usize> = self
            .column_support()
            .into_iter()
            .enumerate()
            .filter(|(_, support)| *support >= min_support)
            .map(|(col, _)| col)
            .collect();

        let columns = keep.iter().map(|&col| self.columns[col].clone()).collect();
        let values = self.values.select(Axis(1), &keep);
        Self::assemble(self.ids.clone(), columns, values)
    }

    /// Scale every row to sum to 1. Rows with zero total become NaN.
    pub fn normalize_rows(&self) -> Self {
        let mut values = self.values.clone();
        for mut row in values.axis_iter_mut(Axis(0)) {
            let total: f64 = row.iter().map(|v| *v as f64).sum();
            if total == 0.0 {
                row.fill(f32::NAN);
            } else {
                row.mapv_inplace(|v| (v as f64 / total) as f32);
            }
        }
        Self::assemble(self.ids.clone(), self.columns.clone(), values)
    }

    /// [`normalize_rows`](Self::normalize_rows) plus a trailing `total_column`
    /// holding each row's sum before scaling.
    pub fn normalize_rows_with_total(&self, total_column: String) -> Self {
        let normed = self.normalize_rows();
        let width = self.n_cols();
        let values = Array2::from_shape_fn((self.n_rows(), width + 1), |(row, col)| {
            if col < width {
                normed.values[[row, col]]
            } else {
                self.values.row(row).sum()
            }
        });

        let mut columns = normed.columns;
        columns.push(total_column);
        Self::assemble(self.ids.clone(), columns, values)
    }

    pub fn with_suffix(mut self, suffix: &str) -> Self {
        for column in self.columns.iter_mut() {
            *column = format!("{}-{}", column, suffix);
        }
        self
    }

    /// Column-wise outer union of blocks. Identities missing from a block get
    /// NaN in that block's columns.
    pub fn concat(blocks: Vec<FeatureTable>) -> Result<Self> {
        let ids: Vec<IdentityId> = blocks
            .iter()
            .flat_map(|b| b.ids.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let columns: Vec<String> = blocks.iter().flat_map(|b| b.columns.clone()).collect();
        ensure_unique_columns(&columns)?;

        let mut values = Array2::<f32>::from_elem((ids.len(), columns.len()), f32::NAN);
        let mut offset = 0;
        for block in &blocks {
            for (row, id) in ids.iter().enumerate() {
                if let Some(src) = block.row(*id) {
                    values
                        .row_mut(row)
                        .slice_mut(ndarray::s![offset..offset + block.n_cols()])
                        .assign(&src);
                }
            }
            offset += block.n_cols();
        }

        Ok(Self::assemble(ids, columns, values))
    }

    /// Append `other`'s columns, keeping exactly this table's identities.
    pub fn left_join(&self, other: &FeatureTable) -> Result<Self> {
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        ensure_unique_columns(&columns)?;

        let mut values = Array2::<f32>::from_elem((self.n_rows(), columns.len()), f32::NAN);
        values
            .slice_mut(ndarray::s![.., ..self.n_cols()])
            .assign(&self.values);
        for (row, id) in self.ids.iter().enumerate() {
            if let Some(src) = other.row(*id) {
                values
                    .row_mut(row)
                    .slice_mut(ndarray::s![self.n_cols()..])
                    .assign(&src);
            }
        }

        Ok(Self::assemble(self.ids.clone(), columns, values))
    }

    /// Restrict to exactly `columns`, in that order. Absent columns are filled with 0.
    pub fn reindex_columns(&self, columns: &FeatureColumns) -> Self {
        let mut values = Array2::<f32>::zeros((self.n_rows(), columns.len()));
        for (dst, name) in columns.names().iter().enumerate() {
            if let Some(src) = self.column_index(name) {
                values.column_mut(dst).assign(&self.values.column(src));
            }
        }
        Self::assemble(self.ids.clone(), columns.names().to_vec(), values)
    }
}

fn ensure_unique_columns(columns: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(columns.len());
    for column in columns {
        if !seen.insert(column.as_str()) {
            return Err(FeatureError::Validation(format!(
                "Duplicate feature column: {}",
                column
            )));
        }
    }
    Ok(())
}

/// Ordered column allow-list captured from a built table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureColumns(Vec<String>);

impl FeatureColumns {
    pub fn capture(table: &FeatureTable) -> Self {
        Self(table.columns.clone())
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<String>> for FeatureColumns {
    fn from(columns: Vec<String>) -> Self {
        Self(columns)
    }
}
