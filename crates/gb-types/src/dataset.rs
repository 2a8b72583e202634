//! Identifier-keyed tabular data: raw loaded tables, the aligned dataset and
//! the row subsets produced by splitting.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::errors::{DataError, GbResult};

/// Unique key of one instance (row) in a dataset.
pub type InstanceId = String;

/// Row-major dense matrix of `f64` values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseMatrix {
    n_rows: usize,
    n_cols: usize,
    data: Vec<f64>,
}

impl DenseMatrix {
    pub fn from_row_major(n_rows: usize, n_cols: usize, data: Vec<f64>) -> GbResult<Self> {
        if n_rows.checked_mul(n_cols) != Some(data.len()) {
            return Err(DataError::InvalidFormat {
                message: format!(
                    "matrix of {n_rows}x{n_cols} needs {} values, got {}",
                    n_rows.saturating_mul(n_cols),
                    data.len()
                ),
            }
            .into());
        }
        Ok(Self {
            n_rows,
            n_cols,
            data,
        })
    }

    /// Build from a list of equally sized rows.
    pub fn from_rows(rows: &[Vec<f64>]) -> GbResult<Self> {
        let n_cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * n_cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n_cols {
                return Err(DataError::InvalidFormat {
                    message: format!("row {i} has {} values, expected {n_cols}", row.len()),
                }
                .into());
            }
            data.extend_from_slice(row);
        }
        Self::from_row_major(rows.len(), n_cols, data)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n_cols..(i + 1) * self.n_cols]
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.n_cols + col]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        (0..self.n_rows).map(move |i| self.row(i))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Copy the given rows, in the given order, into a new matrix.
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        let mut data = Vec::with_capacity(rows.len() * self.n_cols);
        for &r in rows {
            data.extend_from_slice(self.row(r));
        }
        Self {
            n_rows: rows.len(),
            n_cols: self.n_cols,
            data,
        }
    }

    /// Copy the given columns, in the given order, into a new matrix.
    pub fn select_columns(&self, cols: &[usize]) -> Self {
        let mut data = Vec::with_capacity(self.n_rows * cols.len());
        for r in 0..self.n_rows {
            let row = self.row(r);
            data.extend(cols.iter().map(|&c| row[c]));
        }
        Self {
            n_rows: self.n_rows,
            n_cols: cols.len(),
            data,
        }
    }
}

/// A feature table as loaded from disk, before target extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    ids: Vec<InstanceId>,
    columns: Vec<String>,
    values: DenseMatrix,
}

impl FeatureTable {
    pub fn new(ids: Vec<InstanceId>, columns: Vec<String>, values: DenseMatrix) -> GbResult<Self> {
        if values.n_rows() != ids.len() || values.n_cols() != columns.len() {
            return Err(DataError::InvalidFormat {
                message: format!(
                    "table has {} ids and {} columns but a {}x{} value matrix",
                    ids.len(),
                    columns.len(),
                    values.n_rows(),
                    values.n_cols()
                ),
            }
            .into());
        }
        check_unique_ids(&ids)?;
        let mut seen = HashSet::with_capacity(columns.len());
        for name in &columns {
            if !seen.insert(name.as_str()) {
                return Err(DataError::InvalidFormat {
                    message: format!("duplicate column name: {name}"),
                }
                .into());
            }
        }
        Ok(Self {
            ids,
            columns,
            values,
        })
    }

    pub fn ids(&self) -> &[InstanceId] {
        &self.ids
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &DenseMatrix {
        &self.values
    }

    pub fn n_rows(&self) -> usize {
        self.ids.len()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Remove a column from the table and return it as a target vector.
    ///
    /// Returns `None` when the column does not exist.
    pub fn take_column(&mut self, name: &str) -> Option<TargetVector> {
        let idx = self.columns.iter().position(|c| c == name)?;
        let values: Vec<f64> = (0..self.values.n_rows())
            .map(|r| self.values.get(r, idx))
            .collect();
        let keep: Vec<usize> = (0..self.columns.len()).filter(|&c| c != idx).collect();
        self.values = self.values.select_columns(&keep);
        self.columns.remove(idx);
        Some(TargetVector {
            ids: self.ids.clone(),
            values,
        })
    }

    /// Restrict the table to the named features, in the given order.
    pub fn select_features(&self, names: &[String]) -> GbResult<Self> {
        let lookup: HashMap<&str, usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();
        let mut cols = Vec::with_capacity(names.len());
        for name in names {
            let idx = lookup
                .get(name.as_str())
                .ok_or_else(|| DataError::MissingFeature { name: name.clone() })?;
            cols.push(*idx);
        }
        Self::new(
            self.ids.clone(),
            names.to_vec(),
            self.values.select_columns(&cols),
        )
    }
}

/// Target values keyed by instance identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetVector {
    ids: Vec<InstanceId>,
    values: Vec<f64>,
}

impl TargetVector {
    pub fn new(ids: Vec<InstanceId>, values: Vec<f64>) -> GbResult<Self> {
        if ids.len() != values.len() {
            return Err(DataError::InvalidFormat {
                message: format!("{} target ids but {} values", ids.len(), values.len()),
            }
            .into());
        }
        check_unique_ids(&ids)?;
        Ok(Self { ids, values })
    }

    pub fn ids(&self) -> &[InstanceId] {
        &self.ids
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Feature matrix and target aligned row-for-row by instance identifier.
///
/// Immutable once built.
#[derive(Debug, Clone)]
pub struct Dataset {
    ids: Vec<InstanceId>,
    feature_names: Arc<[String]>,
    features: DenseMatrix,
    target: Vec<f64>,
    index: HashMap<InstanceId, usize>,
}

impl Dataset {
    /// Align `target` to the row order of `features`.
    ///
    /// Every identifier must appear on both sides exactly once, and every
    /// target value must be finite.
    pub fn new(features: FeatureTable, target: TargetVector) -> GbResult<Self> {
        let index: HashMap<InstanceId, usize> = features
            .ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        let mut aligned = vec![f64::NAN; features.n_rows()];
        let mut filled = vec![false; features.n_rows()];
        for (id, &value) in target.ids.iter().zip(&target.values) {
            let row = *index
                .get(id)
                .ok_or_else(|| DataError::UnalignedTarget { id: id.clone() })?;
            if !value.is_finite() {
                return Err(DataError::InvalidFormat {
                    message: format!("non-finite target value for {id}"),
                }
                .into());
            }
            aligned[row] = value;
            filled[row] = true;
        }
        if let Some(row) = filled.iter().position(|f| !f) {
            return Err(DataError::UnalignedTarget {
                id: features.ids[row].clone(),
            }
            .into());
        }

        Ok(Self {
            ids: features.ids,
            feature_names: features.columns.into(),
            features: features.values,
            target: aligned,
            index,
        })
    }

    pub fn ids(&self) -> &[InstanceId] {
        &self.ids
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn features(&self) -> &DenseMatrix {
        &self.features
    }

    pub fn target(&self) -> &[f64] {
        &self.target
    }

    pub fn n_instances(&self) -> usize {
        self.ids.len()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Row position of an identifier.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Copy the given rows into a subset, keeping ids, features and target
    /// aligned.
    pub fn subset(&self, rows: &[usize]) -> Subset {
        Subset {
            ids: rows.iter().map(|&r| self.ids[r].clone()).collect(),
            feature_names: Arc::clone(&self.feature_names),
            features: self.features.select_rows(rows),
            target: rows.iter().map(|&r| self.target[r]).collect(),
        }
    }
}

/// A row subset of a [`Dataset`] (for example the train or test part).
#[derive(Debug, Clone, PartialEq)]
pub struct Subset {
    ids: Vec<InstanceId>,
    feature_names: Arc<[String]>,
    features: DenseMatrix,
    target: Vec<f64>,
}

impl Subset {
    pub fn new(
        ids: Vec<InstanceId>,
        feature_names: Vec<String>,
        features: DenseMatrix,
        target: Vec<f64>,
    ) -> GbResult<Self> {
        if features.n_rows() != ids.len()
            || target.len() != ids.len()
            || features.n_cols() != feature_names.len()
        {
            return Err(DataError::InvalidFormat {
                message: "subset ids, features and target are not aligned".to_string(),
            }
            .into());
        }
        Ok(Self {
            ids,
            feature_names: feature_names.into(),
            features,
            target,
        })
    }

    pub fn ids(&self) -> &[InstanceId] {
        &self.ids
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn features(&self) -> &DenseMatrix {
        &self.features
    }

    pub fn target(&self) -> &[f64] {
        &self.target
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn select_rows(&self, rows: &[usize]) -> Subset {
        Subset {
            ids: rows.iter().map(|&r| self.ids[r].clone()).collect(),
            feature_names: Arc::clone(&self.feature_names),
            features: self.features.select_rows(rows),
            target: rows.iter().map(|&r| self.target[r]).collect(),
        }
    }
}

fn check_unique_ids(ids: &[InstanceId]) -> GbResult<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(DataError::DuplicateIdentifier { id: id.clone() }.into());
        }
    }
    Ok(())
}
