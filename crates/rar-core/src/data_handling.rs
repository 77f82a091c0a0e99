//! Typed tabular dataset used by the contrast engine.
//!
//! A `DataSet` is a set of named, equally long columns. Each column is either
//! categorical (integer codes into an ordered domain of labels) or continuous.
//! Per-feature sorted row orders and value counts are computed once at
//! construction so the dataset can be shared read-only across worker threads.
use std::collections::BTreeSet;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::divergence::{CategoricalDistribution, ContinuousDistribution, Distribution};
use crate::error::{RarError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureType {
    Categorical,
    Continuous,
}

/// A single column of the dataset.
#[derive(Debug, Clone)]
pub enum Column {
    /// `codes[row]` indexes into `domain`, which is sorted and duplicate free.
    Categorical { codes: Vec<usize>, domain: Vec<String> },
    Continuous { values: Vec<f64> },
}

impl Column {
    /// Build a categorical column from labels. The domain is the sorted set of
    /// distinct labels.
    pub fn categorical<S: AsRef<str>>(labels: &[S]) -> Column {
        let domain: Vec<String> = labels
            .iter()
            .map(|l| l.as_ref().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let codes = labels
            .iter()
            .map(|l| {
                domain
                    .binary_search_by(|d| d.as_str().cmp(l.as_ref()))
                    .unwrap_or_default()
            })
            .collect();
        Column::Categorical { codes, domain }
    }

    pub fn continuous(values: Vec<f64>) -> Column {
        Column::Continuous { values }
    }

    /// Categorical column over numeric values. Labels are the values' display
    /// form, ordered numerically.
    pub fn numeric_categorical(values: &[f64]) -> Column {
        let mut distinct = values.to_vec();
        distinct.sort_by(|a, b| a.total_cmp(b));
        distinct.dedup();
        let codes = values
            .iter()
            .map(|v| {
                distinct
                    .binary_search_by(|d| d.total_cmp(v))
                    .unwrap_or_default()
            })
            .collect();
        let domain = distinct.iter().map(|v| v.to_string()).collect();
        Column::Categorical { codes, domain }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Categorical { codes, .. } => codes.len(),
            Column::Continuous { values } => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn feature_type(&self) -> FeatureType {
        match self {
            Column::Categorical { .. } => FeatureType::Categorical,
            Column::Continuous { .. } => FeatureType::Continuous,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataSet {
    names: Vec<String>,
    columns: Vec<Column>,
    n_rows: usize,
    /// Row indices ordered by value (stable), continuous columns only.
    sorted_indices: Vec<Option<Vec<usize>>>,
    /// Rows per domain value, categorical columns only.
    value_counts: Vec<Option<Vec<usize>>>,
}

impl DataSet {
    pub fn new(names: Vec<String>, columns: Vec<Column>) -> Result<Self> {
        if names.len() != columns.len() {
            return Err(RarError::InvalidConfig(format!(
                "{} column names given for {} columns",
                names.len(),
                columns.len()
            )));
        }
        let n_rows = columns.first().map(Column::len).unwrap_or(0);
        for (name, column) in names.iter().zip(columns.iter()) {
            if column.len() != n_rows {
                return Err(RarError::ShapeMismatch {
                    name: name.clone(),
                    len: column.len(),
                    expected: n_rows,
                });
            }
        }

        let sorted_indices = columns
            .iter()
            .map(|column| match column {
                Column::Continuous { values } => {
                    let mut order: Vec<usize> = (0..values.len()).collect();
                    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
                    Some(order)
                }
                Column::Categorical { .. } => None,
            })
            .collect();

        let value_counts = columns
            .iter()
            .map(|column| match column {
                Column::Categorical { codes, domain } => {
                    let mut counts = vec![0usize; domain.len()];
                    for &code in codes {
                        counts[code] += 1;
                    }
                    Some(counts)
                }
                Column::Continuous { .. } => None,
            })
            .collect();

        log::debug!(
            "Loaded dataset with {} rows and {} columns",
            n_rows,
            columns.len()
        );

        Ok(DataSet {
            names,
            columns,
            n_rows,
            sorted_indices,
            value_counts,
        })
    }

    /// Build a dataset from numeric columns, inferring the feature type: a
    /// column with fewer than `max_categories` distinct values is categorical.
    pub fn from_numeric_columns(
        names: Vec<String>,
        columns: Vec<Vec<f64>>,
        max_categories: usize,
    ) -> Result<Self> {
        let columns = columns
            .into_iter()
            .map(|values| {
                let mut distinct = values.clone();
                distinct.sort_by(|a, b| a.total_cmp(b));
                distinct.dedup();
                if distinct.len() < max_categories {
                    Column::numeric_categorical(&values)
                } else {
                    Column::continuous(values)
                }
            })
            .collect();
        DataSet::new(names, columns)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, feature: usize) -> &str {
        &self.names[feature]
    }

    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| RarError::UnknownFeature(name.to_string()))
    }

    pub fn column(&self, feature: usize) -> &Column {
        &self.columns[feature]
    }

    pub fn feature_type(&self, feature: usize) -> FeatureType {
        self.columns[feature].feature_type()
    }

    /// Ordered distinct labels of a categorical feature.
    pub fn domain(&self, feature: usize) -> Option<&[String]> {
        match &self.columns[feature] {
            Column::Categorical { domain, .. } => Some(domain),
            Column::Continuous { .. } => None,
        }
    }

    pub fn value_counts(&self, feature: usize) -> Option<&[usize]> {
        self.value_counts[feature].as_deref()
    }

    pub fn sorted_indices(&self, feature: usize) -> Option<&[usize]> {
        self.sorted_indices[feature].as_deref()
    }

    /// Value of a continuous feature at `row`, `None` for categorical features.
    pub fn continuous_value(&self, feature: usize, row: usize) -> Option<f64> {
        match &self.columns[feature] {
            Column::Continuous { values } => Some(values[row]),
            Column::Categorical { .. } => None,
        }
    }

    /// Mask of rows satisfying `predicate(row)`.
    pub fn filter_rows<F>(&self, predicate: F) -> Array1<bool>
    where
        F: Fn(usize) -> bool,
    {
        (0..self.n_rows).map(predicate).collect()
    }

    /// Mask of rows whose categorical code is flagged in `selected`.
    pub fn rows_in_values(&self, feature: usize, selected: &[bool]) -> Array1<bool> {
        match &self.columns[feature] {
            Column::Categorical { codes, .. } => codes
                .iter()
                .map(|&c| selected.get(c).copied().unwrap_or(false))
                .collect(),
            Column::Continuous { .. } => Array1::from_elem(self.n_rows, false),
        }
    }

    /// Mask of rows with `from <= value <= to`.
    pub fn rows_in_range(&self, feature: usize, from: f64, to: f64) -> Array1<bool> {
        match &self.columns[feature] {
            Column::Continuous { values } => {
                values.iter().map(|&v| v >= from && v <= to).collect()
            }
            Column::Categorical { .. } => Array1::from_elem(self.n_rows, false),
        }
    }

    /// Unconditional distribution of `target` over all rows.
    pub fn marginal_distribution(&self, target: usize) -> Distribution {
        self.conditional_distribution(target, &Array1::from_elem(self.n_rows, true))
    }

    /// Distribution of `target` restricted to the rows flagged in `mask`.
    pub fn conditional_distribution(&self, target: usize, mask: &Array1<bool>) -> Distribution {
        match &self.columns[target] {
            Column::Categorical { codes, .. } => Distribution::Categorical(
                CategoricalDistribution::from_codes(
                    codes
                        .iter()
                        .zip(mask.iter())
                        .filter(|(_, &m)| m)
                        .map(|(&c, _)| c),
                ),
            ),
            Column::Continuous { values } => {
                Distribution::Continuous(ContinuousDistribution::from_values(
                    values
                        .iter()
                        .zip(mask.iter())
                        .filter(|(_, &m)| m)
                        .map(|(&v, _)| v)
                        .collect(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> DataSet {
        DataSet::new(
            vec!["color".into(), "size".into()],
            vec![
                Column::categorical(&["red", "blue", "red", "green"]),
                Column::continuous(vec![3.0, 1.0, 2.0, 2.0]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_categorical_domain_is_sorted() {
        let data = toy();
        assert_eq!(data.domain(0).unwrap(), &["blue", "green", "red"]);
        assert_eq!(data.value_counts(0).unwrap(), &[1, 1, 2]);
        assert_eq!(data.feature_type(1), FeatureType::Continuous);
        assert!(data.domain(1).is_none());
    }

    #[test]
    fn test_sorted_indices_are_stable() {
        let data = toy();
        assert_eq!(data.sorted_indices(1).unwrap(), &[1, 2, 3, 0]);
    }

    #[test]
    fn test_row_filters() {
        let data = toy();
        let by_value = data.rows_in_values(0, &[false, false, true]);
        assert_eq!(by_value.to_vec(), vec![true, false, true, false]);

        let by_range = data.rows_in_range(1, 2.0, 3.0);
        assert_eq!(by_range.to_vec(), vec![true, false, true, true]);

        let combined = &by_value & &by_range;
        assert_eq!(combined.to_vec(), vec![true, false, true, false]);

        let odd = data.filter_rows(|row| row % 2 == 1);
        assert_eq!(odd.to_vec(), vec![false, true, false, true]);
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let result = DataSet::new(
            vec!["a".into(), "b".into()],
            vec![Column::continuous(vec![1.0, 2.0]), Column::continuous(vec![1.0])],
        );
        assert!(matches!(result, Err(RarError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_type_inference_threshold() {
        let data = DataSet::from_numeric_columns(
            vec!["few".into(), "many".into()],
            vec![
                vec![0.0, 1.0, 0.0, 1.0, 2.0],
                vec![0.1, 0.2, 0.3, 0.4, 0.5],
            ],
            4,
        )
        .unwrap();
        assert_eq!(data.feature_type(0), FeatureType::Categorical);
        assert_eq!(data.domain(0).unwrap(), &["0", "1", "2"]);
        assert_eq!(data.feature_type(1), FeatureType::Continuous);
    }
}
