//! Monte-Carlo subspace contrast.
//!
//! A contrast evaluation repeatedly draws a random slice of the dataset over
//! the features of a subspace, then measures how far the target's
//! distribution inside the slice diverges from its marginal distribution.
//! The average divergence over all non-empty draws is the contrast score.
use std::collections::BTreeMap;
use std::fmt;

use ndarray::Array1;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{CategoricalDivergence, ContrastConfig, CostMatrix};
use crate::data_handling::{DataSet, FeatureType};
use crate::divergence::{jsd, kld, ks, ks_normalized, Distribution};
use crate::error::{RarError, Result};

/// Minimum number of rows a per-feature condition selects.
pub const MIN_INSTANCES_PER_DIMENSION: usize = 5;

/// Sorted, duplicate-free set of feature indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subspace(Vec<usize>);

impl Subspace {
    pub fn new<I: IntoIterator<Item = usize>>(features: I) -> Self {
        let mut features: Vec<usize> = features.into_iter().collect();
        features.sort_unstable();
        features.dedup();
        Subspace(features)
    }

    pub fn features(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, feature: usize) -> bool {
        self.0.binary_search(&feature).is_ok()
    }

    pub fn intersection(&self, other: &Subspace) -> Subspace {
        Subspace(
            self.0
                .iter()
                .copied()
                .filter(|&f| other.contains(f))
                .collect(),
        )
    }

    pub fn is_subset(&self, other: &Subspace) -> bool {
        self.0.iter().all(|&f| other.contains(f))
    }
}

impl From<Vec<usize>> for Subspace {
    fn from(features: Vec<usize>) -> Self {
        Subspace::new(features)
    }
}

impl fmt::Display for Subspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Per-feature restriction of one slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// `selected[code]` flags the domain values kept by the slice.
    Categorical { feature: usize, selected: Vec<bool> },
    /// Inclusive value range.
    Continuous { feature: usize, from: f64, to: f64 },
}

impl Condition {
    pub fn feature(&self) -> usize {
        match self {
            Condition::Categorical { feature, .. } | Condition::Continuous { feature, .. } => {
                *feature
            }
        }
    }

    pub fn rows(&self, data: &DataSet) -> Array1<bool> {
        match self {
            Condition::Categorical { feature, selected } => data.rows_in_values(*feature, selected),
            Condition::Continuous { feature, from, to } => data.rows_in_range(*feature, *from, *to),
        }
    }
}

/// A scored Monte-Carlo draw: one condition per subspace feature, in
/// subspace order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slice {
    pub score: f64,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContrastOutcome {
    /// Contrast score; cost weighted when a cost matrix was supplied.
    pub score: f64,
    /// Plain average divergence over the kept draws.
    pub unweighted_score: f64,
    /// Draws that selected at least one row.
    pub iterations: usize,
    /// Scored slices, empty unless requested.
    pub slices: Vec<Slice>,
    /// Average one-vs-rest divergence per target class, cost-weighted runs only.
    pub class_scores: Option<BTreeMap<String, f64>>,
}

/// Contrast engine over a borrowed dataset.
#[derive(Debug)]
pub struct SubspaceContrast<'a> {
    data: &'a DataSet,
    config: ContrastConfig,
    marginals: Vec<Distribution>,
}

impl<'a> SubspaceContrast<'a> {
    pub fn new(data: &'a DataSet, config: ContrastConfig) -> Result<Self> {
        config.validate()?;
        let marginals = (0..data.n_columns())
            .map(|f| data.marginal_distribution(f))
            .collect();
        Ok(Self {
            data,
            config,
            marginals,
        })
    }

    pub fn data(&self) -> &'a DataSet {
        self.data
    }

    pub fn config(&self) -> &ContrastConfig {
        &self.config
    }

    /// Rows each per-feature condition selects for a subspace of `dims`
    /// features, so that the expected slice size stays near `N * alpha`.
    pub fn instances_per_dimension(&self, dims: usize) -> usize {
        let n = self.data.n_rows();
        let ipd = (n as f64 * self.config.alpha.powf(1.0 / dims.max(1) as f64)).round() as usize;
        ipd.max(MIN_INSTANCES_PER_DIMENSION).min(n)
    }

    fn categorical_condition<R: Rng + ?Sized>(
        &self,
        feature: usize,
        instances: usize,
        rng: &mut R,
    ) -> Condition {
        let counts = self.data.value_counts(feature).unwrap_or(&[]);
        let mut order: Vec<usize> = (0..counts.len()).collect();
        order.shuffle(rng);

        let mut selected = vec![false; counts.len()];
        let mut covered = 0usize;
        for code in order {
            if covered >= instances {
                break;
            }
            selected[code] = true;
            covered += counts[code];
        }
        Condition::Categorical { feature, selected }
    }

    fn continuous_condition<R: Rng + ?Sized>(
        &self,
        feature: usize,
        instances: usize,
        rng: &mut R,
    ) -> Condition {
        let sorted = self.data.sorted_indices(feature).unwrap_or(&[]);
        let max_start = sorted.len().saturating_sub(instances);
        let start = rng.gen_range(0..=max_start);
        let end = (start + instances.max(1) - 1).min(sorted.len().saturating_sub(1));
        let value = |rank: usize| {
            sorted
                .get(rank)
                .and_then(|&row| self.data.continuous_value(feature, row))
                .unwrap_or(f64::NAN)
        };
        Condition::Continuous {
            feature,
            from: value(start),
            to: value(end),
        }
    }

    fn draw_conditions<R: Rng + ?Sized>(
        &self,
        subspace: &Subspace,
        instances: usize,
        rng: &mut R,
    ) -> Vec<Condition> {
        subspace
            .features()
            .iter()
            .map(|&feature| match self.data.feature_type(feature) {
                FeatureType::Categorical => self.categorical_condition(feature, instances, rng),
                FeatureType::Continuous => self.continuous_condition(feature, instances, rng),
            })
            .collect()
    }

    /// Estimate the contrast of `target` over `subspace`.
    ///
    /// With a cost matrix (categorical targets only) the score is the
    /// cost-weighted mean of the per-class one-vs-rest divergences and the
    /// plain score is kept in `unweighted_score`.
    ///
    /// # Errors
    ///
    /// * [`RarError::CostMatrixMismatch`] if the cost classes differ from the
    ///   target classes; checked before sampling.
    /// * [`RarError::NoValidSample`] if every draw selected zero rows.
    pub fn contrast<R: Rng + ?Sized>(
        &self,
        subspace: &Subspace,
        target: usize,
        return_slices: bool,
        cost_matrix: Option<&CostMatrix>,
        rng: &mut R,
    ) -> Result<ContrastOutcome> {
        if subspace.is_empty() {
            return Err(RarError::InvalidConfig(
                "contrast requires a non-empty subspace".into(),
            ));
        }
        let target_classes = self.data.domain(target);
        if let Some(costs) = cost_matrix {
            let classes = target_classes.ok_or_else(|| {
                RarError::InvalidConfig(format!(
                    "cost matrix given for continuous target {}",
                    self.data.name(target)
                ))
            })?;
            costs.validate_against(classes)?;
            if self.config.categorical_divergence != CategoricalDivergence::Kld {
                return Err(RarError::InvalidConfig(
                    "cost-weighted contrast requires the KL divergence".into(),
                ));
            }
        }

        let instances = self.instances_per_dimension(subspace.len());
        let marginal = &self.marginals[target];

        let mut score_sum = 0.0;
        let mut kept = 0usize;
        let mut slices = Vec::new();
        let mut binary_sums: BTreeMap<usize, (f64, usize)> = BTreeMap::new();

        for iteration in 0..self.config.iterations {
            let conditions = self.draw_conditions(subspace, instances, rng);

            let mut mask = Array1::from_elem(self.data.n_rows(), true);
            for condition in &conditions {
                mask &= &condition.rows(self.data);
            }

            let conditional = self.data.conditional_distribution(target, &mask);
            if conditional.is_empty() {
                log::trace!(
                    "Discarding empty draw {} for subspace {} -> {}",
                    iteration,
                    subspace,
                    self.data.name(target)
                );
                continue;
            }

            let score = match (&conditional, marginal) {
                (Distribution::Categorical(p), Distribution::Categorical(q)) => {
                    match self.config.categorical_divergence {
                        CategoricalDivergence::Kld => {
                            let divergence = kld(p, q)?;
                            if cost_matrix.is_some() {
                                for (&code, &b) in &divergence.binary {
                                    let entry = binary_sums.entry(code).or_insert((0.0, 0));
                                    entry.0 += b;
                                    entry.1 += 1;
                                }
                            }
                            divergence.total()
                        }
                        CategoricalDivergence::Jsd => jsd(p, q)?,
                    }
                }
                (Distribution::Continuous(p), Distribution::Continuous(q)) => {
                    match self.config.ks_range {
                        Some((min, max)) => {
                            ks_normalized(q, p, self.config.cut_points, min, max, rng)
                        }
                        None => ks(q, p, self.config.cut_points, rng),
                    }
                }
                _ => unreachable!("conditional and marginal share the target column"),
            };

            score_sum += score;
            kept += 1;
            if return_slices {
                slices.push(Slice { score, conditions });
            }
        }

        if kept == 0 {
            return Err(RarError::NoValidSample {
                subspace: subspace.clone(),
                iterations: self.config.iterations,
            });
        }

        let unweighted_score = score_sum / kept as f64;

        let (score, class_scores) = match (cost_matrix, target_classes) {
            (Some(costs), Some(classes)) => {
                let class_scores: BTreeMap<String, f64> = classes
                    .iter()
                    .enumerate()
                    .map(|(code, class)| {
                        let avg = binary_sums
                            .get(&code)
                            .map(|&(sum, count)| sum / count as f64)
                            .unwrap_or(0.0);
                        (class.clone(), avg)
                    })
                    .collect();
                let weighted: f64 = class_scores
                    .iter()
                    .map(|(class, avg)| costs.cost(class).unwrap_or(0.0) * avg)
                    .sum();
                (weighted / costs.total(), Some(class_scores))
            }
            _ => (unweighted_score, None),
        };

        Ok(ContrastOutcome {
            score,
            unweighted_score,
            iterations: kept,
            slices,
            class_scores,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_handling::Column;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn linear_data(n: usize, seed: u64) -> DataSet {
        let mut rng = StdRng::seed_from_u64(seed);
        let target: Vec<f64> = (0..n).map(|_| rng.gen::<f64>()).collect();
        let copy = target.clone();
        let noise: Vec<f64> = (0..n).map(|_| rng.gen::<f64>()).collect();
        DataSet::new(
            vec!["target".into(), "copy".into(), "noise".into()],
            vec![
                Column::continuous(target),
                Column::continuous(copy),
                Column::continuous(noise),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_instances_per_dimension() {
        let data = linear_data(1000, 1);
        let engine = SubspaceContrast::new(&data, ContrastConfig::default()).unwrap();
        assert_eq!(engine.instances_per_dimension(1), 100);
        // sqrt(0.1) * 1000 = 316.2
        assert_eq!(engine.instances_per_dimension(2), 316);

        let small = linear_data(20, 1);
        let engine = SubspaceContrast::new(&small, ContrastConfig::default()).unwrap();
        assert_eq!(engine.instances_per_dimension(1), MIN_INSTANCES_PER_DIMENSION);
    }

    #[test]
    fn test_copy_has_higher_contrast_than_noise() {
        let data = linear_data(300, 2);
        let engine = SubspaceContrast::new(&data, ContrastConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(5);

        let copy = engine
            .contrast(&Subspace::new([1]), 0, true, None, &mut rng)
            .unwrap();
        let noise = engine
            .contrast(&Subspace::new([2]), 0, false, None, &mut rng)
            .unwrap();

        assert!(copy.score > noise.score + 0.2, "copy {} noise {}", copy.score, noise.score);
        assert_eq!(copy.slices.len(), copy.iterations);
        assert!(noise.slices.is_empty());
        assert!(copy.class_scores.is_none());
        assert_eq!(copy.score, copy.unweighted_score);
    }

    #[test]
    fn test_categorical_condition_covers_instances() {
        let labels: Vec<String> = (0..100).map(|i| format!("v{}", i % 10)).collect();
        let data = DataSet::new(
            vec!["cat".into(), "target".into()],
            vec![
                Column::categorical(&labels),
                Column::continuous((0..100).map(|v| v as f64).collect()),
            ],
        )
        .unwrap();
        let engine = SubspaceContrast::new(&data, ContrastConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        // 10 rows per value, 10 instances required: exactly one value
        for _ in 0..20 {
            match engine.categorical_condition(0, 10, &mut rng) {
                Condition::Categorical { selected, .. } => {
                    assert_eq!(selected.iter().filter(|&&s| s).count(), 1)
                }
                other => panic!("unexpected condition {:?}", other),
            }
        }
        // 25 instances need three values
        match engine.categorical_condition(0, 25, &mut rng) {
            Condition::Categorical { selected, .. } => {
                assert_eq!(selected.iter().filter(|&&s| s).count(), 3)
            }
            other => panic!("unexpected condition {:?}", other),
        }
    }

    #[test]
    fn test_continuous_condition_spans_instances() {
        let data = linear_data(200, 3);
        let engine = SubspaceContrast::new(&data, ContrastConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..20 {
            let condition = engine.continuous_condition(1, 20, &mut rng);
            let rows = condition.rows(&data);
            assert!(rows.iter().filter(|&&r| r).count() >= 20);
        }
    }

    #[test]
    fn test_empty_draws_are_discarded() {
        // perfectly anti-ordered features: two narrow slices rarely overlap
        let n = 100;
        let data = DataSet::new(
            vec!["up".into(), "down".into(), "target".into()],
            vec![
                Column::continuous((0..n).map(|v| v as f64).collect()),
                Column::continuous((0..n).map(|v| -(v as f64)).collect()),
                Column::continuous((0..n).map(|v| (v % 7) as f64).collect()),
            ],
        )
        .unwrap();
        let config = ContrastConfig {
            alpha: 0.01,
            iterations: 1,
            ..ContrastConfig::default()
        };
        let engine = SubspaceContrast::new(&data, config).unwrap();
        let subspace = Subspace::new([0, 1]);

        let mut empty = 0;
        let mut valid = 0;
        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            match engine.contrast(&subspace, 2, false, None, &mut rng) {
                Ok(outcome) => {
                    assert_eq!(outcome.iterations, 1);
                    assert!(outcome.score.is_finite());
                    valid += 1;
                }
                Err(RarError::NoValidSample { iterations, .. }) => {
                    assert_eq!(iterations, 1);
                    empty += 1;
                }
                Err(e) => panic!("unexpected error {}", e),
            }
        }
        assert!(empty > 0 && valid > 0, "empty {} valid {}", empty, valid);
    }

    #[test]
    fn test_cost_weighting() {
        let classes: Vec<&str> = (0..200).map(|i| if i % 2 == 0 { "x" } else { "y" }).collect();
        let feature: Vec<f64> = (0..200).map(|i| (i % 2) as f64 + i as f64 * 1e-3).collect();
        let data = DataSet::new(
            vec!["class".into(), "signal".into()],
            vec![Column::categorical(&classes), Column::continuous(feature)],
        )
        .unwrap();
        let engine = SubspaceContrast::new(&data, ContrastConfig::default()).unwrap();
        let costs = CostMatrix::uniform(&["x", "y"]);

        let mut rng = StdRng::seed_from_u64(21);
        let outcome = engine
            .contrast(&Subspace::new([1]), 0, false, Some(&costs), &mut rng)
            .unwrap();
        let class_scores = outcome.class_scores.clone().unwrap();
        assert_eq!(class_scores.len(), 2);
        let mean = class_scores.values().sum::<f64>() / 2.0;
        assert_relative_eq!(outcome.score, mean, epsilon = 1e-12);
        assert!(outcome.unweighted_score > 0.5);

        let bad = CostMatrix::uniform(&["x", "z"]);
        assert!(matches!(
            engine.contrast(&Subspace::new([1]), 0, false, Some(&bad), &mut rng),
            Err(RarError::CostMatrixMismatch { .. })
        ));
    }

    fn categorical_copy_data(n: usize, seed: u64) -> DataSet {
        let mut rng = StdRng::seed_from_u64(seed);
        let labels: Vec<String> = (0..n).map(|_| format!("c{}", rng.gen_range(0..3))).collect();
        let noise: Vec<String> = (0..n).map(|_| format!("n{}", rng.gen_range(0..3))).collect();
        DataSet::new(
            vec!["target".into(), "copy".into(), "noise".into()],
            vec![
                Column::categorical(&labels),
                Column::categorical(&labels),
                Column::categorical(&noise),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_jensen_shannon_contrast() {
        let data = categorical_copy_data(300, 6);
        let config = ContrastConfig {
            categorical_divergence: CategoricalDivergence::Jsd,
            ..ContrastConfig::default()
        };
        let engine = SubspaceContrast::new(&data, config).unwrap();
        let mut rng = StdRng::seed_from_u64(2);

        let copy = engine
            .contrast(&Subspace::new([1]), 0, false, None, &mut rng)
            .unwrap();
        let noise = engine
            .contrast(&Subspace::new([2]), 0, false, None, &mut rng)
            .unwrap();
        assert!(copy.score > noise.score, "copy {} noise {}", copy.score, noise.score);
        // log2-based JSD is bounded by 1, unlike the KL divergence
        assert!(copy.score > 0.0 && copy.score <= 1.0 + 1e-12);

        let kld_engine = SubspaceContrast::new(&data, ContrastConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let kld_copy = kld_engine
            .contrast(&Subspace::new([1]), 0, false, None, &mut rng)
            .unwrap();
        assert!((kld_copy.score - copy.score).abs() > 1e-6);

        let costs = CostMatrix::uniform(data.domain(0).unwrap());
        assert!(matches!(
            engine.contrast(&Subspace::new([1]), 0, false, Some(&costs), &mut rng),
            Err(RarError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rescaled_continuous_contrast() {
        let data = linear_data(200, 8);
        let plain = SubspaceContrast::new(&data, ContrastConfig::default()).unwrap();
        let scaled = SubspaceContrast::new(
            &data,
            ContrastConfig {
                ks_range: Some((0.0, 2.0)),
                ..ContrastConfig::default()
            },
        )
        .unwrap();

        let subspace = Subspace::new([1]);
        let d = plain
            .contrast(&subspace, 0, false, None, &mut StdRng::seed_from_u64(3))
            .unwrap();
        let half = scaled
            .contrast(&subspace, 0, false, None, &mut StdRng::seed_from_u64(3))
            .unwrap();
        assert_relative_eq!(half.score, d.score / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_subspace_set_operations() {
        let a = Subspace::new([3, 1, 2, 3]);
        assert_eq!(a.features(), &[1, 2, 3]);
        let b = Subspace::new([2, 3, 9]);
        assert_eq!(a.intersection(&b), Subspace::new([2, 3]));
        assert!(Subspace::new([2]).is_subset(&a));
        assert!(!b.is_subset(&a));
    }
}
