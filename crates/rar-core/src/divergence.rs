//! Divergence measures between a conditional and a marginal distribution.
//!
//! Categorical targets are compared with a Kullback-Leibler style divergence
//! (plus per-class one-vs-rest terms used for cost weighting), continuous
//! targets with a Monte-Carlo approximation of the Kolmogorov-Smirnov
//! statistic.
use std::collections::BTreeMap;

use rand::Rng;

use crate::error::{RarError, Result};

/// Conditional probabilities below this are clipped before taking the log.
pub const PROBABILITY_FLOOR: f64 = 1e-8;

/// Number of random cut points used by [`ks`] in the contrast engine.
pub const DEFAULT_CUT_POINTS: usize = 50;

/// Probability of each observed class code.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoricalDistribution {
    probabilities: BTreeMap<usize, f64>,
    total: usize,
}

impl CategoricalDistribution {
    pub fn from_codes<I: IntoIterator<Item = usize>>(codes: I) -> Self {
        let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
        let mut total = 0usize;
        for code in codes {
            *counts.entry(code).or_default() += 1;
            total += 1;
        }
        let probabilities = counts
            .into_iter()
            .map(|(code, count)| (code, count as f64 / total as f64))
            .collect();
        CategoricalDistribution {
            probabilities,
            total,
        }
    }

    pub fn from_probabilities(probabilities: BTreeMap<usize, f64>) -> Self {
        CategoricalDistribution {
            probabilities,
            total: 0,
        }
    }

    pub fn probability(&self, code: usize) -> Option<f64> {
        self.probabilities.get(&code).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.probabilities.iter().map(|(&c, &p)| (c, p))
    }

    /// Number of rows the distribution was counted from (0 if built from
    /// probabilities).
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }
}

/// Sorted sample of a continuous variable.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousDistribution {
    values: Vec<f64>,
}

impl ContinuousDistribution {
    pub fn from_values(mut values: Vec<f64>) -> Self {
        values.sort_by(|a, b| a.total_cmp(b));
        ContinuousDistribution { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn min(&self) -> Option<f64> {
        self.values.first().copied()
    }

    pub fn max(&self) -> Option<f64> {
        self.values.last().copied()
    }

    /// Empirical CDF at `cut`.
    pub fn fraction_at_most(&self, cut: f64) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.partition_point(|&v| v <= cut) as f64 / self.values.len() as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Distribution {
    Categorical(CategoricalDistribution),
    Continuous(ContinuousDistribution),
}

impl Distribution {
    pub fn is_empty(&self) -> bool {
        match self {
            Distribution::Categorical(d) => d.is_empty(),
            Distribution::Continuous(d) => d.is_empty(),
        }
    }
}

/// Result of [`kld`]: per-class divergence terms and one-vs-rest terms.
#[derive(Debug, Clone, PartialEq)]
pub struct KlDivergence {
    pub per_value: BTreeMap<usize, f64>,
    pub binary: BTreeMap<usize, f64>,
}

impl KlDivergence {
    pub fn total(&self) -> f64 {
        self.per_value.values().sum()
    }
}

fn xlog2_ratio(x: f64, y: f64) -> f64 {
    // 0 * log(0 / y) is taken as 0
    if x <= 0.0 {
        0.0
    } else {
        x * (x / y.max(PROBABILITY_FLOOR)).log2()
    }
}

/// Kullback-Leibler divergence of conditional `p` from marginal `q`.
///
/// Only values observed in both distributions contribute to `per_value`.
/// `binary` holds a one-vs-rest term for every value of `q`. Conditional
/// probabilities are clipped to [`PROBABILITY_FLOOR`] before the log.
///
/// # Errors
///
/// [`RarError::EmptyDivergence`] when the two distributions share no value.
pub fn kld(p: &CategoricalDistribution, q: &CategoricalDistribution) -> Result<KlDivergence> {
    let mut per_value = BTreeMap::new();
    let mut binary = BTreeMap::new();

    for (value, p_prob) in p.iter() {
        let Some(q_prob) = q.probability(value) else {
            continue;
        };
        let p_clip = p_prob.max(PROBABILITY_FLOOR);
        per_value.insert(value, p_prob * (p_clip / q_prob).log2());
    }
    if per_value.is_empty() {
        return Err(RarError::EmptyDivergence);
    }

    // one-vs-rest over every marginal class, absent ones at probability 0
    for (value, q_prob) in q.iter() {
        let p_prob = p.probability(value).unwrap_or(0.0);
        let term = per_value.get(&value).copied().unwrap_or(0.0);
        binary.insert(value, term + xlog2_ratio(1.0 - p_prob, 1.0 - q_prob));
    }

    Ok(KlDivergence { per_value, binary })
}

/// Jensen-Shannon divergence: mean KL of both sides against their pointwise
/// mixture, over the shared values.
pub fn jsd(p: &CategoricalDistribution, q: &CategoricalDistribution) -> Result<f64> {
    let shared: Vec<(usize, f64, f64)> = p
        .iter()
        .filter_map(|(v, pp)| q.probability(v).map(|qq| (v, pp, qq)))
        .collect();
    if shared.is_empty() {
        return Err(RarError::EmptyDivergence);
    }

    let restrict = |pick: fn(&(usize, f64, f64)) -> f64| {
        CategoricalDistribution::from_probabilities(shared.iter().map(|s| (s.0, pick(s))).collect())
    };
    let p_shared = restrict(|s| s.1);
    let q_shared = restrict(|s| s.2);
    let mixture = restrict(|s| (s.1 + s.2) * 0.5);

    Ok((kld(&p_shared, &mixture)?.total() + kld(&q_shared, &mixture)?.total()) * 0.5)
}

/// Monte-Carlo Kolmogorov-Smirnov distance between `marginal` and
/// `conditional`.
///
/// `cut_points` cuts are drawn uniformly over the conditional's value range and
/// the largest CDF gap among them is returned. Returns 0 for an empty input.
pub fn ks<R: Rng + ?Sized>(
    marginal: &ContinuousDistribution,
    conditional: &ContinuousDistribution,
    cut_points: usize,
    rng: &mut R,
) -> f64 {
    let (Some(lo), Some(hi)) = (conditional.min(), conditional.max()) else {
        return 0.0;
    };
    if marginal.is_empty() {
        return 0.0;
    }

    let mut divergence = 0.0f64;
    for _ in 0..cut_points {
        let cut = lo + rng.gen::<f64>() * (hi - lo);
        let gap = (marginal.fraction_at_most(cut) - conditional.fraction_at_most(cut)).abs();
        divergence = divergence.max(gap);
    }
    divergence
}

/// [`ks`] min-max rescaled as `(d - min) / (max - min)`.
pub fn ks_normalized<R: Rng + ?Sized>(
    marginal: &ContinuousDistribution,
    conditional: &ContinuousDistribution,
    cut_points: usize,
    min_divergence: f64,
    max_divergence: f64,
    rng: &mut R,
) -> f64 {
    let d = ks(marginal, conditional, cut_points, rng);
    (d - min_divergence) / (max_divergence - min_divergence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn dist(pairs: &[(usize, f64)]) -> CategoricalDistribution {
        CategoricalDistribution::from_probabilities(pairs.iter().copied().collect())
    }

    #[test]
    fn test_kld_known_values() {
        let p = dist(&[(0, 0.5), (1, 0.5)]);
        let q = dist(&[(0, 0.9), (1, 0.1)]);
        let d = kld(&p, &q).unwrap();

        assert_relative_eq!(d.per_value[&0], 0.5 * (0.5f64 / 0.9).log2(), epsilon = 1e-12);
        assert_relative_eq!(d.per_value[&0], -0.4240, epsilon = 1e-4);
        assert_relative_eq!(d.per_value[&1], 1.1610, epsilon = 1e-4);
        assert_relative_eq!(d.total(), 0.7370, epsilon = 1e-4);

        // two classes: each one-vs-rest term equals the full divergence
        assert_relative_eq!(d.binary[&0], d.total(), epsilon = 1e-12);
        assert_relative_eq!(d.binary[&1], d.total(), epsilon = 1e-12);
    }

    #[test]
    fn test_kld_self_is_zero() {
        let p = dist(&[(0, 0.2), (1, 0.3), (2, 0.5)]);
        let d = kld(&p, &p).unwrap();
        assert_relative_eq!(d.total(), 0.0, epsilon = 1e-12);
        for v in d.binary.values() {
            assert_relative_eq!(*v, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_kld_drops_unshared_values() {
        let p = dist(&[(0, 1.0)]);
        let q = dist(&[(0, 0.5), (1, 0.5)]);
        let d = kld(&p, &q).unwrap();
        assert_eq!(d.per_value.len(), 1);
        assert_relative_eq!(d.total(), 1.0, epsilon = 1e-12);
        // p = 1 leaves no rest mass, the one-vs-rest term is finite
        assert!(d.binary[&0].is_finite());
        // the absent class still gets its one-vs-rest term: log2(1 / 0.5)
        assert_relative_eq!(d.binary[&1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_kld_without_common_values_errors() {
        let p = dist(&[(0, 1.0)]);
        let q = dist(&[(1, 1.0)]);
        assert!(matches!(kld(&p, &q), Err(RarError::EmptyDivergence)));
    }

    #[test]
    fn test_jsd_is_symmetric() {
        let p = dist(&[(0, 0.5), (1, 0.5)]);
        let q = dist(&[(0, 0.9), (1, 0.1)]);
        let a = jsd(&p, &q).unwrap();
        let b = jsd(&q, &p).unwrap();
        assert_relative_eq!(a, b, epsilon = 1e-12);
        assert!(a > 0.0);
        assert_relative_eq!(jsd(&p, &p).unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_ks_self_is_zero() {
        let mut rng = StdRng::seed_from_u64(7);
        let values: Vec<f64> = (0..200).map(|_| rng.gen::<f64>()).collect();
        let p = ContinuousDistribution::from_values(values);
        assert_eq!(ks(&p, &p, 500, &mut rng), 0.0);
    }

    #[test]
    fn test_ks_detects_shift() {
        let marginal = ContinuousDistribution::from_values((0..100).map(|v| v as f64).collect());
        let upper = ContinuousDistribution::from_values((90..100).map(|v| v as f64).collect());
        let mut rng = StdRng::seed_from_u64(3);
        let d = ks(&marginal, &upper, DEFAULT_CUT_POINTS, &mut rng);
        assert!(d > 0.7, "shifted slice should diverge strongly, got {}", d);

        let mut rng = StdRng::seed_from_u64(3);
        let scaled = ks_normalized(&marginal, &upper, DEFAULT_CUT_POINTS, 0.0, 2.0, &mut rng);
        assert_relative_eq!(scaled, d / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_ks_subsample_converges() {
        // a large random subsample of the marginal should be close to it
        let mut rng = StdRng::seed_from_u64(11);
        let values: Vec<f64> = (0..5000).map(|_| rng.gen::<f64>()).collect();
        let sample: Vec<f64> = values.iter().step_by(2).copied().collect();
        let marginal = ContinuousDistribution::from_values(values);
        let conditional = ContinuousDistribution::from_values(sample);
        let d = ks(&marginal, &conditional, 200, &mut rng);
        assert!(d < 0.05, "got {}", d);
    }
}
