//! Bounded cache of high-scoring, mutually dissimilar slices per subspace.
use serde::{Deserialize, Serialize};

use crate::contrast::{Condition, Slice, Subspace};

/// Base of the default similarity threshold, raised to the subspace size.
pub const THRESHOLD_BASE: f64 = 0.6;

pub const DEFAULT_TO_KEEP: usize = 5;

/// Overlap of two closed intervals relative to their hull.
pub fn interval_similarity(a: (f64, f64), b: (f64, f64)) -> f64 {
    let overlap = (a.1.min(b.1) - a.0.max(b.0)).max(0.0);
    let hull = a.1.max(b.1) - a.0.min(b.0);
    if hull <= 0.0 {
        // both degenerate at the same point
        return 1.0;
    }
    overlap / hull
}

/// Jaccard overlap of two selected-value masks.
pub fn value_set_similarity(a: &[bool], b: &[bool]) -> f64 {
    let (mut both, mut either) = (0usize, 0usize);
    for (&x, &y) in a.iter().zip(b.iter()) {
        both += (x && y) as usize;
        either += (x || y) as usize;
    }
    if either == 0 {
        return 1.0;
    }
    both as f64 / either as f64
}

/// Similarity of two slices over the same subspace: product of the
/// continuous and categorical similarities, each itself a product over the
/// features of that type. A type absent from the subspace contributes 1.
pub fn slice_similarity(a: &Slice, b: &Slice) -> f64 {
    let mut continuous = 1.0;
    let mut categorical = 1.0;
    for left in &a.conditions {
        let Some(right) = b
            .conditions
            .iter()
            .find(|c| c.feature() == left.feature())
        else {
            continue;
        };
        match (left, right) {
            (
                Condition::Continuous { from: f1, to: t1, .. },
                Condition::Continuous { from: f2, to: t2, .. },
            ) => continuous *= interval_similarity((*f1, *t1), (*f2, *t2)),
            (
                Condition::Categorical { selected: s1, .. },
                Condition::Categorical { selected: s2, .. },
            ) => categorical *= value_set_similarity(s1, s2),
            _ => {}
        }
    }
    continuous * categorical
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSlices {
    to_keep: usize,
    threshold: f64,
    /// Sorted by score, highest first.
    slices: Vec<Slice>,
}

impl ScoredSlices {
    /// Empty cache for a subspace of `dims` features. `threshold` defaults to
    /// `0.6^dims`.
    pub fn new(dims: usize, to_keep: usize, threshold: Option<f64>) -> Self {
        Self {
            to_keep,
            threshold: threshold.unwrap_or_else(|| THRESHOLD_BASE.powi(dims as i32)),
            slices: Vec::new(),
        }
    }

    pub fn for_subspace(subspace: &Subspace, to_keep: usize) -> Self {
        Self::new(subspace.len(), to_keep, None)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn to_keep(&self) -> usize {
        self.to_keep
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Append slices and restore score order.
    pub fn add_slices<I: IntoIterator<Item = Slice>>(&mut self, slices: I) {
        self.slices.extend(slices);
        self.slices.sort_by(|a, b| b.score.total_cmp(&a.score));
    }

    /// Greedily keep the best slice, drop everything too similar to it, and
    /// repeat until `to_keep` slices are kept or none remain.
    pub fn reduce_slices(&mut self) {
        let mut candidates: Vec<usize> = (0..self.slices.len()).collect();
        let mut selected = Vec::with_capacity(self.to_keep);

        while selected.len() < self.to_keep {
            let Some(&pick) = candidates.first() else {
                break;
            };
            selected.push(pick);
            let kept = &self.slices[pick];
            candidates = candidates
                .into_iter()
                .skip(1)
                .filter(|&i| slice_similarity(kept, &self.slices[i]) < self.threshold)
                .collect();
        }

        let before = self.slices.len();
        let mut slices: Vec<Option<Slice>> =
            std::mem::take(&mut self.slices).into_iter().map(Some).collect();
        self.slices = selected
            .into_iter()
            .filter_map(|i| slices[i].take())
            .collect();
        log::trace!("Reduced {} slices to {}", before, self.slices.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn continuous_slice(score: f64, from: f64, to: f64) -> Slice {
        Slice {
            score,
            conditions: vec![Condition::Continuous { feature: 0, from, to }],
        }
    }

    #[test]
    fn test_similarity_measures() {
        assert_relative_eq!(interval_similarity((0.0, 2.0), (1.0, 3.0)), 1.0 / 3.0);
        assert_eq!(interval_similarity((0.0, 1.0), (2.0, 3.0)), 0.0);
        assert_eq!(interval_similarity((1.0, 1.0), (1.0, 1.0)), 1.0);
        assert_relative_eq!(
            value_set_similarity(&[true, true, false], &[false, true, true]),
            1.0 / 3.0
        );

        let mixed = |score, from, to, selected: Vec<bool>| Slice {
            score,
            conditions: vec![
                Condition::Continuous { feature: 0, from, to },
                Condition::Categorical { feature: 1, selected },
            ],
        };
        let a = mixed(1.0, 0.0, 2.0, vec![true, true, false]);
        let b = mixed(1.0, 1.0, 3.0, vec![false, true, true]);
        assert_relative_eq!(slice_similarity(&a, &b), 1.0 / 9.0);
        assert_relative_eq!(slice_similarity(&a, &a), 1.0);
    }

    #[test]
    fn test_reduce_drops_similar_slices() {
        let mut cache = ScoredSlices::new(1, 5, None);
        assert_relative_eq!(cache.threshold(), 0.6);
        cache.add_slices(vec![
            continuous_slice(0.5, 0.0, 1.0),
            continuous_slice(0.9, 0.0, 1.1),
            continuous_slice(0.7, 5.0, 6.0),
        ]);
        assert_eq!(cache.slices()[0].score, 0.9);

        cache.reduce_slices();
        let scores: Vec<f64> = cache.slices().iter().map(|s| s.score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
    }

    #[test]
    fn test_reduce_respects_bound_and_threshold() {
        let mut rng = StdRng::seed_from_u64(17);
        let mut cache = ScoredSlices::new(2, 3, None);
        for _ in 0..4 {
            let batch: Vec<Slice> = (0..20)
                .map(|_| {
                    let from = rng.gen_range(0.0..10.0);
                    Slice {
                        score: rng.gen(),
                        conditions: vec![
                            Condition::Continuous {
                                feature: 0,
                                from,
                                to: from + rng.gen_range(0.5..3.0),
                            },
                            Condition::Categorical {
                                feature: 1,
                                selected: (0..4).map(|_| rng.gen_bool(0.5)).collect(),
                            },
                        ],
                    }
                })
                .collect();
            cache.add_slices(batch);
            cache.reduce_slices();

            assert!(cache.len() <= cache.to_keep());
            for (i, a) in cache.slices().iter().enumerate() {
                for b in &cache.slices()[i + 1..] {
                    assert!(slice_similarity(a, b) < cache.threshold());
                    assert!(a.score >= b.score);
                }
            }
        }
    }
}
