//! Single-feature relevance from multivariate subspace relevancies.
//!
//! Each feature gets a value `x_f` in `[0, max score]`. Every observed
//! subspace `S` with score `s` contributes the constraint `sum(x_f, f in S) >= s`.
//! Among feasible assignments the normalizer picks the one minimising
//!
//! ```text
//! sum(x) + sum((x - mean(x))^2)
//! ```
//!
//! i.e. the smallest, most even explanation of the observed scores, and
//! rescales it so the most relevant feature has relevance 1.
use std::collections::BTreeMap;

use ndarray::Array1;
use rayon::prelude::*;

use crate::config::CostMatrix;
use crate::contrast::Subspace;
use crate::error::{RarError, Result};
use crate::result_storage::RelevancyTable;

/// Relative slack allowed on a constraint before the solution is rejected.
pub const FEASIBILITY_TOLERANCE: f64 = 1e-5;

/// `sum(x[variables]) >= rhs`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    pub variables: Vec<usize>,
    pub rhs: f64,
    pub subspace: Subspace,
}

/// Box-constrained program with `>=` covering constraints and the fixed
/// objective `sum(x) + sum((x - mean(x))^2)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QpProblem {
    upper_bounds: Vec<f64>,
    constraints: Vec<LinearConstraint>,
}

impl QpProblem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable bounded to `[0, upper]`; returns its index.
    pub fn add_variable(&mut self, upper: f64) -> usize {
        self.upper_bounds.push(upper.max(0.0));
        self.upper_bounds.len() - 1
    }

    pub fn add_constraint(&mut self, variables: Vec<usize>, rhs: f64, subspace: Subspace) {
        self.constraints.push(LinearConstraint {
            variables,
            rhs,
            subspace,
        });
    }

    pub fn n_variables(&self) -> usize {
        self.upper_bounds.len()
    }

    pub fn upper_bounds(&self) -> &[f64] {
        &self.upper_bounds
    }

    pub fn constraints(&self) -> &[LinearConstraint] {
        &self.constraints
    }

    pub fn objective(&self, x: &Array1<f64>) -> f64 {
        if x.is_empty() {
            return 0.0;
        }
        let mean = x.sum() / x.len() as f64;
        x.sum() + x.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
    }

    /// Most violated constraint as `(index, lhs)`, if any exceeds the tolerance.
    pub fn violated_constraint(&self, x: &Array1<f64>, tolerance: f64) -> Option<(usize, f64)> {
        self.constraints
            .iter()
            .enumerate()
            .map(|(i, c)| (i, c.variables.iter().map(|&v| x[v]).sum::<f64>()))
            .filter(|(i, lhs)| {
                let rhs = self.constraints[*i].rhs;
                rhs - lhs > tolerance * rhs.abs().max(1.0)
            })
            .max_by(|a, b| {
                let slack = |&(i, lhs): &(usize, f64)| self.constraints[i].rhs - lhs;
                slack(a).total_cmp(&slack(b))
            })
    }
}

/// Anything able to minimise a [`QpProblem`].
pub trait QpSolver: Send + Sync {
    fn solve(&self, problem: &QpProblem) -> Result<Array1<f64>>;
}

/// Augmented Lagrangian method over the covering constraints, with the box
/// handled by accelerated projected gradient steps.
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentedLagrangianSolver {
    pub initial_penalty: f64,
    pub max_penalty: f64,
    pub max_outer_iterations: usize,
    pub max_inner_iterations: usize,
    pub tolerance: f64,
}

impl Default for AugmentedLagrangianSolver {
    fn default() -> Self {
        Self {
            initial_penalty: 10.0,
            max_penalty: 1e8,
            max_outer_iterations: 100,
            max_inner_iterations: 5000,
            tolerance: 1e-8,
        }
    }
}

impl AugmentedLagrangianSolver {
    fn residuals(problem: &QpProblem, x: &Array1<f64>) -> Array1<f64> {
        problem
            .constraints
            .iter()
            .map(|c| c.rhs - c.variables.iter().map(|&v| x[v]).sum::<f64>())
            .collect()
    }

    fn gradient(
        problem: &QpProblem,
        x: &Array1<f64>,
        multipliers: &Array1<f64>,
        penalty: f64,
    ) -> Array1<f64> {
        let mean = x.sum() / x.len() as f64;
        let mut gradient = x.mapv(|v| 1.0 + 2.0 * (v - mean));
        let residuals = Self::residuals(problem, x);
        for (i, constraint) in problem.constraints.iter().enumerate() {
            let force = (multipliers[i] + penalty * residuals[i]).max(0.0);
            if force > 0.0 {
                for &v in &constraint.variables {
                    gradient[v] -= force;
                }
            }
        }
        gradient
    }

    /// FISTA with adaptive restart on the augmented Lagrangian.
    fn minimize_inner(
        &self,
        problem: &QpProblem,
        start: Array1<f64>,
        multipliers: &Array1<f64>,
        penalty: f64,
        lipschitz: f64,
    ) -> Array1<f64> {
        let upper = Array1::from(problem.upper_bounds.clone());
        let project = |v: Array1<f64>| {
            let mut v = v;
            v.zip_mut_with(&upper, |x, &u| *x = x.clamp(0.0, u));
            v
        };

        let mut x = start;
        let mut y = x.clone();
        let mut t = 1.0f64;
        for _ in 0..self.max_inner_iterations {
            let gradient = Self::gradient(problem, &y, multipliers, penalty);
            let next = project(&y - &(gradient / lipschitz));
            let step = &next - &x;
            let delta = step.iter().fold(0.0f64, |m, v| m.max(v.abs()));

            let restart = (&y - &next).dot(&step) > 0.0;
            let t_next = if restart {
                1.0
            } else {
                (1.0 + (1.0 + 4.0 * t * t).sqrt()) / 2.0
            };
            y = &next + &(step * ((t - 1.0) / t_next));
            if restart {
                y = next.clone();
            }
            x = next;
            t = t_next;

            if delta <= self.tolerance {
                break;
            }
        }
        x
    }
}

impl QpSolver for AugmentedLagrangianSolver {
    fn solve(&self, problem: &QpProblem) -> Result<Array1<f64>> {
        let n = problem.n_variables();
        if n == 0 {
            return Ok(Array1::zeros(0));
        }

        // ||A||_2^2 <= ||A||_1 * ||A||_inf for the 0/1 constraint matrix
        let mut column_counts = vec![0usize; n];
        let mut max_row = 0usize;
        for constraint in &problem.constraints {
            max_row = max_row.max(constraint.variables.len());
            for &v in &constraint.variables {
                column_counts[v] += 1;
            }
        }
        let max_column = column_counts.into_iter().max().unwrap_or(0);
        let norm_bound = (max_column * max_row) as f64;

        let mut x = Array1::from(problem.upper_bounds.clone()) * 0.5;
        let mut multipliers = Array1::zeros(problem.constraints.len());
        let mut penalty = self.initial_penalty;
        let mut previous_violation = f64::INFINITY;

        for outer in 0..self.max_outer_iterations {
            let lipschitz = 2.0 + penalty * norm_bound;
            x = self.minimize_inner(problem, x, &multipliers, penalty, lipschitz);

            let residuals = Self::residuals(problem, &x);
            let mut largest_update = 0.0f64;
            for (lambda, &r) in multipliers.iter_mut().zip(residuals.iter()) {
                let updated = (*lambda + penalty * r).max(0.0);
                largest_update = largest_update.max((updated - *lambda).abs());
                *lambda = updated;
            }
            let violation = residuals.iter().fold(0.0f64, |m, &r| m.max(r));

            log::trace!(
                "Outer iteration {}: violation {:.3e}, penalty {:.1e}",
                outer,
                violation,
                penalty
            );
            if violation <= self.tolerance && largest_update / penalty <= self.tolerance {
                break;
            }
            if violation > 0.25 * previous_violation {
                penalty = (penalty * 10.0).min(self.max_penalty);
            }
            previous_violation = violation;
        }
        Ok(x)
    }
}

/// Normalized single-feature relevance of `features` from one relevancy table.
///
/// Every feature maps to a value in `[0, 1]`; all zero when nothing was
/// observed. `class` only labels an infeasibility error.
///
/// # Errors
///
/// [`RarError::Infeasible`] if the solver returns an assignment that leaves a
/// subspace constraint unsatisfied.
pub fn single_feature_relevance<S: QpSolver + ?Sized>(
    features: &[usize],
    relevancies: &RelevancyTable,
    solver: &S,
    class: &str,
) -> Result<BTreeMap<usize, f64>> {
    let zeros = || features.iter().map(|&f| (f, 0.0)).collect();

    let max_score = relevancies
        .iter()
        .map(|(_, e)| e.value)
        .fold(f64::NEG_INFINITY, f64::max);
    if features.is_empty() || !(max_score > 0.0) {
        return Ok(zeros());
    }

    let mut problem = QpProblem::new();
    let variables: BTreeMap<usize, usize> = features
        .iter()
        .map(|&f| (f, problem.add_variable(max_score)))
        .collect();
    for (subspace, entry) in relevancies.iter() {
        let members: Vec<usize> = subspace
            .features()
            .iter()
            .filter_map(|f| variables.get(f).copied())
            .collect();
        if members.is_empty() || entry.value <= 0.0 {
            continue;
        }
        problem.add_constraint(members, entry.value, subspace.clone());
    }

    let solution = solver.solve(&problem)?;
    if let Some((i, lhs)) = problem.violated_constraint(&solution, FEASIBILITY_TOLERANCE) {
        let constraint = &problem.constraints()[i];
        return Err(RarError::Infeasible {
            subspace: constraint.subspace.clone(),
            class: class.to_string(),
            lhs,
            rhs: constraint.rhs,
        });
    }

    let max_value = solution.iter().cloned().fold(0.0f64, f64::max);
    if max_value <= 0.0 {
        return Ok(zeros());
    }
    log::debug!(
        "Relevance program for {}: {} variables, {} constraints, objective {:.4}",
        class,
        problem.n_variables(),
        problem.constraints().len(),
        problem.objective(&solution)
    );

    Ok(variables
        .into_iter()
        .map(|(feature, v)| (feature, solution[v] / max_value))
        .collect())
}

/// Cost-weighted single-feature relevance over per-class relevancy tables.
///
/// Each class is solved on its own (in parallel); the per-feature results
/// are averaged with the class costs as weights. Classes without any
/// observation contribute zero.
pub fn weighted_single_feature_relevance<S: QpSolver + ?Sized>(
    features: &[usize],
    class_relevancies: &BTreeMap<String, RelevancyTable>,
    costs: &CostMatrix,
    solver: &S,
) -> Result<BTreeMap<usize, f64>> {
    let classes: Vec<(&str, f64)> = costs.iter().collect();
    let empty = RelevancyTable::new();

    let per_class: Vec<Result<(f64, BTreeMap<usize, f64>)>> = classes
        .par_iter()
        .map(|&(class, cost)| {
            let table = class_relevancies.get(class).unwrap_or(&empty);
            single_feature_relevance(features, table, solver, class).map(|r| (cost, r))
        })
        .collect();

    let total = costs.total();
    let mut relevance: BTreeMap<usize, f64> = features.iter().map(|&f| (f, 0.0)).collect();
    for result in per_class {
        let (cost, class_relevance) = result?;
        for (feature, value) in class_relevance {
            *relevance.entry(feature).or_insert(0.0) += cost * value;
        }
    }
    if total > 0.0 {
        relevance.values_mut().for_each(|v| *v /= total);
    }
    Ok(relevance)
}
