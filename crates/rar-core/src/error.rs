use thiserror::Error;

use crate::contrast::Subspace;

/// Errors raised while sampling contrasts, merging results or ranking features.
#[derive(Debug, Error)]
pub enum RarError {
    /// Every Monte-Carlo draw for the subspace selected zero target rows.
    #[error("no valid sample for subspace {subspace:?} after {iterations} iterations")]
    NoValidSample { subspace: Subspace, iterations: usize },

    /// Conditional and marginal distributions share no observed value.
    #[error("distributions share no common values, divergence is undefined")]
    EmptyDivergence,

    #[error("cost matrix classes {cost_classes:?} do not match target classes {target_classes:?}")]
    CostMatrixMismatch {
        cost_classes: Vec<String>,
        target_classes: Vec<String>,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown feature: {0}")]
    UnknownFeature(String),

    /// The relevance program left a subspace constraint unsatisfied.
    #[error("relevance program infeasible for subspace {subspace:?} (class {class}): {lhs} < {rhs}")]
    Infeasible {
        subspace: Subspace,
        class: String,
        lhs: f64,
        rhs: f64,
    },

    #[error("column {name} has {len} rows, expected {expected}")]
    ShapeMismatch {
        name: String,
        len: usize,
        expected: usize,
    },
}

pub type Result<T> = std::result::Result<T, RarError>;
