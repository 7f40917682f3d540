//! Error types for factor graph construction, replication and evaluation.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the factor/distribution layer.
///
/// Every failure is local and synchronous: an operation either fully
/// applies (a node is built, replicated or evaluated) or returns one of these.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FactorError {
    /// Malformed input/output names, missing static attribute, or a shape
    /// that violates the node's shape policy.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A replica does not carry the full declared state of its original, or
    /// the attribute map names a Variable the node does not bind.
    #[error("replication error: {0}")]
    Replication(String),

    /// Two shapes could not be broadcast together.
    #[error("shape error: cannot broadcast {left:?} with {right:?}")]
    Shape { left: Vec<usize>, right: Vec<usize> },

    /// `generate_outputs` was called on a node whose outputs already exist.
    #[error("outputs of factor {factor} are already materialized")]
    DoubleMaterialization { factor: Uuid },
}

impl FactorError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        FactorError::Configuration(msg.into())
    }

    pub(crate) fn replication(msg: impl Into<String>) -> Self {
        FactorError::Replication(msg.into())
    }

    pub(crate) fn shape(left: &[usize], right: &[usize]) -> Self {
        FactorError::Shape {
            left: left.to_vec(),
            right: right.to_vec(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, FactorError>;
