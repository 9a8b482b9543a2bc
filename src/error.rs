//! Crate-level error taxonomy

use thiserror::Error;

use crate::generation::GenerationError;
use crate::persistence::{PersistenceError, ReconcileError};
use crate::store::PatchError;
use crate::workflow::GraphError;

#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Form data the module record rejects; raised before any gateway call
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Patch(#[from] PatchError),
}
