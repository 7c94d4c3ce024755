/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Error type shared by every repository operation.

use sindri_models::models::EntityKind;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RepositoryError {
    /// The entity does not exist or is invisible to the caller.
    #[error("{kind} with id {id} not found")]
    NotFound { kind: EntityKind, id: String },

    /// The entity is visible but the caller may not perform the operation.
    #[error("insufficient permission: {0}")]
    InsufficientPermission(String),

    /// Optimistic lock mismatch or an invariant such as uniqueness was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The operation is not allowed in the entity's current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Another node holds the named lock.
    #[error("lock {0} is held by another node")]
    LockContended(String),

    #[error("invalid query '{query}': {reason}")]
    InvalidQuery { query: String, reason: String },

    #[error("validation failed: {0}")]
    Validation(String),

    /// A captured caller context could not be restored.
    #[error("invalid caller context: {0}")]
    InvalidContext(String),

    #[error("store error: {0}")]
    Store(String),
}

impl RepositoryError {
    pub fn not_found(kind: EntityKind, id: impl ToString) -> Self {
        RepositoryError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether the failure is worth retrying on the next scheduler tick.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RepositoryError::Conflict(_) | RepositoryError::LockContended(_)
        )
    }
}

/// Model constructors report validation failures as plain strings.
impl From<String> for RepositoryError {
    fn from(message: String) -> Self {
        RepositoryError::Validation(message)
    }
}

pub type Result<T> = std::result::Result<T, RepositoryError>;
