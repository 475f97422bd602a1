//! Typed error hierarchy for TickTrek.
//!
//! - `WorkspaceError`: access-control, validation and storage failures raised
//!   by the store and the visibility layer
//! - `AuthError`: sign-in, sign-up and session failures

use thiserror::Error;

/// Errors from workspace operations (store mutations and access checks).
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Your account is awaiting approval by an administrator")]
    AwaitingApproval,

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl WorkspaceError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Errors from the authentication subsystem.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown e-mail and wrong password share this message.
    #[error("Invalid credentials.")]
    InvalidCredentials,

    #[error("Missing or invalid session token")]
    Unauthenticated,

    #[error("Invalid or expired invite link.")]
    InvalidInvite,

    #[error("Password hashing failed: {0}")]
    Hash(String),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}
