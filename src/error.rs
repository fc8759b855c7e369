//! Error types for immoguard.
//!
//! Messages are intentionally minimal. They name *what* failed and, for
//! uniqueness conflicts, the logical field, but never a plaintext value,
//! a salt or any key material.

use std::fmt;

use crate::lifecycle::EntityKind;

/// The single error type for all immoguard operations.
#[derive(Debug)]
pub enum ImmoguardError {
    /// The engine has no usable global secret. Never fatal: callers map it
    /// to the plaintext passthrough or to the display mask.
    Unconfigured,

    /// A cryptographic key was rejected by the AEAD implementation.
    InvalidKey,

    /// Encryption failed inside `ring`.
    EncryptionFailure,

    /// Wrong key, tampered ciphertext or tag, or malformed input.
    DecryptionFailed,

    /// PBKDF2 could not produce a key (e.g. zero iterations).
    KeyDerivationFailure,

    /// The system random number generator failed.
    RandomnessFailure,

    /// A principal salt is empty.
    InvalidSalt,

    /// Another principal already holds the same blind index for this field.
    DuplicateSensitiveValue {
        /// Logical name of the unique field (e.g. `ifu`).
        field: &'static str,
    },

    /// No principal row exists for the given id.
    PrincipalNotFound(String),

    /// No row of the given kind exists for the given id.
    EntityNotFound { kind: EntityKind, id: String },

    /// The persistence collaborator failed.
    Storage(String),

    /// An audit record could not be persisted. Logged by the audit worker,
    /// never returned to business callers.
    AuditWriteFailed(String),

    /// An audit query parameter could not be understood.
    InvalidQuery(String),

    /// The audit worker needs a tokio runtime and none is running.
    RuntimeUnavailable,
}

impl fmt::Display for ImmoguardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconfigured => write!(f, "encryption is not configured"),
            Self::InvalidKey => write!(f, "invalid key"),
            Self::EncryptionFailure => write!(f, "encryption failed"),
            Self::DecryptionFailed => write!(f, "decryption failed"),
            Self::KeyDerivationFailure => write!(f, "key derivation failed"),
            Self::RandomnessFailure => write!(f, "randomness source failed"),
            Self::InvalidSalt => write!(f, "invalid principal salt"),
            Self::DuplicateSensitiveValue { field } => {
                write!(f, "value already registered for another owner: {}", field)
            }
            Self::PrincipalNotFound(id) => write!(f, "principal not found: {}", id),
            Self::EntityNotFound { kind, id } => write!(f, "{} not found: {}", kind, id),
            Self::Storage(reason) => write!(f, "storage error: {}", reason),
            Self::AuditWriteFailed(reason) => write!(f, "audit write failed: {}", reason),
            Self::InvalidQuery(reason) => write!(f, "invalid audit query: {}", reason),
            Self::RuntimeUnavailable => write!(f, "no tokio runtime available"),
        }
    }
}

impl std::error::Error for ImmoguardError {}

impl From<std::io::Error> for ImmoguardError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ImmoguardError>;
