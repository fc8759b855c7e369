//! Key derivation and ownership.
//!
//! This module owns two responsibilities:
//! 1. Deriving a per-principal AES-256 key from the global secret and the
//!    principal's persisted salt with PBKDF2-HMAC-SHA256.
//! 2. Holding secret material in types that are opaque, non-cloneable and
//!    zeroised on drop.
//!
//! ## Derivation structure
//!
//! ```text
//! PBKDF2-HMAC-SHA256(
//!     password   = global_secret (UTF-8, at most 64 bytes),
//!     salt       = principal salt (hex string, UTF-8 bytes),
//!     iterations = Config::kdf_iterations,
//!     len        = 32,
//! )
//! ```
//!
//! Compromise of one derived key exposes one principal's fields, not the
//! global secret and not any other principal's key.

use std::num::NonZeroU32;

use ring::pbkdf2;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::KEY_LEN;
use crate::error::{ImmoguardError, Result};

/// Shortest global secret the engine accepts, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Longest prefix of the global secret that is used, in bytes.
pub const MAX_SECRET_LEN: usize = 64;

/// Default PBKDF2 work factor.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

// ---------------------------------------------------------------------------
// Global secret
// ---------------------------------------------------------------------------

/// The global secret every principal key is derived from.
///
/// - Not `Clone`.
/// - Zeroised on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterSecret {
    bytes: Vec<u8>,
}

impl MasterSecret {
    /// Accept a configured secret string.
    ///
    /// Returns `None` when the secret is shorter than [`MIN_SECRET_LEN`]
    /// bytes; the engine then runs unconfigured.
    pub fn from_config(raw: &str) -> Option<Self> {
        let raw = raw.as_bytes();
        if raw.len() < MIN_SECRET_LEN {
            return None;
        }
        let end = raw.len().min(MAX_SECRET_LEN);
        Some(Self {
            bytes: raw[..end].to_vec(),
        })
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterSecret(..)")
    }
}

// ---------------------------------------------------------------------------
// Derived key
// ---------------------------------------------------------------------------

/// A key derived for exactly one principal.
///
/// Raw bytes only leave this module through `as_bytes()`, which is
/// `pub(crate)`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_LEN],
}

impl DerivedKey {
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// Derive the key for the principal owning `salt`.
///
/// Deterministic: the same secret, salt and iteration count always give
/// the same key. An empty salt is refused rather than silently deriving a
/// key shared by every salt-less principal.
pub(crate) fn derive_key(
    secret: &MasterSecret,
    salt: &str,
    iterations: NonZeroU32,
) -> Result<DerivedKey> {
    if salt.is_empty() {
        return Err(ImmoguardError::InvalidSalt);
    }

    let mut bytes = [0u8; KEY_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt.as_bytes(),
        secret.as_bytes(),
        &mut bytes,
    );

    Ok(DerivedKey { bytes })
}

/// Turn a configured iteration count into the form `ring` wants.
pub(crate) fn iterations(count: u32) -> Result<NonZeroU32> {
    NonZeroU32::new(count).ok_or(ImmoguardError::KeyDerivationFailure)
}
