//! Field codec: how sensitive columns are written and read.
//!
//! Every write path stores an optional sensitive value the same way:
//! absent or blank becomes `NULL`; anything else is encrypted under the
//! owning principal's key, generating and persisting that principal's salt
//! first if it has none. Fields that must be unique across principals also
//! carry a blind index, checked against other owners before the write.
//!
//! Reads either return the fixed [`MASK`] or, for an authorised caller,
//! decrypt. An unconfigured engine always yields the mask, never the raw
//! stored value.

use std::sync::Arc;

use tracing::{info, warn};

use crate::crypto;
use crate::engine::Encryptor;
use crate::error::{ImmoguardError, Result};
use crate::lifecycle::EntityKind;
use crate::store::{BlindIndexStore, PrincipalStore};

/// Display placeholder for any sensitive field, present or not.
pub const MASK: &str = "********";

/// Sensitive fields that must be unique across principals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniqueField {
    /// Tax identification number (IFU).
    TaxId,
    /// Trade and company registry number (RCCM).
    TradeRegistry,
}

impl UniqueField {
    pub const ALL: [UniqueField; 2] = [Self::TaxId, Self::TradeRegistry];

    /// Logical name reported in conflicts.
    pub fn name(self) -> &'static str {
        match self {
            Self::TaxId => "ifu",
            Self::TradeRegistry => "rccm",
        }
    }

    /// Entity kind whose rows hold this field.
    pub fn owner_kind(self) -> EntityKind {
        EntityKind::Profile
    }

    /// Column holding the encrypted value.
    pub fn ciphertext_column(self) -> &'static str {
        match self {
            Self::TaxId => "ifu_enc",
            Self::TradeRegistry => "rccm_enc",
        }
    }

    /// Column holding the blind index.
    pub fn hash_column(self) -> &'static str {
        match self {
            Self::TaxId => "ifu_hash",
            Self::TradeRegistry => "rccm_hash",
        }
    }
}

/// Ciphertext plus blind index for a unique field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedUnique {
    pub ciphertext: String,
    pub hash: String,
}

/// How a stored sensitive value is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disclosure {
    Masked,
    /// Explicit decryption by an authorised caller.
    Decrypted,
}

pub struct FieldCodec {
    engine: Arc<Encryptor>,
    principals: Arc<dyn PrincipalStore>,
    index: Arc<dyn BlindIndexStore>,
}

impl FieldCodec {
    /// A codec over one engine and the stores holding salts and indexes.
    pub fn new(
        engine: Arc<Encryptor>,
        principals: Arc<dyn PrincipalStore>,
        index: Arc<dyn BlindIndexStore>,
    ) -> Self {
        Self {
            engine,
            principals,
            index,
        }
    }

    /// The underlying engine, e.g. to compute a blind index for a lookup.
    pub fn engine(&self) -> &Encryptor {
        &self.engine
    }

    /// The principal's salt, generated and persisted first if absent.
    ///
    /// Concurrent callers for the same principal all get the salt that won
    /// the store's set-if-absent, so exactly one salt is ever persisted.
    pub async fn ensure_salt(&self, principal: &str) -> Result<String> {
        if let Some(salt) = self.principals.salt(principal).await? {
            return Ok(salt);
        }

        let fresh = crypto::generate_salt()?;
        let salt = self.principals.set_salt_if_absent(principal, &fresh).await?;
        if salt == fresh {
            info!(principal, "generated encryption salt");
        }
        Ok(salt)
    }

    /// Encrypt an optional sensitive value for storage.
    pub async fn seal(&self, principal: &str, value: Option<&str>) -> Result<Option<String>> {
        let Some(value) = normalize(value) else {
            return Ok(None);
        };
        self.seal_present(principal, value).await.map(Some)
    }

    /// Encrypt a unique sensitive value and compute its blind index.
    ///
    /// `previous_hash` is the index currently stored on the record being
    /// written. The cross-owner lookup only runs when the value changes.
    ///
    /// The lookup rejects the common case early. Two owners sealing the
    /// same value concurrently can both pass it; the store's unique index
    /// on the hash column rejects the second write.
    pub async fn seal_unique(
        &self,
        principal: &str,
        field: UniqueField,
        value: Option<&str>,
        previous_hash: Option<&str>,
    ) -> Result<Option<SealedUnique>> {
        let Some(value) = normalize(value) else {
            return Ok(None);
        };

        let hash = self.engine.hash(value);
        if previous_hash != Some(hash.as_str()) {
            if let Some(owner) = self.index.owner_of(field, &hash).await? {
                if owner != principal {
                    warn!(field = field.name(), principal, "unique sensitive value already taken");
                    return Err(ImmoguardError::DuplicateSensitiveValue { field: field.name() });
                }
            }
        }

        let ciphertext = self.seal_present(principal, value).await?;
        Ok(Some(SealedUnique { ciphertext, hash }))
    }

    /// Render a stored sensitive value.
    ///
    /// `Masked` always gives [`MASK`], whatever is stored. `Decrypted`
    /// gives `None` for an absent value, the mask when the engine is
    /// unconfigured, and otherwise the plaintext or `DecryptionFailed`.
    pub async fn disclose(
        &self,
        principal: &str,
        stored: Option<&str>,
        disclosure: Disclosure,
    ) -> Result<Option<String>> {
        if disclosure == Disclosure::Masked {
            return Ok(Some(MASK.to_string()));
        }
        let Some(stored) = stored else {
            return Ok(None);
        };
        match self.engine.ensure_configured() {
            Ok(()) => {}
            Err(ImmoguardError::Unconfigured) => return Ok(Some(MASK.to_string())),
            Err(e) => return Err(e),
        }

        // Ciphertext without a salt can never be decrypted.
        let salt = self
            .principals
            .salt(principal)
            .await?
            .ok_or(ImmoguardError::DecryptionFailed)?;
        self.engine.decrypt(stored, &salt).map(Some)
    }

    async fn seal_present(&self, principal: &str, value: &str) -> Result<String> {
        let salt = self.ensure_salt(principal).await?;
        self.engine.encrypt(value, &salt)
    }
}

fn normalize(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_is_absent() {
        assert_eq!(normalize(None), None);
        assert_eq!(normalize(Some("")), None);
        assert_eq!(normalize(Some("   ")), None);
        assert_eq!(normalize(Some("  IFU-1 ")), Some("IFU-1"));
    }

    #[test]
    fn mask_is_fixed_width() {
        assert_eq!(MASK.len(), 8);
        assert!(MASK.chars().all(|c| c == '*'));
    }

    #[test]
    fn unique_field_columns() {
        assert_eq!(UniqueField::TaxId.hash_column(), "ifu_hash");
        assert_eq!(UniqueField::TradeRegistry.ciphertext_column(), "rccm_enc");
        assert_eq!(UniqueField::TaxId.owner_kind(), EntityKind::Profile);
    }
}
