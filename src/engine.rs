//! The encryption service shared by every write and read path.
//!
//! `Encryptor` binds the global secret and the KDF work factor to the
//! stateless primitives in `crypto`. It holds no per-request state and is
//! shared behind an `Arc` by any number of concurrent tasks.
//!
//! Without a usable secret the service is *unconfigured*: `encrypt` and
//! `decrypt` hand their input back unchanged and log a warning. That
//! passthrough is only ever `Ok`; a configured engine that fails returns
//! `Err`, so the two cases cannot be confused.

use std::num::NonZeroU32;

use tracing::warn;

use crate::config::Config;
use crate::crypto;
use crate::error::{ImmoguardError, Result};
use crate::keys::{self, MasterSecret};

pub struct Encryptor {
    secret: Option<MasterSecret>,
    iterations: NonZeroU32,
}

impl Encryptor {
    /// Build the engine from configuration.
    ///
    /// A missing or short key yields an unconfigured engine, not an error.
    /// Only a zero iteration count is rejected.
    pub fn new(config: &Config) -> Result<Self> {
        let iterations = keys::iterations(config.kdf_iterations)?;
        let secret = config
            .encryption_key
            .as_deref()
            .and_then(MasterSecret::from_config);

        if secret.is_none() {
            warn!(
                min_len = keys::MIN_SECRET_LEN,
                "encryption key missing or too short; sensitive fields will not be encrypted"
            );
        }

        Ok(Self { secret, iterations })
    }

    /// An engine with no secret. Handy for development setups and tests.
    pub fn unconfigured() -> Self {
        Self {
            secret: None,
            iterations: NonZeroU32::MIN,
        }
    }

    /// Whether a usable global secret is present.
    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// `Err(Unconfigured)` when there is no secret to derive keys from.
    pub fn ensure_configured(&self) -> Result<()> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(ImmoguardError::Unconfigured)
        }
    }

    /// Encrypt `plaintext` under the key of the principal owning `salt`.
    pub fn encrypt(&self, plaintext: &str, salt: &str) -> Result<String> {
        let Some(secret) = &self.secret else {
            warn!("encryption not configured, storing plaintext");
            return Ok(plaintext.to_string());
        };
        let key = keys::derive_key(secret, salt, self.iterations)?;
        crypto::encrypt(key.as_bytes(), plaintext)
    }

    /// Decrypt a value produced by [`Encryptor::encrypt`] with the same salt.
    pub fn decrypt(&self, stored: &str, salt: &str) -> Result<String> {
        let Some(secret) = &self.secret else {
            warn!("encryption not configured, returning stored value as is");
            return Ok(stored.to_string());
        };
        let key = keys::derive_key(secret, salt, self.iterations)?;
        crypto::decrypt(key.as_bytes(), stored)
    }

    /// Blind index of `plaintext`.
    ///
    /// Independent of the secret and of any salt, so it is available and
    /// identical whether or not the engine is configured.
    pub fn hash(&self, plaintext: &str) -> String {
        crypto::hash(plaintext)
    }
}

impl std::fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encryptor")
            .field("configured", &self.is_configured())
            .field("iterations", &self.iterations)
            .finish()
    }
}
