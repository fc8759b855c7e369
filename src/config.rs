//! Runtime configuration.
//!
//! Read once at startup. A missing or short encryption key is *not* an
//! error: the engine comes up unconfigured and reports it through
//! `Encryptor::is_configured`.

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::keys::DEFAULT_ITERATIONS;

pub const ENV_ENCRYPTION_KEY: &str = "ENCRYPTION_KEY";
pub const ENV_KDF_ITERATIONS: &str = "ENCRYPTION_KDF_ITERATIONS";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";
pub const ENV_AUDIT_LOG_PATH: &str = "AUDIT_LOG_PATH";

#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Global secret for per-principal key derivation.
    #[serde(skip_serializing)]
    pub encryption_key: Option<String>,
    pub kdf_iterations: u32,
    pub log_level: String,
    pub log_format: String, // "json" or "text"
    /// When set, audit records go to this JSON-lines file.
    pub audit_log_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            encryption_key: env::var(ENV_ENCRYPTION_KEY).ok().filter(|k| !k.is_empty()),
            kdf_iterations: parse_iterations(env::var(ENV_KDF_ITERATIONS).ok().as_deref()),
            log_level: env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| "info".to_string()),
            log_format: env::var(ENV_LOG_FORMAT).unwrap_or_else(|_| "text".to_string()),
            audit_log_path: env::var(ENV_AUDIT_LOG_PATH).ok().map(PathBuf::from),
        }
    }

    /// Configuration with the given key and defaults elsewhere.
    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            encryption_key: Some(key.into()),
            ..Self::default()
        }
    }
}

fn parse_iterations(raw: Option<&str>) -> u32 {
    match raw {
        None => DEFAULT_ITERATIONS,
        Some(value) => match value.trim().parse::<u32>() {
            Ok(n) if n > 0 => n,
            _ => {
                warn!(value, "ignoring invalid {}, using default", ENV_KDF_ITERATIONS);
                DEFAULT_ITERATIONS
            }
        },
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            encryption_key: None,
            kdf_iterations: DEFAULT_ITERATIONS,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            audit_log_path: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "<redacted>"),
            )
            .field("kdf_iterations", &self.kdf_iterations)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("audit_log_path", &self.audit_log_path)
            .finish()
    }
}
