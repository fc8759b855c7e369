//! # immoguard
//!
//! Confidentiality and accountability core of a multi-tenant real-estate
//! backend.
//!
//! - Personally identifying and financial fields are encrypted at rest
//!   under per-owner keys (`engine`, `keys`, `codec`). Fields that must be
//!   unique across owners also carry a blind index.
//! - Committed changes to audited entities are captured into an
//!   append-only audit log (`capture`, `audit`) without any call path
//!   having to pass "who is acting": that comes from the ambient,
//!   request-scoped `context`.
//!
//! ## Public API
//!
//! `crypto` and the raw key types in `keys` stay inside the crate. Callers
//! encrypt through [`Encryptor`] and [`FieldCodec`].

pub mod audit;
pub mod capture;
pub mod codec;
pub mod config;
pub mod context;
pub(crate) mod crypto;
pub mod engine;
pub mod error;
pub(crate) mod keys;
pub mod lifecycle;
pub mod store;
pub mod telemetry;

use std::sync::Arc;

pub use audit::{AuditAction, AuditQuery, AuditRecord, AuditStore};
pub use capture::{AuditTrail, AuditWorker, ChangeCapture};
pub use codec::{Disclosure, FieldCodec, UniqueField, MASK};
pub use config::Config;
pub use context::ActorContext;
pub use engine::Encryptor;
pub use error::{ImmoguardError, Result};
pub use lifecycle::EntityKind;

/// Everything a request handler needs, wired over one data source.
pub struct Core {
    pub codec: FieldCodec,
    pub trail: AuditTrail,
    pub audit_store: Arc<dyn AuditStore>,
}

/// Wire the encryption engine, field codec and audit pipeline.
///
/// Registers a [`ChangeCapture`] on `db` and starts the audit worker on
/// the current tokio runtime; fails with `RuntimeUnavailable` outside one. The audit store is the JSON-lines file when
/// `config.audit_log_path` is set, memory otherwise.
pub fn bootstrap(config: &Config, db: Arc<store::MemoryDatabase>) -> Result<(Core, AuditWorker)> {
    let engine = Arc::new(Encryptor::new(config)?);
    let audit_store: Arc<dyn AuditStore> = match &config.audit_log_path {
        Some(path) => Arc::new(audit::JsonlAuditStore::new(path)),
        None => Arc::new(audit::MemoryAuditStore::new()),
    };

    let (trail, worker) = AuditTrail::spawn(Arc::clone(&audit_store))?;
    db.subscribe(Arc::new(ChangeCapture::new(trail.clone())));

    let codec = FieldCodec::new(engine, db.clone(), db);
    Ok((
        Core {
            codec,
            trail,
            audit_store,
        },
        worker,
    ))
}
