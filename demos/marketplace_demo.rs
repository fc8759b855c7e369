//! A landlord registers, fills in their profile and reprices a unit.
//!
//! Shows field encryption under a per-owner key, the tax-id uniqueness
//! check, and the audit trail picking up the acting user from the request
//! context. Run with: `cargo run --example marketplace_demo`
//!
//! Set `ENCRYPTION_KEY` (at least 32 bytes) to encrypt; without it the demo
//! runs unconfigured and every disclosed value is masked.

use std::sync::Arc;

use serde_json::{json, Value};

use immoguard::context::{self, ActorContext};
use immoguard::lifecycle::Row;
use immoguard::store::MemoryDatabase;
use immoguard::{bootstrap, telemetry, AuditQuery, Config, Disclosure, EntityKind, UniqueField};

fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut config = Config::from_env();
    if config.audit_log_path.is_none() {
        config.audit_log_path = Some(std::env::temp_dir().join("immoguard_audit.jsonl"));
    }
    telemetry::init_tracing(&config)?;

    let db = Arc::new(MemoryDatabase::new());
    let (core, worker) = bootstrap(&config, db.clone())?;
    println!("encryption configured: {}", core.codec.engine().is_configured());

    // 1. Registration is a system write: no actor yet.
    let user = db.insert(EntityKind::User, row(json!({"phone_number": "+22997000000"})))?;
    let user_id = user["id"].as_str().unwrap_or_default().to_string();

    // 2. The landlord's own requests run under their context.
    let request = ActorContext::new(Some(&user_id), Some("197.234.1.10"), Some("demo-client/1.0"));
    context::establish(request, async {
        let full_name = core.codec.seal(&user_id, Some("Jean Dupont")).await?;
        let ifu = core
            .codec
            .seal_unique(&user_id, UniqueField::TaxId, Some("IFU-3201912345678"), None)
            .await?;
        let (ifu_enc, ifu_hash) = match ifu {
            Some(sealed) => (json!(sealed.ciphertext), json!(sealed.hash)),
            None => (Value::Null, Value::Null),
        };
        let profile = db.insert(
            EntityKind::Profile,
            row(json!({
                "user_id": user_id,
                "full_name": full_name,
                "ifu_enc": ifu_enc,
                "ifu_hash": ifu_hash,
            })),
        )?;
        println!("stored full_name: {}", profile["full_name"]);

        let stored = profile["full_name"].as_str();
        let masked = core.codec.disclose(&user_id, stored, Disclosure::Masked).await?;
        let revealed = core.codec.disclose(&user_id, stored, Disclosure::Decrypted).await?;
        println!("masked: {:?}, decrypted: {:?}", masked, revealed);

        let unit = db.insert(EntityKind::Unit, row(json!({"label": "A2", "price": 50000})))?;
        let unit_id = unit["id"].as_str().unwrap_or_default().to_string();
        db.update(EntityKind::Unit, &unit_id, row(json!({"price": 75000})))?;
        Ok::<_, immoguard::ImmoguardError>(())
    })
    .await?;

    // 3. A second user tries to reuse the tax id.
    let other = db.insert(EntityKind::User, row(json!({"phone_number": "+22998000000"})))?;
    let other_id = other["id"].as_str().unwrap_or_default();
    let taken = core
        .codec
        .seal_unique(other_id, UniqueField::TaxId, Some("IFU-3201912345678"), None)
        .await;
    println!("second owner, same tax id: {:?}", taken.err().map(|e| e.to_string()));

    // 4. Operator view of the audit log.
    core.trail.flush().await;
    let page = core.audit_store.query(&AuditQuery::default()).await?;
    println!("{}", serde_json::to_string_pretty(&page)?);
    if let Some(path) = &config.audit_log_path {
        println!("audit log written to: {}", path.display());
    }

    drop(core);
    drop(db);
    worker.join().await;
    Ok(())
}
