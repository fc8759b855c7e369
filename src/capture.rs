//! Change-capture audit pipeline.
//!
//! Two halves:
//! 1. [`AuditTrail`], the fire-and-forget front door. `record` stamps an
//!    entry with the ambient actor and hands it to a detached worker task
//!    through a bounded queue. It returns nothing and never waits on
//!    storage; when the queue is full the entry is dropped and logged.
//! 2. [`ChangeCapture`], a [`LifecycleSubscriber`] that turns committed
//!    data-layer writes on audited entity kinds into entries for the trail.
//!
//! The worker owns the only error channel: a failed append is logged at
//! `error` and dropped. Nothing flows back to the business write.

use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::audit::{AuditAction, AuditEntry, AuditRecord, AuditStore};
use crate::context;
use crate::error::{ImmoguardError, Result};
use crate::lifecycle::{
    row_id, EntityKind, InsertEvent, LifecycleSubscriber, RemoveEvent, Row, UpdateEvent,
};

/// Columns never copied into audit snapshots.
pub const REDACTED_COLUMNS: [&str; 3] = ["encryption_salt", "password", "otp_code"];

const REDACTED: &str = "[REDACTED]";

enum Command {
    Append(AuditRecord),
    Flush(oneshot::Sender<()>),
}

// ---------------------------------------------------------------------------
// Trail
// ---------------------------------------------------------------------------

/// Entries that may wait for the worker before new ones are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Handle for submitting audit entries. Cheap to clone.
#[derive(Clone)]
pub struct AuditTrail {
    tx: mpsc::Sender<Command>,
}

/// The detached task draining an [`AuditTrail`].
pub struct AuditWorker {
    handle: JoinHandle<()>,
}

impl AuditTrail {
    /// Start the worker on the current tokio runtime with the default
    /// queue capacity.
    pub fn spawn(store: Arc<dyn AuditStore>) -> Result<(Self, AuditWorker)> {
        Self::spawn_with_capacity(store, DEFAULT_QUEUE_CAPACITY)
    }

    /// Start the worker with room for `capacity` pending entries.
    ///
    /// The queue is bounded so a stalled store cannot grow memory without
    /// limit. When it is full, new entries are dropped with a warning;
    /// `record` never waits. Fails outside a tokio runtime.
    pub fn spawn_with_capacity(
        store: Arc<dyn AuditStore>,
        capacity: usize,
    ) -> Result<(Self, AuditWorker)> {
        let runtime = Handle::try_current().map_err(|_| ImmoguardError::RuntimeUnavailable)?;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = runtime.spawn(drain(store, rx));
        Ok((Self { tx }, AuditWorker { handle }))
    }

    /// Submit an entry on behalf of the current ambient actor.
    ///
    /// The actor is read now, on the caller's task, so the record reflects
    /// the request that caused it even though it is written later.
    pub fn record(&self, entry: AuditEntry) {
        let actor = context::current();
        let record = entry.into_record(actor.as_deref());
        let action = record.action;
        match self.tx.try_send(Command::Append(record)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!(%action, "audit queue full; record dropped"),
            Err(TrySendError::Closed(_)) => warn!(%action, "audit worker stopped; record dropped"),
        }
    }

    /// Wait until every entry submitted before this call has been handed
    /// to the store. Write failures are not reported here either.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

impl AuditWorker {
    /// Wait for the worker to finish. It finishes once every
    /// [`AuditTrail`] clone has been dropped and the queue is drained.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            error!(error = %e, "audit worker terminated abnormally");
        }
    }
}

async fn drain(store: Arc<dyn AuditStore>, mut rx: mpsc::Receiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Append(record) => {
                let id = record.id;
                let action = record.action;
                match store.append(record).await {
                    Ok(()) => debug!(%id, %action, "audit record written"),
                    Err(e) => error!(%id, %action, error = %e, "failed to write audit record"),
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle subscriber
// ---------------------------------------------------------------------------

/// Audits inserts, updates and removes of the audited entity kinds.
pub struct ChangeCapture {
    trail: AuditTrail,
}

impl ChangeCapture {
    pub fn new(trail: AuditTrail) -> Self {
        Self { trail }
    }
}

impl LifecycleSubscriber for ChangeCapture {
    fn after_insert(&self, event: &InsertEvent<'_>) {
        let Some(kind) = event.kind.audited() else { return };
        let kind = EntityKind::from(kind);

        let mut entry = AuditEntry::new(AuditAction::Create)
            .entity(kind, row_id(event.row))
            .describe(format!("created {}", kind));
        entry.new_values = Some(redact(event.row));
        self.trail.record(entry);
    }

    fn after_update(&self, event: &UpdateEvent<'_>) {
        let Some(kind) = event.kind.audited() else { return };
        let kind = EntityKind::from(kind);

        let Some((old_values, new_values)) =
            changed_values(event.before, event.after, event.updated_columns)
        else {
            return;
        };

        let id = row_id(event.after).or_else(|| event.before.and_then(row_id));
        let mut entry = AuditEntry::new(AuditAction::Update)
            .entity(kind, id)
            .describe(format!("updated {}", kind));
        entry.old_values = Some(old_values);
        entry.new_values = Some(new_values);
        self.trail.record(entry);
    }

    fn after_remove(&self, event: &RemoveEvent<'_>) {
        let Some(kind) = event.kind.audited() else { return };
        let kind = EntityKind::from(kind);

        let id = event
            .entity_id
            .map(String::from)
            .or_else(|| event.before.and_then(row_id));
        let mut entry = AuditEntry::new(AuditAction::Delete)
            .entity(kind, id.clone())
            .describe(format!("deleted {}", kind));
        entry.old_values = match event.before {
            Some(row) => Some(redact(row)),
            None => id.map(|id| Row::from_iter([("id".to_string(), Value::String(id))])),
        };
        self.trail.record(entry);
    }
}

/// Parallel old/new maps over the columns that really changed.
///
/// A column listed as updated whose value is equal before and after is
/// dropped. `None` when nothing is left, i.e. a no-op update.
fn changed_values(before: Option<&Row>, after: &Row, columns: &[String]) -> Option<(Row, Row)> {
    let mut old_values = Row::new();
    let mut new_values = Row::new();

    for column in columns {
        let old = before.and_then(|row| row.get(column)).cloned().unwrap_or(Value::Null);
        let new = after.get(column).cloned().unwrap_or(Value::Null);
        if before.is_some() && old == new {
            continue;
        }
        if REDACTED_COLUMNS.contains(&column.as_str()) {
            old_values.insert(column.clone(), redacted_or_null(&old));
            new_values.insert(column.clone(), redacted_or_null(&new));
        } else {
            old_values.insert(column.clone(), old);
            new_values.insert(column.clone(), new);
        }
    }

    if new_values.is_empty() {
        None
    } else {
        Some((old_values, new_values))
    }
}

fn redacted_or_null(value: &Value) -> Value {
    if value.is_null() {
        Value::Null
    } else {
        Value::String(REDACTED.to_string())
    }
}

fn redact(row: &Row) -> Row {
    row.iter()
        .map(|(column, value)| {
            let value = if REDACTED_COLUMNS.contains(&column.as_str()) {
                redacted_or_null(value)
            } else {
                value.clone()
            };
            (column.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn only_changed_columns_kept() {
        let before = row(json!({"id": "u", "price": 50000, "floor": 2}));
        let after = row(json!({"id": "u", "price": 75000, "floor": 2}));
        let (old, new) = changed_values(Some(&before), &after, &cols(&["price", "floor"])).unwrap();
        assert_eq!(Value::Object(old), json!({"price": 50000}));
        assert_eq!(Value::Object(new), json!({"price": 75000}));
    }

    #[test]
    fn no_change_is_none() {
        let before = row(json!({"id": "u", "price": 50000}));
        assert!(changed_values(Some(&before), &before, &cols(&["price"])).is_none());
        assert!(changed_values(Some(&before), &before, &[]).is_none());
    }

    #[test]
    fn missing_before_keeps_reported_columns() {
        let after = row(json!({"id": "u", "price": 1}));
        let (old, new) = changed_values(None, &after, &cols(&["price"])).unwrap();
        assert_eq!(old["price"], Value::Null);
        assert_eq!(new["price"], json!(1));
    }

    async fn removed(event: RemoveEvent<'_>) -> Vec<AuditRecord> {
        let store = Arc::new(crate::audit::MemoryAuditStore::new());
        let (trail, _worker) = AuditTrail::spawn(store.clone()).unwrap();
        ChangeCapture::new(trail.clone()).after_remove(&event);
        trail.flush().await;
        store.records()
    }

    #[tokio::test]
    async fn delete_without_snapshot_keeps_id() {
        let records = removed(RemoveEvent {
            kind: EntityKind::Unit,
            entity_id: Some("U9"),
            before: None,
        })
        .await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, AuditAction::Delete);
        assert_eq!(records[0].entity_id.as_deref(), Some("U9"));
        assert_eq!(records[0].old_values, Some(row(json!({"id": "U9"}))));
        assert_eq!(records[0].description.as_deref(), Some("deleted Unit"));
    }

    #[tokio::test]
    async fn delete_with_nothing_identifying() {
        let records = removed(RemoveEvent {
            kind: EntityKind::Property,
            entity_id: None,
            before: None,
        })
        .await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entity_kind, Some(EntityKind::Property));
        assert!(records[0].entity_id.is_none());
        assert!(records[0].old_values.is_none());
    }

    #[test]
    fn spawn_outside_runtime_is_an_error() {
        let store = Arc::new(crate::audit::MemoryAuditStore::new());
        assert!(matches!(
            AuditTrail::spawn(store),
            Err(ImmoguardError::RuntimeUnavailable)
        ));
    }

    #[test]
    fn secrets_redacted() {
        let snapshot = redact(&row(json!({"id": "p", "encryption_salt": "abcd", "phone": "+229"})));
        assert_eq!(snapshot["encryption_salt"], json!(REDACTED));
        assert_eq!(snapshot["phone"], json!("+229"));

        let before = row(json!({"id": "p", "encryption_salt": null}));
        let after = row(json!({"id": "p", "encryption_salt": "abcd"}));
        let (old, new) = changed_values(Some(&before), &after, &cols(&["encryption_salt"])).unwrap();
        assert_eq!(old["encryption_salt"], Value::Null);
        assert_eq!(new["encryption_salt"], json!(REDACTED));
    }
}
