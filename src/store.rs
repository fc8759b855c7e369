//! Persistence collaborators.
//!
//! The traits are the boundary to whatever database the application runs
//! on. [`MemoryDatabase`] implements all of them over in-memory rows and
//! fires the lifecycle hook the way an ORM would; it backs the demos and
//! the tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use crate::codec::UniqueField;
use crate::error::{ImmoguardError, Result};
use crate::lifecycle::{
    row_id, EntityKind, InsertEvent, LifecycleSubscriber, RemoveEvent, Row, Subscribers,
    UpdateEvent,
};

/// Column on principal rows holding the salt.
pub const SALT_COLUMN: &str = "encryption_salt";

/// Column on profile rows naming the owning principal.
pub const OWNER_COLUMN: &str = "user_id";

/// Principal salts.
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    /// The stored salt, `None` if never generated.
    async fn salt(&self, principal: &str) -> Result<Option<String>>;

    /// Persist `salt` unless one already exists, atomically. Returns the
    /// salt that is stored afterwards, which may be another writer's.
    async fn set_salt_if_absent(&self, principal: &str, salt: &str) -> Result<String>;
}

/// Lookup of blind indexes across principals.
///
/// `owner_of` is advisory. Implementations must also hold a unique index
/// on every [`UniqueField::hash_column`] and fail a conflicting write with
/// `DuplicateSensitiveValue`, since a lookup followed by a write is not
/// atomic.
#[async_trait]
pub trait BlindIndexStore: Send + Sync {
    /// The principal whose record holds `hash` for `field`, if any.
    async fn owner_of(&self, field: UniqueField, hash: &str) -> Result<Option<String>>;
}

type Table = BTreeMap<String, Row>;

/// In-memory rows per entity kind with lifecycle notifications.
///
/// Events fire after the row change is committed and the table lock is
/// released.
#[derive(Default)]
pub struct MemoryDatabase {
    tables: Mutex<HashMap<EntityKind, Table>>,
    subscribers: Subscribers,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn LifecycleSubscriber>) {
        self.subscribers.push(subscriber);
    }

    /// Persist a new row. An `id` is generated when the row has none.
    pub fn insert(&self, kind: EntityKind, mut row: Row) -> Result<Row> {
        let id = match row_id(&row) {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                row.insert("id".to_string(), Value::String(id.clone()));
                id
            }
        };

        {
            let mut tables = self.tables.lock();
            let table = tables.entry(kind).or_default();
            if table.contains_key(&id) {
                return Err(ImmoguardError::Storage(format!("duplicate {} id: {}", kind, id)));
            }
            check_unique(kind, table, &id, &row)?;
            table.insert(id, row.clone());
        }

        self.subscribers.inserted(&InsertEvent { kind, row: &row });
        Ok(row)
    }

    /// Merge `patch` into an existing row.
    ///
    /// The updated columns reported to subscribers are those whose value
    /// differs from the stored one. `id` cannot be patched.
    pub fn update(&self, kind: EntityKind, id: &str, patch: Row) -> Result<Row> {
        let (before, after, changed) = {
            let mut tables = self.tables.lock();
            let not_found = || ImmoguardError::EntityNotFound {
                kind,
                id: id.to_string(),
            };
            let table = tables.get_mut(&kind).ok_or_else(not_found)?;
            let before = table.get(id).cloned().ok_or_else(not_found)?;

            let mut after = before.clone();
            let mut changed = Vec::new();
            for (column, value) in patch {
                if column == "id" {
                    continue;
                }
                if after.get(&column) != Some(&value) {
                    changed.push(column.clone());
                    after.insert(column, value);
                }
            }

            check_unique(kind, table, id, &after)?;
            table.insert(id.to_string(), after.clone());
            (before, after, changed)
        };

        self.subscribers.updated(&UpdateEvent {
            kind,
            before: Some(&before),
            after: &after,
            updated_columns: &changed,
        });
        Ok(after)
    }

    /// Delete a row, returning it.
    pub fn remove(&self, kind: EntityKind, id: &str) -> Result<Row> {
        let removed = self
            .tables
            .lock()
            .get_mut(&kind)
            .and_then(|table| table.remove(id))
            .ok_or_else(|| ImmoguardError::EntityNotFound {
                kind,
                id: id.to_string(),
            })?;

        self.subscribers.removed(&RemoveEvent {
            kind,
            entity_id: Some(id),
            before: Some(&removed),
        });
        Ok(removed)
    }

    /// The row of `kind` with primary key `id`.
    pub fn find(&self, kind: EntityKind, id: &str) -> Option<Row> {
        self.tables.lock().get(&kind)?.get(id).cloned()
    }

    /// First row of `kind` whose `column` equals `value`.
    pub fn find_by(&self, kind: EntityKind, column: &str, value: &Value) -> Option<Row> {
        self.tables
            .lock()
            .get(&kind)?
            .values()
            .find(|row| row.get(column) == Some(value))
            .cloned()
    }

    /// Number of rows of `kind`.
    pub fn count(&self, kind: EntityKind) -> usize {
        self.tables.lock().get(&kind).map_or(0, |table| table.len())
    }
}

/// Unique index on blind-index columns: no other row of `kind` may hold
/// the same non-null hash. Runs under the table lock with the write.
fn check_unique(kind: EntityKind, table: &Table, id: &str, row: &Row) -> Result<()> {
    for field in UniqueField::ALL {
        if field.owner_kind() != kind {
            continue;
        }
        let Some(hash) = row.get(field.hash_column()).and_then(Value::as_str) else {
            continue;
        };
        let taken = table.iter().any(|(other_id, other)| {
            other_id != id && other.get(field.hash_column()).and_then(Value::as_str) == Some(hash)
        });
        if taken {
            return Err(ImmoguardError::DuplicateSensitiveValue { field: field.name() });
        }
    }
    Ok(())
}

#[async_trait]
impl PrincipalStore for MemoryDatabase {
    async fn salt(&self, principal: &str) -> Result<Option<String>> {
        let tables = self.tables.lock();
        let row = tables
            .get(&EntityKind::User)
            .and_then(|users| users.get(principal))
            .ok_or_else(|| ImmoguardError::PrincipalNotFound(principal.to_string()))?;
        Ok(row
            .get(SALT_COLUMN)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from))
    }

    // A raw column write: like a query-builder update, it bypasses the
    // lifecycle hook.
    async fn set_salt_if_absent(&self, principal: &str, salt: &str) -> Result<String> {
        let mut tables = self.tables.lock();
        let row = tables
            .get_mut(&EntityKind::User)
            .and_then(|users| users.get_mut(principal))
            .ok_or_else(|| ImmoguardError::PrincipalNotFound(principal.to_string()))?;

        if let Some(existing) = row.get(SALT_COLUMN).and_then(Value::as_str) {
            if !existing.is_empty() {
                return Ok(existing.to_string());
            }
        }
        row.insert(SALT_COLUMN.to_string(), Value::String(salt.to_string()));
        Ok(salt.to_string())
    }
}

#[async_trait]
impl BlindIndexStore for MemoryDatabase {
    async fn owner_of(&self, field: UniqueField, hash: &str) -> Result<Option<String>> {
        let tables = self.tables.lock();
        let Some(rows) = tables.get(&field.owner_kind()) else {
            return Ok(None);
        };
        Ok(rows
            .values()
            .find(|row| row.get(field.hash_column()).and_then(Value::as_str) == Some(hash))
            .and_then(|row| row.get(OWNER_COLUMN))
            .and_then(Value::as_str)
            .map(String::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        updates: SyncMutex<Vec<Vec<String>>>,
        inserts: SyncMutex<usize>,
        removes: SyncMutex<usize>,
    }

    impl LifecycleSubscriber for Recorder {
        fn after_insert(&self, _event: &InsertEvent<'_>) {
            *self.inserts.lock() += 1;
        }
        fn after_update(&self, event: &UpdateEvent<'_>) {
            self.updates.lock().push(event.updated_columns.to_vec());
        }
        fn after_remove(&self, _event: &RemoveEvent<'_>) {
            *self.removes.lock() += 1;
        }
    }

    #[test]
    fn insert_assigns_id_and_notifies() {
        let db = MemoryDatabase::new();
        let recorder = Arc::new(Recorder::default());
        db.subscribe(recorder.clone());

        let saved = db.insert(EntityKind::Unit, row(json!({"price": 1}))).unwrap();
        let id = row_id(&saved).unwrap();
        assert!(db.find(EntityKind::Unit, &id).is_some());
        assert_eq!(*recorder.inserts.lock(), 1);
        assert!(db.insert(EntityKind::Unit, saved).is_err());
    }

    #[test]
    fn update_reports_only_changed_columns() {
        let db = MemoryDatabase::new();
        let recorder = Arc::new(Recorder::default());
        db.subscribe(recorder.clone());

        db.insert(EntityKind::Unit, row(json!({"id": "u1", "price": 1, "floor": 2})))
            .unwrap();
        db.update(EntityKind::Unit, "u1", row(json!({"price": 5, "floor": 2, "id": "x"})))
            .unwrap();
        db.update(EntityKind::Unit, "u1", row(json!({"price": 5}))).unwrap();

        let updates = recorder.updates.lock();
        assert_eq!(updates[0], vec!["price".to_string()]);
        assert!(updates[1].is_empty());
        assert_eq!(db.find(EntityKind::Unit, "u1").unwrap()["id"], json!("u1"));
    }

    #[test]
    fn remove_missing_is_not_found() {
        let db = MemoryDatabase::new();
        assert!(matches!(
            db.remove(EntityKind::Unit, "nope"),
            Err(ImmoguardError::EntityNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn salt_set_if_absent_keeps_first() {
        let db = MemoryDatabase::new();
        db.insert(EntityKind::User, row(json!({"id": "a"}))).unwrap();

        assert_eq!(db.salt("a").await.unwrap(), None);
        assert_eq!(db.set_salt_if_absent("a", "s1").await.unwrap(), "s1");
        assert_eq!(db.set_salt_if_absent("a", "s2").await.unwrap(), "s1");
        assert_eq!(db.salt("a").await.unwrap().as_deref(), Some("s1"));
        assert!(matches!(
            db.salt("ghost").await,
            Err(ImmoguardError::PrincipalNotFound(_))
        ));
    }

    #[test]
    fn unique_index_on_hash_columns() {
        let db = MemoryDatabase::new();
        db.insert(EntityKind::Profile, row(json!({"id": "pa", "user_id": "a", "ifu_hash": "h1"})))
            .unwrap();

        let err = db
            .insert(EntityKind::Profile, row(json!({"id": "pb", "user_id": "b", "ifu_hash": "h1"})))
            .unwrap_err();
        assert!(matches!(err, ImmoguardError::DuplicateSensitiveValue { field: "ifu" }));
        assert_eq!(db.count(EntityKind::Profile), 1);

        // Nulls never collide, and a row may keep its own hash.
        db.insert(EntityKind::Profile, row(json!({"id": "pb", "user_id": "b", "ifu_hash": null})))
            .unwrap();
        db.update(EntityKind::Profile, "pa", row(json!({"ifu_hash": "h1", "rccm_hash": "r1"})))
            .unwrap();

        assert!(db
            .update(EntityKind::Profile, "pb", row(json!({"ifu_hash": "h1"})))
            .is_err());
        assert_eq!(db.find(EntityKind::Profile, "pb").unwrap()["ifu_hash"], Value::Null);
    }

    #[tokio::test]
    async fn blind_index_lookup() {
        let db = MemoryDatabase::new();
        db.insert(
            EntityKind::Profile,
            row(json!({"user_id": "a", "ifu_hash": "h1", "rccm_hash": null})),
        )
        .unwrap();

        assert_eq!(
            db.owner_of(UniqueField::TaxId, "h1").await.unwrap().as_deref(),
            Some("a")
        );
        assert_eq!(db.owner_of(UniqueField::TradeRegistry, "h1").await.unwrap(), None);
        assert_eq!(db.owner_of(UniqueField::TaxId, "h2").await.unwrap(), None);
    }
}
