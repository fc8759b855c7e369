//! Data-layer lifecycle hook.
//!
//! The persistence layer announces every committed insert, update and
//! remove to the subscribers registered here. Rows travel as JSON maps,
//! which is the in-memory representation the audit snapshots are taken
//! from.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ImmoguardError;

/// One persisted row, column name to value.
pub type Row = Map<String, Value>;

/// Every entity kind the data layer knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    User,
    Profile,
    PaymentMethod,
    Property,
    Unit,
    RentalRequest,
    Wallet,
    Notification,
}

/// The entity kinds whose lifecycle is audited.
///
/// Only entities holding regulated or high-value data belong here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditedKind {
    User,
    Profile,
    Property,
    Unit,
}

impl EntityKind {
    pub const ALL: [EntityKind; 8] = [
        Self::User,
        Self::Profile,
        Self::PaymentMethod,
        Self::Property,
        Self::Unit,
        Self::RentalRequest,
        Self::Wallet,
        Self::Notification,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Profile => "Profile",
            Self::PaymentMethod => "PaymentMethod",
            Self::Property => "Property",
            Self::Unit => "Unit",
            Self::RentalRequest => "RentalRequest",
            Self::Wallet => "Wallet",
            Self::Notification => "Notification",
        }
    }

    /// `Some` exactly for the kinds that are audited. Exhaustive, so a new
    /// kind cannot be added without deciding this.
    pub fn audited(self) -> Option<AuditedKind> {
        match self {
            Self::User => Some(AuditedKind::User),
            Self::Profile => Some(AuditedKind::Profile),
            Self::Property => Some(AuditedKind::Property),
            Self::Unit => Some(AuditedKind::Unit),
            Self::PaymentMethod | Self::RentalRequest | Self::Wallet | Self::Notification => None,
        }
    }
}

impl From<AuditedKind> for EntityKind {
    fn from(kind: AuditedKind) -> Self {
        match kind {
            AuditedKind::User => Self::User,
            AuditedKind::Profile => Self::Profile,
            AuditedKind::Property => Self::Property,
            AuditedKind::Unit => Self::Unit,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ImmoguardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ImmoguardError::InvalidQuery(format!("unknown entity kind: {}", s)))
    }
}

/// Primary key of a row, if it has one. Numeric ids are rendered as text.
pub fn row_id(row: &Row) -> Option<String> {
    match row.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

pub struct InsertEvent<'a> {
    pub kind: EntityKind,
    /// The row as persisted, including its generated id.
    pub row: &'a Row,
}

pub struct UpdateEvent<'a> {
    pub kind: EntityKind,
    /// The row as loaded before the mutation, when the data layer has it.
    pub before: Option<&'a Row>,
    pub after: &'a Row,
    /// Columns the data layer considers changed by this write.
    pub updated_columns: &'a [String],
}

pub struct RemoveEvent<'a> {
    pub kind: EntityKind,
    pub entity_id: Option<&'a str>,
    /// The row as it was before removal, when the data layer has it.
    pub before: Option<&'a Row>,
}

/// Observer of committed data-layer writes.
///
/// Hooks return nothing: a subscriber cannot fail or veto the write it is
/// told about.
pub trait LifecycleSubscriber: Send + Sync {
    fn after_insert(&self, _event: &InsertEvent<'_>) {}
    fn after_update(&self, _event: &UpdateEvent<'_>) {}
    fn after_remove(&self, _event: &RemoveEvent<'_>) {}
}

/// The global subscriber list of one data source.
#[derive(Default)]
pub struct Subscribers {
    inner: RwLock<Vec<Arc<dyn LifecycleSubscriber>>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, subscriber: Arc<dyn LifecycleSubscriber>) {
        self.inner.write().push(subscriber);
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn LifecycleSubscriber>> {
        self.inner.read().clone()
    }

    pub fn inserted(&self, event: &InsertEvent<'_>) {
        for subscriber in self.snapshot() {
            subscriber.after_insert(event);
        }
    }

    pub fn updated(&self, event: &UpdateEvent<'_>) {
        for subscriber in self.snapshot() {
            subscriber.after_update(event);
        }
    }

    pub fn removed(&self, event: &RemoveEvent<'_>) {
        for subscriber in self.snapshot() {
            subscriber.after_remove(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn audited_set() {
        let audited: Vec<_> = EntityKind::ALL
            .into_iter()
            .filter(|kind| kind.audited().is_some())
            .collect();
        assert_eq!(
            audited,
            vec![EntityKind::User, EntityKind::Profile, EntityKind::Property, EntityKind::Unit]
        );
    }

    #[test]
    fn parse_kind_case_insensitive() {
        assert_eq!("unit".parse::<EntityKind>().unwrap(), EntityKind::Unit);
        assert_eq!("PaymentMethod".parse::<EntityKind>().unwrap(), EntityKind::PaymentMethod);
        assert!("UnitEntity".parse::<EntityKind>().is_err());
    }

    #[test]
    fn row_id_variants() {
        let text = json!({"id": "u-1"});
        let number = json!({"id": 42});
        let none = json!({"name": "x"});
        assert_eq!(row_id(text.as_object().unwrap()).as_deref(), Some("u-1"));
        assert_eq!(row_id(number.as_object().unwrap()).as_deref(), Some("42"));
        assert_eq!(row_id(none.as_object().unwrap()), None);
    }
}
