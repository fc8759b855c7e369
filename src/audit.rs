//! Append-only audit log.
//!
//! Records who changed what. Stores only ever append; there is no update
//! or delete in the [`AuditStore`] contract. Reads are filtered,
//! paginated and newest-first.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::context::ActorContext;
use crate::error::{ImmoguardError, Result};
use crate::lifecycle::{EntityKind, Row};

/// Default page size of [`AuditQuery`].
pub const DEFAULT_LIMIT: usize = 50;

/// Largest page a single query may request.
pub const MAX_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Login,
    Ban,
    Restrict,
    Custom,
}

impl AuditAction {
    pub const ALL: [AuditAction; 7] = [
        Self::Create,
        Self::Update,
        Self::Delete,
        Self::Login,
        Self::Ban,
        Self::Restrict,
        Self::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Login => "LOGIN",
            Self::Ban => "BAN",
            Self::Restrict => "RESTRICT",
            Self::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = ImmoguardError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ImmoguardError::InvalidQuery(format!("unknown action: {}", s)))
    }
}

/// A permanent record of one change or security event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub actor_id: Option<String>,
    pub action: AuditAction,
    pub entity_kind: Option<EntityKind>,
    pub entity_id: Option<String>,
    /// For updates, only the changed columns.
    pub old_values: Option<Row>,
    pub new_values: Option<Row>,
    pub description: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What happened, before the actor and timestamp are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub entity_kind: Option<EntityKind>,
    pub entity_id: Option<String>,
    pub old_values: Option<Row>,
    pub new_values: Option<Row>,
    pub description: Option<String>,
}

impl AuditEntry {
    /// An entry with only its action set.
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            entity_kind: None,
            entity_id: None,
            old_values: None,
            new_values: None,
            description: None,
        }
    }

    /// Attach the entity the entry is about.
    pub fn entity(mut self, kind: EntityKind, id: Option<String>) -> Self {
        self.entity_kind = Some(kind);
        self.entity_id = id;
        self
    }

    /// Free-text description shown to operators.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Stamp the entry with an id, the actor (if any) and the current time.
    pub fn into_record(self, actor: Option<&ActorContext>) -> AuditRecord {
        AuditRecord {
            id: Uuid::new_v4(),
            actor_id: actor.and_then(|a| a.actor_id()).map(String::from),
            action: self.action,
            entity_kind: self.entity_kind,
            entity_id: self.entity_id,
            old_values: self.old_values,
            new_values: self.new_values,
            description: self.description,
            ip_address: actor.and_then(|a| a.ip_address()).map(String::from),
            user_agent: actor.and_then(|a| a.user_agent()).map(String::from),
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub action: Option<AuditAction>,
    pub entity_kind: Option<EntityKind>,
    pub actor_id: Option<String>,
}

impl AuditFilter {
    /// True when every filter that is set agrees with `record`.
    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.action.map_or(true, |a| record.action == a)
            && self.entity_kind.map_or(true, |k| record.entity_kind == Some(k))
            && self
                .actor_id
                .as_deref()
                .map_or(true, |id| record.actor_id.as_deref() == Some(id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditQuery {
    pub limit: usize,
    pub offset: usize,
    pub filter: AuditFilter,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
            filter: AuditFilter::default(),
        }
    }
}

/// Raw query-string parameters of the operator audit endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQueryParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub action: Option<String>,
    pub entity_type: Option<String>,
    pub user_id: Option<String>,
}

impl TryFrom<AuditQueryParams> for AuditQuery {
    type Error = ImmoguardError;

    fn try_from(params: AuditQueryParams) -> Result<Self> {
        let present = |v: &String| !v.trim().is_empty();
        Ok(Self {
            limit: params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
            offset: params.offset.unwrap_or(0),
            filter: AuditFilter {
                action: params.action.filter(present).map(|a| a.parse()).transpose()?,
                entity_kind: params.entity_type.filter(present).map(|k| k.parse()).transpose()?,
                actor_id: params.user_id.filter(present),
            },
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PageMeta {
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// One page of audit records, in the shape the operator endpoint returns.
#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub data: Vec<AuditRecord>,
    pub meta: PageMeta,
}

/// Filter, order newest-first and cut one page out of `records`.
///
/// Records with equal timestamps keep reverse append order, so the most
/// recently appended comes first.
fn paginate<'a>(records: impl DoubleEndedIterator<Item = &'a AuditRecord>, query: &AuditQuery) -> AuditPage {
    let mut matching: Vec<&AuditRecord> = records.rev().filter(|r| query.filter.matches(r)).collect();
    matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let total = matching.len();
    let data = matching
        .into_iter()
        .skip(query.offset)
        .take(query.limit)
        .cloned()
        .collect();

    AuditPage {
        data,
        meta: PageMeta {
            total,
            limit: query.limit,
            offset: query.offset,
        },
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// Append-only audit persistence.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<()>;

    async fn query(&self, query: &AuditQuery) -> Result<AuditPage>;
}

/// Audit log held in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    records: RwLock<Vec<AuditRecord>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Copy of every record in append order.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.read().clone()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, record: AuditRecord) -> Result<()> {
        self.records.write().push(record);
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<AuditPage> {
        let records = self.records.read();
        Ok(paginate(records.iter(), query))
    }
}

/// Audit log persisted as JSON lines, one record per line.
///
/// The file is opened in append mode for every write and never rewritten.
pub struct JsonlAuditStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every parseable record in file order.
    ///
    /// A line that does not parse, typically one torn by a crash during an
    /// append, is skipped and counted. It does not make the rest of the log
    /// unreadable.
    async fn load(&self) -> Result<Vec<AuditRecord>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for line in raw.lines().filter(|line| !line.trim().is_empty()) {
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(path = %self.path.display(), skipped, "skipped unreadable audit log lines");
        }
        Ok(records)
    }

    /// Whether the file is non-empty and its last byte is not a newline.
    async fn ends_mid_line(&self) -> std::io::Result<bool> {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        if file.metadata().await?.len() == 0 {
            return Ok(false);
        }
        file.seek(std::io::SeekFrom::End(-1)).await?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last).await?;
        Ok(last[0] != b'\n')
    }
}

#[async_trait]
impl AuditStore for JsonlAuditStore {
    async fn append(&self, record: AuditRecord) -> Result<()> {
        let mut line = serde_json::to_string(&record)
            .map_err(|e| ImmoguardError::AuditWriteFailed(e.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if self
            .ends_mid_line()
            .await
            .map_err(|e| ImmoguardError::AuditWriteFailed(e.to_string()))?
        {
            line.insert(0, '\n');
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| ImmoguardError::AuditWriteFailed(e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| ImmoguardError::AuditWriteFailed(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| ImmoguardError::AuditWriteFailed(e.to_string()))?;
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<AuditPage> {
        let records = self.load().await?;
        Ok(paginate(records.iter(), query))
    }
}
