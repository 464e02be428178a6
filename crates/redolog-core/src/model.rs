//! Event and identity types persisted to the redo log.

use serde::{Deserialize, Serialize};

/// Monotonic logical timestamp assigned by the upstream cluster.
///
/// Zero is a valid sentinel meaning "unset".
pub type Ts = u64;

/// Opaque table identifier. Only equality and hashing are assumed.
pub type TableId = i64;

/// Sentinel table ID under which DDL events track their resolved timestamp.
pub const DDL_TABLE_ID: TableId = 0;

/// Identity of the changefeed this redo log serves.
///
/// Labels every log line and metric so multiple changefeeds sharing a
/// process stay distinguishable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangefeedId {
    /// Namespace the changefeed belongs to.
    pub namespace: String,
    /// Changefeed name, unique within its namespace.
    pub id: String,
}

impl ChangefeedId {
    /// Creates a changefeed identity.
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for ChangefeedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.id)
    }
}

/// A single column value within a row-change event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column value, JSON-encoded by the upstream decoder.
    pub value: serde_json::Value,
}

/// A row-change (DML) event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowChangedEvent {
    /// Table the row belongs to.
    pub table_id: TableId,
    /// Commit timestamp of the transaction that produced this row.
    pub commit_ts: Ts,
    /// Schema (database) name.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Column values after the change. Empty for deletes.
    pub columns: Vec<Column>,
}

/// A schema-change (DDL) event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdlEvent {
    /// Commit timestamp of the DDL.
    pub commit_ts: Ts,
    /// Schema (database) name.
    pub schema: String,
    /// Table name. Empty for database-level DDLs.
    pub table: String,
    /// The DDL statement text.
    pub query: String,
}

/// An event appended to the redo log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RedoEvent {
    /// Row-change event.
    Row(RowChangedEvent),
    /// Schema-change event.
    Ddl(DdlEvent),
}

impl RedoEvent {
    /// Commit timestamp of the wrapped event.
    #[must_use]
    pub fn commit_ts(&self) -> Ts {
        match self {
            Self::Row(row) => row.commit_ts,
            Self::Ddl(ddl) => ddl.commit_ts,
        }
    }
}

impl From<RowChangedEvent> for RedoEvent {
    fn from(row: RowChangedEvent) -> Self {
        Self::Row(row)
    }
}

impl From<DdlEvent> for RedoEvent {
    fn from(ddl: DdlEvent) -> Self {
        Self::Ddl(ddl)
    }
}
