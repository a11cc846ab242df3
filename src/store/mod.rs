//! Record store abstraction shared by every backend.
//!
//! Handlers speak in API field names (`order`, `group`, ...) and JSON rows;
//! each backend is responsible for mapping those onto its own schema.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::fmt;

pub mod memory;

pub use memory::MemoryStore;

/// A single record as seen through the API: a JSON object keyed by field name.
pub type Row = Map<String, JsonValue>;

/// Tables exposed by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Users,
    AttendanceHistory,
}

impl Table {
    /// Physical table name in the backing store
    pub fn name(self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::AttendanceHistory => "attendance_history",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Record identifier taken from a request path.
///
/// Integer-looking segments become `Int`; anything else is passed through
/// untouched so string primary keys keep working.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl RecordId {
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<i64>() {
            Ok(n) => RecordId::Int(n),
            Err(_) => RecordId::Text(raw.to_string()),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            RecordId::Int(n) => JsonValue::from(*n),
            RecordId::Text(s) => JsonValue::from(s.as_str()),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(n) => write!(f, "{}", n),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

/// Conjunction of exact-equality predicates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, JsonValue)>,
}

impl Filter {
    /// Filter matching every row
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter matching the row with the given identifier
    pub fn by_id(id: &RecordId) -> Self {
        Self::all().eq("id", id.to_json())
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, JsonValue)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Whether `row` satisfies every predicate
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions
            .iter()
            .all(|(field, value)| row.get(field) == Some(value))
    }
}

/// Sort specification for `select`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub ascending: bool,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }
}

/// Remote record store consumed by the handlers.
///
/// Each call is atomic on its own; nothing here spans calls, so callers
/// that chain operations get no atomicity across them.
#[async_trait]
pub trait Store: Send + Sync {
    /// Rows of `table` matching `filter`, at most `limit`.
    ///
    /// Sorted by the `order` field and direction when one is given; otherwise
    /// in the backend's natural order.
    async fn select(
        &self,
        table: Table,
        filter: &Filter,
        order: Option<&OrderBy>,
        limit: Option<usize>,
    ) -> Result<Vec<Row>>;

    /// Insert `row` and return it as stored, including the assigned `id`.
    async fn insert(&self, table: Table, row: Row) -> Result<Row>;

    /// Merge the fields of `row` into the single row matching `filter`.
    ///
    /// Fails when no row matches.
    async fn update(&self, table: Table, row: Row, filter: &Filter) -> Result<Row>;

    /// Remove every row matching `filter` and return how many went.
    ///
    /// Fails when no row matches.
    async fn delete(&self, table: Table, filter: &Filter) -> Result<usize>;

    /// Cheap connectivity check
    async fn ping(&self) -> Result<()>;
}
