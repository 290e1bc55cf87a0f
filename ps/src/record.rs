//! Record trait and query types

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Current time as Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A document that can be persisted in the store
pub trait Record: Serialize + DeserializeOwned + Send + 'static {
    /// Unique identifier within the collection
    fn id(&self) -> &str;

    /// Last update timestamp (Unix milliseconds), used for ordering listings
    fn updated_at(&self) -> i64;

    /// Collection (table namespace) this record lives in
    fn collection_name() -> &'static str;

    /// Fields mirrored into the index table for filtering
    fn indexed_fields(&self) -> HashMap<String, IndexValue>;
}

/// Value of an indexed field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl IndexValue {
    /// Canonical text form stored in the index table
    pub fn as_index_text(&self) -> String {
        match self {
            IndexValue::String(s) => s.clone(),
            IndexValue::Int(i) => i.to_string(),
            IndexValue::Bool(b) => b.to_string(),
        }
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_index_text())
    }
}

impl From<&str> for IndexValue {
    fn from(value: &str) -> Self {
        IndexValue::String(value.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(value: String) -> Self {
        IndexValue::String(value)
    }
}

impl From<i64> for IndexValue {
    fn from(value: i64) -> Self {
        IndexValue::Int(value)
    }
}

impl From<bool> for IndexValue {
    fn from(value: bool) -> Self {
        IndexValue::Bool(value)
    }
}

/// Comparison applied by a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// Exact match
    Eq,
    /// Field present with a different value
    Ne,
    /// Case-insensitive substring match
    Contains,
}

/// A single predicate over an indexed field
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: IndexValue,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    pub fn ne(field: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Ne,
            value: value.into(),
        }
    }

    pub fn contains(field: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Contains,
            value: value.into(),
        }
    }
}

/// Paging for list queries (newest first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListOptions {
    pub limit: Option<usize>,
    pub offset: usize,
}

impl ListOptions {
    pub fn page(limit: usize, offset: usize) -> Self {
        Self {
            limit: Some(limit),
            offset,
        }
    }
}
