//! Generic domain record and query shapes shared by every backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT};

/// Structured key/value body of a record. Always a JSON object.
pub type Payload = Map<String, Value>;

/// A stored record as seen by repository callers.
///
/// `id` is backend-native: the same logical record held by two backends has
/// unrelated ids unless an explicit copy step mapped it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub collection: String,
    pub id: String,
    pub payload: Payload,
    /// Optimistic-concurrency counter. 1 after create, +1 per update.
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// Generic paginated result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedResult<T> {
    /// Items in the current page.
    pub items: Vec<T>,
    /// Total number of matching items across all pages.
    pub total: u64,
    /// Offset from the start.
    pub offset: u64,
    /// Maximum items per page.
    pub limit: u64,
}

impl<T> PaginatedResult<T> {
    #[must_use]
    pub fn new(items: Vec<T>, total: u64, offset: u64, limit: u64) -> Self {
        Self { items, total, offset, limit }
    }
}

/// Equality match on one top-level payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

impl FieldFilter {
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { field: field.into(), value: value.into() }
    }
}

/// Paginated scan over one collection, ordered by most recently updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanQuery {
    pub collection: String,
    pub filter: Option<FieldFilter>,
    pub offset: usize,
    pub limit: usize,
}

impl ScanQuery {
    pub fn new(collection: impl Into<String>) -> Self {
        Self { collection: collection.into(), filter: None, offset: 0, limit: DEFAULT_QUERY_LIMIT }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: FieldFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    /// Limit after clamping into `1..=MAX_QUERY_LIMIT`.
    #[must_use]
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_QUERY_LIMIT)
    }
}

/// Apply a JSON merge patch (RFC 7396) to a payload.
///
/// Object members merge recursively, `null` removes a key, any other value
/// replaces the target member wholesale.
pub fn apply_merge_patch(target: &mut Payload, patch: &Payload) {
    for (key, patch_value) in patch {
        match patch_value {
            Value::Null => {
                target.remove(key);
            },
            Value::Object(patch_obj) => {
                let entry = target.entry(key.clone()).or_insert_with(|| Value::Object(Map::new()));
                if !entry.is_object() {
                    *entry = Value::Object(Map::new());
                }
                if let Value::Object(target_obj) = entry {
                    apply_merge_patch(target_obj, patch_obj);
                }
            },
            other => {
                target.insert(key.clone(), other.clone());
            },
        }
    }
}
