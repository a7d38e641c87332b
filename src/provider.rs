//! Generic list/update/delete data-provider interface.
//!
//! Resources are addressed by name and rows are JSON objects, mirroring a
//! PostgREST-style backend. Filter keys carry their operator as a suffix:
//! `field@gte`, `field@lt`, `field@not_in`, `field@is`, and so on. A bare key
//! is an equality test and `$or` takes an array of filter objects.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub type Record = Value;
pub type Filter = BTreeMap<String, Value>;

/// Errors raised by a data provider.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("{resource} {id} not found")]
    NotFound { resource: String, id: i64 },

    #[error("injected failure on {0}")]
    Injected(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

impl Default for Sort {
    fn default() -> Self {
        Sort { field: "id".into(), order: SortOrder::Asc }
    }
}

/// 1-indexed page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination { page: 1, per_page: 25 }
    }
}

impl Pagination {
    /// First page of one row: the server still reports `total`.
    pub const COUNT_ONLY: Pagination = Pagination { page: 1, per_page: 1 };

    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize).saturating_mul(self.per_page as usize)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub expand: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListParams {
    pub filter: Filter,
    pub sort: Sort,
    pub pagination: Pagination,
    pub meta: Option<Meta>,
}

impl ListParams {
    pub fn new() -> Self {
        ListParams::default()
    }

    /// Count-only query: page 1, one row, read `total`.
    pub fn count_only(mut self) -> Self {
        self.pagination = Pagination::COUNT_ONLY;
        self
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(key.into(), value.into());
        self
    }

    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Sort { field: field.into(), order };
        self
    }

    pub fn page(mut self, page: u32, per_page: u32) -> Self {
        self.pagination = Pagination { page, per_page };
        self
    }

    pub fn expand<I, S>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.meta = Some(Meta { expand: relations.into_iter().map(Into::into).collect() });
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListResult {
    pub data: Vec<Record>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateParams {
    pub id: i64,
    pub data: Record,
    /// Full prior record, kept for undo context.
    pub previous_data: Record,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteParams {
    pub id: i64,
    pub previous_data: Record,
}

/// Remote store consumed by every service in this crate.
#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn list(&self, resource: &str, params: ListParams) -> Result<ListResult, ProviderError>;

    async fn update(&self, resource: &str, params: UpdateParams) -> Result<Record, ProviderError>;

    async fn delete(&self, resource: &str, params: DeleteParams) -> Result<Record, ProviderError>;
}

/// Comparison operator encoded in a filter key suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Is,
}

/// Split `field@op` into its field and operator. Unknown suffixes are equality.
pub fn parse_filter_key(key: &str) -> (&str, FilterOp) {
    let Some((field, op)) = key.split_once('@') else {
        return (key, FilterOp::Eq);
    };
    let op = match op {
        "neq" => FilterOp::Neq,
        "gt" => FilterOp::Gt,
        "gte" => FilterOp::Gte,
        "lt" => FilterOp::Lt,
        "lte" => FilterOp::Lte,
        "in" => FilterOp::In,
        "not_in" => FilterOp::NotIn,
        "is" => FilterOp::Is,
        _ => FilterOp::Eq,
    };
    (field, op)
}

/// Read the numeric `id` of a row.
pub fn record_id(record: &Record) -> Option<i64> {
    record.get("id").and_then(Value::as_i64)
}
