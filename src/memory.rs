//! JSON-file-backed in-memory data provider.
//!
//! This module provides the `Dataset` struct persisted to disk and the
//! `InMemoryProvider` that evaluates list queries against it, including the
//! filter operator suffixes, sorting, pagination and relation expansion the
//! remote backend supports. Failures and delays can be injected per
//! operation, resource, filter key or row id for deterministic testing.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::dates::parse_timestamp;
use crate::provider::{
    parse_filter_key, record_id, DataProvider, DeleteParams, Filter, FilterOp, ListParams,
    ListResult, ProviderError, Record, SortOrder, UpdateParams,
};
use crate::staleness::StaleThresholds;

/// Everything the local store persists.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub resources: BTreeMap<String, Vec<Record>>,
    #[serde(default)]
    pub thresholds: StaleThresholds,
}

impl Dataset {
    /// Load a dataset from a JSON file; a missing file is an empty dataset.
    pub fn load(path: &Path) -> Result<Self, ProviderError> {
        if !path.exists() {
            return Ok(Dataset::default());
        }
        let mut buf = String::new();
        File::open(path)
            .and_then(|mut f| f.read_to_string(&mut buf))
            .map_err(|e| ProviderError::Io(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&buf).map_err(|e| ProviderError::Serialization(e.to_string()))
    }

    /// Save to JSON using atomic write (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<(), ProviderError> {
        let io = |e: std::io::Error| ProviderError::Io(format!("{}: {e}", path.display()));
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| ProviderError::Serialization(e.to_string()))?;
        let mut f = File::create(&tmp).map_err(io)?;
        f.write_all(data.as_bytes()).map_err(io)?;
        f.flush().map_err(io)?;
        fs::rename(&tmp, path).map_err(io)?;
        Ok(())
    }

    /// Generate the next available id in `resource`.
    pub fn next_id(&self, resource: &str) -> i64 {
        self.resources
            .get(resource)
            .into_iter()
            .flatten()
            .filter_map(record_id)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Append a row, assigning an id when it has none. Returns the id.
    pub fn insert(&mut self, resource: &str, mut record: Record) -> i64 {
        let id = match record_id(&record) {
            Some(id) => id,
            None => {
                let id = self.next_id(resource);
                if let Some(obj) = record.as_object_mut() {
                    obj.insert("id".into(), Value::from(id));
                }
                id
            }
        };
        self.resources.entry(resource.to_string()).or_default().push(record);
        id
    }

    pub fn get(&self, resource: &str, id: i64) -> Option<&Record> {
        self.resources
            .get(resource)?
            .iter()
            .find(|r| record_id(r) == Some(id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Update,
    Delete,
}

/// An injected delay and/or failure.
#[derive(Debug, Clone)]
pub struct Fault {
    op: Operation,
    resource: String,
    filter_key: Option<String>,
    id: Option<i64>,
    delay: Option<Duration>,
    fail: bool,
}

impl Fault {
    /// Fail every `op` against `resource`.
    pub fn fail(op: Operation, resource: &str) -> Self {
        Fault {
            op,
            resource: resource.to_string(),
            filter_key: None,
            id: None,
            delay: None,
            fail: true,
        }
    }

    /// Delay every `op` against `resource` without failing it.
    pub fn slow(op: Operation, resource: &str, delay: Duration) -> Self {
        Fault { delay: Some(delay), fail: false, ..Fault::fail(op, resource) }
    }

    /// Only match list queries whose filter contains `key`.
    pub fn when_filter_has(mut self, key: &str) -> Self {
        self.filter_key = Some(key.to_string());
        self
    }

    /// Only match mutations of row `id`.
    pub fn for_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn matches(&self, op: Operation, resource: &str, filter: Option<&Filter>, id: Option<i64>) -> bool {
        if self.op != op || self.resource != resource {
            return false;
        }
        if let Some(key) = &self.filter_key {
            if !filter.is_some_and(|f| f.contains_key(key)) {
                return false;
            }
        }
        if self.id.is_some() && self.id != id {
            return false;
        }
        true
    }
}

/// A recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Operation,
    pub resource: String,
}

/// Data provider over an in-memory `Dataset`.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    data: RwLock<Dataset>,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<Vec<Call>>,
}

impl InMemoryProvider {
    pub fn new(data: Dataset) -> Self {
        InMemoryProvider { data: RwLock::new(data), ..Default::default() }
    }

    pub fn load(path: &Path) -> Result<Self, ProviderError> {
        Ok(InMemoryProvider::new(Dataset::load(path)?))
    }

    pub fn save(&self, path: &Path) -> Result<(), ProviderError> {
        self.data.read().save(path)
    }

    pub fn dataset(&self) -> Dataset {
        self.data.read().clone()
    }

    pub fn with_dataset<R>(&self, f: impl FnOnce(&mut Dataset) -> R) -> R {
        f(&mut self.data.write())
    }

    pub fn inject(&self, fault: Fault) {
        self.faults.lock().push(fault);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    async fn before(
        &self,
        op: Operation,
        resource: &str,
        filter: Option<&Filter>,
        id: Option<i64>,
    ) -> Result<(), ProviderError> {
        self.calls.lock().push(Call { op, resource: resource.to_string() });
        let fault = self
            .faults
            .lock()
            .iter()
            .find(|f| f.matches(op, resource, filter, id))
            .cloned();
        let Some(fault) = fault else {
            return Ok(());
        };
        if let Some(delay) = fault.delay {
            tokio::time::sleep(delay).await;
        }
        if fault.fail {
            debug!(resource, ?op, "injected provider failure");
            return Err(ProviderError::Injected(resource.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DataProvider for InMemoryProvider {
    async fn list(&self, resource: &str, params: ListParams) -> Result<ListResult, ProviderError> {
        self.before(Operation::List, resource, Some(&params.filter), None).await?;
        let data = self.data.read();
        let mut rows: Vec<Record> = data
            .resources
            .get(resource)
            .into_iter()
            .flatten()
            .filter(|row| matches_filter(row, &params.filter))
            .cloned()
            .collect();

        let field = params.sort.field.as_str();
        rows.sort_by(|a, b| {
            let ord = compare_values(field_of(a, field), field_of(b, field)).unwrap_or(Ordering::Equal);
            match params.sort.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });

        let total = rows.len() as u64;
        let mut page: Vec<Record> = rows
            .into_iter()
            .skip(params.pagination.offset())
            .take(params.pagination.per_page as usize)
            .collect();

        if let Some(meta) = &params.meta {
            for row in page.iter_mut() {
                expand_relations(row, &meta.expand, &data);
            }
        }
        Ok(ListResult { data: page, total })
    }

    async fn update(&self, resource: &str, params: UpdateParams) -> Result<Record, ProviderError> {
        self.before(Operation::Update, resource, None, Some(params.id)).await?;
        let mut data = self.data.write();
        let row = data
            .resources
            .get_mut(resource)
            .and_then(|rows| rows.iter_mut().find(|r| record_id(r) == Some(params.id)))
            .ok_or_else(|| ProviderError::NotFound { resource: resource.to_string(), id: params.id })?;
        if let (Some(target), Some(patch)) = (row.as_object_mut(), params.data.as_object()) {
            for (k, v) in patch {
                target.insert(k.clone(), v.clone());
            }
        }
        Ok(row.clone())
    }

    async fn delete(&self, resource: &str, params: DeleteParams) -> Result<Record, ProviderError> {
        self.before(Operation::Delete, resource, None, Some(params.id)).await?;
        let mut data = self.data.write();
        let not_found = || ProviderError::NotFound { resource: resource.to_string(), id: params.id };
        let rows = data.resources.get_mut(resource).ok_or_else(not_found)?;
        let idx = rows
            .iter()
            .position(|r| record_id(r) == Some(params.id))
            .ok_or_else(not_found)?;
        Ok(rows.remove(idx))
    }
}

fn field_of<'a>(row: &'a Record, field: &str) -> &'a Value {
    row.get(field).unwrap_or(&Value::Null)
}

/// Order two JSON scalars; timestamps compare as instants.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
            (Some(p), Some(q)) => Some(p.cmp(&q)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match compare_values(a, b) {
        Some(ord) => ord == Ordering::Equal,
        None => a == b,
    }
}

/// Evaluate a filter object against a row.
pub fn matches_filter(row: &Record, filter: &Filter) -> bool {
    filter.iter().all(|(key, expected)| {
        if key == "$or" {
            return expected.as_array().is_some_and(|branches| {
                branches.iter().any(|branch| match branch.as_object() {
                    Some(obj) => matches_filter(row, &to_filter(obj)),
                    None => false,
                })
            });
        }
        let (field, op) = parse_filter_key(key);
        let actual = field_of(row, field);
        let ordered = |want: Ordering| compare_values(actual, expected) == Some(want);
        let contains = || {
            expected
                .as_array()
                .is_some_and(|items| items.iter().any(|v| values_equal(actual, v)))
        };
        match op {
            FilterOp::Eq => values_equal(actual, expected),
            FilterOp::Neq => !values_equal(actual, expected),
            FilterOp::Is if expected.is_null() => actual.is_null(),
            FilterOp::Is => values_equal(actual, expected),
            FilterOp::Gt => ordered(Ordering::Greater),
            FilterOp::Gte => ordered(Ordering::Greater) || ordered(Ordering::Equal),
            FilterOp::Lt => ordered(Ordering::Less),
            FilterOp::Lte => ordered(Ordering::Less) || ordered(Ordering::Equal),
            FilterOp::In => contains(),
            FilterOp::NotIn => !contains(),
        }
    })
}

fn to_filter(obj: &Map<String, Value>) -> Filter {
    obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

fn plural(relation: &str) -> String {
    match relation.strip_suffix('y') {
        Some(stem) => format!("{stem}ies"),
        None => format!("{relation}s"),
    }
}

/// Inline `<relation>_id` targets as `<relation>` objects.
fn expand_relations(row: &mut Record, relations: &[String], data: &Dataset) {
    for relation in relations {
        let Some(id) = row.get(format!("{relation}_id")).and_then(Value::as_i64) else {
            continue;
        };
        if let Some(target) = data.get(&plural(relation), id) {
            let target = target.clone();
            if let Some(obj) = row.as_object_mut() {
                obj.insert(relation.clone(), target);
            }
        }
    }
}
