//! Recently viewed records.
//!
//! `RecentItems` is an observable store: consumers read an immutable snapshot
//! and register listeners that fire after every change. The list holds at most
//! [`MAX_RECENT_ITEMS`] entries, most recent first, one per resource+id.
//! Changes are written through a [`RecentStorage`]; picking up writes made by
//! another process is an explicit [`RecentItems::reload`].

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

pub const MAX_RECENT_ITEMS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentItem {
    pub resource: String,
    pub id: i64,
    pub label: String,
    pub viewed_at: DateTime<Utc>,
}

impl RecentItem {
    fn same_record(&self, other: &RecentItem) -> bool {
        self.resource == other.resource && self.id == other.id
    }
}

/// Where the list lives between runs.
pub trait RecentStorage: Send + Sync {
    fn load(&self) -> Result<Vec<RecentItem>>;
    fn save(&self, items: &[RecentItem]) -> Result<()>;
}

/// JSON file next to the data file.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStorage { path: path.into() }
    }
}

impl RecentStorage for JsonFileStorage {
    fn load(&self) -> Result<Vec<RecentItem>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&data)?)
    }

    fn save(&self, items: &[RecentItem]) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let mut f = File::create(&tmp)?;
        f.write_all(serde_json::to_string_pretty(items)?.as_bytes())?;
        f.flush()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Keeps the list in memory only.
#[derive(Debug, Default)]
pub struct MemoryStorage(Mutex<Vec<RecentItem>>);

impl RecentStorage for MemoryStorage {
    fn load(&self) -> Result<Vec<RecentItem>> {
        Ok(self.0.lock().clone())
    }

    fn save(&self, items: &[RecentItem]) -> Result<()> {
        *self.0.lock() = items.to_vec();
        Ok(())
    }
}

type Listener = Arc<dyn Fn(&[RecentItem]) + Send + Sync>;

struct Inner {
    items: RwLock<Arc<Vec<RecentItem>>>,
    listeners: Mutex<BTreeMap<u64, Listener>>,
    next_listener: AtomicU64,
    storage: Box<dyn RecentStorage>,
}

/// Removes its listener when dropped.
#[must_use = "dropping the handle unsubscribes immediately"]
pub struct Unsubscribe {
    inner: Weak<Inner>,
    id: u64,
}

impl Unsubscribe {
    pub fn unsubscribe(self) {}
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.listeners.lock().remove(&self.id);
        }
    }
}

#[derive(Clone)]
pub struct RecentItems {
    inner: Arc<Inner>,
}

impl RecentItems {
    /// Open the store, seeding it from `storage`. A corrupt store starts empty.
    pub fn new(storage: Box<dyn RecentStorage>) -> Self {
        let items = storage.load().unwrap_or_else(|e| {
            warn!(feature = "recent", error = %e, "discarding unreadable recent items");
            Vec::new()
        });
        RecentItems {
            inner: Arc::new(Inner {
                items: RwLock::new(Arc::new(normalize(items))),
                listeners: Mutex::new(BTreeMap::new()),
                next_listener: AtomicU64::new(0),
                storage,
            }),
        }
    }

    /// The current list. The same `Arc` is returned until the list changes.
    pub fn snapshot(&self) -> Arc<Vec<RecentItem>> {
        self.inner.items.read().clone()
    }

    pub fn subscribe(&self, listener: impl Fn(&[RecentItem]) + Send + Sync + 'static) -> Unsubscribe {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().insert(id, Arc::new(listener));
        Unsubscribe { inner: Arc::downgrade(&self.inner), id }
    }

    /// Record a view, moving an existing entry for the same record to the front.
    pub fn add(&self, item: RecentItem) {
        let mut items = vec![item];
        items.extend(self.snapshot().iter().cloned());
        self.replace(normalize(items), true);
    }

    pub fn clear(&self) {
        self.replace(Vec::new(), true);
    }

    /// Re-read storage, notifying listeners if the list changed.
    pub fn reload(&self) -> Result<()> {
        let items = normalize(self.inner.storage.load()?);
        if items != *self.snapshot() {
            self.replace(items, false);
        }
        Ok(())
    }

    fn replace(&self, items: Vec<RecentItem>, persist: bool) {
        let snapshot = Arc::new(items);
        *self.inner.items.write() = snapshot.clone();
        if persist {
            if let Err(e) = self.inner.storage.save(snapshot.as_slice()) {
                warn!(feature = "recent", error = %e, "failed to persist recent items");
            }
        }
        let listeners: Vec<Listener> = self.inner.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener(snapshot.as_slice());
        }
    }
}

/// Dedupe keeping the first occurrence, then cap the length.
fn normalize(items: Vec<RecentItem>) -> Vec<RecentItem> {
    let mut out: Vec<RecentItem> = Vec::with_capacity(MAX_RECENT_ITEMS);
    for item in items {
        if out.len() == MAX_RECENT_ITEMS {
            break;
        }
        if !out.iter().any(|seen| seen.same_record(&item)) {
            out.push(item);
        }
    }
    out
}
