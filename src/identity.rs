//! Resolution of the current user's sales identity.
//!
//! Every aggregate fetcher gates on this before issuing queries. Two
//! implementations are chosen at construction time: `DirectIdentity` asks the
//! backend every time, `CachedIdentity` memoises another service's first
//! successful answer so nested consumers share one lookup.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{Error, Result};
use crate::provider::{DataProvider, ListParams};

pub type SalesId = i64;

#[async_trait]
pub trait IdentityService: Send + Sync {
    /// `Ok(None)` means nobody is signed in.
    async fn current_sales_id(&self) -> Result<Option<SalesId>>;
}

/// Looks the user up in the `sales` resource on every call.
pub struct DirectIdentity {
    provider: Arc<dyn DataProvider>,
    user_id: Option<String>,
}

impl DirectIdentity {
    pub fn new(provider: Arc<dyn DataProvider>, user_id: Option<String>) -> Self {
        DirectIdentity { provider, user_id }
    }
}

#[async_trait]
impl IdentityService for DirectIdentity {
    async fn current_sales_id(&self) -> Result<Option<SalesId>> {
        let Some(user_id) = self.user_id.as_deref() else {
            return Ok(None);
        };
        let res = self
            .provider
            .list("sales", ListParams::new().filter("user_id", user_id).page(1, 1))
            .await
            .map_err(|e| Error::Identity(e.to_string()))?;
        let id = res.data.first().and_then(|r| r.get("id")).and_then(Value::as_i64);
        debug!(user_id, sales_id = ?id, "resolved sales identity");
        Ok(id)
    }
}

/// Memoises the first successful resolution of the wrapped service.
pub struct CachedIdentity {
    inner: Arc<dyn IdentityService>,
    cell: OnceCell<Option<SalesId>>,
}

impl CachedIdentity {
    pub fn new(inner: Arc<dyn IdentityService>) -> Self {
        CachedIdentity { inner, cell: OnceCell::new() }
    }
}

#[async_trait]
impl IdentityService for CachedIdentity {
    async fn current_sales_id(&self) -> Result<Option<SalesId>> {
        self.cell
            .get_or_try_init(|| self.inner.current_sales_id())
            .await
            .copied()
    }
}

/// A fixed identity, for tests and offline tooling.
#[derive(Debug, Clone, Copy)]
pub struct StaticIdentity(pub Option<SalesId>);

#[async_trait]
impl IdentityService for StaticIdentity {
    async fn current_sales_id(&self) -> Result<Option<SalesId>> {
        Ok(self.0)
    }
}
