//! Principal pipeline table.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::aggregate::{guarded, Effect};
use crate::fields::Momentum;
use crate::identity::IdentityService;
use crate::provider::{DataProvider, ListParams, SortOrder};

pub const PIPELINE_RESOURCE: &str = "principal_pipeline_summary";
pub const PIPELINE_PAGE_SIZE: u32 = 100;

/// One principal organization's pipeline summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRow {
    #[serde(rename = "principal_id")]
    pub id: i64,
    #[serde(rename = "principal_name")]
    pub name: String,
    #[serde(default)]
    pub total_pipeline: f64,
    #[serde(default)]
    pub active_this_week: u64,
    #[serde(default)]
    pub active_last_week: u64,
    #[serde(default)]
    pub momentum: Momentum,
    #[serde(default)]
    pub next_action_summary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineSnapshot {
    pub rows: Vec<PipelineRow>,
    pub loading: bool,
    pub error: Option<String>,
}

pub struct PipelineService {
    provider: Arc<dyn DataProvider>,
    identity: Arc<dyn IdentityService>,
    effect: Effect,
    state: Mutex<PipelineSnapshot>,
}

impl PipelineService {
    pub fn new(provider: Arc<dyn DataProvider>, identity: Arc<dyn IdentityService>) -> Self {
        PipelineService {
            provider,
            identity,
            effect: Effect::default(),
            state: Mutex::new(PipelineSnapshot { loading: true, ..Default::default() }),
        }
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.state.lock().clone()
    }

    pub fn teardown(&self) {
        self.effect.teardown();
    }

    /// Reload the table, optionally only principals assigned to the current rep.
    ///
    /// On failure the rows of the last successful load stay in place.
    pub async fn load(&self, my_principals_only: bool) {
        let token = self.effect.begin();
        self.state.lock().loading = true;

        let mut params = ListParams::new()
            .sort("total_pipeline", SortOrder::Desc)
            .page(1, PIPELINE_PAGE_SIZE);
        if my_principals_only {
            match guarded(&token, self.identity.current_sales_id()).await {
                None => return,
                Some(Ok(Some(id))) => params = params.filter("sales_id", id),
                Some(Ok(None)) => {
                    if !token.is_cancelled() {
                        *self.state.lock() = PipelineSnapshot::default();
                    }
                    return;
                }
                Some(Err(e)) => {
                    self.fail(&token, e.to_string());
                    return;
                }
            }
        }

        let Some(result) = guarded(&token, self.provider.list(PIPELINE_RESOURCE, params)).await else {
            debug!(feature = "pipeline", "discarding results of a superseded load");
            return;
        };
        let list = match result {
            Ok(list) => list,
            Err(e) => {
                self.fail(&token, e.to_string());
                return;
            }
        };
        let rows: Vec<PipelineRow> = list
            .data
            .into_iter()
            .filter_map(|row| match serde_json::from_value(row) {
                Ok(row) => Some(row),
                Err(e) => {
                    warn!(feature = "pipeline", error = %e, "skipping malformed pipeline row");
                    None
                }
            })
            .collect();

        let mut st = self.state.lock();
        if !token.is_cancelled() {
            *st = PipelineSnapshot { rows, loading: false, error: None };
        }
    }

    fn fail(&self, token: &tokio_util::sync::CancellationToken, message: String) {
        error!(feature = "pipeline", error = %message, "failed to load principal pipeline");
        let mut st = self.state.lock();
        if !token.is_cancelled() {
            st.loading = false;
            st.error = Some(message);
        }
    }
}
