//! Listener cutover and cleanup of the superseded pool.

use std::sync::Arc;

use octavia_api::LoadBalancerApi;
use tracing::{info, instrument};

use crate::error::{MigrateError, MigrateResult};
use crate::settle::SettleWaiter;

/// What to do with a listener once its target pool exists.
///
/// There is no way to express deleting the old pool without switching the
/// listener away from it first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CutoverPlan {
    /// Leave the listener untouched.
    Keep,
    /// Point the listener's default pool at the new pool.
    Switch,
    /// Switch, then delete the old pool.
    SwitchAndDelete { old_pool_id: String },
}

impl CutoverPlan {
    /// Builds a plan from command-line flags. `delete` implies `switch`.
    pub fn from_flags(switch: bool, delete: bool, old_pool_id: &str) -> Self {
        match (switch, delete) {
            (_, true) => CutoverPlan::SwitchAndDelete {
                old_pool_id: old_pool_id.to_string(),
            },
            (true, false) => CutoverPlan::Switch,
            (false, false) => CutoverPlan::Keep,
        }
    }

    pub fn switches(&self) -> bool {
        !matches!(self, CutoverPlan::Keep)
    }

    /// Returns the pool to delete, if any.
    pub fn old_pool_to_delete(&self) -> Option<&str> {
        match self {
            CutoverPlan::SwitchAndDelete { old_pool_id } => Some(old_pool_id),
            _ => None,
        }
    }
}

/// Outcome of a cutover.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CutoverSummary {
    /// The listener's default pool is the new pool.
    pub switched: bool,
    /// The old pool was deleted.
    pub deleted_old: bool,
}

/// Repoints listeners and removes superseded pools.
#[derive(Clone)]
pub struct CutoverController {
    api: Arc<dyn LoadBalancerApi>,
    waiter: SettleWaiter,
}

impl CutoverController {
    pub fn new(api: Arc<dyn LoadBalancerApi>, waiter: SettleWaiter) -> Self {
        Self { api, waiter }
    }

    #[instrument(skip(self))]
    pub async fn cutover(
        &self,
        listener_id: &str,
        load_balancer_id: &str,
        new_pool_id: &str,
        plan: &CutoverPlan,
    ) -> MigrateResult<CutoverSummary> {
        let mut summary = CutoverSummary::default();
        if !plan.switches() {
            return Ok(summary);
        }

        let listener = self
            .api
            .get_listener(listener_id)
            .await
            .map_err(|e| MigrateError::lookup("listener", listener_id, e))?;

        if listener.default_pool() == Some(new_pool_id) {
            info!("Listener already uses the new pool as default");
        } else {
            self.api
                .update_listener_default_pool(listener_id, new_pool_id)
                .await
                .map_err(|e| MigrateError::api("update listener default pool", e))?;
            self.waiter
                .settle(load_balancer_id, "listener update")
                .await
                .map_err(|e| MigrateError::settle("listener update", e))?;
            info!(previous_pool_id = ?listener.default_pool(), "Switched listener default pool");
        }
        summary.switched = true;

        if let Some(old_pool_id) = plan.old_pool_to_delete() {
            // Any listener of the load balancer may share the old pool.
            let listeners = self
                .api
                .list_listeners(load_balancer_id)
                .await
                .map_err(|e| {
                    MigrateError::lookup("listeners of load balancer", load_balancer_id, e)
                })?;
            if let Some(holder) = listeners.iter().find(|l| l.default_pool() == Some(old_pool_id)) {
                return Err(MigrateError::PoolStillDefault {
                    listener_id: holder.id.clone(),
                    pool_id: old_pool_id.to_string(),
                });
            }

            self.api
                .delete_pool(old_pool_id)
                .await
                .map_err(|e| MigrateError::api("delete pool", e))?;
            self.waiter
                .settle(load_balancer_id, "pool delete")
                .await
                .map_err(|e| MigrateError::settle("pool delete", e))?;
            info!(old_pool_id, "Deleted superseded pool");
            summary.deleted_old = true;
        }

        Ok(summary)
    }
}
