//! Top-level migration driver.
//!
//! Resolves the listeners in scope, then for each one in turn runs
//! selection, cloning and cutover. Listeners are independent: a failure is
//! recorded in the report and the run moves on to the next listener.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use octavia_api::{Listener, LoadBalancerApi, Pool, Protocol};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::cloner::PoolCloner;
use crate::cutover::{CutoverController, CutoverPlan};
use crate::error::{MigrateError, MigrateResult};
use crate::matcher::{select_migration_targets, Selection};
use crate::report::{ListenerOutcome, ListenerReport, MigrationReport};
use crate::settle::{SettleConfig, SettleWaiter};

/// Which listeners a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationScope {
    /// Every listener of the load balancer.
    LoadBalancer(String),
    /// A single listener.
    Listener(String),
}

impl MigrationScope {
    /// Builds a scope from the command-line ids; exactly one must be given.
    pub fn from_ids(
        load_balancer_id: Option<String>,
        listener_id: Option<String>,
    ) -> MigrateResult<Self> {
        let non_empty = |id: Option<String>| id.filter(|s| !s.trim().is_empty());
        match (non_empty(load_balancer_id), non_empty(listener_id)) {
            (Some(lb), None) => Ok(MigrationScope::LoadBalancer(lb)),
            (None, Some(listener)) => Ok(MigrationScope::Listener(listener)),
            (Some(_), Some(_)) => Err(MigrateError::setup(
                "specify either a load balancer id or a listener id, not both",
            )),
            (None, None) => Err(MigrateError::setup(
                "a load balancer id or a listener id is required",
            )),
        }
    }
}

/// Cutover behaviour requested for the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CutoverFlags {
    pub switch_default_pool: bool,
    /// Delete the superseded pool; implies `switch_default_pool`.
    pub delete_old_pool: bool,
}

/// Drives a migration run.
pub struct Orchestrator {
    api: Arc<dyn LoadBalancerApi>,
    waiter: SettleWaiter,
    cloner: PoolCloner,
    cutover: CutoverController,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        api: Arc<dyn LoadBalancerApi>,
        settle: SettleConfig,
        cancel: CancellationToken,
    ) -> Self {
        let waiter = SettleWaiter::new(api.clone(), settle, cancel.clone());
        Self {
            cloner: PoolCloner::new(api.clone(), waiter.clone()),
            cutover: CutoverController::new(api.clone(), waiter.clone()),
            api,
            waiter,
            cancel,
        }
    }

    /// Migrates every listener in `scope` to `target`.
    ///
    /// # Errors
    ///
    /// Only scope resolution fails the run as a whole (unknown listener or
    /// load balancer, no listeners, pool listing failure). Per-listener
    /// failures are reported in the returned [`MigrationReport`].
    #[instrument(skip(self))]
    pub async fn run(
        &self,
        scope: &MigrationScope,
        target: &Protocol,
        flags: CutoverFlags,
    ) -> MigrateResult<MigrationReport> {
        let started_at = Utc::now();
        let (load_balancer_id, listeners) = self.resolve_scope(scope).await?;

        let pools = self
            .api
            .list_pools(&load_balancer_id)
            .await
            .map_err(|e| MigrateError::lookup("pools of load balancer", &load_balancer_id, e))?;
        info!(
            load_balancer_id = %load_balancer_id,
            listeners = listeners.len(),
            pools = pools.len(),
            target = %target,
            "Starting pool migration"
        );

        // Clones made during this run, keyed by source pool id.
        let mut created: HashMap<String, Pool> = HashMap::new();
        let mut rows = Vec::with_capacity(listeners.len());
        for listener in &listeners {
            let outcome = if self.cancel.is_cancelled() {
                warn!(listener_id = %listener.id, "Run cancelled, skipping listener");
                ListenerOutcome::Cancelled
            } else {
                self.migrate_listener(
                    &load_balancer_id,
                    listener,
                    &pools,
                    &mut created,
                    target,
                    flags,
                )
                .await
            };
            rows.push(ListenerReport {
                listener_id: listener.id.clone(),
                listener_name: listener.name.clone(),
                protocol_port: listener.protocol_port,
                outcome,
            });
        }

        Ok(MigrationReport::new(
            load_balancer_id,
            target.clone(),
            started_at,
            rows,
        ))
    }

    /// Returns the load balancer id and the listeners to process.
    async fn resolve_scope(
        &self,
        scope: &MigrationScope,
    ) -> MigrateResult<(String, Vec<Listener>)> {
        match scope {
            MigrationScope::Listener(listener_id) => {
                let listener = self
                    .api
                    .get_listener(listener_id)
                    .await
                    .map_err(|e| MigrateError::lookup("listener", listener_id, e))?;
                let lb_id = listener
                    .load_balancer_id()
                    .map(str::to_string)
                    .ok_or_else(|| {
                        MigrateError::setup(format!(
                            "listener '{}' does not reference a load balancer",
                            listener_id
                        ))
                    })?;
                Ok((lb_id, vec![listener]))
            }
            MigrationScope::LoadBalancer(lb_id) => {
                let listeners = self
                    .api
                    .list_listeners(lb_id)
                    .await
                    .map_err(|e| MigrateError::lookup("listeners of load balancer", lb_id, e))?;
                if listeners.is_empty() {
                    return Err(MigrateError::NoListeners {
                        load_balancer_id: lb_id.clone(),
                    });
                }
                Ok((lb_id.clone(), listeners))
            }
        }
    }

    #[instrument(
        skip_all,
        fields(listener_id = %listener.id, load_balancer_id = %load_balancer_id)
    )]
    async fn migrate_listener(
        &self,
        load_balancer_id: &str,
        listener: &Listener,
        pools: &[Pool],
        created: &mut HashMap<String, Pool>,
        target: &Protocol,
        flags: CutoverFlags,
    ) -> ListenerOutcome {
        let (source, existing) = match select_migration_targets(listener, pools, target) {
            Selection::NothingToMigrate => {
                info!("Nothing to migrate");
                return ListenerOutcome::NothingToMigrate;
            }
            Selection::Ambiguous { pool_ids } => {
                warn!(?pool_ids, "Ambiguous: multiple non-conforming pools, skipping");
                return ListenerOutcome::Ambiguous { pool_ids };
            }
            Selection::Migrate {
                source,
                existing_target,
            } => {
                let existing = existing_target.or_else(|| created.get(&source.id).cloned());
                (source, existing)
            }
        };

        let plan = CutoverPlan::from_flags(
            flags.switch_default_pool,
            flags.delete_old_pool,
            &source.id,
        );
        let fail = |err: &MigrateError, new_pool_id: Option<&str>| {
            error!(pool_id = %source.id, error = %err, "Listener migration failed");
            ListenerOutcome::failed(err, Some(source.id.as_str()), new_pool_id)
        };

        if existing.is_none() || plan.switches() {
            if let Err(e) = self.waiter.ensure_active(load_balancer_id).await {
                return fail(&MigrateError::settle("pre-flight check", e), None);
            }
        }

        let (new_pool, reused_existing) = match existing {
            Some(pool) => {
                info!(pool_id = %source.id, new_pool_id = %pool.id, "Target pool already exists");
                (pool, true)
            }
            None => match self.cloner.clone_pool(load_balancer_id, &source, target).await {
                Ok(pool) => {
                    created.insert(source.id.clone(), pool.clone());
                    (pool, false)
                }
                Err(err) => return fail(&err, None),
            },
        };

        let summary = match self
            .cutover
            .cutover(&listener.id, load_balancer_id, &new_pool.id, &plan)
            .await
        {
            Ok(summary) => summary,
            Err(err) => return fail(&err, Some(new_pool.id.as_str())),
        };

        info!(
            pool_id = %source.id,
            new_pool_id = %new_pool.id,
            switched = summary.switched,
            deleted_old = summary.deleted_old,
            "Listener migrated"
        );
        ListenerOutcome::Migrated {
            source_pool_id: source.id.clone(),
            new_pool_id: new_pool.id,
            reused_existing,
            switched: summary.switched,
            deleted_old: summary.deleted_old,
        }
    }
}
