//! Pool cloning under a new protocol.

use std::sync::Arc;

use octavia_api::{
    BatchMemberUpdate, LoadBalancerApi, Member, Monitor, MonitorCreate, Pool, PoolCreate, Protocol,
};
use tracing::{debug, info, instrument};

use crate::error::{CloneStage, MigrateError, MigrateResult};
use crate::settle::SettleWaiter;

/// Builds a batch entry from an existing member.
///
/// Only set fields are forwarded: empty strings, a zero weight and a zero
/// monitor port are left out so Octavia applies its defaults. Address,
/// port and both booleans are always sent.
pub fn translate_member(member: &Member) -> BatchMemberUpdate {
    let non_empty = |s: &Option<String>| s.clone().filter(|v| !v.is_empty());

    BatchMemberUpdate {
        address: member.address.clone(),
        protocol_port: member.protocol_port,
        name: Some(member.name.clone()).filter(|n| !n.is_empty()),
        weight: Some(member.weight).filter(|w| *w != 0),
        subnet_id: non_empty(&member.subnet_id),
        monitor_address: non_empty(&member.monitor_address),
        monitor_port: member.monitor_port.filter(|p| *p > 0),
        admin_state_up: Some(member.admin_state_up),
        backup: Some(member.backup),
        tags: member.tags.clone(),
    }
}

/// Builds a request replicating `monitor` on `pool_id`.
pub fn monitor_request(monitor: &Monitor, pool_id: &str) -> MonitorCreate {
    MonitorCreate {
        pool_id: pool_id.to_string(),
        monitor_type: monitor.monitor_type.clone(),
        delay: monitor.delay,
        timeout: monitor.timeout,
        max_retries: monitor.max_retries,
        url_path: monitor.url_path.clone(),
        http_method: monitor.http_method.clone(),
        expected_codes: monitor.expected_codes.clone(),
        name: monitor.name.clone(),
        admin_state_up: monitor.admin_state_up,
    }
}

/// Creates a copy of a pool with a different protocol, including its health
/// monitor and membership.
#[derive(Clone)]
pub struct PoolCloner {
    api: Arc<dyn LoadBalancerApi>,
    waiter: SettleWaiter,
}

impl PoolCloner {
    pub fn new(api: Arc<dyn LoadBalancerApi>, waiter: SettleWaiter) -> Self {
        Self { api, waiter }
    }

    /// Clones `source` onto `load_balancer_id` with `target` as protocol.
    ///
    /// Members and the health monitor are read before anything is created.
    /// Once the new pool exists, any failure is returned as
    /// [`MigrateError::PartialClone`] and the pool is left in place.
    #[instrument(skip(self, source), fields(pool_id = %source.id, pool_name = %source.name))]
    pub async fn clone_pool(
        &self,
        load_balancer_id: &str,
        source: &Pool,
        target: &Protocol,
    ) -> MigrateResult<Pool> {
        let members = self
            .api
            .list_members(&source.id)
            .await
            .map_err(|e| MigrateError::lookup("pool members", &source.id, e))?;

        let monitor = match source.monitor_id() {
            Some(id) => Some(
                self.api
                    .get_monitor(id)
                    .await
                    .map_err(|e| MigrateError::lookup("health monitor", id, e))?,
            ),
            None => None,
        };

        let request = PoolCreate {
            loadbalancer_id: load_balancer_id.to_string(),
            protocol: target.clone(),
            name: source.name.clone(),
            lb_method: source.lb_method.clone(),
            description: source.description.clone(),
        };
        let mut pool = self
            .api
            .create_pool(&request)
            .await
            .map_err(|e| MigrateError::api("create pool", e))?;
        info!(new_pool_id = %pool.id, protocol = %target, "Created pool");

        let new_pool_id = pool.id.clone();
        let partial = |stage, err| MigrateError::partial_clone(new_pool_id.as_str(), stage, err);

        self.waiter
            .settle(load_balancer_id, "pool create")
            .await
            .map_err(|e| partial(CloneStage::PoolCreate, MigrateError::settle("pool create", e)))?;

        if let Some(monitor) = monitor {
            let created = self
                .api
                .create_monitor(&monitor_request(&monitor, &new_pool_id))
                .await
                .map_err(|e| {
                    partial(
                        CloneStage::HealthMonitor,
                        MigrateError::api("create health monitor", e),
                    )
                })?;
            debug!(
                monitor_id = %created.id,
                monitor_type = %created.monitor_type,
                "Replicated health monitor"
            );

            self.waiter
                .settle(load_balancer_id, "health monitor create")
                .await
                .map_err(|e| {
                    partial(
                        CloneStage::HealthMonitor,
                        MigrateError::settle("health monitor create", e),
                    )
                })?;
            pool.healthmonitor_id = Some(created.id);
        }

        let batch: Vec<BatchMemberUpdate> = members.iter().map(translate_member).collect();
        self.api
            .batch_update_members(&new_pool_id, &batch)
            .await
            .map_err(|e| {
                partial(
                    CloneStage::Members,
                    MigrateError::api("batch update members", e),
                )
            })?;
        self.waiter
            .settle(load_balancer_id, "member batch update")
            .await
            .map_err(|e| {
                partial(
                    CloneStage::Members,
                    MigrateError::settle("member batch update", e),
                )
            })?;
        debug!(count = batch.len(), "Replicated members");

        Ok(pool)
    }
}
