//! The control-plane capability trait.

use async_trait::async_trait;

use crate::error::ApiResult;
use crate::types::{
    BatchMemberUpdate, Listener, LoadBalancer, Member, Monitor, MonitorCreate, Pool, PoolCreate,
};

/// Operations the pool migrator needs from the load-balancing control plane.
///
/// [`crate::OctaviaClient`] implements this against the real Octavia API;
/// tests substitute an in-memory implementation. List operations return the
/// complete, ordered result set (implementations handle pagination).
///
/// Mutating operations (`create_*`, `update_*`, `delete_*`, `batch_*`)
/// put the owning load balancer into a `PENDING_*` provisioning state.
/// Callers must wait for `ACTIVE` before issuing the next one.
#[async_trait]
pub trait LoadBalancerApi: Send + Sync {
    /// Fetches a load balancer by id.
    async fn get_load_balancer(&self, id: &str) -> ApiResult<LoadBalancer>;

    /// Lists all listeners of a load balancer.
    async fn list_listeners(&self, load_balancer_id: &str) -> ApiResult<Vec<Listener>>;

    /// Fetches a listener by id.
    async fn get_listener(&self, id: &str) -> ApiResult<Listener>;

    /// Points a listener's default pool at `pool_id`.
    async fn update_listener_default_pool(
        &self,
        listener_id: &str,
        pool_id: &str,
    ) -> ApiResult<Listener>;

    /// Lists all pools of a load balancer.
    async fn list_pools(&self, load_balancer_id: &str) -> ApiResult<Vec<Pool>>;

    /// Creates a pool.
    async fn create_pool(&self, request: &PoolCreate) -> ApiResult<Pool>;

    /// Deletes a pool.
    async fn delete_pool(&self, id: &str) -> ApiResult<()>;

    /// Fetches a health monitor by id.
    async fn get_monitor(&self, id: &str) -> ApiResult<Monitor>;

    /// Creates a health monitor.
    async fn create_monitor(&self, request: &MonitorCreate) -> ApiResult<Monitor>;

    /// Lists all members of a pool.
    async fn list_members(&self, pool_id: &str) -> ApiResult<Vec<Member>>;

    /// Replaces the membership of a pool with `members`.
    async fn batch_update_members(
        &self,
        pool_id: &str,
        members: &[BatchMemberUpdate],
    ) -> ApiResult<()>;
}
