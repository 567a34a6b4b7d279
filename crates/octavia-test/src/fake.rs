//! In-memory [`LoadBalancerApi`] implementation.
//!
//! The fake enforces the two rules the migrator depends on:
//!
//! - every mutation moves the owning load balancer to `PENDING_UPDATE` for a
//!   configurable number of status polls before it reports `ACTIVE` again
//! - a mutation issued while the load balancer is not `ACTIVE` is rejected
//!   with [`ApiError::Conflict`], as Octavia does
//!
//! Every call is recorded as a [`Call`] so tests can assert on ordering.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use octavia_api::{
    ApiError, ApiResult, BatchMemberUpdate, Listener, LoadBalancer, LoadBalancerApi, Member,
    Monitor, MonitorCreate, Pool, PoolCreate, ProvisioningStatus, ResourceRef,
};
use parking_lot::Mutex;
use tracing::debug;

/// A recorded API call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetLoadBalancer(String),
    ListListeners(String),
    GetListener(String),
    UpdateListenerDefaultPool { listener_id: String, pool_id: String },
    ListPools(String),
    CreatePool(PoolCreate),
    DeletePool(String),
    GetMonitor(String),
    CreateMonitor(MonitorCreate),
    ListMembers(String),
    BatchUpdateMembers {
        pool_id: String,
        members: Vec<BatchMemberUpdate>,
    },
}

impl Call {
    /// Returns true for calls that change control-plane state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Call::UpdateListenerDefaultPool { .. }
                | Call::CreatePool(_)
                | Call::DeletePool(_)
                | Call::CreateMonitor(_)
                | Call::BatchUpdateMembers { .. }
        )
    }

    /// Returns true for a provisioning-status poll.
    pub fn is_status_poll(&self) -> bool {
        matches!(self, Call::GetLoadBalancer(_))
    }

    fn fail_point(&self) -> FailPoint {
        match self {
            Call::GetLoadBalancer(_) => FailPoint::GetLoadBalancer,
            Call::ListListeners(_) => FailPoint::ListListeners,
            Call::GetListener(_) => FailPoint::GetListener,
            Call::UpdateListenerDefaultPool { .. } => FailPoint::UpdateListener,
            Call::ListPools(_) => FailPoint::ListPools,
            Call::CreatePool(_) => FailPoint::CreatePool,
            Call::DeletePool(_) => FailPoint::DeletePool,
            Call::GetMonitor(_) => FailPoint::GetMonitor,
            Call::CreateMonitor(_) => FailPoint::CreateMonitor,
            Call::ListMembers(_) => FailPoint::ListMembers,
            Call::BatchUpdateMembers { .. } => FailPoint::BatchUpdateMembers,
        }
    }
}

/// Operation at which an injected failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    GetLoadBalancer,
    ListListeners,
    GetListener,
    UpdateListener,
    ListPools,
    CreatePool,
    DeletePool,
    GetMonitor,
    CreateMonitor,
    ListMembers,
    BatchUpdateMembers,
}

#[derive(Debug)]
struct LbState {
    lb: LoadBalancer,
    pending_remaining: u32,
    forced: Option<ProvisioningStatus>,
}

impl LbState {
    fn status(&self) -> ProvisioningStatus {
        match &self.forced {
            Some(status) => status.clone(),
            None if self.pending_remaining > 0 => ProvisioningStatus::PendingUpdate,
            None => ProvisioningStatus::Active,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    load_balancers: BTreeMap<String, LbState>,
    listeners: Vec<Listener>,
    pools: Vec<Pool>,
    monitors: HashMap<String, Monitor>,
    members: HashMap<String, Vec<Member>>,
    calls: Vec<Call>,
    failures: HashMap<FailPoint, Vec<ApiError>>,
    pending_polls: u32,
    next_id: u64,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-new-{}", prefix, self.next_id)
    }

    fn lb_mut(&mut self, id: &str) -> ApiResult<&mut LbState> {
        self.load_balancers
            .get_mut(id)
            .ok_or_else(|| ApiError::not_found("load balancer", id))
    }

    fn pool(&self, id: &str) -> ApiResult<&Pool> {
        self.pools
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| ApiError::not_found("pool", id))
    }

    fn pool_lb(&self, pool_id: &str) -> ApiResult<String> {
        self.pool(pool_id)?
            .loadbalancers
            .first()
            .map(|r| r.id.clone())
            .ok_or_else(|| ApiError::api(500, format!("pool {} has no load balancer", pool_id)))
    }

    fn listener_lb(&self, listener_id: &str) -> ApiResult<String> {
        self.listeners
            .iter()
            .find(|l| l.id == listener_id)
            .ok_or_else(|| ApiError::not_found("listener", listener_id))?
            .load_balancer_id()
            .map(str::to_string)
            .ok_or_else(|| {
                ApiError::api(500, format!("listener {} has no load balancer", listener_id))
            })
    }

    /// Rejects the mutation unless the load balancer is `ACTIVE`, then marks
    /// it pending.
    fn begin_mutation(&mut self, lb_id: &str) -> ApiResult<()> {
        let pending_polls = self.pending_polls;
        let lb = self.lb_mut(lb_id)?;
        let status = lb.status();
        if !status.is_active() {
            return Err(ApiError::conflict(format!(
                "Load Balancer {} is immutable and cannot be updated (status {})",
                lb_id, status
            )));
        }
        lb.pending_remaining = pending_polls;
        Ok(())
    }

    /// Records the call and fires any injected failure for it.
    fn record(&mut self, call: Call) -> ApiResult<()> {
        let point = call.fail_point();
        self.calls.push(call);
        match self.failures.get_mut(&point) {
            Some(queue) if !queue.is_empty() => Err(queue.remove(0)),
            _ => Ok(()),
        }
    }

    /// Returns a pool with its listener back-references filled in.
    fn materialize(&self, pool: &Pool) -> Pool {
        let mut pool = pool.clone();
        for listener in &self.listeners {
            if listener.default_pool() == Some(pool.id.as_str()) && !pool.is_bound_to(&listener.id)
            {
                pool.listeners.push(ResourceRef::new(&listener.id));
            }
        }
        pool
    }
}

/// In-memory control plane.
#[derive(Debug, Default)]
pub struct FakeLoadBalancerApi {
    state: Mutex<State>,
}

impl FakeLoadBalancerApi {
    /// Creates an empty control plane where mutations settle after one
    /// `PENDING_UPDATE` poll.
    pub fn new() -> Self {
        let fake = Self::default();
        fake.state.lock().pending_polls = 1;
        fake
    }

    /// Sets how many status polls report `PENDING_UPDATE` after a mutation.
    pub fn with_pending_polls(self, polls: u32) -> Self {
        self.state.lock().pending_polls = polls;
        self
    }

    pub fn add_load_balancer(&self, lb: LoadBalancer) {
        let forced = (!lb.provisioning_status.is_active()).then(|| lb.provisioning_status.clone());
        self.state.lock().load_balancers.insert(
            lb.id.clone(),
            LbState {
                lb,
                pending_remaining: 0,
                forced,
            },
        );
    }

    /// Adds a listener. Its default pool's back-reference is derived.
    pub fn add_listener(&self, listener: Listener) {
        self.state.lock().listeners.push(listener);
    }

    /// Adds a pool with its members and optional health monitor.
    pub fn add_pool(&self, pool: Pool, members: Vec<Member>, monitor: Option<Monitor>) {
        let mut state = self.state.lock();
        let mut pool = pool;
        if let Some(monitor) = monitor {
            pool.healthmonitor_id = Some(monitor.id.clone());
            state.monitors.insert(monitor.id.clone(), monitor);
        }
        state.members.insert(pool.id.clone(), members);
        state.pools.push(pool);
    }

    /// Pins the provisioning status of a load balancer (e.g. `ERROR` or a
    /// `PENDING_*` state that never clears). `ACTIVE` releases the pin.
    pub fn force_status(&self, lb_id: &str, status: ProvisioningStatus) {
        if let Some(lb) = self.state.lock().load_balancers.get_mut(lb_id) {
            lb.pending_remaining = 0;
            lb.forced = (!status.is_active()).then_some(status);
        }
    }

    /// Makes the next call at `point` fail with `error`. Errors queued for
    /// the same point fire in order, one per call.
    pub fn fail_next(&self, point: FailPoint, error: ApiError) {
        self.state
            .lock()
            .failures
            .entry(point)
            .or_default()
            .push(error);
    }

    /// Returns all recorded calls.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Returns the recorded mutating calls.
    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    /// Returns the number of status polls recorded.
    pub fn status_polls(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.is_status_poll())
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Returns the current pools of a load balancer, in creation order.
    pub fn pools(&self, lb_id: &str) -> Vec<Pool> {
        let state = self.state.lock();
        state
            .pools
            .iter()
            .filter(|p| p.loadbalancers.iter().any(|r| r.id == lb_id))
            .map(|p| state.materialize(p))
            .collect()
    }

    /// Returns a pool by id.
    pub fn pool(&self, pool_id: &str) -> Option<Pool> {
        let state = self.state.lock();
        state.pool(pool_id).ok().map(|p| state.materialize(p))
    }

    pub fn listener(&self, listener_id: &str) -> Option<Listener> {
        self.state
            .lock()
            .listeners
            .iter()
            .find(|l| l.id == listener_id)
            .cloned()
    }

    pub fn members(&self, pool_id: &str) -> Vec<Member> {
        self.state
            .lock()
            .members
            .get(pool_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn monitor(&self, monitor_id: &str) -> Option<Monitor> {
        self.state.lock().monitors.get(monitor_id).cloned()
    }

    /// Returns the current provisioning status without recording a poll.
    pub fn status(&self, lb_id: &str) -> Option<ProvisioningStatus> {
        self.state
            .lock()
            .load_balancers
            .get(lb_id)
            .map(LbState::status)
    }
}

#[async_trait]
impl LoadBalancerApi for FakeLoadBalancerApi {
    async fn get_load_balancer(&self, id: &str) -> ApiResult<LoadBalancer> {
        let mut state = self.state.lock();
        state.record(Call::GetLoadBalancer(id.to_string()))?;
        let lb = state.lb_mut(id)?;
        let status = lb.status();
        if lb.forced.is_none() && lb.pending_remaining > 0 {
            lb.pending_remaining -= 1;
        }
        let mut snapshot = lb.lb.clone();
        snapshot.provisioning_status = status;
        Ok(snapshot)
    }

    async fn list_listeners(&self, load_balancer_id: &str) -> ApiResult<Vec<Listener>> {
        let mut state = self.state.lock();
        state.record(Call::ListListeners(load_balancer_id.to_string()))?;
        if !state.load_balancers.contains_key(load_balancer_id) {
            return Err(ApiError::not_found("load balancer", load_balancer_id));
        }
        Ok(state
            .listeners
            .iter()
            .filter(|l| l.load_balancer_id() == Some(load_balancer_id))
            .cloned()
            .collect())
    }

    async fn get_listener(&self, id: &str) -> ApiResult<Listener> {
        let mut state = self.state.lock();
        state.record(Call::GetListener(id.to_string()))?;
        state
            .listeners
            .iter()
            .find(|l| l.id == id)
            .cloned()
            .ok_or_else(|| ApiError::not_found("listener", id))
    }

    async fn update_listener_default_pool(
        &self,
        listener_id: &str,
        pool_id: &str,
    ) -> ApiResult<Listener> {
        let mut state = self.state.lock();
        state.record(Call::UpdateListenerDefaultPool {
            listener_id: listener_id.to_string(),
            pool_id: pool_id.to_string(),
        })?;
        let lb_id = state.listener_lb(listener_id)?;
        state.pool(pool_id)?;
        state.begin_mutation(&lb_id)?;

        let listener = state
            .listeners
            .iter_mut()
            .find(|l| l.id == listener_id)
            .ok_or_else(|| ApiError::not_found("listener", listener_id))?;
        listener.default_pool_id = Some(pool_id.to_string());
        debug!(listener_id, pool_id, "Fake listener default pool updated");
        Ok(listener.clone())
    }

    async fn list_pools(&self, load_balancer_id: &str) -> ApiResult<Vec<Pool>> {
        {
            let mut state = self.state.lock();
            state.record(Call::ListPools(load_balancer_id.to_string()))?;
            if !state.load_balancers.contains_key(load_balancer_id) {
                return Err(ApiError::not_found("load balancer", load_balancer_id));
            }
        }
        Ok(self.pools(load_balancer_id))
    }

    async fn create_pool(&self, request: &PoolCreate) -> ApiResult<Pool> {
        let mut state = self.state.lock();
        state.record(Call::CreatePool(request.clone()))?;
        state.begin_mutation(&request.loadbalancer_id)?;

        let pool = Pool {
            id: state.next_id("pool"),
            name: request.name.clone(),
            protocol: request.protocol.clone(),
            lb_method: request.lb_method.clone(),
            description: request.description.clone(),
            healthmonitor_id: None,
            listeners: Vec::new(),
            loadbalancers: vec![ResourceRef::new(&request.loadbalancer_id)],
        };
        state.members.insert(pool.id.clone(), Vec::new());
        state.pools.push(pool.clone());
        debug!(pool_id = %pool.id, protocol = %pool.protocol, "Fake pool created");
        Ok(pool)
    }

    async fn delete_pool(&self, id: &str) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.record(Call::DeletePool(id.to_string()))?;
        let lb_id = state.pool_lb(id)?;
        if let Some(listener) = state.listeners.iter().find(|l| l.default_pool() == Some(id)) {
            return Err(ApiError::conflict(format!(
                "Pool {} is the default pool of listener {}",
                id, listener.id
            )));
        }
        state.begin_mutation(&lb_id)?;

        let monitor_id = state.pool(id)?.monitor_id().map(str::to_string);
        if let Some(monitor_id) = monitor_id {
            state.monitors.remove(&monitor_id);
        }
        state.members.remove(id);
        state.pools.retain(|p| p.id != id);
        Ok(())
    }

    async fn get_monitor(&self, id: &str) -> ApiResult<Monitor> {
        let mut state = self.state.lock();
        state.record(Call::GetMonitor(id.to_string()))?;
        state
            .monitors
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::not_found("health monitor", id))
    }

    async fn create_monitor(&self, request: &MonitorCreate) -> ApiResult<Monitor> {
        let mut state = self.state.lock();
        state.record(Call::CreateMonitor(request.clone()))?;
        let lb_id = state.pool_lb(&request.pool_id)?;
        if state.pool(&request.pool_id)?.monitor_id().is_some() {
            return Err(ApiError::conflict(format!(
                "Pool {} already has a health monitor",
                request.pool_id
            )));
        }
        state.begin_mutation(&lb_id)?;

        let monitor = Monitor {
            id: state.next_id("hm"),
            name: request.name.clone(),
            monitor_type: request.monitor_type.clone(),
            delay: request.delay,
            timeout: request.timeout,
            max_retries: request.max_retries,
            url_path: request.url_path.clone(),
            http_method: request.http_method.clone(),
            expected_codes: request.expected_codes.clone(),
            admin_state_up: request.admin_state_up,
        };
        if let Some(pool) = state.pools.iter_mut().find(|p| p.id == request.pool_id) {
            pool.healthmonitor_id = Some(monitor.id.clone());
        }
        state.monitors.insert(monitor.id.clone(), monitor.clone());
        Ok(monitor)
    }

    async fn list_members(&self, pool_id: &str) -> ApiResult<Vec<Member>> {
        let mut state = self.state.lock();
        state.record(Call::ListMembers(pool_id.to_string()))?;
        state
            .members
            .get(pool_id)
            .cloned()
            .ok_or_else(|| ApiError::not_found("pool", pool_id))
    }

    async fn batch_update_members(
        &self,
        pool_id: &str,
        members: &[BatchMemberUpdate],
    ) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.record(Call::BatchUpdateMembers {
            pool_id: pool_id.to_string(),
            members: members.to_vec(),
        })?;
        let lb_id = state.pool_lb(pool_id)?;
        state.begin_mutation(&lb_id)?;

        let mut created = Vec::with_capacity(members.len());
        for m in members {
            created.push(Member {
                id: state.next_id("member"),
                name: m.name.clone().unwrap_or_default(),
                address: m.address.clone(),
                protocol_port: m.protocol_port,
                weight: m.weight.unwrap_or(1),
                admin_state_up: m.admin_state_up.unwrap_or(true),
                backup: m.backup.unwrap_or(false),
                tags: m.tags.clone(),
                subnet_id: m.subnet_id.clone(),
                monitor_address: m.monitor_address.clone(),
                monitor_port: m.monitor_port,
            });
        }
        state.members.insert(pool_id.to_string(), created);
        Ok(())
    }
}
