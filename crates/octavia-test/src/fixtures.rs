//! Test fixtures for common migration scenarios
//!
//! Constructors return plain `octavia_api` models with sensible defaults;
//! the `*Fixture` extension traits tweak them builder-style.

use octavia_api::{
    Listener, LoadBalancer, Member, Monitor, Pool, Protocol, ProvisioningStatus, ResourceRef,
};

use crate::FakeLoadBalancerApi;

/// An `ACTIVE` load balancer.
pub fn load_balancer(id: &str) -> LoadBalancer {
    LoadBalancer {
        id: id.to_string(),
        name: format!("{}-name", id),
        provisioning_status: ProvisioningStatus::Active,
        operating_status: "ONLINE".to_string(),
    }
}

/// A listener without a default pool.
pub fn listener(id: &str, lb_id: &str, protocol: Protocol, port: u16) -> Listener {
    Listener {
        id: id.to_string(),
        name: format!("{}-name", id),
        protocol,
        protocol_port: port,
        default_pool_id: None,
        loadbalancers: vec![ResourceRef::new(lb_id)],
    }
}

/// A round-robin pool named after its id, without a health monitor.
pub fn pool(id: &str, lb_id: &str, protocol: Protocol) -> Pool {
    Pool {
        id: id.to_string(),
        name: format!("{}-name", id),
        protocol,
        lb_method: "ROUND_ROBIN".to_string(),
        description: String::new(),
        healthmonitor_id: None,
        listeners: Vec::new(),
        loadbalancers: vec![ResourceRef::new(lb_id)],
    }
}

/// An enabled member with weight 1 and no optional fields set.
pub fn member(id: &str, address: &str, port: u16) -> Member {
    Member {
        id: id.to_string(),
        name: String::new(),
        address: address.to_string(),
        protocol_port: port,
        weight: 1,
        admin_state_up: true,
        backup: false,
        tags: Vec::new(),
        subnet_id: None,
        monitor_address: None,
        monitor_port: None,
    }
}

/// A TCP health monitor.
pub fn tcp_monitor(id: &str) -> Monitor {
    Monitor {
        id: id.to_string(),
        name: String::new(),
        monitor_type: "TCP".to_string(),
        delay: 5,
        timeout: 3,
        max_retries: 3,
        url_path: None,
        http_method: None,
        expected_codes: None,
        admin_state_up: true,
    }
}

/// An HTTP health monitor probing `url_path`.
pub fn http_monitor(id: &str, url_path: &str) -> Monitor {
    Monitor {
        monitor_type: "HTTP".to_string(),
        url_path: Some(url_path.to_string()),
        http_method: Some("GET".to_string()),
        expected_codes: Some("200".to_string()),
        ..tcp_monitor(id)
    }
}

pub trait ListenerFixture {
    fn with_default_pool(self, pool_id: &str) -> Self;
}

impl ListenerFixture for Listener {
    fn with_default_pool(mut self, pool_id: &str) -> Self {
        self.default_pool_id = Some(pool_id.to_string());
        self
    }
}

pub trait PoolFixture {
    fn with_name(self, name: &str) -> Self;
    fn with_lb_method(self, method: &str) -> Self;
    fn with_description(self, description: &str) -> Self;
    /// Binds the pool to a listener without making it the default (as an
    /// L7 policy target would be).
    fn bound_to(self, listener_id: &str) -> Self;
}

impl PoolFixture for Pool {
    fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    fn with_lb_method(mut self, method: &str) -> Self {
        self.lb_method = method.to_string();
        self
    }

    fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    fn bound_to(mut self, listener_id: &str) -> Self {
        self.listeners.push(ResourceRef::new(listener_id));
        self
    }
}

pub trait MemberFixture {
    fn with_name(self, name: &str) -> Self;
    fn with_weight(self, weight: u32) -> Self;
    fn with_subnet(self, subnet_id: &str) -> Self;
    fn with_monitor(self, address: &str, port: u16) -> Self;
    fn with_tags(self, tags: &[&str]) -> Self;
    fn as_backup(self) -> Self;
    fn disabled(self) -> Self;
}

impl MemberFixture for Member {
    fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    fn with_subnet(mut self, subnet_id: &str) -> Self {
        self.subnet_id = Some(subnet_id.to_string());
        self
    }

    fn with_monitor(mut self, address: &str, port: u16) -> Self {
        self.monitor_address = Some(address.to_string());
        self.monitor_port = Some(port);
        self
    }

    fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    fn as_backup(mut self) -> Self {
        self.backup = true;
        self
    }

    fn disabled(mut self) -> Self {
        self.admin_state_up = false;
        self
    }
}

/// The canonical single-listener scenario.
///
/// Load balancer `lb-1` with listener `li-1` (TCP/443) whose default pool
/// `pool-tcp` is a TCP pool named "web" using `LEAST_CONNECTIONS`, an HTTP
/// health monitor `hm-1` on `/healthz`, and two members.
pub fn single_listener_scenario() -> FakeLoadBalancerApi {
    let fake = FakeLoadBalancerApi::new();
    fake.add_load_balancer(load_balancer("lb-1"));
    fake.add_pool(
        pool("pool-tcp", "lb-1", Protocol::Tcp)
            .with_name("web")
            .with_lb_method("LEAST_CONNECTIONS")
            .with_description("frontend"),
        vec![
            member("m-1", "10.0.0.11", 8080)
                .with_name("web-1")
                .with_weight(10)
                .with_subnet("subnet-a"),
            member("m-2", "10.0.0.12", 8080)
                .with_weight(5)
                .with_monitor("10.0.1.12", 9090)
                .with_tags(&["blue"])
                .as_backup(),
        ],
        Some(http_monitor("hm-1", "/healthz")),
    );
    fake.add_listener(listener("li-1", "lb-1", Protocol::Tcp, 443).with_default_pool("pool-tcp"));
    fake
}
