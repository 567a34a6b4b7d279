//! Octavia v2 resource models.
//!
//! Response models tolerate the `null`s Octavia emits for unset strings and
//! ports. Request models skip every optional field that is `None`, so only
//! the fields a caller explicitly set reach the API.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// Deserializes `null` as the type's default value.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Provisioning status of a load balancer.
///
/// Octavia serializes mutations per load balancer: while the status is not
/// `ACTIVE`, further mutating calls against it or its children are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProvisioningStatus {
    Active,
    PendingCreate,
    PendingUpdate,
    PendingDelete,
    Deleted,
    Error,
    /// Any status string this crate does not know about.
    Other(String),
}

impl ProvisioningStatus {
    /// Returns the wire representation.
    pub fn as_str(&self) -> &str {
        match self {
            ProvisioningStatus::Active => "ACTIVE",
            ProvisioningStatus::PendingCreate => "PENDING_CREATE",
            ProvisioningStatus::PendingUpdate => "PENDING_UPDATE",
            ProvisioningStatus::PendingDelete => "PENDING_DELETE",
            ProvisioningStatus::Deleted => "DELETED",
            ProvisioningStatus::Error => "ERROR",
            ProvisioningStatus::Other(s) => s,
        }
    }

    /// Returns true if the load balancer accepts mutations.
    pub fn is_active(&self) -> bool {
        *self == ProvisioningStatus::Active
    }

    /// Returns true for one of the `PENDING_*` states.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            ProvisioningStatus::PendingCreate
                | ProvisioningStatus::PendingUpdate
                | ProvisioningStatus::PendingDelete
        )
    }
}

impl From<String> for ProvisioningStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "ACTIVE" => ProvisioningStatus::Active,
            "PENDING_CREATE" => ProvisioningStatus::PendingCreate,
            "PENDING_UPDATE" => ProvisioningStatus::PendingUpdate,
            "PENDING_DELETE" => ProvisioningStatus::PendingDelete,
            "DELETED" => ProvisioningStatus::Deleted,
            "ERROR" => ProvisioningStatus::Error,
            _ => ProvisioningStatus::Other(s),
        }
    }
}

impl From<ProvisioningStatus> for String {
    fn from(status: ProvisioningStatus) -> Self {
        match status {
            ProvisioningStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ProvisioningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pool / listener protocol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Protocol {
    Http,
    Https,
    Proxy,
    ProxyV2,
    Tcp,
    Udp,
    Sctp,
    TerminatedHttps,
    /// Any protocol string this crate does not know about.
    Other(String),
}

impl Protocol {
    /// Returns the wire representation.
    pub fn as_str(&self) -> &str {
        match self {
            Protocol::Http => "HTTP",
            Protocol::Https => "HTTPS",
            Protocol::Proxy => "PROXY",
            Protocol::ProxyV2 => "PROXYV2",
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Sctp => "SCTP",
            Protocol::TerminatedHttps => "TERMINATED_HTTPS",
            Protocol::Other(s) => s,
        }
    }
}

impl From<String> for Protocol {
    fn from(s: String) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "HTTP" => Protocol::Http,
            "HTTPS" => Protocol::Https,
            "PROXY" => Protocol::Proxy,
            "PROXYV2" => Protocol::ProxyV2,
            "TCP" => Protocol::Tcp,
            "UDP" => Protocol::Udp,
            "SCTP" => Protocol::Sctp,
            "TERMINATED_HTTPS" => Protocol::TerminatedHttps,
            _ => Protocol::Other(s),
        }
    }
}

impl From<Protocol> for String {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl FromStr for Protocol {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Protocol::from(s.to_string()))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to another resource by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub id: String,
}

impl ResourceRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// A load balancer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    pub provisioning_status: ProvisioningStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub operating_status: String,
}

/// A listener (front-end protocol + port).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listener {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    pub protocol: Protocol,
    pub protocol_port: u16,
    #[serde(default)]
    pub default_pool_id: Option<String>,
    /// Owning load balancer(s); Octavia always returns exactly one.
    #[serde(default, deserialize_with = "null_as_default")]
    pub loadbalancers: Vec<ResourceRef>,
}

impl Listener {
    /// Returns the default pool id, treating an empty string as unset.
    pub fn default_pool(&self) -> Option<&str> {
        self.default_pool_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Returns the id of the owning load balancer.
    pub fn load_balancer_id(&self) -> Option<&str> {
        self.loadbalancers.first().map(|r| r.id.as_str())
    }
}

/// A backend pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    pub protocol: Protocol,
    pub lb_method: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default)]
    pub healthmonitor_id: Option<String>,
    /// Listeners bound to this pool (default pool or L7 policy target).
    #[serde(default, deserialize_with = "null_as_default")]
    pub listeners: Vec<ResourceRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub loadbalancers: Vec<ResourceRef>,
}

impl Pool {
    /// Returns the health monitor id, treating an empty string as unset.
    pub fn monitor_id(&self) -> Option<&str> {
        self.healthmonitor_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Returns true if the pool is associated with the given listener.
    pub fn is_bound_to(&self, listener_id: &str) -> bool {
        self.listeners.iter().any(|l| l.id == listener_id)
    }
}

/// A health monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "type")]
    pub monitor_type: String,
    pub delay: u32,
    pub timeout: u32,
    pub max_retries: u32,
    #[serde(default)]
    pub url_path: Option<String>,
    #[serde(default)]
    pub http_method: Option<String>,
    #[serde(default)]
    pub expected_codes: Option<String>,
    pub admin_state_up: bool,
}

/// A pool member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    pub address: String,
    pub protocol_port: u16,
    #[serde(default, deserialize_with = "null_as_default")]
    pub weight: u32,
    pub admin_state_up: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub backup: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub subnet_id: Option<String>,
    #[serde(default)]
    pub monitor_address: Option<String>,
    #[serde(default)]
    pub monitor_port: Option<u16>,
}

/// Body for `POST /lbaas/pools`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolCreate {
    pub loadbalancer_id: String,
    pub protocol: Protocol,
    pub name: String,
    pub lb_method: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Body for `POST /lbaas/healthmonitors`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorCreate {
    pub pool_id: String,
    #[serde(rename = "type")]
    pub monitor_type: String,
    pub delay: u32,
    pub timeout: u32,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_codes: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub admin_state_up: bool,
}

/// One entry of `PUT /lbaas/pools/{pool_id}/members`.
///
/// The batch call replaces the whole membership of the pool. Fields left as
/// `None` are not sent and take Octavia's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMemberUpdate {
    pub address: String,
    pub protocol_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_state_up: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}
