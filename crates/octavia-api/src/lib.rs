//! Typed access to the OpenStack Octavia (load-balancer v2) API.
//!
//! This crate provides the pieces the pool migrator needs from the control
//! plane, and nothing else:
//!
//! - [`types`]: Serde models for load balancers, listeners, pools, health
//!   monitors and members, plus the request bodies used to create them
//! - [`error`]: Error types and HTTP status mapping
//! - [`LoadBalancerApi`]: The capability trait the migrator is written against
//! - [`auth`]: Keystone v3 authentication from the `OS_*` environment
//! - [`OctaviaClient`]: A reqwest-backed [`LoadBalancerApi`] implementation
//!
//! # Example
//!
//! ```ignore
//! use octavia_api::{AuthOptions, LoadBalancerApi, OctaviaClient};
//!
//! let opts = AuthOptions::from_env()?;
//! let client = OctaviaClient::authenticate(&opts, Duration::from_secs(30)).await?;
//! let lb = client.get_load_balancer("lb-1").await?;
//! println!("{} is {}", lb.id, lb.provisioning_status);
//! ```

mod api;
pub mod auth;
mod client;
pub mod error;
pub mod types;

pub use api::LoadBalancerApi;
pub use auth::{AuthMethod, AuthOptions};
pub use client::OctaviaClient;
pub use error::{ApiError, ApiResult};
pub use types::{
    BatchMemberUpdate, Listener, LoadBalancer, Member, Monitor, MonitorCreate, Pool, PoolCreate,
    Protocol, ProvisioningStatus, ResourceRef,
};
