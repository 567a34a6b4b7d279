//! Test infrastructure for the pool migrator
//!
//! Provides:
//! - [`FakeLoadBalancerApi`]: an in-memory control plane that mimics
//!   Octavia's provisioning-status lifecycle and immutability rules
//! - [`Call`]: the recorded sequence of API calls, for ordering assertions
//! - [`fixtures`]: builders for load balancers, listeners, pools, members
//!   and health monitors

mod fake;
pub mod fixtures;

pub use fake::{Call, FailPoint, FakeLoadBalancerApi};
pub use fixtures::*;
