//! Octavia pool protocol migration.
//!
//! Moves the backend pool of a listener to a different protocol (for example
//! TCP to PROXY) without downtime: the pool is cloned under the new protocol
//! with its health monitor and members, the listener is repointed at the
//! clone, and the old pool is optionally deleted.
//!
//! # Architecture
//!
//! - [`settle`]: waits for the load balancer to return to ACTIVE after each
//!   mutation
//! - [`matcher`]: selects the pool that needs migrating on a listener
//! - [`cloner`]: creates the target pool and replicates monitor and members
//! - [`cutover`]: switches the listener and deletes the superseded pool
//! - [`orchestrator`]: drives a run and produces a [`MigrationReport`]
//!
//! All control-plane access goes through [`octavia_api::LoadBalancerApi`].

pub mod cloner;
pub mod config;
pub mod cutover;
pub mod error;
pub mod matcher;
pub mod orchestrator;
pub mod report;
pub mod settle;

pub use cloner::{monitor_request, translate_member, PoolCloner};
pub use config::{ConfigError, ConfigOverrides, MigratorConfig};
pub use cutover::{CutoverController, CutoverPlan, CutoverSummary};
pub use error::{CloneStage, ErrorKind, MigrateError, MigrateResult, SettleError};
pub use matcher::{find_target, select_migration_targets, Selection};
pub use orchestrator::{CutoverFlags, MigrationScope, Orchestrator};
pub use report::{ListenerOutcome, ListenerReport, MigrationReport, ReportSummary};
pub use settle::{SettleConfig, SettleWaiter};
