//! Error types for pool migration.
//!
//! [`SettleError`] covers the wait-for-ACTIVE loop; [`MigrateError`] covers
//! everything a single listener migration (or run setup) can fail with.

use std::fmt;

use octavia_api::{ApiError, ProvisioningStatus};
use serde::Serialize;
use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Errors from waiting on a load balancer's provisioning status.
#[derive(Debug, Error)]
pub enum SettleError {
    /// The load balancer did not reach a terminal status in time.
    #[error(
        "timed out waiting for load balancer '{load_balancer_id}' to become ACTIVE \
         (last status {last_status} after {polls} polls)"
    )]
    Timeout {
        load_balancer_id: String,
        /// Last non-terminal status observed.
        last_status: ProvisioningStatus,
        /// Number of status checks issued.
        polls: u32,
    },

    /// The load balancer entered ERROR state.
    #[error("load balancer '{load_balancer_id}' entered ERROR state")]
    ErrorState { load_balancer_id: String },

    /// A status poll failed. Not retried.
    #[error("failed to poll load balancer '{load_balancer_id}': {source}")]
    Api {
        load_balancer_id: String,
        #[source]
        source: ApiError,
    },

    /// The wait was cancelled.
    #[error("wait for load balancer '{load_balancer_id}' cancelled")]
    Cancelled { load_balancer_id: String },
}

impl SettleError {
    /// Returns true for a timeout, the only recoverable settle failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SettleError::Timeout { .. })
    }
}

/// Step of a pool clone at which a partial clone was left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneStage {
    /// Waiting for the pool create to settle.
    PoolCreate,
    /// Replicating the health monitor.
    HealthMonitor,
    /// Replicating the membership.
    Members,
}

impl fmt::Display for CloneStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CloneStage::PoolCreate => "pool create",
            CloneStage::HealthMonitor => "health monitor",
            CloneStage::Members => "members",
        })
    }
}

/// Coarse classification of a [`MigrateError`], carried in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Setup,
    Lookup,
    NoListeners,
    SettleTimeout,
    SettleErrorState,
    SettleApi,
    PartialClone,
    Api,
    PoolStillDefault,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Setup => "setup",
            ErrorKind::Lookup => "lookup",
            ErrorKind::NoListeners => "no_listeners",
            ErrorKind::SettleTimeout => "settle_timeout",
            ErrorKind::SettleErrorState => "settle_error_state",
            ErrorKind::SettleApi => "settle_api",
            ErrorKind::PartialClone => "partial_clone",
            ErrorKind::Api => "api",
            ErrorKind::PoolStillDefault => "pool_still_default",
            ErrorKind::Cancelled => "cancelled",
        })
    }
}

/// Errors that can occur while migrating pools.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Invalid invocation or client setup failure; nothing was mutated.
    #[error("setup failed: {0}")]
    Setup(String),

    /// A resource needed to plan the migration could not be read.
    #[error("failed to look up {resource} '{id}': {source}")]
    Lookup {
        resource: &'static str,
        id: String,
        #[source]
        source: ApiError,
    },

    /// The load balancer has no listeners to migrate.
    #[error("load balancer '{load_balancer_id}' has no listeners")]
    NoListeners { load_balancer_id: String },

    /// Waiting for the load balancer to settle after a mutation failed.
    #[error("settle after {after} failed: {source}")]
    Settle {
        /// The mutation that was being waited on.
        after: &'static str,
        #[source]
        source: SettleError,
    },

    /// A clone failed after the new pool was created. The pool is left in
    /// place.
    #[error("clone left partial pool '{new_pool_id}' at stage {stage}: {source}")]
    PartialClone {
        new_pool_id: String,
        stage: CloneStage,
        #[source]
        source: Box<MigrateError>,
    },

    /// A mutating control-plane call failed.
    #[error("{operation} failed: {source}")]
    Api {
        operation: &'static str,
        #[source]
        source: ApiError,
    },

    /// Refusing to delete a pool that a listener still uses as default.
    #[error("refusing to delete pool '{pool_id}': default pool of listener '{listener_id}'")]
    PoolStillDefault { listener_id: String, pool_id: String },

    /// The run was cancelled.
    #[error("migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Creates a setup error.
    pub fn setup(message: impl Into<String>) -> Self {
        Self::Setup(message.into())
    }

    /// Creates a lookup error.
    pub fn lookup(resource: &'static str, id: impl Into<String>, source: ApiError) -> Self {
        Self::Lookup {
            resource,
            id: id.into(),
            source,
        }
    }

    /// Creates an API error for a mutating call.
    pub fn api(operation: &'static str, source: ApiError) -> Self {
        Self::Api { operation, source }
    }

    /// Wraps a settle failure.
    pub fn settle(after: &'static str, source: SettleError) -> Self {
        Self::Settle { after, source }
    }

    /// Wraps a failure that happened after `new_pool_id` was created.
    pub fn partial_clone(new_pool_id: impl Into<String>, stage: CloneStage, source: Self) -> Self {
        Self::PartialClone {
            new_pool_id: new_pool_id.into(),
            stage,
            source: Box::new(source),
        }
    }

    /// Returns the classification used in reports.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrateError::Setup(_) => ErrorKind::Setup,
            MigrateError::Lookup { .. } => ErrorKind::Lookup,
            MigrateError::NoListeners { .. } => ErrorKind::NoListeners,
            MigrateError::Settle { source, .. } => match source {
                SettleError::Timeout { .. } => ErrorKind::SettleTimeout,
                SettleError::ErrorState { .. } => ErrorKind::SettleErrorState,
                SettleError::Api { .. } => ErrorKind::SettleApi,
                SettleError::Cancelled { .. } => ErrorKind::Cancelled,
            },
            MigrateError::PartialClone { .. } => ErrorKind::PartialClone,
            MigrateError::Api { .. } => ErrorKind::Api,
            MigrateError::PoolStillDefault { .. } => ErrorKind::PoolStillDefault,
            MigrateError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            MigrateError::Settle { source, .. } => source.is_timeout(),
            MigrateError::PartialClone { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if the error was caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            MigrateError::Cancelled => true,
            MigrateError::Settle { source, .. } => {
                matches!(source, SettleError::Cancelled { .. })
            }
            MigrateError::PartialClone { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Returns the id of a pool this failure left behind, if any.
    pub fn new_pool_id(&self) -> Option<&str> {
        match self {
            MigrateError::PartialClone { new_pool_id, .. } => Some(new_pool_id),
            _ => None,
        }
    }
}
