//! Per-listener outcomes and the end-of-run report.

use std::fmt;

use chrono::{DateTime, Utc};
use octavia_api::Protocol;
use serde::Serialize;

use crate::error::{ErrorKind, MigrateError};

/// What happened to one listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ListenerOutcome {
    Migrated {
        source_pool_id: String,
        new_pool_id: String,
        /// The target pool already existed and was not cloned.
        reused_existing: bool,
        switched: bool,
        deleted_old: bool,
    },
    NothingToMigrate,
    Ambiguous {
        pool_ids: Vec<String>,
    },
    Failed {
        kind: ErrorKind,
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pool_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_pool_id: Option<String>,
    },
    Cancelled,
}

impl ListenerOutcome {
    /// Builds a failure outcome. The partial pool id carried by `err` takes
    /// precedence over `new_pool_id`.
    pub fn failed(err: &MigrateError, pool_id: Option<&str>, new_pool_id: Option<&str>) -> Self {
        ListenerOutcome::Failed {
            kind: err.kind(),
            reason: err.to_string(),
            pool_id: pool_id.map(str::to_string),
            new_pool_id: err.new_pool_id().or(new_pool_id).map(str::to_string),
        }
    }

    /// Short label used in the text table.
    pub fn label(&self) -> &'static str {
        match self {
            ListenerOutcome::Migrated { .. } => "migrated",
            ListenerOutcome::NothingToMigrate => "nothing-to-migrate",
            ListenerOutcome::Ambiguous { .. } => "ambiguous",
            ListenerOutcome::Failed { .. } => "failed",
            ListenerOutcome::Cancelled => "cancelled",
        }
    }

    fn detail(&self) -> String {
        match self {
            ListenerOutcome::Migrated {
                source_pool_id,
                new_pool_id,
                reused_existing,
                switched,
                deleted_old,
            } => {
                let mut detail = format!("{} -> {}", source_pool_id, new_pool_id);
                if *reused_existing {
                    detail.push_str(" (existing)");
                }
                if *switched {
                    detail.push_str(", switched");
                }
                if *deleted_old {
                    detail.push_str(", old pool deleted");
                }
                detail
            }
            ListenerOutcome::NothingToMigrate => String::new(),
            ListenerOutcome::Ambiguous { pool_ids } => {
                format!("multiple non-conforming pools: {}", pool_ids.join(", "))
            }
            ListenerOutcome::Failed {
                kind,
                reason,
                new_pool_id,
                ..
            } => match new_pool_id {
                Some(id) => format!("[{}] {} (new pool {} left in place)", kind, reason, id),
                None => format!("[{}] {}", kind, reason),
            },
            ListenerOutcome::Cancelled => "not processed".to_string(),
        }
    }
}

/// One report row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerReport {
    pub listener_id: String,
    pub listener_name: String,
    pub protocol_port: u16,
    #[serde(flatten)]
    pub outcome: ListenerOutcome,
}

/// Outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub migrated: usize,
    pub nothing_to_migrate: usize,
    pub ambiguous: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Result of one migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub load_balancer_id: String,
    pub target_protocol: Protocol,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub listeners: Vec<ListenerReport>,
    pub summary: ReportSummary,
}

impl MigrationReport {
    pub fn new(
        load_balancer_id: impl Into<String>,
        target_protocol: Protocol,
        started_at: DateTime<Utc>,
        listeners: Vec<ListenerReport>,
    ) -> Self {
        let summary = summarize(&listeners);
        Self {
            load_balancer_id: load_balancer_id.into(),
            target_protocol,
            started_at,
            finished_at: Utc::now(),
            listeners,
            summary,
        }
    }

    pub fn summary(&self) -> ReportSummary {
        self.summary
    }

    /// Returns true if any listener failed or was not processed.
    pub fn has_failures(&self) -> bool {
        self.summary.failed > 0 || self.summary.cancelled > 0
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn summarize(listeners: &[ListenerReport]) -> ReportSummary {
    let mut summary = ReportSummary {
        total: listeners.len(),
        ..Default::default()
    };
    for row in listeners {
        match row.outcome {
            ListenerOutcome::Migrated { .. } => summary.migrated += 1,
            ListenerOutcome::NothingToMigrate => summary.nothing_to_migrate += 1,
            ListenerOutcome::Ambiguous { .. } => summary.ambiguous += 1,
            ListenerOutcome::Failed { .. } => summary.failed += 1,
            ListenerOutcome::Cancelled => summary.cancelled += 1,
        }
    }
    summary
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Load balancer {} -> {} ({} to {})",
            self.load_balancer_id,
            self.target_protocol,
            self.started_at.format("%Y-%m-%dT%H:%M:%SZ"),
            self.finished_at.format("%Y-%m-%dT%H:%M:%SZ"),
        )?;

        let id_width = self
            .listeners
            .iter()
            .map(|r| r.listener_id.len())
            .chain(std::iter::once("LISTENER".len()))
            .max()
            .unwrap_or(0);
        let name_width = self
            .listeners
            .iter()
            .map(|r| r.listener_name.len())
            .chain(std::iter::once("NAME".len()))
            .max()
            .unwrap_or(0);

        writeln!(
            f,
            "{:<id_width$}  {:<name_width$}  {:>5}  {:<18}  DETAIL",
            "LISTENER", "NAME", "PORT", "OUTCOME",
        )?;
        for row in &self.listeners {
            writeln!(
                f,
                "{:<id_width$}  {:<name_width$}  {:>5}  {:<18}  {}",
                row.listener_id,
                row.listener_name,
                row.protocol_port,
                row.outcome.label(),
                row.outcome.detail(),
            )?;
        }

        let s = &self.summary;
        write!(
            f,
            "{} listener(s): {} migrated, {} nothing to migrate, ",
            s.total, s.migrated, s.nothing_to_migrate
        )?;
        write!(
            f,
            "{} ambiguous, {} failed, {} cancelled",
            s.ambiguous, s.failed, s.cancelled
        )
    }
}
