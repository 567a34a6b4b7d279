//! End-to-end migration runs against the in-memory control plane.
//!
//! Every test runs with paused time, so settle waits advance instantly.

use std::sync::Arc;
use std::time::Duration;

use octavia_api::{ApiError, BatchMemberUpdate, Protocol, ProvisioningStatus};
use octavia_poolmigrate::{
    CutoverFlags, ErrorKind, ListenerOutcome, MigrateError, MigrationReport, MigrationScope,
    Orchestrator, SettleConfig,
};
use octavia_test::{
    http_monitor, listener, load_balancer, member, pool, single_listener_scenario, Call,
    FailPoint, FakeLoadBalancerApi, ListenerFixture, MemberFixture, PoolFixture,
};
use tokio_util::sync::CancellationToken;

const KEEP: CutoverFlags = CutoverFlags {
    switch_default_pool: false,
    delete_old_pool: false,
};
const SWITCH: CutoverFlags = CutoverFlags {
    switch_default_pool: true,
    delete_old_pool: false,
};
const SWITCH_AND_DELETE: CutoverFlags = CutoverFlags {
    switch_default_pool: true,
    delete_old_pool: true,
};

fn lb_scope() -> MigrationScope {
    MigrationScope::LoadBalancer("lb-1".to_string())
}

fn orchestrator(fake: &Arc<FakeLoadBalancerApi>) -> Orchestrator {
    Orchestrator::new(fake.clone(), SettleConfig::default(), CancellationToken::new())
}

async fn run(fake: &Arc<FakeLoadBalancerApi>, flags: CutoverFlags) -> MigrationReport {
    orchestrator(fake)
        .run(&lb_scope(), &Protocol::Proxy, flags)
        .await
        .expect("run should resolve its scope")
}

/// `lb-1` / `li-1` with an HTTP pool named "p" that has a health monitor and
/// two members.
fn http_scenario() -> Arc<FakeLoadBalancerApi> {
    let fake = FakeLoadBalancerApi::new();
    fake.add_load_balancer(load_balancer("lb-1"));
    fake.add_pool(
        pool("pool-http", "lb-1", Protocol::Http).with_name("p"),
        vec![
            member("m-1", "10.0.0.5", 8080).with_weight(0).with_name(""),
            member("m-2", "10.0.0.6", 8080).with_weight(3).with_name("b"),
        ],
        Some(http_monitor("hm-1", "/")),
    );
    fake.add_listener(listener("li-1", "lb-1", Protocol::Http, 80).with_default_pool("pool-http"));
    Arc::new(fake)
}

fn migrated_pool_id(report: &MigrationReport, listener_id: &str) -> String {
    let row = report
        .listeners
        .iter()
        .find(|r| r.listener_id == listener_id)
        .expect("listener in report");
    match &row.outcome {
        ListenerOutcome::Migrated { new_pool_id, .. } => new_pool_id.clone(),
        other => panic!("expected migrated outcome, got {other:?}"),
    }
}

fn failure_kind(report: &MigrationReport, listener_id: &str) -> ErrorKind {
    let row = report
        .listeners
        .iter()
        .find(|r| r.listener_id == listener_id)
        .expect("listener in report");
    match &row.outcome {
        ListenerOutcome::Failed { kind, .. } => *kind,
        other => panic!("expected failed outcome, got {other:?}"),
    }
}

mod scenario {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn test_http_pool_migrated_and_switched() {
        let fake = http_scenario();

        let report = run(&fake, SWITCH).await;

        let new_pool_id = migrated_pool_id(&report, "li-1");
        let new_pool = fake.pool(&new_pool_id).unwrap();
        assert_eq!(new_pool.name, "p");
        assert_eq!(new_pool.protocol, Protocol::Proxy);

        let monitor = fake.monitor(new_pool.monitor_id().unwrap()).unwrap();
        assert_eq!(monitor.monitor_type, "HTTP");
        assert_eq!(monitor.url_path.as_deref(), Some("/"));
        assert_eq!(fake.members(&new_pool_id).len(), 2);

        let listener = fake.listener("li-1").unwrap();
        assert_eq!(listener.default_pool(), Some(new_pool_id.as_str()));
        assert!(fake.pool("pool-http").is_some());

        assert_eq!(report.summary().migrated, 1);
        assert!(!report.has_failures());
        assert_eq!(fake.status("lb-1"), Some(ProvisioningStatus::Active));
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_batch_forwards_only_set_fields() {
        let fake = http_scenario();

        run(&fake, KEEP).await;

        let batch = fake
            .mutations()
            .into_iter()
            .find_map(|c| match c {
                Call::BatchUpdateMembers { members, .. } => Some(members),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            batch,
            vec![
                BatchMemberUpdate {
                    address: "10.0.0.5".to_string(),
                    protocol_port: 8080,
                    admin_state_up: Some(true),
                    backup: Some(false),
                    ..Default::default()
                },
                BatchMemberUpdate {
                    address: "10.0.0.6".to_string(),
                    protocol_port: 8080,
                    name: Some("b".to_string()),
                    weight: Some(3),
                    admin_state_up: Some(true),
                    backup: Some(false),
                    ..Default::default()
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_and_delete_ordering() {
        let fake = Arc::new(single_listener_scenario());

        let report = run(&fake, SWITCH_AND_DELETE).await;

        assert!(matches!(
            report.listeners[0].outcome,
            ListenerOutcome::Migrated {
                switched: true,
                deleted_old: true,
                reused_existing: false,
                ..
            }
        ));
        assert!(fake.pool("pool-tcp").is_none());

        let calls = fake.calls();
        let update = calls
            .iter()
            .position(|c| matches!(c, Call::UpdateListenerDefaultPool { .. }))
            .unwrap();
        let delete = calls
            .iter()
            .position(|c| matches!(c, Call::DeletePool(_)))
            .unwrap();
        assert!(update < delete);
        assert!(calls[update + 1..delete].iter().any(Call::is_status_poll));
        assert!(calls[delete + 1..].iter().any(Call::is_status_poll));
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_mutation_waits_for_active() {
        let fake = Arc::new(single_listener_scenario().with_pending_polls(4));

        let report = run(&fake, SWITCH_AND_DELETE).await;

        // The fake rejects any mutation issued while still pending, so a
        // clean run proves each one waited.
        assert!(!report.has_failures(), "{report}");
        assert_eq!(fake.mutations().len(), 5);
    }
}

mod selection {
    use super::*;
    use pretty_assertions::{assert_eq, assert_ne};

    #[tokio::test(start_paused = true)]
    async fn test_nothing_to_migrate_makes_no_mutation() {
        let fake = FakeLoadBalancerApi::new();
        fake.add_load_balancer(load_balancer("lb-1"));
        fake.add_pool(pool("p-1", "lb-1", Protocol::Proxy), vec![], None);
        fake.add_listener(listener("li-1", "lb-1", Protocol::Tcp, 443).with_default_pool("p-1"));
        let fake = Arc::new(fake);

        let report = run(&fake, SWITCH_AND_DELETE).await;

        assert_eq!(report.listeners[0].outcome, ListenerOutcome::NothingToMigrate);
        assert!(fake.mutations().is_empty());
        assert_eq!(fake.status_polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_without_pools() {
        let fake = FakeLoadBalancerApi::new();
        fake.add_load_balancer(load_balancer("lb-1"));
        fake.add_listener(listener("li-1", "lb-1", Protocol::Tcp, 443));
        let fake = Arc::new(fake);

        let report = run(&fake, SWITCH).await;

        assert_eq!(report.listeners[0].outcome, ListenerOutcome::NothingToMigrate);
        assert_eq!(report.summary().total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ambiguous_listener_is_skipped() {
        let fake = FakeLoadBalancerApi::new();
        fake.add_load_balancer(load_balancer("lb-1"));
        fake.add_pool(pool("p-1", "lb-1", Protocol::Tcp).with_name("a"), vec![], None);
        fake.add_pool(
            pool("p-2", "lb-1", Protocol::Http).with_name("b").bound_to("li-1"),
            vec![],
            None,
        );
        fake.add_listener(listener("li-1", "lb-1", Protocol::Tcp, 443).with_default_pool("p-1"));
        let fake = Arc::new(fake);

        let report = run(&fake, SWITCH_AND_DELETE).await;

        assert_eq!(
            report.listeners[0].outcome,
            ListenerOutcome::Ambiguous {
                pool_ids: vec!["p-1".to_string(), "p-2".to_string()]
            }
        );
        assert!(fake.mutations().is_empty());
        assert!(!report.has_failures());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_is_idempotent() {
        let fake = http_scenario();

        let first = run(&fake, KEEP).await;
        let new_pool_id = migrated_pool_id(&first, "li-1");
        fake.clear_calls();

        let second = run(&fake, KEEP).await;

        assert_eq!(
            second.listeners[0].outcome,
            ListenerOutcome::Migrated {
                source_pool_id: "pool-http".to_string(),
                new_pool_id,
                reused_existing: true,
                switched: false,
                deleted_old: false,
            }
        );
        assert!(fake.mutations().is_empty());
        assert_eq!(fake.pools("lb-1").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_after_switch_finds_nothing() {
        let fake = http_scenario();

        run(&fake, SWITCH).await;
        fake.clear_calls();
        let second = run(&fake, SWITCH).await;

        assert_eq!(second.listeners[0].outcome, ListenerOutcome::NothingToMigrate);
        assert!(fake.mutations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_name_pools_are_cloned_separately() {
        let fake = FakeLoadBalancerApi::new();
        fake.add_load_balancer(load_balancer("lb-1"));
        fake.add_pool(
            pool("p-a", "lb-1", Protocol::Tcp).with_name("web"),
            vec![member("m-a", "10.0.0.1", 80)],
            None,
        );
        fake.add_pool(
            pool("p-b", "lb-1", Protocol::Tcp).with_name("web"),
            vec![member("m-b", "10.9.9.9", 80)],
            None,
        );
        fake.add_listener(listener("li-1", "lb-1", Protocol::Tcp, 443).with_default_pool("p-a"));
        fake.add_listener(listener("li-2", "lb-1", Protocol::Tcp, 8443).with_default_pool("p-b"));
        let fake = Arc::new(fake);

        let report = run(&fake, SWITCH_AND_DELETE).await;

        assert!(!report.has_failures(), "{report}");
        let first = migrated_pool_id(&report, "li-1");
        let second = migrated_pool_id(&report, "li-2");
        assert_ne!(first, second);

        let addresses = |pool_id: &str| -> Vec<String> {
            fake.members(pool_id).into_iter().map(|m| m.address).collect()
        };
        assert_eq!(addresses(&first), vec!["10.0.0.1".to_string()]);
        assert_eq!(addresses(&second), vec!["10.9.9.9".to_string()]);
        assert_eq!(
            fake.listener("li-2").unwrap().default_pool(),
            Some(second.as_str())
        );
        assert!(fake.pool("p-a").is_none());
        assert!(fake.pool("p-b").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_pool_is_deleted_once_no_listener_uses_it() {
        let fake = FakeLoadBalancerApi::new();
        fake.add_load_balancer(load_balancer("lb-1"));
        fake.add_pool(
            pool("old", "lb-1", Protocol::Tcp).with_name("web"),
            vec![member("m-1", "10.0.0.1", 80)],
            None,
        );
        fake.add_listener(listener("li-1", "lb-1", Protocol::Tcp, 443).with_default_pool("old"));
        fake.add_listener(listener("li-2", "lb-1", Protocol::Tcp, 8443).with_default_pool("old"));
        let fake = Arc::new(fake);

        let report = run(&fake, SWITCH_AND_DELETE).await;

        // The first listener switches, but the pool is still in use by li-2.
        let new_pool_id = match &report.listeners[0].outcome {
            ListenerOutcome::Failed {
                kind,
                reason,
                pool_id,
                new_pool_id,
            } => {
                assert_eq!(*kind, ErrorKind::PoolStillDefault);
                assert!(reason.contains("li-2"), "{reason}");
                assert_eq!(pool_id.as_deref(), Some("old"));
                new_pool_id.clone().unwrap()
            }
            other => panic!("expected failure, got {other:?}"),
        };
        assert_eq!(
            report.listeners[1].outcome,
            ListenerOutcome::Migrated {
                source_pool_id: "old".to_string(),
                new_pool_id: new_pool_id.clone(),
                reused_existing: true,
                switched: true,
                deleted_old: true,
            }
        );

        for id in ["li-1", "li-2"] {
            assert_eq!(
                fake.listener(id).unwrap().default_pool(),
                Some(new_pool_id.as_str())
            );
        }
        assert!(fake.pool("old").is_none());
        let count = |pred: fn(&Call) -> bool| fake.mutations().iter().filter(|c| pred(c)).count();
        assert_eq!(count(|c| matches!(c, Call::CreatePool(_))), 1);
        assert_eq!(count(|c| matches!(c, Call::DeletePool(_))), 1);
    }
}

mod scope {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn test_listener_scope_processes_only_that_listener() {
        let fake = http_scenario();
        fake.add_pool(pool("p-other", "lb-1", Protocol::Tcp).with_name("other"), vec![], None);
        fake.add_listener(
            listener("li-2", "lb-1", Protocol::Tcp, 443).with_default_pool("p-other"),
        );

        let report = orchestrator(&fake)
            .run(
                &MigrationScope::Listener("li-2".to_string()),
                &Protocol::Proxy,
                SWITCH,
            )
            .await
            .unwrap();

        assert_eq!(report.load_balancer_id, "lb-1");
        assert_eq!(report.listeners.len(), 1);
        assert_eq!(report.listeners[0].listener_id, "li-2");
        assert_eq!(
            fake.listener("li-1").unwrap().default_pool(),
            Some("pool-http")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_balancer_without_listeners_is_an_error() {
        let fake = FakeLoadBalancerApi::new();
        fake.add_load_balancer(load_balancer("lb-1"));
        let fake = Arc::new(fake);

        let err = orchestrator(&fake)
            .run(&lb_scope(), &Protocol::Proxy, SWITCH)
            .await
            .unwrap_err();

        assert!(matches!(err, MigrateError::NoListeners { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_listener_is_a_lookup_error() {
        let fake = http_scenario();

        let err = orchestrator(&fake)
            .run(
                &MigrationScope::Listener("missing".to_string()),
                &Protocol::Proxy,
                SWITCH,
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Lookup);
        assert!(fake.mutations().is_empty());
    }
}

mod failures {
    use super::*;
    use pretty_assertions::assert_eq;

    fn settle(timeout_secs: u64) -> SettleConfig {
        SettleConfig {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(timeout_secs),
            timeout_retries: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_stop_other_listeners() {
        let fake = FakeLoadBalancerApi::new();
        fake.add_load_balancer(load_balancer("lb-1"));
        fake.add_pool(pool("p-a", "lb-1", Protocol::Tcp).with_name("a"), vec![], None);
        fake.add_pool(pool("p-b", "lb-1", Protocol::Tcp).with_name("b"), vec![], None);
        fake.add_listener(listener("li-1", "lb-1", Protocol::Tcp, 443).with_default_pool("p-a"));
        fake.add_listener(listener("li-2", "lb-1", Protocol::Tcp, 8443).with_default_pool("p-b"));
        let fake = Arc::new(fake);
        fake.fail_next(FailPoint::CreatePool, ApiError::api(500, "quota exceeded"));

        let report = run(&fake, SWITCH).await;

        assert_eq!(failure_kind(&report, "li-1"), ErrorKind::Api);
        migrated_pool_id(&report, "li-2");
        assert!(report.has_failures());
        assert_eq!(report.summary().failed, 1);
        assert_eq!(report.summary().migrated, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_clone_reports_new_pool() {
        let fake = Arc::new(single_listener_scenario());
        fake.fail_next(FailPoint::BatchUpdateMembers, ApiError::api(500, "boom"));

        let report = run(&fake, SWITCH_AND_DELETE).await;

        match &report.listeners[0].outcome {
            ListenerOutcome::Failed {
                kind,
                pool_id,
                new_pool_id,
                ..
            } => {
                assert_eq!(*kind, ErrorKind::PartialClone);
                assert_eq!(pool_id.as_deref(), Some("pool-tcp"));
                let new_pool_id = new_pool_id.as_deref().unwrap();
                assert!(fake.pool(new_pool_id).is_some());
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(fake.pool("pool-tcp").is_some());
        assert!(!fake
            .calls()
            .iter()
            .any(|c| matches!(c, Call::DeletePool(_) | Call::UpdateListenerDefaultPool { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_pending_times_out_after_expected_polls() {
        let fake = Arc::new(single_listener_scenario().with_pending_polls(u32::MAX));
        let orchestrator = Orchestrator::new(fake.clone(), settle(10), CancellationToken::new());

        let report = orchestrator
            .run(&lb_scope(), &Protocol::Proxy, SWITCH)
            .await
            .unwrap();

        assert_eq!(failure_kind(&report, "li-1"), ErrorKind::PartialClone);
        let calls = fake.calls();
        let create = calls
            .iter()
            .position(|c| matches!(c, Call::CreatePool(_)))
            .unwrap();
        let polls_after_create = calls[create..].iter().filter(|c| c.is_status_poll()).count();
        assert!(polls_after_create >= 5, "only {polls_after_create} polls");
        assert_eq!(fake.mutations().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_load_balancer_times_out_before_first_mutation() {
        let fake = Arc::new(single_listener_scenario());
        fake.force_status("lb-1", ProvisioningStatus::PendingUpdate);
        let orchestrator = Orchestrator::new(fake.clone(), settle(10), CancellationToken::new());

        let report = orchestrator
            .run(&lb_scope(), &Protocol::Proxy, SWITCH)
            .await
            .unwrap();

        assert_eq!(failure_kind(&report, "li-1"), ErrorKind::SettleTimeout);
        assert!(fake.mutations().is_empty());
        assert_eq!(fake.status_polls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_state_fails_listener() {
        let fake = Arc::new(single_listener_scenario());
        fake.force_status("lb-1", ProvisioningStatus::Error);

        let report = run(&fake, SWITCH).await;

        assert_eq!(failure_kind(&report, "li-1"), ErrorKind::SettleErrorState);
        assert!(fake.mutations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_run_skips_listeners() {
        let fake = http_scenario();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let orchestrator = Orchestrator::new(fake.clone(), SettleConfig::default(), cancel);

        let report = orchestrator
            .run(&lb_scope(), &Protocol::Proxy, SWITCH)
            .await
            .unwrap();

        assert_eq!(report.listeners[0].outcome, ListenerOutcome::Cancelled);
        assert!(report.has_failures());
        assert!(fake.mutations().is_empty());
    }
}
