//! End-to-end reconciliation passes
//!
//! These tests drive full passes against the in-memory engine and check both
//! the resulting container set and the engine calls the pass issued.

#[cfg(test)]
mod pass_tests {
    use crate::desired::{AppConfig, ConfigSnapshot};
    use crate::engine::{ContainerEngine, EngineCall, FakeEngine};
    use crate::error::ManagerError;
    use crate::models::{
        DesiredContainerSpec, HostBinding, MismatchedField, PortKey, ReconciliationDecision,
    };
    use crate::reconcile::r#loop::failure_count;
    use crate::reconcile::{compare, ContainerAction, FailurePolicy, PassReport, Reconciler};
    use std::sync::Arc;

    fn web() -> DesiredContainerSpec {
        DesiredContainerSpec::new("web", "nginx:latest")
            .with_port(PortKey::new(80, "tcp"), HostBinding::new("", "8090"))
    }

    fn db() -> DesiredContainerSpec {
        DesiredContainerSpec::new("db", "postgres:16")
    }

    fn snapshot(specs: Vec<DesiredContainerSpec>, app: AppConfig) -> ConfigSnapshot {
        ConfigSnapshot {
            version: 1,
            app,
            specs,
        }
    }

    fn engine() -> FakeEngine {
        FakeEngine::new()
            .with_image("nginx:latest", "sha256:nginx-1")
            .with_image_ports("sha256:nginx-1", [PortKey::new(80, "tcp")])
            .with_image("postgres:16", "sha256:pg-1")
            .with_image_ports("sha256:pg-1", [PortKey::new(5432, "tcp")])
    }

    fn reconciler(fake: &FakeEngine, policy: FailurePolicy) -> Reconciler {
        Reconciler::new(Arc::new(fake.clone()), policy)
    }

    fn is_create(c: &EngineCall) -> bool {
        matches!(c, EngineCall::Create(_))
    }

    fn is_remove(c: &EngineCall) -> bool {
        matches!(c, EngineCall::Remove(_))
    }

    fn is_start(c: &EngineCall) -> bool {
        matches!(c, EngineCall::Start(_))
    }

    #[tokio::test]
    async fn test_missing_container_is_created_and_started() {
        let fake = engine();
        let reconciler = reconciler(&fake, FailurePolicy::BestEffort);

        let report = reconciler
            .run_pass(&snapshot(vec![web()], AppConfig::default()))
            .await
            .unwrap();

        assert_eq!(fake.count(is_create), 1);
        assert_eq!(fake.count(is_start), 1);
        assert_eq!(fake.names(), vec!["web".to_string()]);
        assert!(fake.is_running("web"));
        assert_eq!(
            report.outcome("web").unwrap().actions,
            vec![ContainerAction::Created, ContainerAction::Started]
        );
    }

    #[tokio::test]
    async fn test_created_container_compares_as_noop() {
        let fake = engine();
        let reconciler = reconciler(&fake, FailurePolicy::BestEffort);
        reconciler
            .run_pass(&snapshot(vec![web()], AppConfig::default()))
            .await
            .unwrap();

        let id = fake.container("web").unwrap().id;
        let created = fake.inspect_container(&id).await.unwrap();
        assert_eq!(compare(&web(), &created), ReconciliationDecision::NoOp);
    }

    #[tokio::test]
    async fn test_image_exposed_port_does_not_force_recreate() {
        let fake = engine();
        let reconciler = reconciler(&fake, FailurePolicy::BestEffort);

        for _ in 0..2 {
            reconciler
                .run_pass(&snapshot(vec![db()], AppConfig::default()))
                .await
                .unwrap();
        }

        // The stored config carries the image's port, the declared one does not
        let stored = fake.container("db").unwrap();
        assert!(stored.exposed_ports.contains(&PortKey::new(5432, "tcp")));
        assert!(db().exposed_ports.is_empty());
        assert_eq!(fake.count(is_create), 1);
        assert_eq!(fake.count(is_remove), 0);
        assert_eq!(
            compare(&db(), &fake.inspect_container(&stored.id).await.unwrap()),
            ReconciliationDecision::NoOp
        );
    }

    #[tokio::test]
    async fn test_binding_an_image_port_recreates_container() {
        let fake = engine();
        let spec = db().with_port(PortKey::new(5432, "tcp"), HostBinding::new("", "15432"));
        let old_id = fake.seed_container(&db(), true);
        let reconciler = reconciler(&fake, FailurePolicy::BestEffort);

        let report = reconciler
            .run_pass(&snapshot(vec![spec], AppConfig::default()))
            .await
            .unwrap();

        assert_eq!(
            report.outcome("db").unwrap().actions,
            vec![
                ContainerAction::Recreated(vec![
                    MismatchedField::ExposedPorts,
                    MismatchedField::PortBindings,
                ]),
                ContainerAction::Started,
            ]
        );
        assert_ne!(fake.container("db").unwrap().id, old_id);
    }

    #[tokio::test]
    async fn test_matching_container_is_only_started() {
        let fake = engine();
        let id = fake.seed_container(&web(), false);
        fake.clear_calls();
        let reconciler = reconciler(&fake, FailurePolicy::BestEffort);

        let report = reconciler
            .run_pass(&snapshot(vec![web()], AppConfig::default()))
            .await
            .unwrap();

        assert_eq!(fake.count(is_create), 0);
        assert_eq!(fake.count(is_remove), 0);
        assert_eq!(fake.count(|c| matches!(c, EngineCall::Stop(_))), 0);
        assert!(fake.calls().contains(&EngineCall::Start(id.clone())));
        assert!(fake.is_running("web"));

        let outcome = report.outcome("web").unwrap();
        assert_eq!(outcome.id, id);
        assert_eq!(outcome.actions, vec![ContainerAction::Started]);
    }

    #[tokio::test]
    async fn test_undeclared_container_is_pruned() {
        let fake = engine();
        let web_id = fake.seed_container(&web(), true);
        let db_id = fake.seed_container(&db(), true);
        fake.clear_calls();
        let reconciler = reconciler(&fake, FailurePolicy::BestEffort);
        let app = AppConfig {
            remove_unwanted_containers: true,
            ..Default::default()
        };

        let report = reconciler
            .run_pass(&snapshot(vec![web()], app))
            .await
            .unwrap();

        assert_eq!(report.pruned, vec!["db".to_string()]);
        assert!(fake.calls().contains(&EngineCall::Stop(db_id.clone())));
        assert!(fake.calls().contains(&EngineCall::Remove(db_id)));
        assert!(!fake.calls().contains(&EngineCall::Stop(web_id.clone())));
        assert_eq!(fake.container("web").unwrap().id, web_id);
        assert_eq!(fake.names(), vec!["web".to_string()]);
    }

    #[tokio::test]
    async fn test_undeclared_container_is_kept_without_prune_flag() {
        let fake = engine();
        fake.seed_container(&web(), true);
        fake.seed_container(&db(), true);
        let reconciler = reconciler(&fake, FailurePolicy::BestEffort);

        let report = reconciler
            .run_pass(&snapshot(vec![web()], AppConfig::default()))
            .await
            .unwrap();

        assert!(report.pruned.is_empty());
        assert!(fake.container("db").is_some());
    }

    #[tokio::test]
    async fn test_binding_drift_recreates_container() {
        let fake = engine();
        let old_id = fake.seed_container(&web(), true);
        fake.mutate_container("web", |c| {
            c.port_bindings.insert(
                PortKey::new(80, "tcp"),
                [HostBinding::new("", "9999")].into_iter().collect(),
            );
        });
        let reconciler = reconciler(&fake, FailurePolicy::BestEffort);

        let report = reconciler
            .run_pass(&snapshot(vec![web()], AppConfig::default()))
            .await
            .unwrap();

        let outcome = report.outcome("web").unwrap();
        assert_eq!(
            outcome.actions,
            vec![
                ContainerAction::Recreated(vec![MismatchedField::PortBindings]),
                ContainerAction::Started,
            ]
        );
        let current = fake.container("web").unwrap();
        assert_ne!(current.id, old_id);
        assert_eq!(outcome.id, current.id);
        assert_eq!(fake.names(), vec!["web".to_string()]);
        assert!(fake.is_running("web"));
    }

    #[tokio::test]
    async fn test_env_drift_never_recreates() {
        let fake = engine();
        let id = fake.seed_container(&web().with_env("MODE=prod"), true);
        fake.mutate_container("web", |c| {
            c.env = vec!["PATH=/usr/bin".to_string(), "MODE=dev".to_string()];
        });
        let reconciler = reconciler(&fake, FailurePolicy::BestEffort);

        for _ in 0..2 {
            reconciler
                .run_pass(&snapshot(vec![web().with_env("MODE=prod")], AppConfig::default()))
                .await
                .unwrap();
        }

        assert_eq!(fake.count(is_create), 0);
        assert_eq!(fake.container("web").unwrap().id, id);
    }

    #[tokio::test]
    async fn test_stale_image_is_refreshed() {
        let fake = engine();
        let old_id = fake.seed_container(&web(), true);
        fake.publish_image("nginx:latest", "sha256:nginx-2");
        let reconciler = reconciler(&fake, FailurePolicy::BestEffort);
        let app = AppConfig {
            update_check: true,
            ..Default::default()
        };

        let report = reconciler
            .run_pass(&snapshot(vec![web()], app))
            .await
            .unwrap();

        assert_eq!(
            report.outcome("web").unwrap().actions,
            vec![ContainerAction::RefreshedImage, ContainerAction::Started]
        );
        let current = fake.container("web").unwrap();
        assert_ne!(current.id, old_id);
        assert_eq!(current.image_id, "sha256:nginx-2");
        assert!(fake.is_running("web"));
    }

    #[tokio::test]
    async fn test_up_to_date_image_is_left_alone() {
        let fake = engine();
        let id = fake.seed_container(&web(), true);
        let reconciler = reconciler(&fake, FailurePolicy::BestEffort);
        let app = AppConfig {
            update_check: true,
            ..Default::default()
        };

        reconciler
            .run_pass(&snapshot(vec![web()], app))
            .await
            .unwrap();

        assert_eq!(fake.count(|c| matches!(c, EngineCall::Pull(_))), 1);
        assert_eq!(fake.count(is_create), 0);
        assert_eq!(fake.container("web").unwrap().id, id);
    }

    #[tokio::test]
    async fn test_new_container_skips_freshness_check() {
        let fake = engine();
        let reconciler = reconciler(&fake, FailurePolicy::BestEffort);
        let app = AppConfig {
            update_check: true,
            ..Default::default()
        };

        reconciler
            .run_pass(&snapshot(vec![web()], app))
            .await
            .unwrap();

        assert_eq!(fake.count(|c| matches!(c, EngineCall::Pull(_))), 0);
        assert_eq!(fake.count(|c| matches!(c, EngineCall::ListImages)), 0);
        assert_eq!(fake.count(is_create), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_image_is_reported_not_recreated() {
        let fake = engine();
        let ghost = DesiredContainerSpec::new("ghost", "ghost:1");
        fake.seed_container(&ghost, true);
        fake.publish_dangling("ghost:1");
        let reconciler = reconciler(&fake, FailurePolicy::BestEffort);
        let app = AppConfig {
            update_check: true,
            ..Default::default()
        };

        let err = reconciler
            .run_pass(&snapshot(vec![ghost], app))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("could not find the latest image for ghost:1"));
        assert_eq!(fake.count(is_create), 0);
        assert!(fake.container("ghost").is_some());
    }

    #[tokio::test]
    async fn test_best_effort_converges_remaining_containers() {
        let fake = engine();
        fake.fail_on(EngineCall::Create("web".to_string()), "port is already allocated");
        let reconciler = reconciler(&fake, FailurePolicy::BestEffort);

        let err = reconciler
            .run_pass(&snapshot(vec![web(), db()], AppConfig::default()))
            .await
            .unwrap_err();

        match err {
            ManagerError::Reconcile(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].container, "web");
                assert!(failures[0].cause.contains("port is already allocated"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(fake.container("web").is_none());
        assert!(fake.is_running("db"));

        // The next pass heals what the failed one left behind
        fake.clear_failures();
        reconciler
            .run_pass(&snapshot(vec![web(), db()], AppConfig::default()))
            .await
            .unwrap();
        assert!(fake.is_running("web"));
    }

    #[tokio::test]
    async fn test_fail_fast_stops_at_first_failure() {
        let fake = engine();
        fake.fail_on(EngineCall::Create("web".to_string()), "port is already allocated");
        let reconciler = reconciler(&fake, FailurePolicy::FailFast);

        let err = reconciler
            .run_pass(&snapshot(vec![web(), db()], AppConfig::default()))
            .await
            .unwrap_err();

        assert!(matches!(err, ManagerError::Reconcile(ref f) if f.len() == 1));
        assert!(fake.container("db").is_none());
        assert_eq!(fake.count(|c| *c == EngineCall::Create("db".to_string())), 0);
    }

    #[tokio::test]
    async fn test_unreachable_engine_fails_whole_pass() {
        let fake = engine();
        fake.set_unavailable(true);
        let reconciler = reconciler(&fake, FailurePolicy::BestEffort);

        let err = reconciler
            .run_pass(&snapshot(vec![web()], AppConfig::default()))
            .await
            .unwrap_err();

        assert!(matches!(err, ManagerError::EngineUnavailable(_)));
    }

    #[test]
    fn test_whole_pass_error_counts_once() {
        let err: crate::error::Result<PassReport> =
            Err(ManagerError::EngineUnavailable("connection refused".to_string()));
        assert_eq!(failure_count(&err), 1);

        let ok: crate::error::Result<PassReport> = Ok(PassReport::default());
        assert_eq!(failure_count(&ok), 0);
    }

    #[tokio::test]
    async fn test_engine_lost_mid_pass_is_flagged_on_the_failure() {
        let fake = engine();
        fake.disconnect_on(EngineCall::Create("db".to_string()));
        let reconciler = reconciler(&fake, FailurePolicy::BestEffort);

        let err = reconciler
            .run_pass(&snapshot(vec![web(), db()], AppConfig::default()))
            .await
            .unwrap_err();

        match &err {
            ManagerError::Reconcile(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].container, "db");
                assert!(failures[0].engine_unreachable);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_engine_unreachable());
        assert!(fake.is_running("web"));
    }

    #[tokio::test]
    async fn test_report_renders_one_line_per_container() {
        let fake = engine();
        fake.seed_container(&db(), true);
        let reconciler = reconciler(&fake, FailurePolicy::BestEffort);
        let app = AppConfig {
            remove_unwanted_containers: true,
            ..Default::default()
        };

        let report = reconciler
            .run_pass(&snapshot(vec![web()], app))
            .await
            .unwrap();

        let text = report.to_string();
        assert_eq!(text, "db: removed\nweb: created, started\n");
    }
}
