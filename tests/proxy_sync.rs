//! Proxy synchronizer scenarios.

use dockyard::proxy::SyncOutcome;
use dockyard::registry::{Project, ProjectRegistry};
use dockyard::testing::TestStack;
use pretty_assertions::assert_eq;

async fn stack_with_projects(names: &[&str]) -> TestStack {
    let stack = TestStack::new();
    for name in names {
        stack
            .registry
            .save_project(&Project::new(*name, "local", None))
            .await
            .unwrap();
    }
    stack
}

fn applied(outcome: SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Applied { config } => config,
        other => panic!("expected applied sync, got {:?}", other),
    }
}

#[tokio::test]
async fn test_sync_is_idempotent() {
    let stack = stack_with_projects(&["shop", "blog"]).await;
    stack.engine.add_proxy_container(true);

    let first = applied(stack.proxy.sync_endpoints().await);
    let second = applied(stack.proxy.sync_endpoints().await);
    assert_eq!(first, second);

    let uploads = stack.engine.uploads();
    assert_eq!(uploads.len(), 2);
    assert_eq!(uploads[0].contents, uploads[1].contents);
    assert_eq!(uploads[0].path, "/etc/caddy/Caddyfile");
    assert_eq!(uploads[0].container, "dockyard_caddy");
}

#[tokio::test]
async fn test_sync_reloads_gracefully() {
    let stack = stack_with_projects(&["shop"]).await;
    stack.engine.add_proxy_container(true);

    applied(stack.proxy.sync_endpoints().await);
    let execs = stack.engine.execs();
    assert_eq!(execs.len(), 1);
    assert_eq!(
        execs[0].1,
        vec![
            "caddy",
            "reload",
            "--config",
            "/etc/caddy/Caddyfile",
            "--adapter",
            "caddyfile"
        ]
    );
}

#[tokio::test]
async fn test_proxy_absent_is_success_without_write() {
    let stack = stack_with_projects(&["shop"]).await;

    let outcome = stack.proxy.sync_endpoints().await;
    assert!(outcome.is_success());
    assert!(matches!(outcome, SyncOutcome::Skipped { .. }));
    assert!(stack.engine.uploads().is_empty());

    stack.engine.add_proxy_container(false);
    let outcome = stack.proxy.sync_endpoints().await;
    assert!(matches!(outcome, SyncOutcome::Skipped { .. }));
    assert!(stack.engine.uploads().is_empty());
}

#[tokio::test]
async fn test_engine_down_is_skipped() {
    let stack = stack_with_projects(&[]).await;
    stack.engine.set_available(false);
    let outcome = stack.proxy.sync_endpoints().await;
    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_failed_reload_is_reported() {
    let stack = stack_with_projects(&["shop"]).await;
    stack.engine.add_proxy_container(true);
    stack.engine.set_exec_result(dockyard::engine::ExecOutput {
        exit_code: 1,
        stdout: String::new(),
        stderr: "Error: adapting config".to_string(),
    });

    let outcome = stack.proxy.sync_endpoints().await;
    assert!(!outcome.is_success());
    assert!(outcome.error().unwrap().contains("adapting config"));
}

#[tokio::test]
async fn test_registry_change_changes_output() {
    let stack = stack_with_projects(&["shop"]).await;
    stack.engine.add_proxy_container(true);

    let before = applied(stack.proxy.sync_endpoints().await);
    stack
        .registry
        .save_project(&Project::new("blog", "local", None))
        .await
        .unwrap();
    let after = applied(stack.proxy.sync_endpoints().await);

    assert!(!before.contains("blog.local"));
    assert!(after.contains("https://blog.local {"));
    // Sorted by domain.
    assert!(after.find("blog.local").unwrap() < after.find("shop.local").unwrap());
}

#[tokio::test]
async fn test_spawned_sync_never_fails_the_caller() {
    let stack = stack_with_projects(&["shop"]).await;
    stack.engine.add_proxy_container(true);
    stack.engine.set_exec_result(dockyard::engine::ExecOutput {
        exit_code: 2,
        ..Default::default()
    });

    let outcome = stack.proxy.spawn_sync("test").await.unwrap();
    assert!(outcome.error().is_some());
}
