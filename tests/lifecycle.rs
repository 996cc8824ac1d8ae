//! Container lifecycle scenarios against the in-memory engine.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use dockyard::engine::{
    ContainerSpec, HealthStatus, LabelKey, LifecycleState, OwnerTag, OwnerType, PortMapping,
    VolumeBinding,
};
use dockyard::error::LifecycleError;
use dockyard::lifecycle::ContainerOverrides;
use dockyard::proxy::SyncOutcome;
use dockyard::registry::{Project, ProjectRegistry};
use dockyard::testing::{StaticPortProbe, TestStack};
use futures::StreamExt;

fn devcontainer(name: &str, port: u16) -> ContainerSpec {
    ContainerSpec {
        name: name.to_string(),
        image: "devcontainer:latest".to_string(),
        ports: vec![PortMapping::new(port, port)],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_project_creation_scenario() {
    let stack = TestStack::new();
    stack.engine.add_proxy_container(true);

    let project = Project::new("demo", "local", None);
    stack.registry.save_project(&project).await.unwrap();

    let overrides = ContainerOverrides {
        name: Some("demo_devcontainer".to_string()),
        ports: Some(vec![PortMapping::new(8080, 8080)]),
        ..Default::default()
    };
    let id = stack
        .lifecycle
        .create_container(
            &devcontainer("placeholder", 1),
            &overrides,
            &OwnerTag::project(&project.id),
        )
        .await
        .unwrap();

    let state = stack.lifecycle.get_container_state(&id).await.unwrap();
    assert!(state.exists);
    assert_eq!(state.ports, vec![PortMapping::new(8080, 8080)]);
    assert_eq!(
        stack.engine.network_of(&id).as_deref(),
        Some(stack.config.engine.network.as_str())
    );

    let outcome = stack.proxy.sync_endpoints().await;
    let SyncOutcome::Applied { config } = outcome else {
        panic!("expected applied sync, got {:?}", outcome);
    };
    assert!(config.contains("https://demo.local {"));
    assert!(config.contains("reverse_proxy demo_devcontainer:8080"));
}

#[tokio::test]
async fn test_absence_contract() {
    let stack = TestStack::new();
    let state = stack.lifecycle.get_container_state("nope").await.unwrap();
    assert!(!state.exists);
    assert!(!state.running);
    assert_eq!(state.health, HealthStatus::None);
    assert_eq!(state.state, LifecycleState::Absent);

    let by_label = stack
        .lifecycle
        .get_container_state_by_label(LabelKey::OwnerId, "nope", None)
        .await
        .unwrap();
    assert!(!by_label.exists);
}

#[tokio::test]
async fn test_label_round_trip() {
    let stack = TestStack::new();
    let owner = OwnerTag::project("X");
    let id = stack
        .lifecycle
        .create_container(&devcontainer("x_devcontainer", 8080), &ContainerOverrides::default(), &owner)
        .await
        .unwrap();
    stack
        .lifecycle
        .create_container(
            &devcontainer("y_devcontainer", 8081),
            &ContainerOverrides::default(),
            &OwnerTag::project("Y"),
        )
        .await
        .unwrap();

    let found = stack
        .lifecycle
        .find_container_by_label(LabelKey::OwnerId, "X", Some(OwnerType::Project))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, id);
    assert_eq!(OwnerTag::from_labels(&found.labels), Some(owner));

    let wrong_type = stack
        .lifecycle
        .find_container_by_label(LabelKey::OwnerId, "X", Some(OwnerType::Service))
        .await
        .unwrap();
    assert!(wrong_type.is_none());
    let other = stack
        .lifecycle
        .find_container_by_label(LabelKey::OwnerId, "Z", Some(OwnerType::Project))
        .await
        .unwrap();
    assert!(other.is_none());
}

#[tokio::test]
async fn test_overrides_merge() {
    let stack = TestStack::new();
    let defaults = ContainerSpec {
        env: vec![("A".to_string(), "1".to_string())],
        volumes: vec![VolumeBinding::new("default_data", "/data")],
        ..devcontainer("svc", 6379)
    };
    let overrides = ContainerOverrides {
        ports: Some(vec![PortMapping::new(6380, 6379)]),
        env: vec![("B".to_string(), "2".to_string())],
        volumes: Some(vec![VolumeBinding::new("custom_data", "/data")]),
        ..Default::default()
    };
    stack
        .lifecycle
        .create_container(&defaults, &overrides, &OwnerTag::service("redis"))
        .await
        .unwrap();

    let spec = stack.engine.spec_of("svc").unwrap();
    assert_eq!(spec.ports, vec![PortMapping::new(6380, 6379)]);
    assert_eq!(
        spec.env,
        vec![
            ("A".to_string(), "1".to_string()),
            ("B".to_string(), "2".to_string())
        ]
    );
    assert_eq!(spec.volumes[0].source, "custom_data");
    assert_eq!(
        stack.engine.volume_names(),
        BTreeSet::from(["custom_data".to_string()])
    );
}

#[tokio::test]
async fn test_taken_host_port_is_remapped() {
    let stack = TestStack::with_probe(StaticPortProbe::new([3306]));
    let id = stack
        .lifecycle
        .create_container(&devcontainer("db", 3306), &ContainerOverrides::default(), &OwnerTag::service("mysql"))
        .await
        .unwrap();
    let state = stack.lifecycle.get_container_state(&id).await.unwrap();
    let host = state.host_port_for(3306).unwrap();
    assert!(host > 3306);
}

#[tokio::test]
async fn test_duplicate_container_port_is_rejected() {
    let stack = TestStack::new();
    let spec = ContainerSpec {
        ports: vec![PortMapping::new(9000, 80), PortMapping::new(9001, 80)],
        ..devcontainer("web", 1)
    };
    let err = stack
        .lifecycle
        .create_container(&spec, &ContainerOverrides::default(), &OwnerTag::service("web"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::DuplicatePort {
            container_port: 80,
            ..
        }
    ));
    assert!(stack.engine.container_names().is_empty());
}

#[tokio::test]
async fn test_shared_host_port_is_split_per_mapping() {
    let stack = TestStack::with_probe(StaticPortProbe::new([3306]));
    let spec = ContainerSpec {
        ports: vec![PortMapping::new(3306, 3306), PortMapping::new(3306, 33060)],
        ..devcontainer("db", 1)
    };
    let id = stack
        .lifecycle
        .create_container(&spec, &ContainerOverrides::default(), &OwnerTag::service("mysql"))
        .await
        .unwrap();

    let state = stack.lifecycle.get_container_state(&id).await.unwrap();
    let classic = state.host_port_for(3306).unwrap();
    let x_protocol = state.host_port_for(33060).unwrap();
    assert!(classic > 3306);
    assert!(x_protocol > 3306);
    assert_ne!(classic, x_protocol);
}

#[tokio::test]
async fn test_stopped_container_keeps_its_port_claim() {
    let stack = TestStack::new();
    stack
        .lifecycle
        .create_container(&devcontainer("first", 8080), &ContainerOverrides::default(), &OwnerTag::project("a"))
        .await
        .unwrap();
    // Never started: holds no socket, still owns the binding.
    let second = stack
        .lifecycle
        .create_container(&devcontainer("second", 8080), &ContainerOverrides::default(), &OwnerTag::project("b"))
        .await
        .unwrap();
    let state = stack.lifecycle.get_container_state(&second).await.unwrap();
    assert_ne!(state.host_port_for(8080), Some(8080));
}

#[tokio::test]
async fn test_name_conflict_is_a_create_error() {
    let stack = TestStack::new();
    let owner = OwnerTag::project("a");
    stack
        .lifecycle
        .create_container(&devcontainer("dup", 9000), &ContainerOverrides::default(), &owner)
        .await
        .unwrap();
    let err = stack
        .lifecycle
        .create_container(&devcontainer("dup", 9001), &ContainerOverrides::default(), &owner)
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Create { ref name, .. } if name == "dup"));
}

#[tokio::test]
async fn test_start_stop_are_idempotent() {
    let stack = TestStack::new();
    let id = stack
        .lifecycle
        .create_container(&devcontainer("svc", 7000), &ContainerOverrides::default(), &OwnerTag::service("s"))
        .await
        .unwrap();

    stack.lifecycle.start_container(&id).await.unwrap();
    stack.lifecycle.start_container(&id).await.unwrap();
    assert!(stack.lifecycle.is_running(&id).await);

    stack.lifecycle.stop_container(&id, 1).await.unwrap();
    stack.lifecycle.stop_container(&id, 1).await.unwrap();
    assert!(!stack.lifecycle.is_running(&id).await);

    stack.lifecycle.restart_container(&id, 1).await.unwrap();
    assert!(stack.lifecycle.is_running(&id).await);
}

#[tokio::test]
async fn test_remove_running_container_and_missing_one() {
    let stack = TestStack::new();
    let id = stack
        .lifecycle
        .create_container(&devcontainer("svc", 7000), &ContainerOverrides::default(), &OwnerTag::service("s"))
        .await
        .unwrap();
    stack.lifecycle.start_container(&id).await.unwrap();

    stack.lifecycle.remove_container(&id, true).await.unwrap();
    assert!(!stack.lifecycle.get_container_state(&id).await.unwrap().exists);
    stack.lifecycle.remove_container(&id, true).await.unwrap();
}

#[tokio::test]
async fn test_volume_in_use_is_distinct() {
    let stack = TestStack::new();
    let spec = ContainerSpec {
        volumes: vec![VolumeBinding::new("shared_data", "/data")],
        ..devcontainer("svc", 7000)
    };
    let owner = OwnerTag::service("s");
    let id = stack
        .lifecycle
        .create_container(&spec, &ContainerOverrides::default(), &owner)
        .await
        .unwrap();

    let err = stack.lifecycle.remove_volume("shared_data", false).await.unwrap_err();
    assert!(matches!(err, LifecycleError::InUse { .. }));

    stack.lifecycle.remove_container(&id, false).await.unwrap();
    stack.lifecycle.remove_managed_volumes(&owner, false).await.unwrap();
    assert!(stack.engine.volume_names().is_empty());
    stack.lifecycle.remove_volume("shared_data", false).await.unwrap();
}

#[tokio::test]
async fn test_unavailable_engine() {
    let stack = TestStack::new();
    stack.engine.set_available(false);
    assert!(!stack.lifecycle.is_available().await);

    let err = stack.lifecycle.get_container_state("x").await.unwrap_err();
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn test_exec_and_logs() {
    let stack = TestStack::new();
    let id = stack
        .lifecycle
        .create_container(&devcontainer("svc", 7000), &ContainerOverrides::default(), &OwnerTag::service("s"))
        .await
        .unwrap();
    stack.lifecycle.start_container(&id).await.unwrap();

    stack.engine.set_exec_result(dockyard::engine::ExecOutput {
        exit_code: 0,
        stdout: "hello\n".to_string(),
        stderr: String::new(),
    });
    let argv = vec!["echo".to_string(), "hello".to_string()];
    let output = stack.lifecycle.exec_in_container(&id, &argv).await.unwrap();
    assert!(output.success());
    assert_eq!(output.stdout, "hello\n");
    assert!(stack.lifecycle.exec_in_container(&id, &[]).await.is_err());

    stack.engine.set_log_lines(dockyard::engine::LogLine::split_chunk(
        dockyard::engine::LogSource::Stderr,
        b"one\ntwo\n",
    ));
    let mut logs = stack.lifecycle.stream_logs(&id, Some(10));
    let closer = logs.closer();
    assert_eq!(logs.next_line().await.unwrap().text, "one");
    assert_eq!(logs.next_line().await.unwrap().text, "two");

    closer.close();
    closer.close();
    let rest: Vec<_> = tokio::time::timeout(Duration::from_secs(1), logs.collect::<Vec<_>>())
        .await
        .unwrap();
    assert!(rest.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_slow_stats_degrade_to_zero() {
    let stack = TestStack::new();
    let id = stack
        .lifecycle
        .create_container(&devcontainer("svc", 7000), &ContainerOverrides::default(), &OwnerTag::service("s"))
        .await
        .unwrap();
    stack.lifecycle.start_container(&id).await.unwrap();

    let stats = stack.lifecycle.managed_resource_stats().await;
    assert_eq!(stats.containers, 1);
    assert!(stats.cpu_percent > 0.0);
    assert_eq!(stats.memory_bytes, 64 * 1024 * 1024);

    stack.engine.set_stats_delay(Some(Duration::from_secs(60)));
    let stats = stack.lifecycle.managed_resource_stats().await;
    assert_eq!(stats.containers, 1);
    assert_eq!(stats.cpu_percent, 0.0);
    assert_eq!(stats.memory_bytes, 0);
    assert_eq!(stats.host_cpus, 4);
}

#[tokio::test]
async fn test_network_is_created_once() {
    let stack = TestStack::new();
    let network = stack.config.engine.network.clone();
    stack.lifecycle.ensure_network_exists(&network).await.unwrap();
    stack.lifecycle.ensure_network_exists(&network).await.unwrap();
    assert!(stack.engine.has_network(&network));

    stack
        .lifecycle
        .ensure_volumes_exist(&["a".to_string(), "a".to_string()], &HashMap::new())
        .await
        .unwrap();
    assert_eq!(stack.engine.volume_names().len(), 1);
}
