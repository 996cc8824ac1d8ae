//! Event bus scenarios.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dockyard::config::EventsConfig;
use dockyard::engine::{ContainerAction, LifecycleState, OwnerTag};
use dockyard::entities::{EntityKind, EntityRef};
use dockyard::events::{ConnectionState, EventBus, Invalidation};
use dockyard::registry::{InMemoryRegistry, Project};
use dockyard::testing::StubEngine;
use tokio::sync::broadcast;

fn config() -> EventsConfig {
    EventsConfig {
        debounce: Duration::from_millis(300),
        backoff_initial: Duration::from_millis(1000),
        backoff_max: Duration::from_millis(30_000),
        stable_after: Duration::from_millis(200),
    }
}

/// Drain everything currently queued without waiting.
fn drain(rx: &mut broadcast::Receiver<Invalidation>) -> Vec<Invalidation> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        out.push(item);
    }
    out
}

async fn wait_connected(handle: &dockyard::events::EventBusHandle) {
    let mut status = handle.status_receiver();
    tokio::time::timeout(
        Duration::from_secs(60),
        status.wait_for(|s| s.state == ConnectionState::Connected),
    )
    .await
    .expect("bus never connected")
    .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_debounce_coalesces_burst() {
    let engine = Arc::new(StubEngine::new());
    let mut projects = Vec::new();
    for i in 0..10 {
        let project = Project::new(format!("p{}", i), "local", None);
        engine.add_container(
            &project.container_name(),
            LifecycleState::Exited,
            OwnerTag::project(&project.id).to_labels(),
        );
        projects.push(project);
    }
    let registry = Arc::new(InMemoryRegistry::with_projects(projects.clone()));

    let bus = EventBus::new(engine.clone(), registry, config());
    let mut rx = bus.subscribe();
    let handle = bus.start();
    wait_connected(&handle).await;

    for project in &projects {
        engine.emit(&project.container_name(), ContainerAction::Start);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(500)).await;

    let received = drain(&mut rx);
    let targeted = received
        .iter()
        .filter(|i| matches!(i, Invalidation::Entity(_)))
        .count();
    let bulk: Vec<_> = received
        .iter()
        .filter(|i| matches!(i, Invalidation::Class(_)))
        .collect();
    assert_eq!(targeted, 10);
    assert_eq!(bulk, vec![&Invalidation::Class(EntityKind::Project)]);
    assert!(!received.contains(&Invalidation::All));

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_health_events_are_targeted_only() {
    let engine = Arc::new(StubEngine::new());
    let registry = Arc::new(InMemoryRegistry::new());
    engine.add_container(
        "dockyard_mysql",
        LifecycleState::Running,
        HashMap::new(),
    );

    let bus = EventBus::new(engine.clone(), registry, config());
    let mut rx = bus.subscribe();
    let handle = bus.start();
    wait_connected(&handle).await;

    engine.emit("dockyard_mysql", ContainerAction::HealthStatus);
    engine.emit("unrelated", ContainerAction::Start);
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(
        drain(&mut rx),
        vec![Invalidation::Entity(EntityRef::service("mysql"))]
    );
    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_emits_one_resync() {
    let engine = Arc::new(StubEngine::new());
    let registry = Arc::new(InMemoryRegistry::new());
    let bus = EventBus::new(engine.clone(), registry, config());
    let mut rx = bus.subscribe();
    let handle = bus.start();
    wait_connected(&handle).await;
    assert!(drain(&mut rx).is_empty());

    engine.set_available(false);
    engine.disconnect_events();

    let mut status = handle.status_receiver();
    let disconnected = status
        .wait_for(|s| s.state == ConnectionState::Disconnected && s.attempt >= 2)
        .await
        .unwrap()
        .clone();
    assert!(disconnected.last_error.is_some());
    assert!(drain(&mut rx).is_empty());

    engine.set_available(true);
    wait_connected(&handle).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(drain(&mut rx), vec![Invalidation::All]);
    assert_eq!(handle.status().attempt, 0);
    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_refused_event_stream_backs_off() {
    let engine = Arc::new(StubEngine::new());
    let bus = EventBus::new(engine.clone(), Arc::new(InMemoryRegistry::new()), config());
    let mut rx = bus.subscribe();
    let handle = bus.start();
    wait_connected(&handle).await;
    assert!(drain(&mut rx).is_empty());

    // Ping keeps answering, but every new event stream fails at once.
    engine.refuse_events(true);
    engine.disconnect_events();

    let max_attempt = Arc::new(std::sync::Mutex::new(0u32));
    let connected = Arc::new(std::sync::Mutex::new(0usize));
    let (sink_attempt, sink_connected) = (Arc::clone(&max_attempt), Arc::clone(&connected));
    let _watcher = handle.on_connection_status_change(move |status| {
        let mut max = sink_attempt.lock().unwrap();
        *max = (*max).max(status.attempt);
        if status.is_connected() {
            *sink_connected.lock().unwrap() += 1;
        }
    });

    tokio::time::sleep(Duration::from_secs(60)).await;

    // Delays 1, 2, 4, 8, 16, 30 seconds: six or seven failures in a minute,
    // not one per second.
    let attempts = *max_attempt.lock().unwrap();
    assert!((5..=8).contains(&attempts), "attempts = {attempts}");
    assert_eq!(*connected.lock().unwrap(), 0);
    assert!(drain(&mut rx).is_empty());

    engine.refuse_events(false);
    wait_connected(&handle).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(drain(&mut rx), vec![Invalidation::All]);
    assert_eq!(handle.status().attempt, 0);
    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_status_callback_sees_transitions() {
    let engine = Arc::new(StubEngine::new());
    let bus = EventBus::new(engine.clone(), Arc::new(InMemoryRegistry::new()), config());
    let handle = bus.start();

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _watcher = handle.on_connection_status_change(move |status| {
        sink.lock().unwrap().push(status.state);
    });

    wait_connected(&handle).await;
    engine.disconnect_events();
    tokio::time::sleep(Duration::from_secs(5)).await;

    let seen = seen.lock().unwrap().clone();
    assert!(seen.contains(&ConnectionState::Disconnected));
    assert_eq!(seen.last(), Some(&ConnectionState::Connected));
    handle.stop().await;
}

#[tokio::test]
async fn test_stop_ends_subscription() {
    let engine = Arc::new(StubEngine::new());
    let bus = EventBus::new(engine.clone(), Arc::new(InMemoryRegistry::new()), config());
    let handle = bus.start();
    wait_connected(&handle).await;
    assert_eq!(engine.event_subscribers(), 1);

    handle.stop().await;
    assert_eq!(engine.event_subscribers(), 0);
}
