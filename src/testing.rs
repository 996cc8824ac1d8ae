//! Test doubles for the orchestration core.
//!
//! Provides:
//! - [`StubEngine`]: an in-memory container engine with injectable outages,
//!   event-stream disconnects and recorded uploads/execs
//! - [`StaticPortProbe`]: a port probe with a fixed set of taken ports
//! - [`RecordingHosts`]: a hosts editor that records every call
//! - [`TestStack`]: every component wired against the stubs
//!
//! # Usage
//!
//! ```rust,no_run
//! use dockyard::testing::TestStack;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let stack = TestStack::new();
//!     stack.engine.add_proxy_container(true);
//!     // use stack.projects, stack.proxy, ...
//! }
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::engine::{
    ContainerAction, ContainerDetails, ContainerEngine, ContainerEvent, ContainerSpec,
    ContainerSummary, EngineInfo, EngineResult, EngineStream, ExecOutput, HealthStatus,
    LabelFilters, LifecycleState, LogLine, OwnerTag, OwnerType, StatsSample,
};
use crate::entities::{ProjectManager, ServiceManager};
use crate::error::EngineError;
use crate::hosts::{HostsEditor, HostsOutcome};
use crate::lifecycle::ContainerManager;
use crate::ports::{PortProbe, PortResolver};
use crate::proxy::ProxySynchronizer;
use crate::registry::InMemoryRegistry;

#[derive(Debug, Clone)]
struct StubContainer {
    id: String,
    spec: ContainerSpec,
    labels: HashMap<String, String>,
    network: String,
    state: LifecycleState,
    health: HealthStatus,
}

impl StubContainer {
    fn matches(&self, id_or_name: &str) -> bool {
        self.id == id_or_name || self.spec.name == id_or_name.trim_start_matches('/')
    }

    fn summary(&self) -> ContainerSummary {
        ContainerSummary {
            id: self.id.clone(),
            name: self.spec.name.clone(),
            image: self.spec.image.clone(),
            state: self.state,
            ports: self.spec.ports.clone(),
            labels: self.labels.clone(),
        }
    }
}

/// A file written into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub container: String,
    pub path: String,
    pub contents: Vec<u8>,
}

#[derive(Debug, Default)]
struct StubState {
    containers: Vec<StubContainer>,
    volumes: HashMap<String, HashMap<String, String>>,
    networks: HashSet<String>,
    next_id: u64,
    uploads: Vec<Upload>,
    execs: Vec<(String, Vec<String>)>,
    exec_result: ExecOutput,
    log_lines: Vec<LogLine>,
    stats_delay: Option<Duration>,
    calls: Vec<&'static str>,
}

type EventItem = Result<ContainerEvent, EngineError>;

/// In-memory [`ContainerEngine`].
///
/// State transitions emit the matching container events, the way a real
/// engine does. [`disconnect_events`](Self::disconnect_events) ends every
/// open event stream with an error.
pub struct StubEngine {
    state: Mutex<StubState>,
    available: AtomicBool,
    refuse_events: AtomicBool,
    events: broadcast::Sender<EventItem>,
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StubEngine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            state: Mutex::new(StubState::default()),
            available: AtomicBool::new(true),
            refuse_events: AtomicBool::new(false),
            events,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self, call: &'static str) -> EngineResult<()> {
        self.lock().calls.push(call);
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::Unavailable {
                reason: "stub engine offline".to_string(),
            })
        }
    }

    /// Toggle whether every call fails with `Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// While set, new event streams fail on their first poll even though
    /// ping succeeds.
    pub fn refuse_events(&self, refuse: bool) {
        self.refuse_events.store(refuse, Ordering::SeqCst);
    }

    /// End every open event stream with an error.
    pub fn disconnect_events(&self) {
        let _ = self.events.send(Err(EngineError::Unavailable {
            reason: "event stream reset".to_string(),
        }));
    }

    /// Number of open event streams.
    pub fn event_subscribers(&self) -> usize {
        self.events.receiver_count()
    }

    /// Publish an event as the engine would for `container`.
    pub fn emit(&self, container: &str, action: ContainerAction) {
        let (id, mut attributes) = {
            let state = self.lock();
            match state.containers.iter().find(|c| c.matches(container)) {
                Some(c) => (c.id.clone(), c.labels.clone()),
                None => (container.to_string(), HashMap::new()),
            }
        };
        attributes.insert("name".to_string(), container.to_string());
        let event = ContainerEvent {
            id,
            name: container.to_string(),
            action,
            health: None,
            timestamp: chrono::Utc::now(),
            attributes,
        };
        let _ = self.events.send(Ok(event));
    }

    /// Insert a container created outside the manager, e.g. the proxy.
    pub fn add_container(
        &self,
        name: &str,
        state: LifecycleState,
        labels: HashMap<String, String>,
    ) -> String {
        let mut guard = self.lock();
        guard.next_id += 1;
        let id = format!("{:064x}", guard.next_id);
        guard.containers.push(StubContainer {
            id: id.clone(),
            spec: ContainerSpec {
                name: name.to_string(),
                image: "stub:latest".to_string(),
                ..Default::default()
            },
            labels,
            network: String::new(),
            state,
            health: HealthStatus::None,
        });
        id
    }

    /// Add the edge proxy container (`dockyard_caddy`).
    pub fn add_proxy_container(&self, running: bool) -> String {
        let state = if running {
            LifecycleState::Running
        } else {
            LifecycleState::Exited
        };
        self.add_container(
            "dockyard_caddy",
            state,
            OwnerTag::new(OwnerType::Service, "caddy").to_labels(),
        )
    }

    pub fn set_state(&self, container: &str, state: LifecycleState) {
        if let Some(c) = self.lock().containers.iter_mut().find(|c| c.matches(container)) {
            c.state = state;
        }
    }

    pub fn set_health(&self, container: &str, health: HealthStatus) {
        if let Some(c) = self.lock().containers.iter_mut().find(|c| c.matches(container)) {
            c.health = health;
        }
    }

    pub fn set_exec_result(&self, result: ExecOutput) {
        self.lock().exec_result = result;
    }

    pub fn set_log_lines(&self, lines: Vec<LogLine>) {
        self.lock().log_lines = lines;
    }

    /// Make every `stats` call take `delay`.
    pub fn set_stats_delay(&self, delay: Option<Duration>) {
        self.lock().stats_delay = delay;
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.lock().uploads.clone()
    }

    pub fn execs(&self) -> Vec<(String, Vec<String>)> {
        self.lock().execs.clone()
    }

    pub fn container_names(&self) -> Vec<String> {
        self.lock()
            .containers
            .iter()
            .map(|c| c.spec.name.clone())
            .collect()
    }

    /// Spec the container was created with.
    pub fn spec_of(&self, container: &str) -> Option<ContainerSpec> {
        self.lock()
            .containers
            .iter()
            .find(|c| c.matches(container))
            .map(|c| c.spec.clone())
    }

    pub fn network_of(&self, container: &str) -> Option<String> {
        self.lock()
            .containers
            .iter()
            .find(|c| c.matches(container))
            .map(|c| c.network.clone())
    }

    pub fn volume_names(&self) -> BTreeSet<String> {
        self.lock().volumes.keys().cloned().collect()
    }

    pub fn has_network(&self, name: &str) -> bool {
        self.lock().networks.contains(name)
    }

    /// Engine calls made so far, by name.
    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    fn transition(
        &self,
        id: &str,
        action: ContainerAction,
        apply: impl FnOnce(&mut StubContainer) -> EngineResult<()>,
    ) -> EngineResult<()> {
        let name = {
            let mut state = self.lock();
            let container = state
                .containers
                .iter_mut()
                .find(|c| c.matches(id))
                .ok_or_else(|| not_found("container", id))?;
            apply(container)?;
            container.spec.name.clone()
        };
        self.emit(&name, action);
        Ok(())
    }
}

fn not_found(kind: &str, name: &str) -> EngineError {
    EngineError::NotFound {
        resource: format!("{} {}", kind, name),
    }
}

fn labels_match(labels: &HashMap<String, String>, filters: &LabelFilters) -> bool {
    filters
        .iter()
        .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
}

#[async_trait]
impl ContainerEngine for StubEngine {
    async fn ping(&self) -> EngineResult<()> {
        self.check("ping")
    }

    async fn info(&self) -> EngineResult<EngineInfo> {
        self.check("info")?;
        Ok(EngineInfo {
            cpus: 4,
            memory_total: 8 * 1024 * 1024 * 1024,
        })
    }

    async fn network_exists(&self, name: &str) -> EngineResult<bool> {
        self.check("network_exists")?;
        Ok(self.lock().networks.contains(name))
    }

    async fn create_network(
        &self,
        name: &str,
        _labels: &HashMap<String, String>,
    ) -> EngineResult<()> {
        self.check("create_network")?;
        if !self.lock().networks.insert(name.to_string()) {
            return Err(EngineError::Conflict {
                resource: format!("network {}", name),
                reason: "already exists".to_string(),
            });
        }
        Ok(())
    }

    async fn volume_exists(&self, name: &str) -> EngineResult<bool> {
        self.check("volume_exists")?;
        Ok(self.lock().volumes.contains_key(name))
    }

    async fn create_volume(&self, name: &str, labels: &HashMap<String, String>) -> EngineResult<()> {
        self.check("create_volume")?;
        self.lock()
            .volumes
            .entry(name.to_string())
            .or_insert_with(|| labels.clone());
        Ok(())
    }

    async fn list_volumes(&self, filters: &LabelFilters) -> EngineResult<Vec<String>> {
        self.check("list_volumes")?;
        let mut names: Vec<String> = self
            .lock()
            .volumes
            .iter()
            .filter(|(_, labels)| labels_match(labels, filters))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn remove_volume(&self, name: &str, force: bool) -> EngineResult<()> {
        self.check("remove_volume")?;
        let mut state = self.lock();
        if !state.volumes.contains_key(name) {
            return Err(not_found("volume", name));
        }
        let attached = state
            .containers
            .iter()
            .any(|c| c.spec.volumes.iter().any(|v| v.source == name));
        if attached && !force {
            return Err(EngineError::Conflict {
                resource: format!("volume {}", name),
                reason: "volume is in use".to_string(),
            });
        }
        state.volumes.remove(name);
        Ok(())
    }

    async fn create_container(
        &self,
        spec: &ContainerSpec,
        labels: &HashMap<String, String>,
        network: &str,
    ) -> EngineResult<String> {
        self.check("create_container")?;
        let mut state = self.lock();
        if state.containers.iter().any(|c| c.spec.name == spec.name) {
            return Err(EngineError::Conflict {
                resource: format!("container {}", spec.name),
                reason: "name already in use".to_string(),
            });
        }
        if !state.networks.contains(network) {
            return Err(not_found("network", network));
        }
        state.next_id += 1;
        let id = format!("{:064x}", state.next_id);
        state.containers.push(StubContainer {
            id: id.clone(),
            spec: spec.clone(),
            labels: labels.clone(),
            network: network.to_string(),
            state: LifecycleState::Created,
            health: HealthStatus::None,
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> EngineResult<()> {
        self.check("start_container")?;
        self.transition(id, ContainerAction::Start, |c| {
            if c.state == LifecycleState::Running {
                return Err(EngineError::NotModified {
                    resource: format!("container {}", c.spec.name),
                });
            }
            c.state = LifecycleState::Running;
            Ok(())
        })
    }

    async fn stop_container(&self, id: &str, _timeout_secs: u32) -> EngineResult<()> {
        self.check("stop_container")?;
        self.transition(id, ContainerAction::Stop, |c| {
            if c.state != LifecycleState::Running {
                return Err(EngineError::NotModified {
                    resource: format!("container {}", c.spec.name),
                });
            }
            c.state = LifecycleState::Exited;
            Ok(())
        })
    }

    async fn restart_container(&self, id: &str, _timeout_secs: u32) -> EngineResult<()> {
        self.check("restart_container")?;
        self.transition(id, ContainerAction::Restart, |c| {
            c.state = LifecycleState::Running;
            Ok(())
        })
    }

    async fn remove_container(&self, id: &str, _remove_volumes: bool, force: bool) -> EngineResult<()> {
        self.check("remove_container")?;
        let mut state = self.lock();
        let index = state
            .containers
            .iter()
            .position(|c| c.matches(id))
            .ok_or_else(|| not_found("container", id))?;
        if state.containers[index].state == LifecycleState::Running && !force {
            return Err(EngineError::Conflict {
                resource: format!("container {}", id),
                reason: "container is running".to_string(),
            });
        }
        state.containers.remove(index);
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> EngineResult<ContainerDetails> {
        self.check("inspect_container")?;
        self.lock()
            .containers
            .iter()
            .find(|c| c.matches(id))
            .map(|c| ContainerDetails {
                id: c.id.clone(),
                name: c.spec.name.clone(),
                image: c.spec.image.clone(),
                state: c.state,
                health: c.health,
                ports: c.spec.ports.clone(),
                labels: c.labels.clone(),
            })
            .ok_or_else(|| not_found("container", id))
    }

    async fn list_containers(
        &self,
        filters: &LabelFilters,
        all: bool,
    ) -> EngineResult<Vec<ContainerSummary>> {
        self.check("list_containers")?;
        Ok(self
            .lock()
            .containers
            .iter()
            .filter(|c| all || c.state == LifecycleState::Running)
            .filter(|c| labels_match(&c.labels, filters))
            .map(StubContainer::summary)
            .collect())
    }

    async fn exec(&self, id: &str, argv: &[String]) -> EngineResult<ExecOutput> {
        self.check("exec")?;
        let mut state = self.lock();
        let running = state
            .containers
            .iter()
            .find(|c| c.matches(id))
            .map(|c| c.state == LifecycleState::Running)
            .ok_or_else(|| not_found("container", id))?;
        if !running {
            return Err(EngineError::Conflict {
                resource: format!("container {}", id),
                reason: "container is not running".to_string(),
            });
        }
        state.execs.push((id.to_string(), argv.to_vec()));
        Ok(state.exec_result.clone())
    }

    fn logs(&self, _id: &str, _tail: Option<usize>, follow: bool) -> EngineStream<LogLine> {
        let lines: Vec<EngineResult<LogLine>> =
            self.lock().log_lines.iter().cloned().map(Ok).collect();
        let head = stream::iter(lines);
        if follow {
            head.chain(stream::pending()).boxed()
        } else {
            head.boxed()
        }
    }

    async fn stats(&self, id: &str) -> EngineResult<StatsSample> {
        self.check("stats")?;
        let delay = self.lock().stats_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !self.lock().containers.iter().any(|c| c.matches(id)) {
            return Err(not_found("container", id));
        }
        Ok(StatsSample {
            cpu_total: 200,
            precpu_total: 100,
            system_total: 2000,
            presystem_total: 1000,
            online_cpus: 2,
            memory_usage: 64 * 1024 * 1024,
            memory_limit: 1024 * 1024 * 1024,
        })
    }

    fn events(&self) -> EngineStream<ContainerEvent> {
        if self.refuse_events.load(Ordering::SeqCst) {
            return stream::once(async {
                Err(EngineError::Api {
                    reason: "events endpoint refused".to_string(),
                })
            })
            .boxed();
        }
        let rx = self.events.subscribe();
        stream::unfold(Some(rx), |rx| async move {
            let mut rx = rx?;
            loop {
                match rx.recv().await {
                    Ok(Ok(event)) => return Some((Ok(event), Some(rx))),
                    // The stream ends after an error, like a dropped connection.
                    Ok(Err(e)) => return Some((Err(e), None)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }

    async fn upload_file(&self, id: &str, path: &str, contents: &[u8]) -> EngineResult<()> {
        self.check("upload_file")?;
        let mut state = self.lock();
        if !state.containers.iter().any(|c| c.matches(id)) {
            return Err(not_found("container", id));
        }
        state.uploads.push(Upload {
            container: id.to_string(),
            path: path.to_string(),
            contents: contents.to_vec(),
        });
        Ok(())
    }
}

/// A [`PortProbe`] that reports a fixed set of ports as taken.
#[derive(Debug, Clone, Default)]
pub struct StaticPortProbe {
    taken: BTreeSet<u16>,
}

impl StaticPortProbe {
    pub fn new(taken: impl IntoIterator<Item = u16>) -> Self {
        Self {
            taken: taken.into_iter().collect(),
        }
    }
}

#[async_trait]
impl PortProbe for StaticPortProbe {
    async fn is_free(&self, port: u16) -> bool {
        !self.taken.contains(&port)
    }
}

/// Hosts operation recorded by [`RecordingHosts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostsCall {
    Add { ip: String, domain: String },
    Remove { ip: String, domain: String },
}

/// A [`HostsEditor`] that records calls and always succeeds.
#[derive(Debug, Default)]
pub struct RecordingHosts {
    calls: Mutex<Vec<HostsCall>>,
    latency: Mutex<Option<Duration>>,
}

impl RecordingHosts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every edit, after it is recorded, by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    async fn settle(&self) {
        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    pub fn calls(&self) -> Vec<HostsCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl HostsEditor for RecordingHosts {
    async fn add_host_entry(&self, ip: &str, domain: &str) -> HostsOutcome {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(HostsCall::Add {
                ip: ip.to_string(),
                domain: domain.to_string(),
            });
        self.settle().await;
        HostsOutcome::ok()
    }

    async fn remove_host_entry(&self, ip: &str, domain: &str) -> HostsOutcome {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(HostsCall::Remove {
                ip: ip.to_string(),
                domain: domain.to_string(),
            });
        self.settle().await;
        HostsOutcome::ok()
    }
}

/// Every component wired against in-memory collaborators.
pub struct TestStack {
    pub config: Config,
    pub engine: Arc<StubEngine>,
    pub registry: Arc<InMemoryRegistry>,
    pub hosts: Arc<RecordingHosts>,
    pub lifecycle: Arc<ContainerManager>,
    pub proxy: Arc<ProxySynchronizer>,
    pub projects: ProjectManager,
    pub services: ServiceManager,
}

impl Default for TestStack {
    fn default() -> Self {
        Self::new()
    }
}

impl TestStack {
    /// Stack where every host port is free.
    pub fn new() -> Self {
        Self::with_probe(StaticPortProbe::default())
    }

    pub fn with_probe(probe: StaticPortProbe) -> Self {
        let config = Config::default();
        let engine = Arc::new(StubEngine::new());
        let registry = Arc::new(InMemoryRegistry::new());
        let hosts = Arc::new(RecordingHosts::new());

        let resolver = PortResolver::with_probe(config.ports.clone(), Arc::new(probe));
        let lifecycle = Arc::new(ContainerManager::new(
            engine.clone(),
            resolver,
            config.engine.clone(),
        ));
        let proxy = Arc::new(ProxySynchronizer::new(
            Arc::clone(&lifecycle),
            registry.clone(),
            config.proxy.clone(),
        ));
        let projects = ProjectManager::new(
            Arc::clone(&lifecycle),
            registry.clone(),
            Arc::clone(&proxy),
            hosts.clone(),
            config.projects.clone(),
        );
        let services = ServiceManager::new(
            Arc::clone(&lifecycle),
            registry.clone(),
            Arc::clone(&proxy),
        );

        Self {
            config,
            engine,
            registry,
            hosts,
            lifecycle,
            proxy,
            projects,
            services,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_emits_events_on_transitions() {
        let engine = StubEngine::new();
        let mut events = engine.events();
        engine.add_container("demo_devcontainer", LifecycleState::Exited, HashMap::new());

        engine.start_container("demo_devcontainer").await.unwrap();
        let event = events.next().await.unwrap().unwrap();
        assert_eq!(event.action, ContainerAction::Start);
        assert_eq!(event.name, "demo_devcontainer");

        engine.disconnect_events();
        assert!(events.next().await.unwrap().is_err());
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stub_volume_in_use() {
        let engine = StubEngine::new();
        engine.create_network("net", &HashMap::new()).await.unwrap();
        engine.create_volume("data", &HashMap::new()).await.unwrap();
        let spec = ContainerSpec {
            name: "db".to_string(),
            volumes: vec![crate::engine::VolumeBinding::new("data", "/data")],
            ..Default::default()
        };
        engine.create_container(&spec, &HashMap::new(), "net").await.unwrap();

        let err = engine.remove_volume("data", false).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
        engine.remove_volume("data", true).await.unwrap();
    }
}
