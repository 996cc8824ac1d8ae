//! [`ContainerEngine`] backed by bollard.
//!
//! This is the only module that touches bollard types. Every error leaves
//! here already classified into [`EngineError`].

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, NetworkingConfig, RemoveContainerOptions, RestartContainerOptions,
    StartContainerOptions, StatsOptions, StopContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{
    EndpointSettings, EventMessage, HostConfig, PortBinding, RestartPolicy as EngineRestartPolicy,
    RestartPolicyNameEnum,
};
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions};
use bollard::system::EventsOptions;
use bollard::volume::{CreateVolumeOptions, ListVolumesOptions, RemoveVolumeOptions};
use bytes::Bytes;
use futures::StreamExt;

use crate::engine::types::{
    ContainerAction, ContainerDetails, ContainerEvent, ContainerSpec, ContainerSummary,
    EngineInfo, ExecOutput, HealthStatus, LifecycleState, LogLine, LogSource, PortMapping,
    RestartPolicy, StatsSample,
};
use crate::engine::{ContainerEngine, EngineResult, EngineStream, LabelFilters};
use crate::error::EngineError;

/// Connect to the container engine.
///
/// Tries bollard's defaults first (which honour `DOCKER_HOST`), then the
/// per-user sockets used by Docker Desktop and rootless installs. Each
/// candidate must answer a ping.
pub async fn connect_docker() -> EngineResult<Docker> {
    let last_error = match Docker::connect_with_defaults() {
        Ok(docker) => match docker.ping().await {
            Ok(_) => return Ok(docker),
            Err(e) => e.to_string(),
        },
        Err(e) => e.to_string(),
    };

    #[cfg(unix)]
    for path in fallback_socket_paths() {
        if !path.exists() {
            continue;
        }
        let Some(path_str) = path.to_str() else {
            continue;
        };
        tracing::debug!(socket = %path_str, "Trying fallback engine socket");
        if let Ok(docker) =
            Docker::connect_with_socket(path_str, 120, bollard::API_DEFAULT_VERSION)
            && docker.ping().await.is_ok()
        {
            return Ok(docker);
        }
    }

    Err(EngineError::Unavailable { reason: last_error })
}

#[cfg(unix)]
fn fallback_socket_paths() -> Vec<std::path::PathBuf> {
    let mut paths = Vec::new();
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".docker/run/docker.sock"));
        paths.push(home.join(".colima/default/docker.sock"));
    }
    if let Some(runtime) = std::env::var_os("XDG_RUNTIME_DIR") {
        paths.push(std::path::PathBuf::from(runtime).join("docker.sock"));
    }
    paths
}

/// Build a tar archive holding a single file, as the archive-upload
/// endpoint expects.
pub fn single_file_archive(file_name: &str, contents: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    builder.append_data(&mut header, file_name, contents)?;
    builder.into_inner()
}

fn classify(resource: &str, err: bollard::errors::Error) -> EngineError {
    use bollard::errors::Error as E;

    match err {
        E::DockerResponseServerError {
            status_code: 404, ..
        } => EngineError::NotFound {
            resource: resource.to_string(),
        },
        E::DockerResponseServerError {
            status_code: 409,
            message,
        } => EngineError::Conflict {
            resource: resource.to_string(),
            reason: message,
        },
        E::DockerResponseServerError {
            status_code: 304, ..
        } => EngineError::NotModified {
            resource: resource.to_string(),
        },
        E::DockerResponseServerError {
            status_code,
            message,
        } => EngineError::Api {
            reason: format!("{resource}: HTTP {status_code}: {message}"),
        },
        e @ (E::IOError { .. } | E::RequestTimeoutError | E::HyperLegacyError { .. }) => {
            EngineError::Unavailable {
                reason: e.to_string(),
            }
        }
        other => EngineError::Api {
            reason: format!("{resource}: {other}"),
        },
    }
}

fn label_filter_map(filters: &LabelFilters) -> HashMap<String, Vec<String>> {
    let mut map = HashMap::new();
    if !filters.is_empty() {
        map.insert(
            "label".to_string(),
            filters.iter().map(|(k, v)| format!("{k}={v}")).collect(),
        );
    }
    map
}

fn restart_policy(policy: RestartPolicy) -> EngineRestartPolicy {
    let name = match policy {
        RestartPolicy::No => RestartPolicyNameEnum::NO,
        RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
        RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
        RestartPolicy::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
    };
    EngineRestartPolicy {
        name: Some(name),
        maximum_retry_count: None,
    }
}

/// Collect `(host, container)` pairs from an engine port map, dropping the
/// duplicate IPv4/IPv6 bindings the engine reports.
fn port_map_to_mappings(map: &HashMap<String, Option<Vec<PortBinding>>>) -> Vec<PortMapping> {
    let mut out = BTreeSet::new();
    for (key, bindings) in map {
        let Some(container_port) = key.split('/').next().and_then(|p| p.parse().ok()) else {
            continue;
        };
        for binding in bindings.iter().flatten() {
            if let Some(host_port) = binding.host_port.as_deref().and_then(|p| p.parse().ok()) {
                out.insert(PortMapping::new(host_port, container_port));
            }
        }
    }
    out.into_iter().collect()
}

fn event_from_message(message: EventMessage) -> Option<ContainerEvent> {
    let action = message.action?;
    let actor = message.actor?;
    let id = actor.id.unwrap_or_default();
    ContainerEvent::from_parts(id, &action, actor.attributes.unwrap_or_default(), message.time)
}

/// Production engine client.
#[derive(Clone)]
pub struct BollardEngine {
    docker: Docker,
}

impl BollardEngine {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect via [`connect_docker`].
    pub async fn connect() -> EngineResult<Self> {
        connect_docker().await.map(Self::new)
    }
}

#[async_trait]
impl ContainerEngine for BollardEngine {
    async fn ping(&self) -> EngineResult<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| classify("engine", e))
    }

    async fn info(&self) -> EngineResult<EngineInfo> {
        let info = self
            .docker
            .info()
            .await
            .map_err(|e| classify("engine info", e))?;
        Ok(EngineInfo {
            cpus: info.ncpu.unwrap_or(0).max(0) as u64,
            memory_total: info.mem_total.unwrap_or(0).max(0) as u64,
        })
    }

    async fn network_exists(&self, name: &str) -> EngineResult<bool> {
        match self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => match classify(&format!("network {name}"), e) {
                EngineError::NotFound { .. } => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn create_network(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> EngineResult<()> {
        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            labels: labels.clone(),
            ..Default::default()
        };
        self.docker
            .create_network(options)
            .await
            .map(|_| ())
            .map_err(|e| classify(&format!("network {name}"), e))
    }

    async fn volume_exists(&self, name: &str) -> EngineResult<bool> {
        match self.docker.inspect_volume(name).await {
            Ok(_) => Ok(true),
            Err(e) => match classify(&format!("volume {name}"), e) {
                EngineError::NotFound { .. } => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn create_volume(&self, name: &str, labels: &HashMap<String, String>) -> EngineResult<()> {
        let options = CreateVolumeOptions {
            name: name.to_string(),
            driver: "local".to_string(),
            labels: labels.clone(),
            ..Default::default()
        };
        self.docker
            .create_volume(options)
            .await
            .map(|_| ())
            .map_err(|e| classify(&format!("volume {name}"), e))
    }

    async fn list_volumes(&self, filters: &LabelFilters) -> EngineResult<Vec<String>> {
        let options = ListVolumesOptions {
            filters: label_filter_map(filters),
        };
        let response = self
            .docker
            .list_volumes(Some(options))
            .await
            .map_err(|e| classify("volumes", e))?;
        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.name)
            .collect())
    }

    async fn remove_volume(&self, name: &str, force: bool) -> EngineResult<()> {
        self.docker
            .remove_volume(name, Some(RemoveVolumeOptions { force }))
            .await
            .map_err(|e| classify(&format!("volume {name}"), e))
    }

    async fn create_container(
        &self,
        spec: &ContainerSpec,
        labels: &HashMap<String, String>,
        network: &str,
    ) -> EngineResult<String> {
        let mut port_bindings = HashMap::new();
        let mut exposed_ports = HashMap::new();
        for mapping in &spec.ports {
            let key = format!("{}/tcp", mapping.container_port);
            port_bindings.insert(
                key.clone(),
                Some(vec![PortBinding {
                    host_ip: Some("127.0.0.1".to_string()),
                    host_port: Some(mapping.host_port.to_string()),
                }]),
            );
            exposed_ports.insert(key, HashMap::new());
        }

        let binds: Vec<String> = spec.volumes.iter().map(|v| v.to_bind()).collect();
        let env = spec.env_strings();

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            binds: if binds.is_empty() { None } else { Some(binds) },
            network_mode: Some(network.to_string()),
            restart_policy: Some(restart_policy(spec.restart_policy)),
            ..Default::default()
        };

        let networking_config = NetworkingConfig {
            endpoints_config: HashMap::from([(
                network.to_string(),
                EndpointSettings {
                    aliases: Some(vec![spec.name.clone()]),
                    ..Default::default()
                },
            )]),
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: if env.is_empty() { None } else { Some(env) },
            cmd: spec.cmd.clone(),
            labels: Some(labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            networking_config: Some(networking_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| classify(&format!("container {}", spec.name), e))?;

        for warning in &response.warnings {
            tracing::warn!(container = %spec.name, "Engine warning on create: {}", warning);
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> EngineResult<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| classify(&format!("container {id}"), e))
    }

    async fn stop_container(&self, id: &str, timeout_secs: u32) -> EngineResult<()> {
        self.docker
            .stop_container(
                id,
                Some(StopContainerOptions {
                    t: i64::from(timeout_secs),
                }),
            )
            .await
            .map_err(|e| classify(&format!("container {id}"), e))
    }

    async fn restart_container(&self, id: &str, timeout_secs: u32) -> EngineResult<()> {
        self.docker
            .restart_container(
                id,
                Some(RestartContainerOptions {
                    t: timeout_secs as isize,
                }),
            )
            .await
            .map_err(|e| classify(&format!("container {id}"), e))
    }

    async fn remove_container(
        &self,
        id: &str,
        remove_volumes: bool,
        force: bool,
    ) -> EngineResult<()> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    v: remove_volumes,
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| classify(&format!("container {id}"), e))
    }

    async fn inspect_container(&self, id: &str) -> EngineResult<ContainerDetails> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| classify(&format!("container {id}"), e))?;

        let state = response.state.as_ref();
        let lifecycle = state
            .and_then(|s| s.status.as_ref())
            .map(|s| LifecycleState::parse(&s.to_string()))
            .unwrap_or(LifecycleState::Unknown);
        let health = state
            .and_then(|s| s.health.as_ref())
            .and_then(|h| h.status.as_ref())
            .map(|s| HealthStatus::parse(&s.to_string()))
            .unwrap_or_default();

        // Live bindings exist only while running; fall back to the
        // configured ones for stopped containers.
        let mut ports = response
            .network_settings
            .as_ref()
            .and_then(|n| n.ports.as_ref())
            .map(port_map_to_mappings)
            .unwrap_or_default();
        if ports.is_empty() {
            ports = response
                .host_config
                .as_ref()
                .and_then(|h| h.port_bindings.as_ref())
                .map(port_map_to_mappings)
                .unwrap_or_default();
        }

        let config = response.config.as_ref();
        Ok(ContainerDetails {
            id: response.id.clone().unwrap_or_else(|| id.to_string()),
            name: response
                .name
                .as_deref()
                .unwrap_or(id)
                .trim_start_matches('/')
                .to_string(),
            image: config.and_then(|c| c.image.clone()).unwrap_or_default(),
            state: lifecycle,
            health,
            ports,
            labels: config.and_then(|c| c.labels.clone()).unwrap_or_default(),
        })
    }

    async fn list_containers(
        &self,
        filters: &LabelFilters,
        all: bool,
    ) -> EngineResult<Vec<ContainerSummary>> {
        let options = ListContainersOptions::<String> {
            all,
            filters: label_filter_map(filters),
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| classify("containers", e))?;

        Ok(containers
            .into_iter()
            .map(|c| {
                let mut ports: Vec<PortMapping> = c
                    .ports
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|p| Some(PortMapping::new(p.public_port?, p.private_port)))
                    .collect();
                ports.sort();
                ports.dedup();
                ContainerSummary {
                    id: c.id.unwrap_or_default(),
                    name: c
                        .names
                        .and_then(|n| n.into_iter().next())
                        .map(|n| n.trim_start_matches('/').to_string())
                        .unwrap_or_default(),
                    image: c.image.unwrap_or_default(),
                    state: c
                        .state
                        .as_deref()
                        .map(LifecycleState::parse)
                        .unwrap_or(LifecycleState::Unknown),
                    ports,
                    labels: c.labels.unwrap_or_default(),
                }
            })
            .collect())
    }

    async fn exec(&self, id: &str, argv: &[String]) -> EngineResult<ExecOutput> {
        let resource = format!("container {id}");
        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions::<String> {
                    cmd: Some(argv.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| classify(&resource, e))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| classify(&resource, e))?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk.map_err(|e| classify(&resource, e))? {
                        LogOutput::StdOut { message } | LogOutput::Console { message } => {
                            stdout.push_str(&String::from_utf8_lossy(&message))
                        }
                        LogOutput::StdErr { message } => {
                            stderr.push_str(&String::from_utf8_lossy(&message))
                        }
                        LogOutput::StdIn { .. } => {}
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| classify(&resource, e))?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    fn logs(&self, id: &str, tail: Option<usize>, follow: bool) -> EngineStream<LogLine> {
        let options = LogsOptions::<String> {
            follow,
            stdout: true,
            stderr: true,
            tail: tail.map(|n| n.to_string()).unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };
        let resource = format!("container {id}");

        self.docker
            .logs(id, Some(options))
            .flat_map(move |item| {
                let lines: Vec<EngineResult<LogLine>> = match item {
                    Ok(LogOutput::StdErr { message }) => {
                        LogLine::split_chunk(LogSource::Stderr, &message)
                            .into_iter()
                            .map(Ok)
                            .collect()
                    }
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        LogLine::split_chunk(LogSource::Stdout, &message)
                            .into_iter()
                            .map(Ok)
                            .collect()
                    }
                    Ok(LogOutput::StdIn { .. }) => Vec::new(),
                    Err(e) => vec![Err(classify(&resource, e))],
                };
                futures::stream::iter(lines)
            })
            .boxed()
    }

    async fn stats(&self, id: &str) -> EngineResult<StatsSample> {
        let mut stream = self.docker.stats(
            id,
            Some(StatsOptions {
                stream: false,
                one_shot: false,
            }),
        );
        let stats = match stream.next().await {
            Some(Ok(stats)) => stats,
            Some(Err(e)) => return Err(classify(&format!("container {id}"), e)),
            None => {
                return Err(EngineError::Api {
                    reason: format!("container {id}: empty stats response"),
                });
            }
        };

        Ok(StatsSample {
            cpu_total: stats.cpu_stats.cpu_usage.total_usage,
            precpu_total: stats.precpu_stats.cpu_usage.total_usage,
            system_total: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            presystem_total: stats.precpu_stats.system_cpu_usage.unwrap_or(0),
            online_cpus: stats.cpu_stats.online_cpus.unwrap_or(1),
            memory_usage: stats.memory_stats.usage.unwrap_or(0),
            memory_limit: stats.memory_stats.limit.unwrap_or(0),
        })
    }

    fn events(&self) -> EngineStream<ContainerEvent> {
        let filters = HashMap::from([
            ("type".to_string(), vec!["container".to_string()]),
            (
                "event".to_string(),
                ContainerAction::ALL
                    .iter()
                    .map(|a| a.as_str().to_string())
                    .collect(),
            ),
        ]);
        let options = EventsOptions::<String> {
            filters,
            ..Default::default()
        };

        self.docker
            .events(Some(options))
            .filter_map(|item| async move {
                match item {
                    Ok(message) => event_from_message(message).map(Ok),
                    Err(e) => Some(Err(classify("event stream", e))),
                }
            })
            .boxed()
    }

    async fn upload_file(&self, id: &str, path: &str, contents: &[u8]) -> EngineResult<()> {
        let (dir, file_name) = match path.rsplit_once('/') {
            Some(("", name)) => ("/", name),
            Some((dir, name)) => (dir, name),
            None => ("/", path),
        };
        let archive = single_file_archive(file_name, contents).map_err(|e| EngineError::Api {
            reason: format!("failed to build archive for {path}: {e}"),
        })?;

        self.docker
            .upload_to_container(
                id,
                Some(UploadToContainerOptions {
                    path: dir.to_string(),
                    ..Default::default()
                }),
                Bytes::from(archive),
            )
            .await
            .map_err(|e| classify(&format!("container {id}"), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status_codes() {
        let not_found = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such container: demo".to_string(),
        };
        assert!(classify("container demo", not_found).is_not_found());

        let conflict = bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message: "volume is in use".to_string(),
        };
        assert!(matches!(
            classify("volume demo", conflict),
            EngineError::Conflict { .. }
        ));

        let other = bollard::errors::Error::DockerResponseServerError {
            status_code: 500,
            message: "boom".to_string(),
        };
        assert!(matches!(classify("x", other), EngineError::Api { .. }));
    }

    #[test]
    fn test_port_map_dedupes_ipv6_bindings() {
        let binding = |port: &str| PortBinding {
            host_ip: Some("0.0.0.0".to_string()),
            host_port: Some(port.to_string()),
        };
        let map = HashMap::from([
            ("8080/tcp".to_string(), Some(vec![binding("8080"), binding("8080")])),
            ("3306/tcp".to_string(), Some(vec![binding("3307")])),
            ("9000/tcp".to_string(), None),
        ]);
        let ports = port_map_to_mappings(&map);
        assert_eq!(
            ports,
            vec![PortMapping::new(3307, 3306), PortMapping::new(8080, 8080)]
        );
    }

    #[test]
    fn test_label_filter_map() {
        let filters = vec![("a".to_string(), "1".to_string())];
        let map = label_filter_map(&filters);
        assert_eq!(map.get("label").unwrap(), &vec!["a=1".to_string()]);
        assert!(label_filter_map(&[]).is_empty());
    }

    #[test]
    fn test_single_file_archive() {
        let archive = single_file_archive("Caddyfile", b"localhost {}\n").unwrap();
        let mut reader = tar::Archive::new(archive.as_slice());
        let entries: Vec<_> = reader
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["Caddyfile".to_string()]);
    }
}
