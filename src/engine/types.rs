//! Engine-neutral records exchanged across the [`ContainerEngine`] seam.
//!
//! [`ContainerEngine`]: super::ContainerEngine

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A (host port, container port) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
}

impl PortMapping {
    pub fn new(host_port: u16, container_port: u16) -> Self {
        Self {
            host_port,
            container_port,
        }
    }

    /// Parse a `host:container` pair such as `3307:3306`. A single number
    /// maps the port to itself.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.split_once(':') {
            Some((host, container)) => Some(Self::new(
                host.trim().parse().ok()?,
                container.trim().parse().ok()?,
            )),
            None => {
                let port = raw.trim().parse().ok()?;
                Some(Self::new(port, port))
            }
        }
    }
}

impl std::fmt::Display for PortMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host_port, self.container_port)
    }
}

/// A mount: named volume or host path, mounted at `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeBinding {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

impl VolumeBinding {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    /// Named volumes have no path separator; bind mounts always do.
    pub fn is_named_volume(&self) -> bool {
        !self.source.contains('/') && !self.source.contains('\\')
    }

    pub fn to_bind(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source, self.target)
        } else {
            format!("{}:{}", self.source, self.target)
        }
    }
}

/// Desired restart behaviour of a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    Always,
    #[default]
    UnlessStopped,
    OnFailure,
}

/// Full creation request for a container.
///
/// Containers are never reconfigured in place; a changed spec means
/// remove and recreate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub ports: Vec<PortMapping>,
    pub env: Vec<(String, String)>,
    pub volumes: Vec<VolumeBinding>,
    pub restart_policy: RestartPolicy,
    pub cmd: Option<Vec<String>>,
}

impl ContainerSpec {
    pub fn env_strings(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

/// Engine-reported lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    /// No such container.
    Absent,
    Unknown,
}

impl LifecycleState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Removing => "removing",
            Self::Exited => "exited",
            Self::Dead => "dead",
            Self::Absent => "absent",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health-check status. `None` covers containers without a health check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Starting,
    Healthy,
    Unhealthy,
    #[default]
    None,
}

impl HealthStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "starting" => Self::Starting,
            "healthy" => Self::Healthy,
            "unhealthy" => Self::Unhealthy,
            _ => Self::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::None => "none",
        }
    }
}

/// Result of inspecting a single container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: LifecycleState,
    pub health: HealthStatus,
    pub ports: Vec<PortMapping>,
    pub labels: HashMap<String, String>,
}

/// One row of a container listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: LifecycleState,
    pub ports: Vec<PortMapping>,
    pub labels: HashMap<String, String>,
}

/// Output of a command executed inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Which stream a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub source: LogSource,
    pub text: String,
}

impl LogLine {
    /// Split a raw engine chunk into lines, dropping the trailing newline.
    pub fn split_chunk(source: LogSource, chunk: &[u8]) -> Vec<LogLine> {
        String::from_utf8_lossy(chunk)
            .split('\n')
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
            .map(|line| LogLine {
                source,
                text: line.to_string(),
            })
            .collect()
    }
}

/// Host-wide engine facts used by stats aggregation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineInfo {
    pub cpus: u64,
    pub memory_total: u64,
}

/// One stats sample for a container (current and previous CPU counters).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSample {
    pub cpu_total: u64,
    pub precpu_total: u64,
    pub system_total: u64,
    pub presystem_total: u64,
    pub online_cpus: u64,
    pub memory_usage: u64,
    pub memory_limit: u64,
}

impl StatsSample {
    /// CPU usage in percent of one core, the way `docker stats` reports it.
    pub fn cpu_percent(&self) -> f64 {
        let cpu_delta = self.cpu_total.saturating_sub(self.precpu_total) as f64;
        let system_delta = self.system_total.saturating_sub(self.presystem_total) as f64;
        if cpu_delta <= 0.0 || system_delta <= 0.0 {
            return 0.0;
        }
        let cpus = self.online_cpus.max(1) as f64;
        cpu_delta / system_delta * cpus * 100.0
    }
}

/// Container lifecycle actions carried by the engine's event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerAction {
    Start,
    Stop,
    Die,
    Kill,
    Pause,
    Unpause,
    Restart,
    HealthStatus,
}

impl ContainerAction {
    /// Parse an engine action. Health actions arrive as
    /// `health_status: healthy`, so the detail is returned alongside.
    pub fn parse(raw: &str) -> Option<(Self, Option<HealthStatus>)> {
        let (head, detail) = match raw.split_once(':') {
            Some((head, detail)) => (head.trim(), Some(detail.trim())),
            None => (raw.trim(), None),
        };
        let action = match head {
            "start" => Self::Start,
            "stop" => Self::Stop,
            "die" => Self::Die,
            "kill" => Self::Kill,
            "pause" => Self::Pause,
            "unpause" => Self::Unpause,
            "restart" => Self::Restart,
            "health_status" => Self::HealthStatus,
            _ => return None,
        };
        let health = match action {
            Self::HealthStatus => detail.map(HealthStatus::parse),
            _ => None,
        };
        Some((action, health))
    }

    /// Actions that change whether a container runs. Health pings and
    /// pause/unpause are excluded.
    pub fn is_state_change(&self) -> bool {
        matches!(
            self,
            Self::Start | Self::Stop | Self::Die | Self::Kill | Self::Restart
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Die => "die",
            Self::Kill => "kill",
            Self::Pause => "pause",
            Self::Unpause => "unpause",
            Self::Restart => "restart",
            Self::HealthStatus => "health_status",
        }
    }

    /// Every action the event subscription is filtered to.
    pub const ALL: [ContainerAction; 8] = [
        Self::Start,
        Self::Stop,
        Self::Die,
        Self::Kill,
        Self::Pause,
        Self::Unpause,
        Self::Restart,
        Self::HealthStatus,
    ];
}

/// A container lifecycle event. Transient, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerEvent {
    pub id: String,
    pub name: String,
    pub action: ContainerAction,
    pub health: Option<HealthStatus>,
    pub timestamp: DateTime<Utc>,
    /// Actor attributes; include the container's labels.
    pub attributes: HashMap<String, String>,
}

impl ContainerEvent {
    /// Build an event from raw engine fields. Returns `None` for actions
    /// outside [`ContainerAction::ALL`].
    pub fn from_parts(
        id: String,
        action: &str,
        attributes: HashMap<String, String>,
        time_secs: Option<i64>,
    ) -> Option<Self> {
        let (action, health) = ContainerAction::parse(action)?;
        let name = attributes
            .get("name")
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default();
        let timestamp = time_secs
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now);
        Some(Self {
            id,
            name,
            action,
            health,
            timestamp,
            attributes,
        })
    }
}
