//! Container engine seam.
//!
//! Every component receives an `Arc<dyn ContainerEngine>` constructed once
//! at startup. [`BollardEngine`] talks to a real Docker-compatible engine;
//! tests substitute `testing::StubEngine`.
//!
//! ```text
//!   ProjectManager / ServiceManager
//!            │
//!            ▼
//!   ContainerManager ──► PortResolver
//!            │
//!            ▼
//!   dyn ContainerEngine ──► BollardEngine ──► engine socket
//! ```

mod docker;
pub mod labels;
mod types;

pub use docker::{BollardEngine, connect_docker, single_file_archive};
pub use labels::{LabelKey, OwnerTag, OwnerType};
pub use types::{
    ContainerAction, ContainerDetails, ContainerEvent, ContainerSpec, ContainerSummary,
    EngineInfo, ExecOutput, HealthStatus, LifecycleState, LogLine, LogSource, PortMapping,
    RestartPolicy, StatsSample, VolumeBinding,
};

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::EngineError;

/// Result type for engine calls.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// A live, engine-sourced stream. Dropping it closes the underlying request.
pub type EngineStream<T> = BoxStream<'static, EngineResult<T>>;

/// Label filters as `(key, value)` pairs; all must match.
pub type LabelFilters = [(String, String)];

/// Operations dockyard needs from a container engine.
///
/// Implementations must classify failures into [`EngineError`] variants:
/// missing resources as `NotFound`, name/attachment clashes as `Conflict`,
/// unreachable sockets as `Unavailable`.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn ping(&self) -> EngineResult<()>;

    async fn info(&self) -> EngineResult<EngineInfo>;

    async fn network_exists(&self, name: &str) -> EngineResult<bool>;

    async fn create_network(&self, name: &str, labels: &HashMap<String, String>)
    -> EngineResult<()>;

    async fn volume_exists(&self, name: &str) -> EngineResult<bool>;

    async fn create_volume(&self, name: &str, labels: &HashMap<String, String>) -> EngineResult<()>;

    async fn list_volumes(&self, filters: &LabelFilters) -> EngineResult<Vec<String>>;

    async fn remove_volume(&self, name: &str, force: bool) -> EngineResult<()>;

    /// Create (not start) a container attached to `network`. Returns its id.
    async fn create_container(
        &self,
        spec: &ContainerSpec,
        labels: &HashMap<String, String>,
        network: &str,
    ) -> EngineResult<String>;

    async fn start_container(&self, id: &str) -> EngineResult<()>;

    async fn stop_container(&self, id: &str, timeout_secs: u32) -> EngineResult<()>;

    async fn restart_container(&self, id: &str, timeout_secs: u32) -> EngineResult<()>;

    async fn remove_container(&self, id: &str, remove_volumes: bool, force: bool)
    -> EngineResult<()>;

    /// Inspect by id or name. Missing containers yield `NotFound`.
    async fn inspect_container(&self, id: &str) -> EngineResult<ContainerDetails>;

    async fn list_containers(
        &self,
        filters: &LabelFilters,
        all: bool,
    ) -> EngineResult<Vec<ContainerSummary>>;

    /// Run `argv` to completion, collecting both output streams.
    async fn exec(&self, id: &str, argv: &[String]) -> EngineResult<ExecOutput>;

    /// Demultiplexed log lines. With `follow` the stream stays open.
    fn logs(&self, id: &str, tail: Option<usize>, follow: bool) -> EngineStream<LogLine>;

    /// One stats sample with previous CPU counters filled in.
    async fn stats(&self, id: &str) -> EngineResult<StatsSample>;

    /// Container lifecycle and health events, filtered to
    /// [`ContainerAction::ALL`]. Ends or errors when the connection drops.
    fn events(&self) -> EngineStream<ContainerEvent>;

    /// Write one file into a container's filesystem, replacing it.
    async fn upload_file(&self, id: &str, path: &str, contents: &[u8]) -> EngineResult<()>;
}
