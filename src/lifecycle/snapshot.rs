use serde::Serialize;

use crate::engine::{ContainerDetails, HealthStatus, LifecycleState, PortMapping};

/// Point-in-time view of a container. Always recomputed, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerStateSnapshot {
    pub id: Option<String>,
    pub exists: bool,
    pub running: bool,
    pub state: LifecycleState,
    pub ports: Vec<PortMapping>,
    pub health: HealthStatus,
}

impl ContainerStateSnapshot {
    /// Snapshot of a container that does not exist.
    pub fn absent() -> Self {
        Self {
            id: None,
            exists: false,
            running: false,
            state: LifecycleState::Absent,
            ports: Vec::new(),
            health: HealthStatus::None,
        }
    }

    /// Host port published for `container_port`, if any.
    pub fn host_port_for(&self, container_port: u16) -> Option<u16> {
        self.ports
            .iter()
            .find(|p| p.container_port == container_port)
            .map(|p| p.host_port)
    }
}

impl From<ContainerDetails> for ContainerStateSnapshot {
    fn from(details: ContainerDetails) -> Self {
        Self {
            running: details.state == LifecycleState::Running,
            id: Some(details.id),
            exists: true,
            state: details.state,
            ports: details.ports,
            health: details.health,
        }
    }
}
