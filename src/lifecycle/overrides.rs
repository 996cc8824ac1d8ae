use serde::{Deserialize, Serialize};

use crate::engine::{ContainerSpec, PortMapping, VolumeBinding};

/// Caller-supplied changes layered over a default [`ContainerSpec`].
///
/// Environment variables are appended after the defaults (later entries
/// win inside the container). Name, ports and volumes replace the defaults
/// wholesale when present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<PortMapping>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<VolumeBinding>>,
}

impl ContainerOverrides {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply(&self, defaults: &ContainerSpec) -> ContainerSpec {
        let mut spec = defaults.clone();
        if let Some(name) = &self.name {
            spec.name = name.clone();
        }
        if let Some(ports) = &self.ports {
            spec.ports = ports.clone();
        }
        if let Some(volumes) = &self.volumes {
            spec.volumes = volumes.clone();
        }
        spec.env.extend(self.env.iter().cloned());
        spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> ContainerSpec {
        ContainerSpec {
            name: "dockyard_mysql".to_string(),
            image: "mysql:8".to_string(),
            ports: vec![PortMapping::new(3306, 3306), PortMapping::new(33060, 33060)],
            env: vec![("MYSQL_ROOT_PASSWORD".to_string(), "root".to_string())],
            volumes: vec![VolumeBinding::new("dockyard_mysql_data", "/var/lib/mysql")],
            ..Default::default()
        }
    }

    #[test]
    fn test_env_is_concatenated() {
        let overrides = ContainerOverrides {
            env: vec![("MYSQL_DATABASE".to_string(), "app".to_string())],
            ..Default::default()
        };
        let spec = overrides.apply(&defaults());
        assert_eq!(spec.env.len(), 2);
        assert_eq!(spec.env[0].0, "MYSQL_ROOT_PASSWORD");
        assert_eq!(spec.env[1].0, "MYSQL_DATABASE");
    }

    #[test]
    fn test_ports_and_volumes_are_replaced() {
        let overrides = ContainerOverrides {
            ports: Some(vec![PortMapping::new(3307, 3306)]),
            volumes: Some(Vec::new()),
            name: Some("custom".to_string()),
            ..Default::default()
        };
        let spec = overrides.apply(&defaults());
        assert_eq!(spec.ports, vec![PortMapping::new(3307, 3306)]);
        assert!(spec.volumes.is_empty());
        assert_eq!(spec.name, "custom");
        assert_eq!(spec.image, "mysql:8");
    }

    #[test]
    fn test_empty_overrides_keep_defaults() {
        let overrides = ContainerOverrides::default();
        assert!(overrides.is_empty());
        assert_eq!(overrides.apply(&defaults()), defaults());
    }
}
