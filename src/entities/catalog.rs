//! Built-in service catalog.

use crate::engine::{ContainerSpec, PortMapping, RestartPolicy, VolumeBinding};
use crate::registry::service_container_name;

/// What runs after a successful install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceHook {
    None,
    /// The service is the edge proxy: push the routing table into it.
    ResyncProxy,
}

/// A service the catalog knows how to provision.
#[derive(Debug)]
pub struct ServiceDefinition {
    pub id: &'static str,
    pub name: &'static str,
    pub image: &'static str,
    /// `(host, container)` defaults. Host ports are resolved at create time.
    pub ports: &'static [(u16, u16)],
    pub env: &'static [(&'static str, &'static str)],
    /// Mount point of the service's data volume, if it keeps state.
    pub data_dir: Option<&'static str>,
    pub hook: ServiceHook,
}

impl ServiceDefinition {
    pub fn container_name(&self) -> String {
        service_container_name(self.id)
    }

    pub fn volume_name(&self) -> String {
        format!("{}_data", self.container_name())
    }

    /// Container spec before user overrides.
    pub fn default_spec(&self) -> ContainerSpec {
        ContainerSpec {
            name: self.container_name(),
            image: self.image.to_string(),
            ports: self
                .ports
                .iter()
                .map(|&(host, container)| PortMapping::new(host, container))
                .collect(),
            env: self
                .env
                .iter()
                .map(|&(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            volumes: self
                .data_dir
                .map(|dir| vec![VolumeBinding::new(self.volume_name(), dir)])
                .unwrap_or_default(),
            restart_policy: RestartPolicy::UnlessStopped,
            cmd: None,
        }
    }
}

static CATALOG: [ServiceDefinition; 5] = [
    ServiceDefinition {
        id: "mysql",
        name: "MySQL",
        image: "mysql:8.0",
        ports: &[(3306, 3306)],
        env: &[("MYSQL_ROOT_PASSWORD", "root")],
        data_dir: Some("/var/lib/mysql"),
        hook: ServiceHook::None,
    },
    ServiceDefinition {
        id: "postgresql",
        name: "PostgreSQL",
        image: "postgres:16-alpine",
        ports: &[(5432, 5432)],
        env: &[("POSTGRES_PASSWORD", "postgres")],
        data_dir: Some("/var/lib/postgresql/data"),
        hook: ServiceHook::None,
    },
    ServiceDefinition {
        id: "redis",
        name: "Redis",
        image: "redis:7-alpine",
        ports: &[(6379, 6379)],
        env: &[],
        data_dir: Some("/data"),
        hook: ServiceHook::None,
    },
    ServiceDefinition {
        id: "mailpit",
        name: "Mailpit",
        image: "axllent/mailpit:latest",
        ports: &[(1025, 1025), (8025, 8025)],
        env: &[],
        data_dir: None,
        hook: ServiceHook::None,
    },
    ServiceDefinition {
        id: "caddy",
        name: "Caddy",
        image: "caddy:2-alpine",
        ports: &[(80, 80), (443, 443)],
        env: &[],
        data_dir: Some("/data"),
        hook: ServiceHook::ResyncProxy,
    },
];

pub fn catalog() -> &'static [ServiceDefinition] {
    &CATALOG
}

pub fn find_service(id: &str) -> Option<&'static ServiceDefinition> {
    CATALOG.iter().find(|def| def.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let mut ids: Vec<_> = catalog().iter().map(|d| d.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), catalog().len());
    }

    #[test]
    fn test_default_spec() {
        let spec = find_service("mysql").unwrap().default_spec();
        assert_eq!(spec.name, "dockyard_mysql");
        assert_eq!(spec.ports, vec![PortMapping::new(3306, 3306)]);
        assert_eq!(spec.volumes[0].source, "dockyard_mysql_data");
        assert!(spec.volumes[0].is_named_volume());
    }

    #[test]
    fn test_proxy_is_the_only_hooked_service() {
        let hooked: Vec<_> = catalog()
            .iter()
            .filter(|d| d.hook == ServiceHook::ResyncProxy)
            .map(|d| d.container_name())
            .collect();
        assert_eq!(hooked, vec!["dockyard_caddy".to_string()]);
    }
}
