//! Map container events back to the entity that owns the container.

use crate::engine::{ContainerEvent, OwnerTag, OwnerType};
use crate::entities::{EntityRef, find_service};
use crate::registry::{DEVCONTAINER_SUFFIX, Project, SERVICE_PREFIX};

/// Resolve the entity owning `event`'s container.
///
/// Ownership labels win. Containers without them (created by older
/// versions or by hand) fall back to the naming conventions:
/// `{sanitized}_devcontainer` for projects and `dockyard_{service}` for
/// catalog services. Helper and tunnel containers map to nothing.
pub fn route_event(event: &ContainerEvent, projects: &[Project]) -> Option<EntityRef> {
    if let Some(tag) = OwnerTag::from_labels(&event.attributes) {
        return match tag.owner_type {
            OwnerType::Project => Some(EntityRef::project(tag.owner_id)),
            OwnerType::Service => Some(EntityRef::service(tag.owner_id)),
            OwnerType::Helper | OwnerType::Tunnel => None,
        };
    }
    route_by_name(&event.name, projects)
}

/// Name-convention fallback of [`route_event`].
pub fn route_by_name(container_name: &str, projects: &[Project]) -> Option<EntityRef> {
    let name = container_name.trim_start_matches('/');

    if let Some(stem) = name
        .strip_suffix(DEVCONTAINER_SUFFIX)
        .and_then(|s| s.strip_suffix('_'))
    {
        return projects
            .iter()
            .find(|p| p.sanitized_name() == stem)
            .map(|p| EntityRef::project(p.id.clone()));
    }

    name.strip_prefix(SERVICE_PREFIX)
        .and_then(|s| s.strip_prefix('_'))
        .and_then(find_service)
        .map(|def| EntityRef::service(def.id))
}

/// Whether routing this event needs the project list.
pub(crate) fn needs_projects(event: &ContainerEvent) -> bool {
    OwnerTag::from_labels(&event.attributes).is_none()
        && event
            .name
            .trim_start_matches('/')
            .ends_with(DEVCONTAINER_SUFFIX)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn event(name: &str, labels: HashMap<String, String>) -> ContainerEvent {
        let mut attributes = labels;
        attributes.insert("name".to_string(), name.to_string());
        ContainerEvent::from_parts("abc".to_string(), "start", attributes, Some(0)).unwrap()
    }

    #[test]
    fn test_labels_take_precedence() {
        let projects = vec![Project::new("demo", "local", None)];
        let tag = OwnerTag::project("p-123");
        let routed = route_event(&event("demo_devcontainer", tag.to_labels()), &projects);
        assert_eq!(routed, Some(EntityRef::project("p-123")));
    }

    #[test]
    fn test_project_name_convention() {
        let project = Project::new("My Shop", "local", None);
        let projects = vec![project.clone()];
        let routed = route_event(&event("/my_shop_devcontainer", HashMap::new()), &projects);
        assert_eq!(routed, Some(EntityRef::project(project.id)));

        assert_eq!(route_by_name("unknown_devcontainer", &projects), None);
    }

    #[test]
    fn test_service_name_convention() {
        assert_eq!(route_by_name("dockyard_mysql", &[]), Some(EntityRef::service("mysql")));
        assert_eq!(route_by_name("dockyard_nope", &[]), None);
        assert_eq!(route_by_name("postgres", &[]), None);
    }

    #[test]
    fn test_helper_containers_are_ignored() {
        let tag = OwnerTag::new(OwnerType::Helper, "builder");
        assert_eq!(route_event(&event("dockyard_builder", tag.to_labels()), &[]), None);
    }
}
