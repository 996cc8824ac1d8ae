//! Typed ownership tags and their flat label encoding.
//!
//! Every resource dockyard creates carries three labels. They are the only
//! discovery and cleanup mechanism; no catalog of raw ids is kept. The
//! string form exists only here, at the engine boundary.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const LABEL_MANAGED: &str = "dev.dockyard.managed";
pub const LABEL_OWNER_TYPE: &str = "dev.dockyard.owner-type";
pub const LABEL_OWNER_ID: &str = "dev.dockyard.owner-id";

/// What kind of entity owns a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerType {
    Project,
    Service,
    Helper,
    Tunnel,
}

impl OwnerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Service => "service",
            Self::Helper => "helper",
            Self::Tunnel => "tunnel",
        }
    }
}

impl std::fmt::Display for OwnerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OwnerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "project" => Ok(Self::Project),
            "service" => Ok(Self::Service),
            "helper" => Ok(Self::Helper),
            "tunnel" => Ok(Self::Tunnel),
            _ => Err(format!(
                "invalid owner type '{s}', expected project, service, helper or tunnel"
            )),
        }
    }
}

/// Typed label keys accepted by label lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKey {
    Managed,
    OwnerType,
    OwnerId,
}

impl LabelKey {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Managed => LABEL_MANAGED,
            Self::OwnerType => LABEL_OWNER_TYPE,
            Self::OwnerId => LABEL_OWNER_ID,
        }
    }
}

/// Ownership of a managed resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerTag {
    pub owner_type: OwnerType,
    pub owner_id: String,
}

impl OwnerTag {
    pub fn new(owner_type: OwnerType, owner_id: impl Into<String>) -> Self {
        Self {
            owner_type,
            owner_id: owner_id.into(),
        }
    }

    pub fn project(id: impl Into<String>) -> Self {
        Self::new(OwnerType::Project, id)
    }

    pub fn service(id: impl Into<String>) -> Self {
        Self::new(OwnerType::Service, id)
    }

    /// Flat labels for the engine.
    pub fn to_labels(&self) -> HashMap<String, String> {
        HashMap::from([
            (LABEL_MANAGED.to_string(), "true".to_string()),
            (LABEL_OWNER_TYPE.to_string(), self.owner_type.as_str().to_string()),
            (LABEL_OWNER_ID.to_string(), self.owner_id.clone()),
        ])
    }

    /// Read a tag back from engine labels. Resources without the managed
    /// marker are never claimed, even if the other two labels are present.
    pub fn from_labels(labels: &HashMap<String, String>) -> Option<Self> {
        if labels.get(LABEL_MANAGED).map(String::as_str) != Some("true") {
            return None;
        }
        let owner_type = labels.get(LABEL_OWNER_TYPE)?.parse().ok()?;
        let owner_id = labels.get(LABEL_OWNER_ID)?.clone();
        Some(Self::new(owner_type, owner_id))
    }

    /// Label filters selecting exactly this owner's resources.
    pub fn filters(&self) -> Vec<(String, String)> {
        let mut filters = managed_filter();
        filters.push((LABEL_OWNER_TYPE.to_string(), self.owner_type.as_str().to_string()));
        filters.push((LABEL_OWNER_ID.to_string(), self.owner_id.clone()));
        filters
    }
}

/// Filter selecting every resource dockyard manages.
pub fn managed_filter() -> Vec<(String, String)> {
    vec![(LABEL_MANAGED.to_string(), "true".to_string())]
}

/// Labels for shared infrastructure (network) that no single entity owns.
pub fn infrastructure_labels() -> HashMap<String, String> {
    HashMap::from([(LABEL_MANAGED.to_string(), "true".to_string())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_round_trip() {
        let tag = OwnerTag::project("X");
        let labels = tag.to_labels();
        assert_eq!(labels.get(LABEL_OWNER_TYPE).unwrap(), "project");
        assert_eq!(OwnerTag::from_labels(&labels), Some(tag));
    }

    #[test]
    fn test_unmanaged_labels_are_ignored() {
        let mut labels = OwnerTag::service("mysql").to_labels();
        labels.remove(LABEL_MANAGED);
        assert_eq!(OwnerTag::from_labels(&labels), None);
    }

    #[test]
    fn test_owner_type_parse() {
        assert_eq!("Tunnel".parse::<OwnerType>().unwrap(), OwnerType::Tunnel);
        assert!("cluster".parse::<OwnerType>().is_err());
    }

    #[test]
    fn test_filters_cover_all_three_labels() {
        let filters = OwnerTag::service("redis").filters();
        assert_eq!(filters.len(), 3);
        assert!(filters.contains(&(LABEL_OWNER_ID.to_string(), "redis".to_string())));
    }
}
