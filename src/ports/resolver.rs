use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;

use crate::config::PortConfig;
use crate::error::PortError;

/// Host-level port availability check.
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn is_free(&self, port: u16) -> bool;
}

/// Checks availability by binding the port on all interfaces and on
/// loopback. Either bind failing means the port is taken.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostPortProbe;

#[async_trait]
impl PortProbe for HostPortProbe {
    async fn is_free(&self, port: u16) -> bool {
        for host in ["0.0.0.0", "127.0.0.1"] {
            match TcpListener::bind((host, port)).await {
                Ok(listener) => drop(listener),
                Err(e) => {
                    tracing::trace!(port, host, "Port unavailable: {}", e);
                    return false;
                }
            }
        }
        true
    }
}

/// Maps desired host ports to free ones.
///
/// Holds no mutable state: the only exclusion set is the one built inside a
/// single call, so unrelated callers can resolve concurrently. Two
/// concurrent calls may still pick the same free port; the engine's bind
/// then fails and surfaces as a create error.
#[derive(Clone)]
pub struct PortResolver {
    config: PortConfig,
    probe: Arc<dyn PortProbe>,
}

impl PortResolver {
    pub fn new(config: PortConfig) -> Self {
        Self::with_probe(config, Arc::new(HostPortProbe))
    }

    pub fn with_probe(config: PortConfig, probe: Arc<dyn PortProbe>) -> Self {
        Self { config, probe }
    }

    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    /// Resolve each desired port to itself when free, otherwise to the next
    /// free port above it (or from the configured pool).
    pub async fn resolve_available_ports(
        &self,
        desired: &BTreeSet<u16>,
    ) -> Result<BTreeMap<u16, u16>, PortError> {
        self.resolve_with_reserved(desired, &BTreeSet::new()).await
    }

    /// Like [`resolve_available_ports`](Self::resolve_available_ports), but
    /// also treats `reserved` as taken. Used for host ports published by
    /// stopped managed containers, which hold no socket yet still own
    /// their binding.
    pub async fn resolve_with_reserved(
        &self,
        desired: &BTreeSet<u16>,
        reserved: &BTreeSet<u16>,
    ) -> Result<BTreeMap<u16, u16>, PortError> {
        let wanted: Vec<u16> = desired.iter().copied().collect();
        let actual = self.resolve_each(&wanted, reserved).await?;
        Ok(wanted.into_iter().zip(actual).collect())
    }

    /// Resolve a list of desired host ports position by position. The
    /// result has one entry per input, and every entry is distinct, so a
    /// port repeated in `desired` is granted once and remapped after that.
    pub async fn resolve_each(
        &self,
        desired: &[u16],
        reserved: &BTreeSet<u16>,
    ) -> Result<Vec<u16>, PortError> {
        let mut claimed = BTreeSet::new();
        let mut resolved: Vec<Option<u16>> = vec![None; desired.len()];
        let mut colliding = Vec::new();

        // Free desired ports are claimed first so a replacement scan never
        // steals a port another entry of this call asked for.
        for (slot, &port) in desired.iter().enumerate() {
            if !claimed.contains(&port)
                && !reserved.contains(&port)
                && self.probe.is_free(port).await
            {
                claimed.insert(port);
                resolved[slot] = Some(port);
            } else {
                colliding.push(slot);
            }
        }

        for slot in colliding {
            let port = desired[slot];
            let actual = self.find_replacement(port, &claimed, reserved).await?;
            tracing::info!(desired = port, actual, "Host port taken, remapped");
            claimed.insert(actual);
            resolved[slot] = Some(actual);
        }

        Ok(resolved.into_iter().flatten().collect())
    }

    async fn find_replacement(
        &self,
        desired: u16,
        claimed: &BTreeSet<u16>,
        reserved: &BTreeSet<u16>,
    ) -> Result<u16, PortError> {
        let (start, end) = match self.config.pool {
            Some((start, end)) => (start, end),
            None => {
                if desired == u16::MAX {
                    return Err(PortError::Exhausted { desired });
                }
                (desired + 1, desired.saturating_add(self.config.scan_limit.max(1)))
            }
        };
        if start > end {
            return Err(PortError::InvalidRange { start, end });
        }

        for candidate in start..=end {
            if claimed.contains(&candidate) || reserved.contains(&candidate) {
                continue;
            }
            if self.probe.is_free(candidate).await {
                return Ok(candidate);
            }
        }
        Err(PortError::Exhausted { desired })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Probe with a fixed set of occupied ports.
    struct FixedProbe(BTreeSet<u16>);

    #[async_trait]
    impl PortProbe for FixedProbe {
        async fn is_free(&self, port: u16) -> bool {
            !self.0.contains(&port)
        }
    }

    fn resolver(occupied: &[u16], config: PortConfig) -> PortResolver {
        PortResolver::with_probe(
            config,
            Arc::new(FixedProbe(occupied.iter().copied().collect())),
        )
    }

    fn set(ports: &[u16]) -> BTreeSet<u16> {
        ports.iter().copied().collect()
    }

    #[tokio::test]
    async fn test_free_ports_map_to_themselves() {
        let r = resolver(&[], PortConfig::default());
        let out = r.resolve_available_ports(&set(&[3306, 6379])).await.unwrap();
        assert_eq!(out, BTreeMap::from([(3306, 3306), (6379, 6379)]));
    }

    #[tokio::test]
    async fn test_collision_scans_upward_without_stealing_desired_ports() {
        // 3306 taken; 3307 is free but also desired, so 3306 must skip it.
        let r = resolver(&[3306], PortConfig::default());
        let out = r.resolve_available_ports(&set(&[3306, 3307])).await.unwrap();
        assert_eq!(out[&3307], 3307);
        assert_eq!(out[&3306], 3308);
    }

    #[tokio::test]
    async fn test_actual_ports_are_unique_and_above_first_collision() {
        let occupied: Vec<u16> = (8000..8010).collect();
        let r = resolver(&occupied, PortConfig::default());
        let desired = set(&[8000, 8002, 8004, 8011, 8012]);
        let out = r.resolve_available_ports(&desired).await.unwrap();

        let actual: BTreeSet<u16> = out.values().copied().collect();
        assert_eq!(actual.len(), desired.len());
        for (want, got) in &out {
            if want != got {
                assert!(*got > 8000);
                assert!(!occupied.contains(got));
            }
        }
    }

    #[tokio::test]
    async fn test_repeated_desired_port_gets_distinct_actuals() {
        let r = resolver(&[3306], PortConfig::default());
        let out = r.resolve_each(&[3306, 3306, 9000, 9000], &BTreeSet::new()).await.unwrap();
        assert_eq!(out, vec![3307, 3308, 9000, 9001]);
    }

    #[tokio::test]
    async fn test_reserved_ports_are_skipped() {
        let r = resolver(&[], PortConfig::default());
        let out = r
            .resolve_with_reserved(&set(&[5432]), &set(&[5432, 5433]))
            .await
            .unwrap();
        assert_eq!(out[&5432], 5434);
    }

    #[tokio::test]
    async fn test_pool_is_used_for_collisions() {
        let config = PortConfig {
            pool: Some((20000, 20002)),
            ..PortConfig::default()
        };
        let r = resolver(&[80, 20000], config);
        let out = r.resolve_available_ports(&set(&[80])).await.unwrap();
        assert_eq!(out[&80], 20001);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_desired_port() {
        let config = PortConfig {
            scan_limit: 2,
            ..PortConfig::default()
        };
        let r = resolver(&[9000, 9001, 9002], config);
        let err = r.resolve_available_ports(&set(&[9000])).await.unwrap_err();
        assert_eq!(err, PortError::Exhausted { desired: 9000 });
    }

    #[tokio::test]
    async fn test_host_probe_detects_bound_port() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let r = PortResolver::new(PortConfig::default());
        let out = r.resolve_available_ports(&set(&[port])).await.unwrap();
        let actual = out[&port];
        assert_ne!(actual, port);
        assert!(actual > port);
        assert!(HostPortProbe.is_free(actual).await);
    }
}
