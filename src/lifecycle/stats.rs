use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use crate::engine::labels::managed_filter;
use crate::lifecycle::ContainerManager;

/// CPU and memory used by every running managed container.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceStats {
    pub containers: usize,
    /// Sum of per-container CPU percentages (100 = one full core).
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub host_cpus: u64,
    pub host_memory: u64,
}

/// Run `fut` under `limit`, degrading timeouts and failures to `None`.
async fn bounded<T, E, F>(what: &str, limit: Duration, fut: F) -> Option<T>
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::warn!("Stats: {} failed: {}", what, e);
            None
        }
        Err(_) => {
            tracing::warn!("Stats: {} timed out after {:?}", what, limit);
            None
        }
    }
}

impl ContainerManager {
    /// Aggregate resource usage of running managed containers.
    ///
    /// Each engine query is individually time-boxed; a failed or slow query
    /// contributes zero instead of failing the whole call.
    pub async fn managed_resource_stats(&self) -> ResourceStats {
        let limit = self.config().stats_timeout;
        let engine = self.engine();

        let info = bounded("engine info", limit, engine.info())
            .await
            .unwrap_or_default();
        let containers = bounded(
            "container list",
            limit,
            engine.list_containers(&managed_filter(), false),
        )
        .await
        .unwrap_or_default();

        let samples = futures::future::join_all(containers.iter().map(|c| {
            let what = format!("stats for {}", c.name);
            async move { bounded(&what, limit, engine.stats(&c.id)).await }
        }))
        .await;

        let mut stats = ResourceStats {
            containers: containers.len(),
            host_cpus: info.cpus,
            host_memory: info.memory_total,
            ..Default::default()
        };
        for sample in samples.into_iter().flatten() {
            stats.cpu_percent += sample.cpu_percent();
            stats.memory_bytes += sample.memory_usage;
        }
        stats
    }
}
