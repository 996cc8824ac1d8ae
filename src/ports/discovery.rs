use std::time::Duration;

/// Response header a project's web server sets to its container name.
pub const IDENTITY_HEADER: &str = "x-container-name";

/// Finds the host port a container is forwarded on by asking every port in
/// a range who it is.
///
/// Probes are loopback-only, so self-signed certificates are accepted on the
/// secure attempt.
pub struct PortDiscovery {
    client: reqwest::Client,
    probe_timeout: Duration,
}

impl PortDiscovery {
    pub fn new(probe_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(probe_timeout)
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            probe_timeout,
        }
    }

    /// Sweep `range_start..=range_end` and return the first port whose
    /// identity header equals `container_name`.
    pub async fn discover_forwarded_port(
        &self,
        container_name: &str,
        range_start: u16,
        range_end: u16,
    ) -> Option<u16> {
        tracing::debug!(
            container = %container_name,
            range_start,
            range_end,
            "Scanning for forwarded port"
        );

        for port in range_start..=range_end {
            // Bounds each port even when a peer accepts and then stalls.
            let found = tokio::time::timeout(
                self.probe_timeout * 2,
                self.probe(port, container_name),
            )
            .await
            .unwrap_or(false);
            if found {
                tracing::info!(container = %container_name, port, "Discovered forwarded port");
                return Some(port);
            }
        }

        tracing::debug!(container = %container_name, "No forwarded port found");
        None
    }

    async fn probe(&self, port: u16, container_name: &str) -> bool {
        for scheme in ["http", "https"] {
            let url = format!("{scheme}://127.0.0.1:{port}/");
            match self.client.head(&url).send().await {
                Ok(response) => {
                    let matches = response
                        .headers()
                        .get(IDENTITY_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .is_some_and(|v| v.trim().trim_start_matches('/') == container_name);
                    if matches {
                        return true;
                    }
                    // Something answered plain HTTP; a TLS retry on the same
                    // port cannot succeed.
                    if scheme == "http" {
                        return false;
                    }
                }
                Err(e) => {
                    if e.is_connect() && scheme == "http" {
                        // Nothing listening; skip the TLS attempt too.
                        return false;
                    }
                    tracing::trace!(port, scheme, "Identity probe failed: {}", e);
                }
            }
        }
        false
    }
}
