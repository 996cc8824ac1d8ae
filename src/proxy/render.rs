use std::collections::BTreeMap;
use std::fmt::Write;

use crate::config::{ProxyConfig, normalize_domain};
use crate::registry::Project;

/// Where a routed domain goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointTarget {
    /// Static readiness response. Only the bootstrap block uses this.
    Ready,
    /// `reverse_proxy {host}:{port}`.
    Upstream { host: String, port: u16 },
}

/// One routing rule exposed through the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredEndpoint {
    pub domain: String,
    pub target: EndpointTarget,
}

const HEADER: &str = "# Generated by dockyard. Manual edits are overwritten on every sync.\n";

/// Derive the full endpoint table: the bootstrap endpoint followed by one
/// endpoint per project, ordered by domain.
///
/// Two projects claiming the same domain resolve to the one whose container
/// name sorts first. A project claiming the bootstrap domain is ignored.
pub fn endpoints(projects: &[Project], config: &ProxyConfig) -> Vec<RegisteredEndpoint> {
    let bootstrap = normalize_domain(&config.bootstrap_domain);
    let mut by_domain: BTreeMap<String, String> = BTreeMap::new();
    for project in projects {
        let domain = normalize_domain(&project.domain);
        if domain.is_empty() || domain == bootstrap {
            tracing::debug!(project = %project.name, domain = %domain, "Skipping unroutable domain");
            continue;
        }
        let host = project.container_name();
        by_domain
            .entry(domain)
            .and_modify(|existing| {
                if host < *existing {
                    *existing = host.clone();
                }
            })
            .or_insert(host);
    }

    let mut table = Vec::with_capacity(by_domain.len() + 1);
    table.push(RegisteredEndpoint {
        domain: bootstrap,
        target: EndpointTarget::Ready,
    });
    table.extend(by_domain.into_iter().map(|(domain, host)| RegisteredEndpoint {
        domain,
        target: EndpointTarget::Upstream {
            host,
            port: config.project_port,
        },
    }));
    table
}

/// Render the complete proxy configuration. Output depends only on the
/// set of projects, never on their order.
pub fn render_config(projects: &[Project], config: &ProxyConfig) -> String {
    let mut out = String::from(HEADER);
    for endpoint in endpoints(projects, config) {
        out.push('\n');
        // Writing into a String cannot fail.
        let _ = write_block(&mut out, &endpoint);
    }
    out
}

fn write_block(out: &mut String, endpoint: &RegisteredEndpoint) -> std::fmt::Result {
    writeln!(out, "https://{} {{", endpoint.domain)?;
    writeln!(out, "\ttls internal")?;
    match &endpoint.target {
        EndpointTarget::Ready => writeln!(out, "\trespond \"dockyard proxy ready\" 200")?,
        EndpointTarget::Upstream { host, port } => writeln!(out, "\treverse_proxy {}:{}", host, port)?,
    }
    writeln!(out, "}}")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn project(name: &str) -> Project {
        Project::new(name, "local", None)
    }

    #[test]
    fn test_bootstrap_only() {
        let text = render_config(&[], &ProxyConfig::default());
        assert_eq!(
            text,
            "# Generated by dockyard. Manual edits are overwritten on every sync.\n\
             \n\
             https://localhost {\n\
             \ttls internal\n\
             \trespond \"dockyard proxy ready\" 200\n\
             }\n"
        );
    }

    #[test]
    fn test_project_block() {
        let text = render_config(&[project("demo")], &ProxyConfig::default());
        assert!(text.contains(
            "https://demo.local {\n\ttls internal\n\treverse_proxy demo_devcontainer:8080\n}\n"
        ));
    }

    #[test]
    fn test_order_independent() {
        let config = ProxyConfig::default();
        let a = project("alpha");
        let b = project("beta");
        assert_eq!(
            render_config(&[a.clone(), b.clone()], &config),
            render_config(&[b, a], &config)
        );
    }

    #[test]
    fn test_duplicate_domains_collapse() {
        let mut first = project("shop");
        first.domain = "shop.local".to_string();
        let mut second = project("Shop Admin");
        second.domain = "SHOP.local".to_string();

        let table = endpoints(&[second, first], &ProxyConfig::default());
        assert_eq!(table.len(), 2);
        assert_eq!(
            table[1].target,
            EndpointTarget::Upstream {
                host: "shop_admin_devcontainer".to_string(),
                port: 8080
            }
        );
    }

    #[test]
    fn test_bootstrap_domain_cannot_be_claimed() {
        let mut hijack = project("evil");
        hijack.domain = "localhost".to_string();
        let table = endpoints(&[hijack], &ProxyConfig::default());
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].target, EndpointTarget::Ready);
    }

    #[test]
    fn test_mixed_case_bootstrap_domain_cannot_be_claimed() {
        let config = ProxyConfig {
            bootstrap_domain: "Dev.Local".to_string(),
            ..ProxyConfig::default()
        };
        let mut hijack = project("evil");
        hijack.domain = "dev.local".to_string();
        let table = endpoints(&[hijack], &config);
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].domain, "dev.local");
        assert_eq!(table[0].target, EndpointTarget::Ready);
    }
}
