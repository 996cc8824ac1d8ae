//! Port CLI commands.

use std::collections::BTreeSet;

use clap::Subcommand;

use crate::config::PortConfig;
use crate::ports::{PortDiscovery, PortResolver};

#[derive(Subcommand, Debug, Clone)]
pub enum PortsCommand {
    /// Map each desired host port to a free one
    Resolve {
        #[arg(required = true)]
        ports: Vec<u16>,
    },

    /// Sweep the discovery range for a container's identity header
    Discover {
        /// Container name the server reports
        name: String,

        /// First port to probe (defaults to the configured range)
        #[arg(long)]
        start: Option<u16>,

        /// Last port to probe
        #[arg(long)]
        end: Option<u16>,
    },
}

/// Run a ports command. Needs no engine connection.
pub async fn run_ports_command(config: &PortConfig, cmd: PortsCommand) -> anyhow::Result<()> {
    match cmd {
        PortsCommand::Resolve { ports } => {
            let desired: BTreeSet<u16> = ports.into_iter().collect();
            let resolved = PortResolver::new(config.clone())
                .resolve_available_ports(&desired)
                .await?;
            for (want, got) in resolved {
                if want == got {
                    println!("  {} free", want);
                } else {
                    println!("  {} -> {}", want, got);
                }
            }
        }
        PortsCommand::Discover { name, start, end } => {
            let start = start.unwrap_or(config.discovery_range.0);
            let end = end.unwrap_or(config.discovery_range.1);
            if start > end {
                anyhow::bail!("invalid range {}-{}", start, end);
            }
            let discovery = PortDiscovery::new(config.probe_timeout);
            match discovery.discover_forwarded_port(&name, start, end).await {
                Some(port) => println!("{}", port),
                None => anyhow::bail!("{} not found on ports {}-{}", name, start, end),
            }
        }
    }
    Ok(())
}
