//! Service CLI commands.

use clap::Subcommand;

use crate::cli::AppContext;
use crate::engine::PortMapping;
use crate::entities::ServiceStatus;
use crate::lifecycle::ContainerOverrides;

#[derive(Subcommand, Debug, Clone)]
pub enum ServiceCommand {
    /// List catalog services
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Install and start a catalog service
    Install {
        /// Service id (mysql, postgresql, redis, mailpit, caddy)
        id: String,

        /// Port mapping `host:container`, replaces the defaults (repeatable)
        #[arg(short, long = "port", value_parser = parse_port)]
        ports: Vec<PortMapping>,

        /// Extra environment variable `KEY=VALUE` (repeatable)
        #[arg(short, long = "env", value_parser = parse_env)]
        env: Vec<(String, String)>,
    },

    /// Remove a service container
    Uninstall {
        id: String,

        /// Also remove the service's data volumes
        #[arg(long)]
        purge: bool,
    },

    /// Start an installed service
    Start { id: String },

    /// Stop a running service
    Stop { id: String },

    /// Restart a service
    Restart { id: String },
}

fn parse_port(raw: &str) -> Result<PortMapping, String> {
    PortMapping::parse(raw).ok_or_else(|| format!("invalid port mapping '{}'", raw))
}

fn parse_env(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn print_status(status: &ServiceStatus) {
    let ports = status
        .container
        .ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    println!(
        "  {:<12} {:<10} {:<10} {}",
        status.id,
        if status.installed { "installed" } else { "-" },
        status.container.state,
        ports
    );
}

/// Run a service command.
pub async fn run_service_command(ctx: &AppContext, cmd: ServiceCommand) -> anyhow::Result<()> {
    let services = &ctx.services;
    match cmd {
        ServiceCommand::List { json } => {
            let list = services.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&list)?);
            } else {
                for status in &list {
                    print_status(status);
                }
            }
        }
        ServiceCommand::Install { id, ports, env } => {
            let overrides = ContainerOverrides {
                ports: (!ports.is_empty()).then_some(ports),
                env,
                ..Default::default()
            };
            let status = services.install(&id, overrides).await?;
            println!("Installed {}", status.name);
            print_status(&status);
        }
        ServiceCommand::Uninstall { id, purge } => {
            services.uninstall(&id, purge).await?;
            println!("Uninstalled {}", id);
        }
        ServiceCommand::Start { id } => print_status(&services.start(&id).await?),
        ServiceCommand::Stop { id } => print_status(&services.stop(&id).await?),
        ServiceCommand::Restart { id } => print_status(&services.restart(&id).await?),
    }
    Ok(())
}
