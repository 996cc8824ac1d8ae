//! CLI command handling.
//!
//! Provides subcommands for:
//! - Checking engine, proxy and resource status (`status`)
//! - Managing projects (`project list`, `project create`, `project delete`, ...)
//! - Managing catalog services (`service install`, `service start`, ...)
//! - Syncing or previewing the proxy configuration (`proxy sync`, `proxy render`)
//! - Resolving and discovering host ports (`ports resolve`, `ports discover`)
//! - Following logs and running commands in containers (`logs`, `exec`)
//! - Watching engine events as invalidations (`watch`)

mod container;
mod context;
mod ports;
mod project;
mod proxy;
mod service;
mod status;

pub use container::{run_exec_command, run_logs_command, run_watch_command};
pub use context::AppContext;
pub use ports::{PortsCommand, run_ports_command};
pub use project::{ProjectCommand, run_project_command};
pub use proxy::{ProxyCommand, run_proxy_command};
pub use service::{ServiceCommand, run_service_command};
pub use status::run_status_command;

use clap::{ColorChoice, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "dockyard")]
#[command(about = "Local development environments with stable domains behind an edge proxy")]
#[command(
    long_about = "Dockyard provisions project devcontainers and shared services on a local container engine.\nExamples:\n  dockyard project create shop  # Create shop.local\n  dockyard service install mysql"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show engine availability, proxy state and resource usage
    #[command(
        about = "Show system status",
        long_about = "Checks the engine connection, the proxy container and managed resource usage.\nExample: dockyard status"
    )]
    Status,

    /// Manage projects
    #[command(
        subcommand,
        about = "Manage projects",
        long_about = "Create, delete, start or stop project devcontainers.\nExample: dockyard project create shop"
    )]
    Project(ProjectCommand),

    /// Manage catalog services
    #[command(
        subcommand,
        about = "Manage services",
        long_about = "Install, uninstall, start or stop shared services.\nExample: dockyard service install redis"
    )]
    Service(ServiceCommand),

    /// Edge proxy configuration
    #[command(
        subcommand,
        about = "Sync or render proxy config",
        long_about = "Regenerate the proxy configuration from the project registry.\nExample: dockyard proxy sync"
    )]
    Proxy(ProxyCommand),

    /// Host port utilities
    #[command(
        subcommand,
        about = "Resolve or discover host ports",
        long_about = "Resolve free host ports or find the port a container is forwarded on.\nExample: dockyard ports resolve 3306 8080"
    )]
    Ports(PortsCommand),

    /// Follow a container's logs
    #[command(
        about = "Follow container logs",
        long_about = "Streams stdout and stderr of a container until interrupted.\nExample: dockyard logs dockyard_mysql --tail 50"
    )]
    Logs {
        /// Container id or name
        container: String,

        /// Start from the last N lines
        #[arg(long)]
        tail: Option<usize>,
    },

    /// Run a command inside a container
    #[command(
        about = "Run a command in a container",
        long_about = "Executes a command and prints its output.\nExample: dockyard exec shop_devcontainer -- ls /workspace"
    )]
    Exec {
        /// Container id or name
        container: String,

        /// Command and arguments
        #[arg(last = true, required = true)]
        argv: Vec<String>,
    },

    /// Print invalidations and connection changes from the engine
    #[command(
        about = "Watch engine events",
        long_about = "Runs the event bus and prints each invalidation until interrupted.\nExample: dockyard watch"
    )]
    Watch,
}
