//! Dockyard - main entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dockyard::cli::{
    AppContext, Cli, Command, run_exec_command, run_logs_command, run_ports_command,
    run_project_command, run_proxy_command, run_service_command, run_status_command,
    run_watch_command,
};
use dockyard::config::Config;

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dockyard=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Run a command that needs the engine. Returns a process exit code when
/// the command wants a non-zero exit.
async fn run_engine_command(ctx: &AppContext, command: Command) -> anyhow::Result<Option<i32>> {
    match command {
        Command::Project(cmd) => run_project_command(ctx, cmd).await?,
        Command::Service(cmd) => run_service_command(ctx, cmd).await?,
        Command::Proxy(cmd) => run_proxy_command(ctx, cmd).await?,
        Command::Logs { container, tail } => run_logs_command(ctx, &container, tail).await?,
        Command::Exec { container, argv } => {
            let code = run_exec_command(ctx, &container, &argv).await?;
            if code != 0 {
                return Ok(Some(code.clamp(1, 255) as i32));
            }
        }
        Command::Watch => run_watch_command(ctx).await?,
        Command::Status | Command::Ports(_) => {}
    }
    Ok(None)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = Config::from_env()?;

    // Status and ports handle a missing engine themselves.
    match cli.command {
        Command::Status => return run_status_command(config).await,
        Command::Ports(cmd) => return run_ports_command(&config.ports, cmd).await,
        command => {
            let ctx = AppContext::connect(config).await?;
            let outcome = run_engine_command(&ctx, command).await;
            // Resyncs triggered by the command run in the background; let
            // them finish before the runtime shuts down, even on error.
            ctx.proxy.wait_idle().await;
            if let Some(code) = outcome? {
                std::process::exit(code);
            }
        }
    }

    Ok(())
}
