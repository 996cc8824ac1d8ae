//! Proxy CLI commands.

use clap::Subcommand;

use crate::cli::AppContext;
use crate::proxy::SyncOutcome;

#[derive(Subcommand, Debug, Clone)]
pub enum ProxyCommand {
    /// Regenerate and apply the proxy configuration now
    Sync,

    /// Print the configuration a sync would apply
    Render,
}

/// Run a proxy command.
pub async fn run_proxy_command(ctx: &AppContext, cmd: ProxyCommand) -> anyhow::Result<()> {
    match cmd {
        ProxyCommand::Sync => match ctx.proxy.sync_endpoints().await {
            SyncOutcome::Applied { config } => {
                println!("Applied proxy configuration ({} bytes)", config.len());
            }
            SyncOutcome::Skipped { reason } => println!("Skipped: {}", reason),
            SyncOutcome::Failed { error } => anyhow::bail!("proxy sync failed: {}", error),
        },
        ProxyCommand::Render => print!("{}", ctx.proxy.render().await?),
    }
    Ok(())
}
