//! Status command.

use crate::cli::AppContext;
use crate::config::Config;

/// Print engine, proxy and resource status.
pub async fn run_status_command(config: Config) -> anyhow::Result<()> {
    println!("Dockyard Status");
    println!();

    let ctx = match AppContext::connect(config).await {
        Ok(ctx) => ctx,
        Err(e) => {
            println!("  Engine:     unavailable ({})", e);
            return Ok(());
        }
    };

    let available = ctx.lifecycle.is_available().await;
    println!(
        "  Engine:     {}",
        if available { "available" } else { "unavailable" }
    );
    if !available {
        return Ok(());
    }

    let proxy_name = &ctx.config.proxy.container_name;
    let proxy = ctx.lifecycle.get_container_state(proxy_name).await?;
    println!("  Proxy:      {} ({})", proxy.state, proxy_name);

    let projects = ctx.projects.list().await?;
    let running = projects.iter().filter(|p| p.container.running).count();
    println!("  Projects:   {} ({} running)", projects.len(), running);

    let stats = ctx.lifecycle.managed_resource_stats().await;
    println!("  Containers: {} running", stats.containers);
    println!(
        "  CPU:        {:.1}% of {} cores",
        stats.cpu_percent, stats.host_cpus
    );
    println!(
        "  Memory:     {} MiB of {} MiB",
        stats.memory_bytes / (1024 * 1024),
        stats.host_memory / (1024 * 1024)
    );
    Ok(())
}
