//! Container-level commands: logs, exec and watch.

use tokio::sync::broadcast;

use crate::cli::AppContext;
use crate::engine::LogSource;
use crate::events::EventBus;

/// Follow a container's logs until Ctrl-C.
pub async fn run_logs_command(
    ctx: &AppContext,
    container: &str,
    tail: Option<usize>,
) -> anyhow::Result<()> {
    let mut stream = ctx.lifecycle.stream_logs(container, tail);
    loop {
        tokio::select! {
            line = stream.next_line() => match line {
                Some(line) => match line.source {
                    LogSource::Stdout => println!("{}", line.text),
                    LogSource::Stderr => eprintln!("{}", line.text),
                },
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    stream.close();
    Ok(())
}

/// Run a command in a container and exit with its status.
pub async fn run_exec_command(
    ctx: &AppContext,
    container: &str,
    argv: &[String],
) -> anyhow::Result<i64> {
    let output = ctx.lifecycle.exec_in_container(container, argv).await?;
    print!("{}", output.stdout);
    eprint!("{}", output.stderr);
    Ok(output.exit_code)
}

/// Print invalidations and connection changes until Ctrl-C.
pub async fn run_watch_command(ctx: &AppContext) -> anyhow::Result<()> {
    let bus = EventBus::new(
        ctx.engine.clone(),
        ctx.registry.clone(),
        ctx.config.events.clone(),
    );
    let mut invalidations = bus.subscribe();
    let handle = bus.start();
    let _status = handle.on_connection_status_change(|status| {
        match &status.last_error {
            Some(error) => println!(
                "[status] {:?} (attempt {}): {}",
                status.state, status.attempt, error
            ),
            None => println!("[status] {:?}", status.state),
        }
    });

    loop {
        tokio::select! {
            received = invalidations.recv() => match received {
                Ok(invalidation) => println!("{}", serde_json::to_string(&invalidation)?),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Watcher lagged, some invalidations were dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.stop().await;
    Ok(())
}
