//! Project CLI commands.

use std::path::PathBuf;

use clap::Subcommand;

use crate::cli::AppContext;

#[derive(Subcommand, Debug, Clone)]
pub enum ProjectCommand {
    /// List projects with their container state
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a project and start its devcontainer
    Create {
        /// Project name (becomes `<name>.<suffix>`)
        name: String,

        /// Host directory mounted at /workspace
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Delete a project and its devcontainer
    Delete {
        /// Project id or name
        project: String,

        /// Keep the project's volumes
        #[arg(long)]
        keep_volumes: bool,
    },

    /// Start a project's devcontainer
    Start {
        /// Project id or name
        project: String,
    },

    /// Stop a project's devcontainer
    Stop {
        /// Project id or name
        project: String,
    },

    /// Print the host port the project's web server is reachable on
    Port {
        /// Project id or name
        project: String,
    },
}

/// Run a project command.
pub async fn run_project_command(ctx: &AppContext, cmd: ProjectCommand) -> anyhow::Result<()> {
    let projects = &ctx.projects;
    match cmd {
        ProjectCommand::List { json } => {
            let list = projects.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&list)?);
                return Ok(());
            }
            if list.is_empty() {
                println!("No projects.");
                return Ok(());
            }
            for entry in list {
                println!(
                    "  {:<20} {:<28} {}",
                    entry.project.name, entry.project.domain, entry.container.state
                );
            }
        }
        ProjectCommand::Create { name, path } => {
            let project = projects.create(&name, path).await?;
            println!("Created {} at https://{}", project.name, project.domain);
            println!("  id:        {}", project.id);
            println!("  container: {}", project.container_name());
        }
        ProjectCommand::Delete {
            project,
            keep_volumes,
        } => {
            let found = projects.find(&project).await?;
            projects.delete(&found.id, !keep_volumes).await?;
            println!("Deleted {}", found.name);
        }
        ProjectCommand::Start { project } => {
            let found = projects.find(&project).await?;
            let state = projects.start(&found.id).await?;
            println!("{}: {}", found.name, state.state);
        }
        ProjectCommand::Stop { project } => {
            let found = projects.find(&project).await?;
            let state = projects.stop(&found.id).await?;
            println!("{}: {}", found.name, state.state);
        }
        ProjectCommand::Port { project } => {
            let found = projects.find(&project).await?;
            match projects.forwarded_port(&found.id).await? {
                Some(port) => println!("{}", port),
                None => anyhow::bail!("no forwarded port found for {}", found.name),
            }
        }
    }
    Ok(())
}
