use clap::{Parser, Subcommand};
use color_eyre::eyre::{self, eyre};
use isolator_common::IsolatorConfig;
use isolator_runtime::{ContainerStats, DockerRuntime, HealthProber, RuntimeClient};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "isolator")]
#[command(author, version, about = "Inspect and drive isolated application containers", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check that the container engine is reachable
    Ping,

    /// List containers managed by the isolator
    Ps,

    /// Pull an image
    Pull { image: String },

    /// Wait until a container is running and healthy
    Wait {
        container: String,

        /// Seconds to wait (defaults to ISOLATOR_READY_TIMEOUT_SECS)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Print the most recent output of a container
    Logs {
        container: String,

        #[arg(long, default_value = "100")]
        tail: usize,
    },

    /// Print a resource usage snapshot as JSON
    Stats { container: String },
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = IsolatorConfig::from_env()?;
    info!(
        docker_host = config.docker_host.as_deref().unwrap_or("default"),
        "Connecting to container engine"
    );
    let runtime = Arc::new(DockerRuntime::connect()?);

    match args.command {
        Command::Ping => {
            runtime.ping().await?;
            info!("Container engine is reachable");
        }
        Command::Ps => {
            for container in runtime.list(&config.name_prefix).await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    container.id, container.name, container.state, container.image
                );
            }
        }
        Command::Pull { image } => {
            runtime.pull(&image).await?;
            info!(%image, "Image pulled");
        }
        Command::Wait { container, timeout } => {
            let timeout = timeout
                .map(Duration::from_secs)
                .unwrap_or(config.ready_timeout);
            let readiness = HealthProber::new(runtime.clone())
                .wait_until_ready(&container, timeout)
                .await;
            if !readiness.is_ready() {
                return Err(eyre!("container {container} not ready: {readiness:?}"));
            }
            info!(%container, "Container ready");
        }
        Command::Logs { container, tail } => {
            print!("{}", runtime.logs(&container, tail).await?);
        }
        Command::Stats { container } => {
            let details = runtime.inspect(&container).await?;
            let raw = runtime.stats(&container).await?;
            let stats = ContainerStats::from_raw(details.state.to_string(), &raw);
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
