//! Developer entry point: bring up a harness topology by hand and keep it
//! running until Ctrl+C.

use clap::{Parser, Subcommand};
use tokio::signal;

use bridge_harness::{Environment, HarnessConfig};
use shared::{component_info, logging, Component};

#[derive(Parser)]
#[command(name = "bridge-harness")]
#[command(about = "Ephemeral Kafka/NATS streaming topology for bridge integration tests")]
pub struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the infrastructure (no bridge) and wait for Ctrl+C
    Up {
        /// Use the TLS listener of the queue broker and TLS on the pub/sub broker
        #[arg(long)]
        tls: bool,

        /// Topic to create before the streaming cluster starts (repeatable)
        #[arg(long = "topic")]
        topics: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_tracing(Some(&args.log_level));

    match args.command {
        Command::Up { tls, topics } => up(tls, topics).await,
    }
}

async fn up(tls: bool, topics: Vec<String>) -> anyhow::Result<()> {
    let mut env = Environment::new(HarnessConfig::from_env(), tls);
    env.start_infrastructure(topics.as_slice()).await?;

    component_info!(Component::Environment, "kafka:      {}", env.kafka_host_port());
    component_info!(Component::Environment, "nats:       {}", env.nats_url().unwrap_or("-"));
    component_info!(Component::Environment, "cluster id: {}", env.cluster_id());
    component_info!(Component::Environment, "bypass id:  {}", env.bypass_client_id());
    component_info!(Component::Environment, "bridge id:  {}", env.bridge_client_id());
    logging::log_success(Component::Environment, "Infrastructure up, press Ctrl+C to stop");

    if let Err(err) = signal::ctrl_c().await {
        logging::log_error(Component::Environment, "Signal handling", &err);
    }

    logging::log_shutdown(Component::Environment, "Received Ctrl+C signal");
    env.close().await?;
    logging::log_success(Component::Environment, "Environment closed");
    Ok(())
}
