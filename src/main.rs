//! CLI for PopLog
//!
//! Subcommands:
//! - `server`: run the broker until Ctrl-C / SIGTERM
//! - `publish`: publish one message to a topic
//! - `consume`: consume a topic and print every delivery as JSON

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use poplog::broker::Broker;
use poplog::client;
use poplog::config::load_config;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "poplog", version, about = "A minimal durable message broker")]
struct Cli {
    /// Default log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the broker
    Server,
    /// Publish a message to a topic
    Publish {
        /// Broker address (default: taken from the configuration)
        #[arg(long)]
        addr: Option<String>,
        #[arg(short, long)]
        topic: String,
        #[arg(short, long)]
        message: String,
    },
    /// Consume a topic as a named consumer
    Consume {
        /// Broker address (default: taken from the configuration)
        #[arg(long)]
        addr: Option<String>,
        #[arg(short, long)]
        topic: String,
        #[arg(short, long)]
        name: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    poplog::utils::logging::init(&cli.log_level);

    let result = match cli.command {
        Command::Server => run_server().await,
        Command::Publish {
            addr,
            topic,
            message,
        } => run_publish(addr, &topic, &message).await,
        Command::Consume { addr, topic, name } => run_consume(addr, &topic, &name).await,
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let addr = config.server.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("listening on {addr}");

    let broker = Broker::new(config.broker);
    broker.run(listener, shutdown_signal()).await?;
    Ok(())
}

fn broker_addr(addr: Option<String>) -> Result<String, Box<dyn std::error::Error>> {
    match addr {
        Some(addr) => Ok(addr),
        None => Ok(load_config()?.server.addr()),
    }
}

async fn run_publish(
    addr: Option<String>,
    topic: &str,
    message: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = broker_addr(addr)?;
    let mut stream = TcpStream::connect(&addr).await?;
    let sent = client::publish(&mut stream, message, topic).await?;
    info!(topic, id = sent.id().unwrap_or_default(), "published");
    Ok(())
}

async fn run_consume(
    addr: Option<String>,
    topic: &str,
    name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = broker_addr(addr)?;
    let stream = TcpStream::connect(&addr).await?;
    let mut deliveries = client::consume(stream, topic, name).await?;

    while let Some(delivery) = deliveries.next().await {
        let delivery = delivery?;
        println!(
            "{}",
            serde_json::json!({
                "offset": delivery.offset,
                "message": delivery.message,
            })
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "unable to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
}
