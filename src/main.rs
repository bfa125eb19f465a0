//! Reference binary: a broadcast server and a line-oriented client.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::{ArgAction, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use framelink::config::Config;
use framelink::{BroadcastListener, MessageListener, Session, TcpClient, TcpServer};

/// A session, heartbeat, framed socket server and client
#[derive(Parser)]
#[command(name = "framelink")]
#[command(version = "0.1.0")]
#[command(about = "A session, heartbeat, framed socket server and client", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a broadcast server
    Server {
        /// Listen address, like: 0.0.0.0:8888
        #[arg(short, long)]
        listen: Option<String>,

        /// Emit protocol debug logs, true|false
        #[arg(short, long, action = ArgAction::Set, default_value_t = false)]
        debug: bool,
    },

    /// Run a client that sends stdin lines as messages
    Client {
        /// Target server address, like: 127.0.0.1:8888
        #[arg(short, long)]
        target: Option<String>,

        /// Emit protocol debug logs, true|false
        #[arg(short, long, action = ArgAction::Set, default_value_t = false)]
        debug: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Server { listen, debug } => {
            let debug = debug || config.debug;
            init_tracing(debug);
            let listen = listen
                .or_else(|| config.listen.clone())
                .context("missing listen address; pass --listen or set it in the config file")?;
            run_server(&config, listen, debug).await
        }
        Commands::Client { target, debug } => {
            let debug = debug || config.debug;
            init_tracing(debug);
            let target = target
                .or_else(|| config.target.clone())
                .context("missing target address; pass --target or set it in the config file")?;
            run_client(&config, target, debug).await
        }
    }
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

/// Broadcast server: every received message is re-emitted to all other
/// sessions. Exits on SIGINT or SIGTERM.
async fn run_server(config: &Config, listen: String, debug: bool) -> anyhow::Result<()> {
    let mut server = TcpServer::new(&listen);
    server
        .register_message_listener(BroadcastListener)
        .set_max_body_length(config.max_body_length)
        .set_default_read_deadline(config.read_deadline())
        .set_default_write_deadline(config.write_deadline())
        .set_debug(debug);

    if config.heartbeat() < config.read_deadline() {
        server.set_heartbeat(config.heartbeat());
    } else {
        warn!(
            heartbeat_secs = config.heartbeat_secs,
            read_deadline_secs = config.read_deadline_secs,
            "configured heartbeat not below read deadline; keeping default"
        );
    }

    server.run().await?;
    info!("broadcast server up; press Ctrl+C to stop");

    wait_for_shutdown().await?;

    server.stop();
    Ok(())
}

/// Line client: each stdin line becomes one message; `quit()` exits.
async fn run_client(config: &Config, target: String, debug: bool) -> anyhow::Result<()> {
    let mut client = TcpClient::new(&target);
    client
        .register_message_listener(PrintListener)
        .set_max_body_length(config.max_body_length)
        .set_read_deadline(config.read_deadline())
        .set_write_deadline(config.write_deadline())
        .set_debug(debug);

    if config.heartbeat() < config.read_deadline() {
        client.set_heartbeat(config.heartbeat());
    } else {
        warn!(
            heartbeat_secs = config.heartbeat_secs,
            read_deadline_secs = config.read_deadline_secs,
            "configured heartbeat not below read deadline; keeping default"
        );
    }

    client.dial().await?;
    info!(%target, "connected; type a line to send it, quit() to exit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line == "quit()" {
            break;
        }
        if let Err(e) = client.send(line).await {
            error!(error = %e, "send failed");
            break;
        }
    }

    client.hangup("client exit").await;
    Ok(())
}

async fn wait_for_shutdown() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}

/// Prints every message the server pushes down to the terminal.
struct PrintListener;

#[async_trait]
impl MessageListener<String> for PrintListener {
    async fn on_message(&self, message: String, session: &Arc<Session<String>>) {
        println!("[{}] {}", session.remote_addr(), message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_server_command() {
        let cli = Cli::try_parse_from(["framelink", "server", "--listen", "0.0.0.0:8888"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn cli_parses_debug_flag_value() {
        let cli =
            Cli::try_parse_from(["framelink", "client", "--target", "[::1]:8888", "--debug", "true"])
                .unwrap();
        match cli.command {
            Commands::Client { debug, .. } => assert!(debug),
            _ => panic!("expected client command"),
        }
    }
}
