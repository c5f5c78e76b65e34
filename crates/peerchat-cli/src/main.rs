//! peerchat CLI
//!
//! Thin wrapper around peerchat-core for chatting on the local network.
//!
//! ## Usage
//!
//! ```bash
//! # See who is around (nodes must share the passphrase)
//! peerchat --username alice --passphrase x peers
//!
//! # Chat with bob; stdin lines are sent, replies are printed
//! peerchat --username alice --passphrase x chat bob
//!
//! # Print every message sent to us
//! peerchat --username bob --passphrase x listen
//!
//! # Show or persist the effective configuration
//! peerchat --username alice config show
//! peerchat --username alice --passphrase x config save
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use peerchat_core::{InboundMessage, Node, NodeConfig, UdpTransport};
use tokio::io::AsyncBufReadExt;
use tracing::debug;

/// peerchat - serverless encrypted chat
#[derive(Parser)]
#[command(name = "peerchat")]
#[command(version)]
#[command(about = "peerchat - serverless encrypted chat")]
#[command(
    long_about = "Discover peers on the local network by username and exchange end-to-end encrypted messages, without any server."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file (default: <config dir>/peerchat/config.json if it exists)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Username to announce
    #[arg(short, long, global = true)]
    username: Option<String>,

    /// Shared discovery passphrase (omit for cleartext discovery)
    #[arg(short, long, global = true)]
    passphrase: Option<String>,

    /// UDP discovery port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Seconds a peer stays listed after its last announcement
    #[arg(long, global = true)]
    ttl: Option<u64>,

    /// Seconds between announcements
    #[arg(long, global = true)]
    interval: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List peers seen on the network
    Peers {
        /// Seconds to listen before printing
        #[arg(short, long, default_value_t = 6)]
        wait: u64,
    },

    /// Chat with one peer
    Chat {
        /// Username of the peer
        peer: String,
    },

    /// Print inbound messages until Ctrl+C
    Listen,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as JSON
    Show,

    /// Write the effective configuration to the config file
    Save,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = build_config(&cli)?;

    match cli.command {
        Commands::Peers { wait } => {
            let mut node = start_node(config).await?;
            println!("Listening for peers for {}s...", wait);

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(wait)) => {}
                _ = tokio::signal::ctrl_c() => println!(),
            }

            let peers = node.list_peers();
            if peers.is_empty() {
                println!("No peers found.");
            } else {
                println!("Peers ({}):", peers.len());
                for peer in peers {
                    match node.resolve_peer(&peer) {
                        Some(addr) => println!("  {} ({})", peer, addr),
                        None => println!("  {}", peer),
                    }
                }
            }
            node.shutdown().await;
        }

        Commands::Chat { peer } => {
            let mut node = start_node(config).await?;
            if peer == node.identity().username() {
                node.shutdown().await;
                bail!("Cannot chat with yourself");
            }

            println!("Waiting for {} to appear...", peer);
            loop {
                if node.resolve_peer(&peer).is_some() {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    _ = tokio::signal::ctrl_c() => {
                        node.shutdown().await;
                        return Ok(());
                    }
                }
            }

            if let Err(e) = node.chat_with(&peer).await {
                node.shutdown().await;
                return Err(e).with_context(|| format!("Failed to open session with {}", peer));
            }
            println!("Chatting with {} (Ctrl+C to exit)", peer);
            println!();

            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let mut lines = stdin.lines();

            loop {
                tokio::select! {
                    message = node.next_message() => {
                        match message {
                            Some(message) => print_message(&message),
                            None => break,
                        }
                    }
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(text)) => {
                                let text = text.trim();
                                if !text.is_empty() {
                                    if let Err(e) = node.send(&peer, text).await {
                                        eprintln!("Failed to send: {}", e);
                                    }
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                eprintln!("Error reading input: {}", e);
                                break;
                            }
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        println!();
                        println!("Exiting chat...");
                        break;
                    }
                }
            }
            node.shutdown().await;
        }

        Commands::Listen => {
            let mut node = start_node(config).await?;
            println!("Listening as {} (Ctrl+C to exit)", node.identity().username());

            loop {
                tokio::select! {
                    message = node.next_message() => {
                        match message {
                            Some(message) => print_message(&message),
                            None => break,
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        println!();
                        println!("Received shutdown signal...");
                        break;
                    }
                }
            }
            node.shutdown().await;
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", redacted_json(&config)?);
            }
            ConfigAction::Save => {
                let path = cli
                    .config
                    .clone()
                    .or_else(default_config_path)
                    .context("No config directory available; pass --config")?;
                config
                    .save(&path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("Saved config to {}", path.display());
            }
        },
    }

    Ok(())
}

/// Merge the config file (if any) with command-line flags.
fn build_config(cli: &Cli) -> Result<NodeConfig> {
    let saving = matches!(
        cli.command,
        Commands::Config {
            action: ConfigAction::Save
        }
    );
    let path = match &cli.config {
        // `config save` may be creating the file
        Some(path) if saving && !path.exists() => None,
        Some(path) => Some(path.clone()),
        None => default_config_path().filter(|p| p.exists()),
    };

    let mut config = match &path {
        Some(path) => {
            debug!(path = %path.display(), "Loading config file");
            NodeConfig::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => NodeConfig::new(""),
    };

    if let Some(username) = &cli.username {
        config.username = username.trim().to_string();
    }
    if let Some(passphrase) = &cli.passphrase {
        config.discovery_passphrase = Some(passphrase.clone());
    }
    if let Some(port) = cli.port {
        config.udp.port = port;
    }
    if let Some(ttl) = cli.ttl {
        config.presence_ttl_secs = ttl;
    }
    if let Some(interval) = cli.interval {
        config.announce_interval_secs = interval;
    }

    if config.username.trim().is_empty() {
        bail!("A username is required: pass --username or set it in the config file");
    }
    config.validate()?;
    Ok(config)
}

async fn start_node(config: NodeConfig) -> Result<Node<UdpTransport>> {
    let mode = config.discovery_mode();
    let mut node = Node::bind_udp(config)
        .await
        .context("Failed to bind UDP transport")?;
    node.register()?;

    println!(
        "{} on {} (discovery: {})",
        node.identity().username(),
        describe_bind(node.local_address()?),
        mode
    );
    if !mode.is_encrypted() {
        println!("Warning: no passphrase set, usernames are announced in cleartext");
    }
    Ok(node)
}

/// Where we listen, without claiming a wildcard IP as our address.
fn describe_bind(addr: SocketAddr) -> String {
    if addr.ip().is_unspecified() {
        format!("port {}", addr.port())
    } else {
        addr.to_string()
    }
}

fn print_message<A>(message: &InboundMessage<A>) {
    println!("{}: {}", message.from, message.content);
}

fn redacted_json(config: &NodeConfig) -> Result<String> {
    let mut shown = config.clone();
    if shown.discovery_passphrase.is_some() {
        shown.discovery_passphrase = Some("********".to_string());
    }
    Ok(serde_json::to_string_pretty(&shown)?)
}

/// Setup logging based on verbosity level
fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Default config file (<config dir>/peerchat/config.json)
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("peerchat").join("config.json"))
}
