// farlink-cli — operator console for a FarLink mesh node
//
// Runs one node (UDP LAN mesh or RYLR998 radio) and the interactive prompt:
// type a message to send it, DISCOVER to map the mesh, ?ACK for delivery
// status, exit to quit.

mod config;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use colored::*;
use farlink_core::node::Node;
use farlink_core::relay::{AssistantClient, RelayError, RelayService, SmsGateway};
use farlink_core::transport::{
    mem_bridge, RadioTransport, Rylr998Config, Rylr998Radio, UdpRadio,
};
use farlink_core::{NodeEvent, NodeRole};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Parser)]
#[command(name = "farlink")]
#[command(about = "FarLink — off-grid LoRa mesh messaging", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the mesh node and interactive prompt
    Start {
        /// Mesh identifier for this node (overrides config)
        #[arg(long)]
        node_id: Option<String>,

        /// leaf or gateway (overrides config)
        #[arg(long)]
        role: Option<String>,

        /// Network passphrase (overrides config)
        #[arg(long)]
        passphrase: Option<String>,

        /// LAN mesh: UDP broadcast port (default transport)
        #[arg(long)]
        udp_port: Option<u16>,

        /// RYLR998 radio on this serial device (e.g. /dev/ttyAMA0).
        /// The device must already be configured for the module's baud rate.
        #[arg(long)]
        serial: Option<PathBuf>,

        /// Link-layer address for the radio module
        #[arg(long, default_value_t = 0)]
        lora_address: u16,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show current configuration
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            node_id,
            role,
            passphrase,
            udp_port,
            serial,
            lora_address,
        } => cmd_start(node_id, role, passphrase, udp_port, serial, lora_address).await,
        Commands::Config { action } => cmd_config(action),
        Commands::Status => cmd_status(),
    }
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} {} = {}", "✓".green(), key, value);
        }
        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{} = {}", key, value),
            None => anyhow::bail!("Unknown config key: {}", key),
        },
        ConfigAction::List => {
            for (key, value) in config.list() {
                println!("{:<18} {}", key, value);
            }
        }
    }
    Ok(())
}

fn cmd_status() -> Result<()> {
    let config = config::Config::load()?;
    println!("{}", "FarLink node configuration:".bold());
    for (key, value) in config.list() {
        println!("  {:<18} {}", key, value);
    }
    println!(
        "  {:<18} {}",
        "config_file",
        config::Config::config_file()?.display()
    );
    Ok(())
}

async fn cmd_start(
    node_id: Option<String>,
    role: Option<String>,
    passphrase: Option<String>,
    udp_port: Option<u16>,
    serial: Option<PathBuf>,
    lora_address: u16,
) -> Result<()> {
    let mut config = config::Config::load()?;

    if let Some(node_id) = node_id {
        config.node_id = node_id;
    }
    if let Some(role) = role {
        config.set("role", &role)?;
    }
    if let Some(passphrase) = passphrase {
        config.passphrase = passphrase;
    }
    if let Some(port) = udp_port {
        config.udp_port = port;
    }
    if config.node_id.is_empty() {
        // First run: mint a stable identifier and persist it
        let suffix = fresh_suffix();
        config.node_id = format!("NODE{}", suffix[..4].to_uppercase());
        config.save()?;
        println!(
            "{} Generated node id {} (saved to config)",
            "✓".green(),
            config.node_id.bright_cyan()
        );
    }

    let node_config = config.to_node_config();
    let poll_timeout = Duration::from_millis(config.poll_timeout_ms);

    let radio: Box<dyn RadioTransport> = match &serial {
        Some(path) => {
            let device = tokio::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .await
                .with_context(|| format!("Failed to open radio device {}", path.display()))?;
            let mut radio = Rylr998Radio::new(device, poll_timeout);
            let rf = Rylr998Config {
                address: lora_address,
                ..Rylr998Config::default()
            };
            radio
                .init(&rf)
                .await
                .context("Radio module rejected its RF configuration")?;
            println!("{} Radio module ready on {}", "✓".green(), path.display());
            Box::new(radio)
        }
        None => {
            let radio = UdpRadio::bind(config.udp_port, poll_timeout)
                .await
                .with_context(|| format!("Failed to bind UDP mesh port {}", config.udp_port))?;
            println!(
                "{} LAN mesh on UDP broadcast port {}",
                "✓".green(),
                config.udp_port
            );
            Box::new(radio)
        }
    };

    let node = match config.role {
        NodeRole::Leaf => Node::spawn(node_config, radio)?,
        NodeRole::Gateway => {
            // The production bridge is the cellular modem's pub/sub client,
            // which lives outside this binary. The console gateway runs an
            // in-process relay against stub delivery services instead, so
            // the whole uplink/downlink path is exercisable anywhere.
            let (bridge, mut broker) = mem_bridge(poll_timeout);
            let relay = RelayService::new(
                node_config.preshared_key(),
                ConsoleSms,
                ConsoleAssistant,
            );
            tokio::spawn(async move {
                while let Some(frame) = broker.recv_uplink().await {
                    match relay.handle_upstream(&frame).await {
                        Ok(replies) => {
                            for reply in replies {
                                if broker.send_downlink(&reply).is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "relay rejected uplink frame"),
                    }
                }
            });
            println!("{} In-process relay attached (stub SMS/assistant)", "✓".green());
            Node::spawn_gateway(node_config, radio, bridge)?
        }
    };

    println!();
    println!("{}", "FarLink node running".bold());
    println!("  Node ID: {}", node.node_id().bright_cyan());
    println!("  Role:    {}", config.role.to_string().bright_yellow());
    println!();
    println!("Type a message and pick a destination, or:");
    println!("  {}  broadcast a discovery probe", "DISCOVER".bright_green());
    println!("  {}      show delivery status", "?ACK".bright_green());
    println!("  {}      quit", "exit".bright_green());
    println!();

    // Event printer
    let mut events = node.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    prompt_loop(&node).await
}

async fn prompt_loop(node: &Node) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break; // stdin closed
        };
        let input = line.trim();

        match input {
            "" => continue,
            "exit" => break,
            "?ACK" => {
                let report = node.ack_report();
                if report.is_empty() {
                    println!("No tracked sends yet.");
                }
                for (id, status) in report {
                    let status_str = match status {
                        farlink_core::AckStatus::Acked => "ACKED".green(),
                        farlink_core::AckStatus::Pending => "PENDING".yellow(),
                        farlink_core::AckStatus::Unknown => "UNKNOWN".dimmed(),
                    };
                    println!("  {}  {}", id, status_str);
                }
            }
            "DISCOVER" => {
                node.send_discover()?;
                println!("Discovery probe sent, waiting for responses...");
                tokio::time::sleep(Duration::from_secs(5)).await;
                let nodes = node.known_nodes();
                if nodes.is_empty() {
                    println!("No nodes discovered.");
                } else {
                    println!("{}", "Discovered nodes:".bold());
                    for discovered in nodes {
                        println!("  {}", discovered.bright_cyan());
                    }
                }
            }
            message => {
                stdout
                    .write_all(b"Destination node id (or +number / +Q query): ")
                    .await?;
                stdout.flush().await?;
                let Some(dest_line) = lines.next_line().await? else {
                    break;
                };
                let destination = dest_line.trim();
                if destination.is_empty() {
                    println!("{}", "No destination, message dropped.".red());
                    continue;
                }
                let id = node.send_message(destination, message)?;
                println!(
                    "Sent {} to {} ({})",
                    id.to_string().bright_cyan(),
                    destination.bright_yellow(),
                    "awaiting ack".dimmed()
                );
            }
        }
    }

    println!("Shutting down.");
    node.shutdown();
    Ok(())
}

fn print_event(event: &NodeEvent) {
    match event {
        NodeEvent::MessageReceived { from, content, .. } => {
            println!("\n{} {}: {}", "«".green(), from.bright_cyan(), content);
        }
        NodeEvent::Acknowledged { packet_id } => {
            println!("\n{} {} acknowledged", "✓".green(), packet_id);
        }
        NodeEvent::NodeDiscovered { node_id } => {
            println!("\n{} discovered {}", "+".yellow(), node_id.bright_cyan());
        }
        NodeEvent::BridgeForwarded { destination, .. } => {
            println!("\n{} relayed upstream for {}", "↑".blue(), destination);
        }
        NodeEvent::FramingError { detail } => {
            println!("\n{} bad frame: {}", "!".red(), detail.dimmed());
        }
        NodeEvent::CipherFailure { packet_id, .. } => {
            println!("\n{} undecryptable payload in {}", "!".red(), packet_id);
        }
        // Diagnostics stay on the trace log, not the console
        _ => {}
    }
}

fn fresh_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    // Cheap unique-enough suffix without pulling uuid into the CLI
    format!(
        "{:08x}",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos()
    )
}

struct ConsoleSms;

#[async_trait]
impl SmsGateway for ConsoleSms {
    async fn deliver(&self, number: &str, text: &str) -> Result<(), RelayError> {
        println!(
            "\n{} SMS to {}: {}",
            "☎".bright_blue(),
            number.bright_yellow(),
            text
        );
        Ok(())
    }
}

struct ConsoleAssistant;

#[async_trait]
impl AssistantClient for ConsoleAssistant {
    async fn query(&self, prompt: &str) -> Result<String, RelayError> {
        // Stub: a deployment points this at a real generative service
        Ok(format!(
            "Assistant offline; echoing your question back: {}",
            prompt
        ))
    }
}
