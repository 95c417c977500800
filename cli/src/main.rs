// meshsim: command-line driver for the mesh simulator
//
// Loads a scenario, lets the periodic jobs build routing tables, sends the
// scenario's messages and prints what every device ended up with.

mod config;
mod scenario;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use meshsim_core::{MeshSimulator, Metric, Payload};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scenario::Scenario;

#[derive(Parser)]
#[command(name = "meshsim")]
#[command(about = "Ad-hoc wireless mesh simulator", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file to use instead of the platform default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Tracing filter, e.g. `meshsim_core=debug` (RUST_LOG wins when set)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario and print routing tables and deliveries
    Run {
        scenario: PathBuf,
        /// Seconds to settle before and after sending messages
        #[arg(short, long)]
        settle: Option<u64>,
    },
    /// Run a scenario and list the best paths between two devices
    Routes {
        scenario: PathBuf,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        /// distance, latency or error-rate
        #[arg(short, long, default_value = "distance")]
        metric: String,
        #[arg(short, default_value = "3")]
        k: usize,
        #[arg(short, long)]
        settle: Option<u64>,
    },
    /// Print an example scenario file
    Example,
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Get { key: String },
    Set { key: String, value: String },
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load(cli.config.as_deref())?;

    let default_filter = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    match cli.command {
        Commands::Run { scenario, settle } => cmd_run(&config, &scenario, settle).await,
        Commands::Routes {
            scenario,
            from,
            to,
            metric,
            k,
            settle,
        } => cmd_routes(&config, &scenario, &from, &to, &metric, k, settle).await,
        Commands::Example => cmd_example(),
        Commands::Config { action } => cmd_config(config, action),
    }
}

fn build_simulator(config: &config::Config, scenario: &Scenario) -> Result<MeshSimulator> {
    let sim_config = scenario.config.clone().unwrap_or_else(|| config.sim.clone());
    let sim = MeshSimulator::new(sim_config).context("Invalid simulation settings")?;
    scenario.populate(&sim)?;
    println!(
        "  {} {} devices placed on a {}x{} grid",
        "✓".green(),
        scenario.devices.len(),
        sim.config().grid_max,
        sim.config().grid_max
    );
    Ok(sim)
}

/// Sleep unless interrupted. False on Ctrl-C.
async fn settle(duration: Duration) -> bool {
    println!("  {} settling for {}s", "…".dimmed(), duration.as_secs());
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = tokio::signal::ctrl_c() => {
            println!("  {} interrupted", "!".yellow());
            false
        }
    }
}

async fn cmd_run(config: &config::Config, path: &Path, settle_secs: Option<u64>) -> Result<()> {
    println!("{}", "Running scenario...".bold());
    let scenario = Scenario::load(path)?;
    let sim = build_simulator(config, &scenario)?;
    let pause = Duration::from_secs(settle_secs.unwrap_or(config.settle_secs));

    if settle(pause).await && !scenario.messages.is_empty() {
        println!();
        println!("{}", "Messages".bold());
        for message in &scenario.messages {
            match sim.send_user_message(message.clone()) {
                Ok(id) => println!(
                    "  {} {} -> {} [{}] {}",
                    "✓".green(),
                    message.sender,
                    message.destination,
                    message.content_type,
                    id.to_string().dimmed()
                ),
                Err(e) => println!(
                    "  {} {} -> {}: {}",
                    "✗".red(),
                    message.sender,
                    message.destination,
                    e
                ),
            }
        }
        settle(pause).await;
    }

    println!();
    println!("{}", "Routing tables".bold());
    for device in sim.list_devices() {
        print!("{}", device.routing_table.render(&device.label));
    }

    println!();
    println!("{}", "Deliveries".bold());
    let mut delivered = 0;
    for device in sim.list_devices() {
        for request in &device.inbox {
            if let Payload::UserMessage(message) = &request.payload {
                let arrived = message.path.is_empty() && message.destination == device.label;
                let marker = if arrived { "✓".green() } else { "→".cyan() };
                println!(
                    "  {} {} <- {} (origin {}, {} hops left) {:?}",
                    marker,
                    device.label.bright_cyan(),
                    request.sender,
                    message.origin,
                    message.path.len(),
                    message.body
                );
                if arrived {
                    delivered += 1;
                }
            }
        }
    }
    if delivered == 0 {
        println!("  {}", "(no messages delivered)".dimmed());
    }

    sim.shutdown().await;
    Ok(())
}

async fn cmd_routes(
    config: &config::Config,
    path: &Path,
    from: &str,
    to: &str,
    metric: &str,
    k: usize,
    settle_secs: Option<u64>,
) -> Result<()> {
    let metric: Metric = metric.parse()?;
    let scenario = Scenario::load(path)?;
    let sim = build_simulator(config, &scenario)?;
    settle(Duration::from_secs(settle_secs.unwrap_or(config.settle_secs))).await;

    println!();
    println!("{} {} -> {} by {}", "Routes".bold(), from, to, metric);
    let paths = sim.routes(from, to, metric, k)?;
    if paths.is_empty() {
        println!("  {}", "(no route found)".dimmed());
    }
    for (i, path) in paths.iter().enumerate() {
        println!("  {}. {}", i + 1, path);
    }

    sim.shutdown().await;
    Ok(())
}

fn cmd_example() -> Result<()> {
    let json = serde_json::to_string_pretty(&Scenario::example())
        .context("Failed to serialize example scenario")?;
    println!("{}", json);
    Ok(())
}

fn cmd_config(mut config: config::Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::Show => {
            println!("{} {}", "Configuration".bold(), config.path().display().to_string().dimmed());
            println!();
            for (key, value) in config.list() {
                println!("  {:<22} {}", key.bright_cyan(), value);
            }
        }
    }

    Ok(())
}
