use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use blindsight_core::config::Config;

mod simulate;

#[derive(Parser)]
#[command(
    name = "blindsight",
    about = "Live camera context for voice assistants",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a session against an in-process room with synthetic frames
    Simulate {
        /// Frames per second published on each track
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..=240))]
        fps: u32,

        /// Number of user turns to run
        #[arg(long, default_value_t = 5)]
        turns: u32,

        /// Milliseconds between turns
        #[arg(long, default_value_t = 500)]
        turn_interval_ms: u64,

        /// Publish a second video track before this turn
        #[arg(long)]
        swap_at: Option<u32>,

        /// Publish the camera after the session has started
        #[arg(long)]
        late_join: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show effective settings
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Check the configuration for problems
    Validate,
}

/// Initialize tracing from `RUST_LOG`, else from the logging config.
fn init_logging(config: &Config, verbose: bool) {
    let logging = config.logging.clone();
    let level = if verbose {
        "debug".to_string()
    } else {
        logging
            .as_ref()
            .and_then(|l| l.level.clone())
            .unwrap_or_else(|| "info".to_string())
    };

    let mut directives = vec![level];
    if let Some(l) = &logging {
        directives.extend(l.filters.iter().cloned());
    }
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directives.join(",")));

    let json = logging.as_ref().is_some_and(|l| l.format == "json");
    let stdout = logging.as_ref().is_some_and(|l| l.output == "stdout");
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match (json, stdout) {
        (true, true) => builder.json().with_writer(std::io::stdout).init(),
        (true, false) => builder.json().with_writer(std::io::stderr).init(),
        (false, true) => builder.with_writer(std::io::stdout).init(),
        (false, false) => builder.with_writer(std::io::stderr).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(|p| PathBuf::from(shellexpand::tilde(&p).as_ref()))
        .unwrap_or_else(Config::config_dir);

    let config = Config::load(&config_path)?;
    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Simulate {
            fps,
            turns,
            turn_interval_ms,
            swap_at,
            late_join,
        } => {
            let (warnings, errors) = config.validate();
            for w in &warnings {
                tracing::warn!("{w}");
            }
            if !errors.is_empty() {
                anyhow::bail!("Invalid configuration: {}", errors.join("; "));
            }

            tracing::info!(fps, turns, "Starting local simulation");
            simulate::run(
                &config,
                simulate::SimulateOptions {
                    fps,
                    turns,
                    turn_interval: Duration::from_millis(turn_interval_ms),
                    swap_before_turn: swap_at,
                    late_join,
                },
            )
            .await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => println!("{key} is not set"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} configuration error(s)", errors.len());
                }
                println!("Configuration OK");
            }
        },
        Commands::Status => {
            let vision = config.vision();
            println!("Blindsight v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!("Agent: {}", config.agent_name());
            println!("Progress log every: {} frames", vision.progress_log_every);
            println!("Stop timeout: {}ms", vision.stop_timeout_ms);
            match vision.stale_after_ms {
                Some(ms) => println!("Frame expiry: {ms}ms"),
                None => println!("Frame expiry: off"),
            }
        }
    }

    Ok(())
}
