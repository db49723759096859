use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uipilot_execution::{SessionEventLayer, init_tracing};

mod commands;

#[derive(Parser)]
#[command(name = "uipilot")]
#[command(about = "UIPilot - vision-guided UI automation with a payment safety interlock", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run a scripted scenario end to end through the session engine
    Simulate {
        /// Scenario file (JSON)
        scenario: PathBuf,
        /// Honour scripted execution durations
        #[arg(long)]
        realtime: bool,
        /// Stream session events as JSON lines while the scenario runs
        #[arg(long)]
        follow: bool,
    },
    /// Audit recorded routes
    Route {
        #[command(subcommand)]
        action: RouteAction,
    },
    /// One-shot inference, translation and safety check for a screenshot
    Analyze {
        image: PathBuf,
        /// Task the model should make progress on
        #[arg(long)]
        task: String,
        /// Textual screen context sent alongside the image
        #[arg(long, default_value = "")]
        describe: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the default configuration if none exists
    Init,
}

#[derive(Subcommand)]
enum RouteAction {
    /// List sessions with a stored route
    List,
    /// Print the planned and actual sequences of a session
    Show { session_id: String },
    /// Success statistics for the given sessions (all when none given)
    Stats { session_ids: Vec<String> },
    /// Derive the final status of a session from its route
    Replay { session_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_service = commands::utils::config_service(cli.config.as_deref())?;
    let config = config_service.get_config()?;

    let follow = matches!(cli.command, Commands::Simulate { follow: true, .. });
    let (events, feed) = if follow {
        let (layer, feed) = SessionEventLayer::channel();
        (Some(layer), Some(feed))
    } else {
        (None, None)
    };
    init_tracing(&config.logging, events)?;

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show(&config_service, &config)?,
            ConfigAction::Init => commands::config::init(&config_service)?,
        },
        Commands::Simulate {
            scenario, realtime, ..
        } => commands::simulate::run(&config, &scenario, realtime, feed).await?,
        Commands::Route { action } => {
            let tracker = commands::utils::route_tracker(&config).await?;
            match action {
                RouteAction::List => commands::route::list(&tracker).await?,
                RouteAction::Show { session_id } => {
                    commands::route::show(&tracker, &session_id).await?
                }
                RouteAction::Stats { session_ids } => {
                    commands::route::stats(&tracker, session_ids).await?
                }
                RouteAction::Replay { session_id } => {
                    commands::route::replay(&tracker, &session_id).await?
                }
            }
        }
        Commands::Analyze {
            image,
            task,
            describe,
        } => commands::analyze::run(&config, &image, &task, &describe).await?,
    }

    Ok(())
}
