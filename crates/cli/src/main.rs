//! Shot model CLI
//!
//! A command-line tool for requesting carry predictions, reporting shot
//! outcomes and inspecting per-club models on a running `shot-modeld`.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{models, predict, settings};
use output::OutputFormat;

/// Shot model CLI
#[derive(Parser)]
#[command(name = "shotml")]
#[command(author, version, about = "CLI for the golf shot model service", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via SHOTML_API_URL env var)
    #[arg(long, env = "SHOTML_API_URL")]
    pub api_url: Option<String>,

    /// Output format (defaults to the configured format, then table)
    #[arg(long, short)]
    pub format: Option<OutputFormat>,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Predict carry distance for a club
    Predict {
        /// Club (subject) name, e.g. "7 Iron"
        subject: String,

        /// Feature value as name=value (repeatable)
        #[arg(long = "feature", short = 'x', value_parser = predict::parse_feature)]
        features: Vec<(String, f64)>,

        /// Skip the prediction interval
        #[arg(long)]
        point: bool,

        /// Interval confidence level in (0, 1)
        #[arg(long)]
        confidence: Option<f64>,
    },

    /// Report the observed result of a prediction
    Outcome {
        /// Club (subject) name
        subject: String,

        /// Prediction ID returned by `predict`
        prediction_id: String,

        /// Observed carry distance
        actual: f64,
    },

    /// Show model health for a club
    Health {
        /// Club (subject) name
        subject: String,
    },

    /// List published model versions for a club
    Versions {
        /// Club (subject) name
        subject: String,
    },

    /// Train and publish a new model now
    Train {
        /// Club (subject) name
        subject: String,
    },

    /// Show or change CLI settings
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective settings
    Show,

    /// Persist default settings
    Set {
        /// Default API endpoint URL
        #[arg(long)]
        api_url: Option<String>,

        /// Default output format
        #[arg(long)]
        format: Option<OutputFormat>,

        /// Default interval confidence level
        #[arg(long)]
        confidence: Option<f64>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Cli::parse()).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::Config::load()?;
    let format = config.resolve_format(cli.format);

    match cli.command {
        Commands::Predict {
            subject,
            features,
            point,
            confidence,
        } => {
            let client = connect(&config, cli.api_url, cli.verbose)?;
            let confidence = confidence.or(config.default_confidence);
            predict::predict(&client, &subject, features, point, confidence, format).await?;
        }
        Commands::Outcome {
            subject,
            prediction_id,
            actual,
        } => {
            let client = connect(&config, cli.api_url, cli.verbose)?;
            predict::outcome(&client, &subject, &prediction_id, actual, format).await?;
        }
        Commands::Health { subject } => {
            let client = connect(&config, cli.api_url, cli.verbose)?;
            models::health(&client, &subject, format).await?;
        }
        Commands::Versions { subject } => {
            let client = connect(&config, cli.api_url, cli.verbose)?;
            models::versions(&client, &subject, format).await?;
        }
        Commands::Train { subject } => {
            let client = connect(&config, cli.api_url, cli.verbose)?;
            models::train(&client, &subject, format).await?;
        }
        Commands::Config(ConfigCommands::Show) => settings::show(&config, format)?,
        Commands::Config(ConfigCommands::Set {
            api_url,
            format,
            confidence,
        }) => settings::set(config, api_url, format, confidence)?,
    }

    Ok(())
}

fn connect(config: &config::Config, api_url: Option<String>, verbose: bool) -> Result<client::ApiClient> {
    let api_url = config.resolve_api_url(api_url);
    if verbose {
        output::print_info(&format!("Using API at {}", api_url));
    }
    client::ApiClient::new(&api_url)
}
