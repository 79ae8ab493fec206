//! Cardseal CLI
//!
//! Command-line client for the Cardseal tokenization API.
//!
//! # Usage
//!
//! ```bash
//! # Start a session with client credentials
//! cardseal login --client-id my-client --client-secret "$SECRET"
//!
//! # Check a card locally without contacting the server
//! cardseal validate --pan 4444444444444448 --exp-month 06 --exp-year 27 --cvv 123
//!
//! # Tokenize a card
//! cardseal tokenize --pan 4444444444444448 --exp-month 06 --exp-year 27 --cvv 123 --format json
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use cardseal_core::{Cardseal, CardsealConfig, FnReporter, SdkError};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt};

mod commands;

#[derive(Parser)]
#[command(name = "cardseal")]
#[command(about = "Tokenize payment cards with the Cardseal API")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate with client credentials and store the session
    Login {
        #[arg(long)]
        client_id: String,

        /// Client secret; prefer the environment variable over the flag
        #[arg(long, env = "CARDSEAL_CLIENT_SECRET", hide_env_values = true)]
        client_secret: String,
    },

    /// Remove the stored session and cached server key
    Logout,

    /// Show session and storage state
    Status,

    /// Download and cache the server's public key
    FetchKey {
        /// Drop the cached key first
        #[arg(long)]
        force: bool,
    },

    /// Check card fields without contacting the server
    Validate(CardArgs),

    /// Encrypt a card and exchange it for a token
    Tokenize {
        #[command(flatten)]
        card: CardArgs,

        /// Request a token that does not expire
        #[arg(long)]
        permanent: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Args)]
struct CardArgs {
    /// Card number
    #[arg(long)]
    pan: String,

    /// Two-digit expiry month
    #[arg(long)]
    exp_month: String,

    /// Expiry year, 2 to 4 digits
    #[arg(long)]
    exp_year: String,

    #[arg(long)]
    cvv: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let cardseal = open(config)?;

    match cli.command {
        Commands::Login {
            client_id,
            client_secret,
        } => commands::login(&cardseal, &client_id, &client_secret).await,
        Commands::Logout => commands::logout(&cardseal).await,
        Commands::Status => commands::status(&cardseal).await,
        Commands::FetchKey { force } => commands::fetch_key(&cardseal, force).await,
        Commands::Validate(card) => commands::validate(&cardseal, &card.into_record()),
        Commands::Tokenize {
            card,
            permanent,
            format,
        } => commands::tokenize(&cardseal, &card.into_record(), permanent, format).await,
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<CardsealConfig> {
    match path {
        Some(path) => cardseal_core::load_config_from(path)
            .with_context(|| format!("failed to load configuration from {:?}", path)),
        None => cardseal_core::load_config().context("failed to load configuration"),
    }
}

fn open(config: CardsealConfig) -> Result<Cardseal> {
    Cardseal::builder(config)
        .reporter(FnReporter::new(|e: &SdkError| {
            tracing::debug!(code = e.code().as_str(), "operation failed: {}", e.message());
        }))
        .build()
        .context("failed to initialize cardseal")
}

impl CardArgs {
    fn into_record(self) -> cardseal_core::CardRecord {
        cardseal_core::CardRecord::new(self.pan, self.exp_month, self.exp_year, self.cvv)
    }
}
