//! # starpilot CLI
//!
//! Search the GitHub repositories you have starred.
//!
//! ## Usage
//!
//! ```bash
//! starpilot --config ./starpilot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `starpilot setup` | Store GitHub/OpenAI credentials in the env file |
//! | `starpilot read <user>` | Fetch a user's stars and rebuild the cache and index |
//! | `starpilot shoot "<query>"` | Similarity search, printed as a table |
//! | `starpilot fortuneteller "<question>"` | Answer a question from your stars with an LLM |
//! | `starpilot astrologer "<request>"` | LLM-built metadata filter + semantic query |
//!
//! ## Examples
//!
//! ```bash
//! starpilot setup
//! starpilot read octocat --k 200 --skip-readmes
//! starpilot shoot "terminal file manager" --method mmr --k 6
//! starpilot shoot "vector database" --method similarity_score_threshold --threshold 0.6
//! starpilot fortuneteller "Which of my stars can profile Python code?"
//! starpilot astrologer "rust projects with more than 5000 stars about terminals"
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use starpilot::answer;
use starpilot::astrologer;
use starpilot::config;
use starpilot::ingest;
use starpilot::progress::ProgressMode;
use starpilot::retriever::SearchStrategy;
use starpilot::search::{self, RetrievalOverrides};
use starpilot::setup;

/// starpilot: use your GitHub stars for great good.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "starpilot",
    about = "Fetch, index and search the GitHub repositories you have starred",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./starpilot.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Progress reporting on stderr.
    #[arg(long, global = true, value_enum, default_value = "auto")]
    progress: ProgressMode,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store API credentials in the env file.
    ///
    /// Prompts for a GitHub token (required) and an optional OpenAI key and
    /// organization ID. Unrelated lines in the env file are kept.
    Setup,

    /// Read a user's stars.
    ///
    /// Fetches every starred repository, keeps the `--k` most starred,
    /// replaces the content cache and rebuilds the vector index.
    Read {
        /// GitHub username whose stars to read.
        user: String,

        /// Keep only the N most-starred repositories.
        #[arg(long)]
        k: Option<usize>,

        /// Do not fetch README.md / README.rst for each repository.
        #[arg(long)]
        skip_readmes: bool,
    },

    /// Shoot the stars: similarity search over the index.
    Shoot {
        /// Free-text query.
        query: String,

        /// Search strategy.
        #[arg(long, value_enum)]
        method: Option<SearchStrategy>,

        /// Number of results.
        #[arg(long)]
        k: Option<usize>,

        /// Minimum similarity for `similarity_score_threshold`.
        #[arg(long)]
        threshold: Option<f64>,

        /// Candidate pool size for `mmr`.
        #[arg(long)]
        fetch_k: Option<usize>,
    },

    /// Ask the fortune teller a question answered from your stars.
    Fortuneteller {
        question: String,

        /// Number of source repositories to hand the model.
        #[arg(long)]
        k: Option<usize>,
    },

    /// Let the LLM build a filtered query from a natural-language request.
    Astrologer {
        query: String,

        /// Number of results (overrides any limit the model chose).
        #[arg(long)]
        k: Option<usize>,
    },
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match dotenvy::from_path(&cfg.paths.env_file) {
        Ok(()) => tracing::debug!("loaded {}", cfg.paths.env_file.display()),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!("ignoring {}: {}", cfg.paths.env_file.display(), e),
    }

    match cli.command {
        Commands::Setup => {
            let stdin = std::io::stdin();
            let mut input = stdin.lock();
            let mut output = std::io::stderr();
            let keys = setup::run_setup(&cfg.paths.env_file, &mut input, &mut output)?;
            println!(
                "Saved {} to {}",
                keys.join(", "),
                cfg.paths.env_file.display()
            );
        }
        Commands::Read {
            user,
            k,
            skip_readmes,
        } => {
            let reporter = cli.progress.reporter();
            ingest::run_read(&cfg, &user, k, skip_readmes, reporter.as_ref()).await?;
        }
        Commands::Shoot {
            query,
            method,
            k,
            threshold,
            fetch_k,
        } => {
            let overrides = RetrievalOverrides {
                method,
                k,
                threshold,
                fetch_k,
            };
            search::run_shoot(&cfg, &query, &overrides).await?;
        }
        Commands::Fortuneteller { question, k } => {
            answer::run_fortuneteller(&cfg, &question, k).await?;
        }
        Commands::Astrologer { query, k } => {
            astrologer::run_astrologer(&cfg, &query, k).await?;
        }
    }

    Ok(())
}
