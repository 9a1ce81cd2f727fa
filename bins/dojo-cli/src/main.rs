mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dojo_common::config::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dojo-cli")]
#[command(about = "Dojo CLI - Run and grade exercise solutions locally", long_about = None)]
struct Cli {
    /// Language configuration file (defaults to DOJO_LANGUAGES or config/languages.json)
    #[arg(long, global = true)]
    languages: Option<PathBuf>,

    /// Isolation policy: host or docker
    #[arg(long, global = true)]
    isolation: Option<String>,

    /// Message language: es or en
    #[arg(long, global = true)]
    locale: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a source file once and print its output
    Run {
        /// Language tag (e.g., python, csharp)
        #[arg(short, long, default_value = "python")]
        lang: String,

        /// Source file
        #[arg(short, long)]
        file: PathBuf,

        /// Wall-clock limit in milliseconds (defaults to DOJO_RUN_TIMEOUT_MS)
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },

    /// Grade a source file against a problem definition (JSON)
    Check {
        /// Problem JSON with at least id, title and referenceSolution
        #[arg(short, long)]
        problem: PathBuf,

        /// Source file
        #[arg(short, long)]
        file: PathBuf,

        /// Language tag
        #[arg(short, long, default_value = "python")]
        lang: String,
    },

    /// List configured languages
    Langs,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(path) = cli.languages {
        config.languages_path = path;
    }
    if let Some(isolation) = cli.isolation {
        config.isolation = isolation;
    }
    if let Some(locale) = cli.locale {
        config.locale = locale;
    }

    let code = match cli.command {
        Commands::Run {
            lang,
            file,
            timeout_ms,
        } => commands::run_file(&config, &lang, &file, timeout_ms).await?,
        Commands::Check {
            problem,
            file,
            lang,
        } => commands::check_file(&config, &problem, &file, &lang).await?,
        Commands::Langs => commands::list_languages(&config)?,
    };

    std::process::exit(code);
}
