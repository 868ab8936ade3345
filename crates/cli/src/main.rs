//! personalizer-check - Main Entry Point
//!
//! Runs the personalizer rank-vs-DOM suite and the console-error audit
//! against live pages.
//!
//! Exit status: 0 when every check passed, 1 when any check failed, 2 when the
//! run could not be set up.

use clap::{Parser, Subcommand};

use personalizer_cli::commands::{config, console, items, rank};
use personalizer_cli::output::{print_error, OutputFormat};
use personalizer_cli::settings::GlobalOpts;

/// Personalizer regression checks
#[derive(Parser)]
#[command(name = "personalizer-check")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare rendered card order with the rank API and click through
    Rank(rank::RankArgs),

    /// Audit pages for console errors mentioning their experiment
    Console(console::ConsoleArgs),

    /// List the items (or console targets) read from the input
    Items(items::ItemsArgs),

    /// Show or write the resolved configuration
    Config(config::ConfigArgs),
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let settings = cli.global.resolve()?;

    match cli.command {
        Commands::Rank(args) => rank::execute(args, settings, cli.format).await,
        Commands::Console(args) => console::execute(args, settings, cli.format).await,
        Commands::Items(args) => items::execute(args, &settings, cli.format),
        Commands::Config(args) => config::execute(args, &settings),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let code = match run(cli).await {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            print_error(&format!("{:#}", e));
            2
        }
    };
    std::process::exit(code);
}
