use clap::{ArgAction, Parser, Subcommand};

mod commands;
mod logging;
mod output;

use commands::{cache, login, setup, status, sync};

#[derive(Parser)]
#[command(name = "watchsync")]
#[command(about = "Sync watched state and ratings between a Plex server and Trakt")]
#[command(version)]
struct Cli {
    /// Enable verbose output (use multiple times for more verbosity: -v, -vv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "human", value_enum)]
    output: output::OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync between Plex and Trakt
    #[command(long_about = "Fetch full snapshots from both sides, compute the minimal set of watched/rating mutations and apply them. Remote mutations are batched into single calls; Plex mutations apply per item.")]
    Sync {
        /// Compute and report mutations without applying anything
        #[arg(long, action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Authenticate with Trakt using the device code flow
    Login,
    /// Configure the Plex server connection
    Setup,
    /// Show configuration and cache status
    Status,
    /// Manage the local cache
    Cache {
        #[command(subcommand)]
        cmd: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Delete expired cache rows
    Prune,
    /// Clear stored sync state (cursors/watermarks)
    ClearState,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    logging::init_logging(cli.verbose, cli.quiet)
        .map_err(|e| color_eyre::eyre::eyre!("{}", e))?;

    let output = output::Output::new(cli.output, cli.quiet);

    let result = match cli.command {
        Commands::Sync { dry_run } => sync::run_sync(dry_run, &output).await,
        Commands::Login => login::run_login(&output).await,
        Commands::Setup => setup::run_setup(&output).await,
        Commands::Status => status::run_status(&output).await,
        Commands::Cache { cmd } => match cmd {
            CacheCommands::Prune => cache::run_prune(&output),
            CacheCommands::ClearState => cache::run_clear_state(&output),
        },
    };

    result.map_err(|e| color_eyre::eyre::eyre!("{:#}", e))
}
