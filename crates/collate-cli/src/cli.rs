use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "collate",
    about = "Collect per-task results and merge them into one dataset",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML file with manager settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a run directory
    Init(InitArgs),
    /// Show shard coverage of a run directory
    Status(StatusArgs),
    /// Merge a run's shards into its dataset
    Merge(MergeArgs),
    /// Show key paths and shapes of a dataset or shard
    Show(ShowArgs),
    /// Show the layout of an object store file
    Inspect(InspectArgs),
    /// Remove a merged run directory
    Cleanup(CleanupArgs),
    /// Inspect or split argument files
    Args(ArgsArgs),
}

#[derive(Args)]
pub struct InitArgs {
    pub dir: PathBuf,
    #[arg(long)]
    pub total_tasks: u64,
}

#[derive(Args)]
pub struct StatusArgs {
    pub dir: PathBuf,
}

#[derive(Args)]
pub struct MergeArgs {
    pub dir: PathBuf,
    /// Workers for a parallel merge; defaults to the configured count
    #[arg(short, long)]
    pub workers: Option<usize>,
    /// Remove the run directory once the dataset is written
    #[arg(long)]
    pub cleanup: bool,
}

#[derive(Args)]
pub struct ShowArgs {
    pub dataset: PathBuf,
}

#[derive(Args)]
pub struct InspectArgs {
    pub store: PathBuf,
}

#[derive(Args)]
pub struct CleanupArgs {
    pub dir: PathBuf,
}

#[derive(Args)]
pub struct ArgsArgs {
    #[command(subcommand)]
    pub action: ArgsAction,
}

#[derive(Subcommand)]
pub enum ArgsAction {
    /// Print metadata and argument sets
    Show {
        file: PathBuf,
        /// Print only this argument set
        #[arg(long)]
        index: Option<usize>,
    },
    /// Split into balanced `{name}_split{i}.dat` files
    Split {
        file: PathBuf,
        #[arg(long)]
        parts: usize,
    },
}
