use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tandem::batch::TaskSpec;

#[derive(Parser)]
#[command(name = "tandem")]
#[command(author, version, about = "Run batches of cancellable tasks in parallel or in series")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a batch of demo tasks and print the results
    Run {
        /// Run tasks one at a time instead of all at once
        #[arg(long)]
        series: bool,

        /// Task as id:delay_ms:value (a value of !fail makes it fail)
        #[arg(short, long = "task", value_name = "ID:DELAY_MS:VALUE")]
        tasks: Vec<TaskSpec>,

        /// Task pushed into the pool after it starts
        #[arg(long = "push", value_name = "ID:DELAY_MS:VALUE")]
        pushes: Vec<TaskSpec>,

        /// Cancel all pools if the batch has not finished after this many milliseconds
        #[arg(long, value_name = "MS")]
        cancel_after: Option<u64>,

        /// Read the batch from a TOML file
        #[arg(short, long)]
        batch: Option<PathBuf>,

        /// Print lifecycle events as JSON lines
        #[arg(long)]
        events: bool,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
