use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Archive open-data releases into dated folders", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the sources that can be archived
    List,

    /// Archive one source into <output-root>/<source>/downloaded-<date>
    Run {
        /// Source key, as shown by `list`
        source: String,

        /// Directory the per-source folder is created in
        #[arg(short, long, default_value = ".")]
        output_root: PathBuf,

        /// Only take the first N entries of each section (for trial runs)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Download rate limit in bytes per second (optional)
        #[arg(short = 'r', long, default_value = None)]
        rate_limit: Option<u64>,

        /// Per-request timeout in seconds
        #[arg(short, long, default_value = "1800")]
        timeout_secs: u64,

        /// Hide per-file progress bars
        #[arg(long)]
        no_progress: bool,
    },
}
