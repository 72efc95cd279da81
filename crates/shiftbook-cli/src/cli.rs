use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "shiftbook")]
#[command(about = "Replicate the Shiftbook database through a cloud folder")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Use a local or mounted directory as the remote store
    #[arg(long, global = true, value_name = "DIR")]
    pub remote_dir: Option<PathBuf>,

    /// JSON file with sync settings (defaults plus SHIFTBOOK_SYNC_* otherwise)
    #[arg(long, global = true, value_name = "PATH")]
    pub settings: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show marker, remote timestamp and conflict state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Snapshot the local database and upload it when safe
    Push,
    /// Download the remote copy
    Pull {
        /// Replace the local database instead of only fetching a copy
        #[arg(long)]
        apply: bool,
    },
    /// Merge remote messages and decision for one dispute
    Merge {
        /// Dispute ID
        dispute: String,
    },
    /// Pull the remote copy when it is newer than the last sync
    Startup,
    /// Swap in a download parked while the database was locked
    ApplyPending,
    /// Work with shift disputes
    Dispute {
        #[command(subcommand)]
        command: DisputeCommands,
    },
}

#[derive(Subcommand)]
pub enum DisputeCommands {
    /// Open a dispute for a shift
    New {
        /// Shift reference, e.g. a roster slot id
        shift_ref: String,
        /// Who opens the dispute
        #[arg(long, value_name = "NAME")]
        by: String,
    },
    /// Post a message to a dispute thread
    Say {
        /// Dispute ID
        id: String,
        /// Message author
        #[arg(long, value_name = "NAME")]
        by: String,
        /// Author role
        #[arg(long, value_enum, default_value_t = RoleArg::Employee)]
        role: RoleArg,
        /// Optional decision carried by the message
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        /// Message body
        body: Vec<String>,
    },
    /// Record a decision on a dispute
    Decide {
        /// Dispute ID
        id: String,
        /// New status
        #[arg(value_enum)]
        status: StatusArg,
        /// Who decides
        #[arg(long, value_name = "NAME")]
        by: String,
    },
    /// Show a dispute with its thread
    Show {
        /// Dispute ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recent disputes
    List {
        /// Number of disputes to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum RoleArg {
    Employee,
    Manager,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StatusArg {
    Pending,
    Approved,
    Rejected,
    Resolved,
}
