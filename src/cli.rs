//! Command-line interface for Lookout
//!
//! Uses clap with derive for type-safe CLI parsing

use crate::camera::Transport;
use crate::manifest::DEFAULT_CONFIG_PATH;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Lookout - camera stream supervisor
#[derive(Parser)]
#[command(name = "lookout")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Register a camera and schedule it
    Add {
        /// Camera name (letters, digits, '_' and '-')
        name: String,

        /// Camera hostname or IP address
        #[arg(short, long)]
        address: String,

        /// RTSP user
        #[arg(short, long, default_value = "")]
        user: String,

        /// RTSP password
        #[arg(short = 'p', long, default_value = "", hide_default_value = true)]
        secret: String,

        /// Destination stream key
        #[arg(short = 'k', long)]
        stream_key: String,

        /// RTSP port (default from configuration)
        #[arg(long)]
        port: Option<u16>,

        /// RTSP transport (default from configuration)
        #[arg(short, long, value_enum)]
        transport: Option<Transport>,
    },

    /// Change a camera's details
    Edit {
        name: String,

        #[arg(short, long)]
        address: Option<String>,

        #[arg(short, long)]
        user: Option<String>,

        #[arg(short = 'p', long)]
        secret: Option<String>,

        #[arg(short = 'k', long)]
        stream_key: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        #[arg(short, long, value_enum)]
        transport: Option<Transport>,
    },

    /// Stop, unschedule and remove a camera (its log is kept)
    Rm { name: String },

    /// List cameras
    Ls {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show a camera's details (password masked)
    Show {
        name: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,

        /// Show the password
        #[arg(long)]
        reveal: bool,
    },

    /// Run a control cycle now
    Start { name: String },

    /// Kill a camera's relay processes
    Stop { name: String },

    /// Probe a camera by name or address
    Ping { target: String },

    /// Control cycle entry point used by the scheduled unit
    #[command(hide = true)]
    Tick { name: String },

    /// Show whether a camera's relay is running
    Status {
        name: String,

        #[arg(long)]
        json: bool,
    },

    /// Show a camera's log
    Logs {
        name: String,

        /// Number of lines
        #[arg(short = 'n', long)]
        lines: Option<usize>,

        /// Keep following new lines
        #[arg(short, long)]
        follow: bool,
    },

    /// Truncate a camera's log
    ClearLogs { name: String },

    /// Manage camera schedules
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Host and fleet health
    Health {
        /// Host metrics only
        #[arg(long, conflicts_with_all = ["cameras", "issues"])]
        system: bool,

        /// Camera snapshots only
        #[arg(long, conflicts_with = "issues")]
        cameras: bool,

        /// Derived issues only
        #[arg(long)]
        issues: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,

        /// Repeat every N seconds until interrupted
        #[arg(long, value_name = "SECONDS")]
        watch: Option<u64>,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Actions for the schedule command
#[derive(Subcommand)]
pub enum ScheduleAction {
    /// Install or replace a camera's rule
    Set {
        name: String,

        /// Cron rule (5 fields or @keyword); default from configuration
        rule: Option<String>,
    },

    /// Remove a camera's rule
    Rm { name: String },

    /// Show a camera's rule
    Show { name: String },

    /// List every scheduled camera
    Ls {
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "lookout", &mut std::io::stdout());
    }
}
