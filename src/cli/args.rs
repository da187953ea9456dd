//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueHint};

/// Export column names, export rows and update compatibility of XForm definitions
#[derive(Parser, Debug)]
#[command(name = "formschema")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Debug output, repeat for more (-d info, -dd debug, -ddd trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub debug: u8,

    /// Project directory holding .formschema.toml (default: cwd)
    #[arg(short = 'C', long, global = true, value_hint = ValueHint::DirPath)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print export column names of a form
    Names {
        #[arg(value_hint = ValueHint::FilePath)]
        form: PathBuf,
    },

    /// Print the repeat groups of a form with their table headers
    Repeats {
        #[arg(value_hint = ValueHint::FilePath)]
        form: PathBuf,
    },

    /// Show the field tree of a form
    Tree {
        #[arg(value_hint = ValueHint::FilePath)]
        form: PathBuf,
    },

    /// Show form id, version, title and submission settings
    Identity {
        #[arg(value_hint = ValueHint::FilePath)]
        form: PathBuf,
    },

    /// Export submissions as CSV tables
    Export {
        #[arg(value_hint = ValueHint::FilePath)]
        form: PathBuf,

        /// Submission files or directories containing them
        #[arg(required = true, value_hint = ValueHint::AnyPath)]
        submissions: Vec<PathBuf>,

        /// Output directory (default: print the main table to stdout)
        #[arg(short, long, value_hint = ValueHint::DirPath)]
        output: Option<PathBuf>,

        /// Copy attachments into the media directory
        #[arg(long)]
        export_media: bool,

        /// Media directory name inside the output directory
        #[arg(long)]
        media_dir: Option<String>,
    },

    /// Check whether an incoming definition may replace an existing one
    Compare {
        #[arg(value_hint = ValueHint::FilePath)]
        incoming: PathBuf,

        #[arg(value_hint = ValueHint::FilePath)]
        existing: PathBuf,

        /// Title of the existing form when its definition declares none
        #[arg(long)]
        title: Option<String>,

        /// Accept a malformed instance xmlns as form id
        #[arg(long)]
        allow_legacy: bool,
    },

    /// Manage settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completion {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,

    /// Print a configuration template
    Template,

    /// Show config file locations
    Path,
}
