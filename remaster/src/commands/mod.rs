use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::init::InitArgs;

pub mod analyze;
pub mod clean;
pub mod compile;
pub mod encode;
pub mod init;

#[derive(Parser)]
#[command(name = "remaster", version, about = "AviSynth remastering script compiler and segmented encoder")]
pub struct RemasterCli {
    /// Configuration file. Defaults to ./remaster.json
    #[arg(long, global = true)]
    pub config_file: Option<PathBuf>,
    /// Log file. Defaults to ./logs/remaster.log
    #[arg(long, global = true)]
    pub logs:        Option<PathBuf>,
    #[command(subcommand)]
    pub command:     Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the settings file of a new job
    Init {
        #[command(flatten)]
        args: InitArgs,
    },
    /// Write the filter script of a job
    Compile {
        settings: PathBuf,
        /// Add a preview frame and convert to RGB for display
        #[arg(long)]
        preview:  bool,
        /// Script path. Defaults to the job's script file
        #[arg(long)]
        output:   Option<PathBuf>,
    },
    /// Show which parts of a job are encoded and how the rest would be split
    Analyze { settings: PathBuf },
    /// Encode one or more jobs
    Encode {
        #[arg(required = true)]
        settings: Vec<PathBuf>,
    },
    /// Continue every unfinished job found in a working directory
    Resume {
        #[arg(long)]
        temp: Option<PathBuf>,
    },
    /// Remove the intermediate files and the settings file of a job
    Clean { settings: PathBuf },
}
