use std::{
    panic,
    path::PathBuf,
    process,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use clap::Parser;
use thiserror::Error;
use tracing::{info, level_filters::LevelFilter};

use crate::{
    commands::{
        Commands,
        RemasterCli,
        analyze::analyze_handler,
        clean::clean_handler,
        compile::compile_handler,
        encode::{encode_handler, resume_handler},
        init::init_handler,
    },
    logging::init_logging,
};

mod commands;
mod configuration;
mod logging;

pub const DEFAULT_CONFIG_PATH: &str = "./remaster.json";
pub const DEFAULT_TEMP_PATH: &str = "./temp";
pub const DEFAULT_LOG_PATH: &str = "./logs/remaster.log";

fn main() -> anyhow::Result<()> {
    let orig_hook = panic::take_hook();
    // Catch panics in child threads
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(1);
    }));
    run()
}

fn run() -> anyhow::Result<()> {
    let cli = RemasterCli::parse();
    let cwd = std::env::current_dir()?;
    let config_path = cli.config_file.unwrap_or_else(|| cwd.join(DEFAULT_CONFIG_PATH));
    let logs = cli.logs.unwrap_or_else(|| cwd.join(DEFAULT_LOG_PATH));
    let _guard = init_logging(LevelFilter::INFO, &logs, LevelFilter::DEBUG)?;

    let cancelled = Arc::new(AtomicBool::new(false));
    {
        let cancelled = Arc::clone(&cancelled);
        ctrlc::set_handler(move || {
            info!("Cancelling. Running encoders are stopped, finished fragments are kept.");
            cancelled.store(true, Ordering::SeqCst);
        })?;
    }

    match cli.command {
        Commands::Init {
            args,
        } => {
            let settings_file = init_handler(&config_path, args)?;
            println!("{}", settings_file.display());
        },
        Commands::Compile {
            settings,
            preview,
            output,
        } => {
            let script = compile_handler(&config_path, &settings, preview, output)?;
            println!("{}", script.display());
        },
        Commands::Analyze {
            settings,
        } => {
            analyze_handler(&config_path, &settings, cancelled)?;
        },
        Commands::Encode {
            settings,
        } => {
            encode_handler(&config_path, &settings, cancelled)?;
        },
        Commands::Resume {
            temp,
        } => {
            resume_handler(&config_path, temp, cancelled)?;
        },
        Commands::Clean {
            settings,
        } => {
            clean_handler(&settings)?;
        },
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum RemasterCliError {
    #[error("Job settings already exist at {0}")]
    JobAlreadyExists(PathBuf),
}
