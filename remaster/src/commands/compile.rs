use std::{
    path::{Path, PathBuf},
    sync::{Arc, atomic::AtomicBool},
};

use anyhow::{Context, Result};
use remaster_core::{
    EncodeSettings,
    ExternalTools,
    compile,
    compiler::compile_deshaker_pass1,
};
use tracing::info;

use crate::configuration::Configuration;

/// Write the script of a job, returning the path it was written to.
pub fn compile_handler(
    config_path: &Path,
    settings_path: &Path,
    preview: bool,
    output: Option<PathBuf>,
) -> Result<PathBuf> {
    let configuration = Configuration::load(config_path)?;
    let settings = EncodeSettings::load(settings_path)?;
    std::fs::create_dir_all(&settings.temp_directory).with_context(|| {
        format!("Failed to create job directory {}", settings.temp_directory.display())
    })?;

    let tools = Arc::new(ExternalTools::new(
        configuration.tools.clone(),
        Arc::new(AtomicBool::new(false)),
    ));
    let gpu = configuration.detect_gpu(&tools, &settings.temp_directory);
    let options = configuration.compile_options(gpu, preview, settings.parallelism);

    let script = compile(&settings, &options)?;
    let output = output.unwrap_or_else(|| {
        if preview {
            settings.temp_directory.join(format!("Job{}_Preview.avs", settings.job_index))
        } else {
            settings.script_file()
        }
    });
    script.write(&output)?;
    info!("Wrote script of job {} to {}", settings.job_index, output.display());

    if settings.deshaker.is_some() {
        let pass1 = settings.deshaker_script_file();
        compile_deshaker_pass1(&settings, &options)?.write(&pass1)?;
        info!("Wrote stabilization analysis script to {}", pass1.display());
    }

    Ok(output)
}
