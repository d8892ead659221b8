use std::{
    path::{Path, PathBuf},
    sync::{Arc, atomic::AtomicBool},
};

use anyhow::{Result, bail};
use remaster_core::{
    EncodeQueue,
    EncodeReport,
    EncodeSettings,
    ExternalTools,
    SegmentCoordinator,
    settings::CompletionStatus,
};
use tracing::{info, warn};

use crate::configuration::Configuration;

pub fn encode_handler(config_path: &Path, settings_paths: &[PathBuf], cancelled: Arc<AtomicBool>) -> Result<()> {
    let configuration = Configuration::load(config_path)?;
    let jobs = settings_paths
        .iter()
        .map(|path| EncodeSettings::load(path))
        .collect::<Result<Vec<_>, _>>()?;

    run_jobs(&configuration, jobs, &[], cancelled)
}

pub fn resume_handler(config_path: &Path, temp: Option<PathBuf>, cancelled: Arc<AtomicBool>) -> Result<()> {
    let configuration = Configuration::load(config_path)?;
    let temp = temp.unwrap_or_else(|| configuration.temp.clone());
    let recovered = EncodeSettings::recover_jobs(&temp)?;

    let unfinished = recovered
        .iter()
        .filter(|job| job.status != CompletionStatus::Success)
        .map(|job| job.resumed_at(job.resume_position))
        .collect::<Vec<_>>();
    if unfinished.is_empty() {
        info!("No unfinished jobs in {}", temp.display());
        return Ok(());
    }
    info!("Resuming {} of {} jobs", unfinished.len(), recovered.len());

    run_jobs(&configuration, unfinished, &recovered, cancelled)
}

fn run_jobs(
    configuration: &Configuration,
    jobs: Vec<EncodeSettings>,
    recovered: &[EncodeSettings],
    cancelled: Arc<AtomicBool>,
) -> Result<()> {
    let tools = Arc::new(ExternalTools::new(configuration.tools.clone(), Arc::clone(&cancelled)));
    tools.verify()?;

    let scratch = jobs.first().map_or_else(|| configuration.temp.clone(), |job| job.temp_directory.clone());
    std::fs::create_dir_all(&scratch)?;
    let gpu = configuration.detect_gpu(&tools, &scratch);
    let options = configuration.coordinator_options(gpu);

    let queue = EncodeQueue::new(configuration.slots, Arc::clone(&cancelled)).seeded(recovered);
    for job in jobs {
        queue.push(job);
    }

    let outcomes = queue.run(|settings| SegmentCoordinator::new(&*tools, options.clone()).encode(settings, &cancelled));

    let mut failed = 0;
    for outcome in &outcomes {
        let job = outcome.settings.job_index;
        match &outcome.result {
            Ok(EncodeReport::Complete { output, frames }) => {
                println!("Job {}: {} frames encoded to {}", job, frames, output.display());
            },
            Ok(EncodeReport::Incomplete {
                frames_left,
                resume_position,
                failures,
            }) => {
                failed += 1;
                warn!("Job {}: {} chunks failed", job, failures);
                println!("Job {}: {} frames left, resume from frame {}", job, frames_left, resume_position);
            },
            Ok(EncodeReport::Cancelled) => println!("Job {}: cancelled", job),
            Err(err) => {
                failed += 1;
                println!("Job {}: failed: {:#}", job, err);
            },
        }
    }

    if failed > 0 {
        bail!("{} of {} jobs did not finish", failed, outcomes.len());
    }
    Ok(())
}
