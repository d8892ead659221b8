use std::{
    path::Path,
    sync::{Arc, atomic::AtomicBool},
};

use anyhow::Result;
use remaster_core::{
    EncodeSettings,
    ExternalTools,
    SegmentInfo,
    compile,
    segments::{scanner::SegmentScanner, splitter::SplitPlan},
};

use crate::configuration::Configuration;

pub fn analyze_handler(config_path: &Path, settings_path: &Path, cancelled: Arc<AtomicBool>) -> Result<()> {
    let configuration = Configuration::load(config_path)?;
    let settings = EncodeSettings::load(settings_path)?;
    let tools = ExternalTools::new(configuration.tools.clone(), Arc::clone(&cancelled));

    if !settings.script_file().exists() {
        let options = configuration.compile_options(configuration.gpu.unwrap_or(false), false, settings.parallelism);
        compile(&settings, &options)?.write(&settings.script_file())?;
    }

    let analysis = SegmentScanner::new(&tools).analyze(&settings, &cancelled)?;
    let plan = SplitPlan::new(usize::from(settings.parallelism), analysis.frames_left());
    let chunks = plan.split(&analysis.left);

    println!("Job {}: {} frames", settings.job_index, analysis.total_frames);
    println!("Done ({} frames): {}", analysis.frames_done(), list(&analysis.done));
    println!("Left ({} frames): {}", analysis.frames_left(), list(&analysis.left));
    println!("Chunks for {} workers: {}", plan.workers, list(&chunks));

    Ok(())
}

fn list(segments: &[SegmentInfo]) -> String {
    segments.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}
