use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use anyhow::{Context, bail};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    avs::script_builder::script::AvisynthScript,
    compiler::{CompileOptions, compile, compile_deshaker_pass1, segment_script},
    error::ToolError,
    segments::{SegmentAnalysis, SegmentInfo, scanner::SegmentScanner, splitter::SplitPlan},
    settings::{CompletionStatus, EncodeSettings},
    tools::{FrameProbe, Muxer, RunOptions, ScriptRunner},
    util::{retry::remove_file_with_retry, semaphore::Semaphore},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorOptions {
    pub compile:            CompileOptions,
    /// CPU threads shared by every encoder instance of a job.
    pub available_threads:  usize,
    pub run:                RunOptions,
    /// Leave scripts, fragments and the concat list in place after muxing.
    pub keep_intermediates: bool,
}

impl Default for CoordinatorOptions {
    #[inline]
    fn default() -> Self {
        Self {
            compile:            CompileOptions::default(),
            available_threads:  thread::available_parallelism().map_or(1, usize::from),
            run:                RunOptions::default(),
            keep_intermediates: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeReport {
    /// Every frame was encoded and muxed into `output`.
    Complete { output: PathBuf, frames: usize },
    /// Some chunks failed. The job can be resumed from `resume_position`.
    Incomplete {
        frames_left:     usize,
        resume_position: usize,
        failures:        usize,
    },
    Cancelled,
}

/// Drives one job from compiled script to muxed output, resuming from
/// whatever fragments a previous run left behind.
pub struct SegmentCoordinator<'a, T> {
    tools:   &'a T,
    options: CoordinatorOptions,
}

impl<'a, T> SegmentCoordinator<'a, T>
where
    T: ScriptRunner + FrameProbe + Muxer,
{
    #[inline]
    pub fn new(tools: &'a T, options: CoordinatorOptions) -> Self {
        Self {
            tools,
            options,
        }
    }

    #[inline]
    #[instrument(level = "debug", skip_all, fields(job = settings.job_index))]
    pub fn encode(
        &self,
        settings: &mut EncodeSettings,
        cancelled: &AtomicBool,
    ) -> anyhow::Result<EncodeReport> {
        fs::create_dir_all(&settings.temp_directory).with_context(|| {
            format!("Failed to create job directory {}", settings.temp_directory.display())
        })?;
        settings.status = CompletionStatus::Running;
        settings.save()?;

        self.prepare_scripts(settings)?;

        let scanner = SegmentScanner::new(self.tools);
        let analysis = scanner.analyze(settings, cancelled)?;
        if cancelled.load(Ordering::Relaxed) {
            return self.cancel(settings);
        }
        if analysis.total_frames == 0 {
            settings.status = CompletionStatus::Failed;
            settings.save()?;
            bail!("Source of job {} has no frames", settings.job_index);
        }

        let failures = if analysis.left.is_empty() {
            info!("Job {}: all {} frames already encoded", settings.job_index, analysis.total_frames);
            0
        } else {
            self.encode_chunks(settings, &analysis, cancelled)?
        };
        if cancelled.load(Ordering::Relaxed) {
            return self.cancel(settings);
        }

        let analysis = scanner.analyze(settings, cancelled)?;
        if cancelled.load(Ordering::Relaxed) {
            return self.cancel(settings);
        }
        settings.resume_position = analysis.resume_position();
        if !analysis.is_complete() {
            settings.status = if failures > 0 { CompletionStatus::Failed } else { CompletionStatus::Pending };
            settings.save()?;
            warn!(
                "Job {} incomplete: {} frames left from {}",
                settings.job_index,
                analysis.frames_left(),
                settings.resume_position
            );
            return Ok(EncodeReport::Incomplete {
                frames_left: analysis.frames_left(),
                resume_position: settings.resume_position,
                failures,
            });
        }

        let output = self.finish(settings, &analysis)?;
        Ok(EncodeReport::Complete {
            output,
            frames: analysis.total_frames,
        })
    }

    /// Compile the job script, and run the motion analysis pass when
    /// stabilization needs a log that is not there yet.
    fn prepare_scripts(&self, settings: &EncodeSettings) -> anyhow::Result<()> {
        let options = CompileOptions {
            threads: settings.threads_per_instance(self.options.available_threads),
            ..self.options.compile.clone()
        };

        if settings.deshaker.is_some() && !settings.deshaker_log_file().exists() {
            let pass1 = compile_deshaker_pass1(settings, &options)?;
            let script = pass1.write(&settings.deshaker_script_file())?;
            info!("Job {}: running stabilization analysis", settings.job_index);
            self.tools
                .run_script(&script, &self.options.run)
                .context("Stabilization analysis pass failed")?;
        }

        let script_file = settings.script_file();
        if !script_file.exists() {
            compile(settings, &options)?.write(&script_file)?;
            debug!("Wrote {}", script_file.display());
        }
        Ok(())
    }

    /// Encode every remaining chunk, returning how many failed.
    fn encode_chunks(
        &self,
        settings: &mut EncodeSettings,
        analysis: &SegmentAnalysis,
        cancelled: &AtomicBool,
    ) -> anyhow::Result<usize> {
        let workers = usize::from(settings.parallelism.max(1));
        let single = workers == 1;
        let chunks = if single {
            analysis.left.clone()
        } else {
            SplitPlan::new(workers, analysis.frames_left()).split(&analysis.left)
        };
        info!(
            "Job {}: encoding {} frames in {} chunks with {} workers",
            settings.job_index,
            analysis.frames_left(),
            chunks.len(),
            workers
        );

        let base = AvisynthScript::read(&settings.script_file())?;
        let semaphore = Semaphore::new(workers);
        let processes = Mutex::new(Vec::new());
        let on_spawn = |pid: u32| {
            processes.lock().unwrap_or_else(PoisonError::into_inner).push(pid);
        };
        let job: &EncodeSettings = settings;

        let results = thread::scope(|s| -> anyhow::Result<Vec<(SegmentInfo, Result<(), ToolError>)>> {
            let mut handles = Vec::with_capacity(chunks.len());
            for &chunk in &chunks {
                let permit = semaphore.acquire();
                if cancelled.load(Ordering::Relaxed) {
                    break;
                }

                // A single worker runs the main script itself, one gap at a time
                let script_file = if single {
                    job.script_file()
                } else {
                    job.segment_script_file(chunk.start)
                };
                let script = segment_script(&base, chunk)?.write(&script_file)?;
                let output = job.fragment_file(chunk.start);
                let on_spawn = &on_spawn;
                let run = &self.options.run;

                handles.push(s.spawn(move || {
                    let _permit = permit;
                    debug!("Encoding chunk {} into {}", chunk, output.display());
                    let result = self.tools.encode_segment(&script, &output, job, run, on_spawn);
                    (chunk, result)
                }));
            }
            handles
                .into_iter()
                .map(|handle| handle.join().map_err(|_| anyhow::anyhow!("encoder thread panicked")))
                .collect()
        })?;

        settings.processes = processes.into_inner().unwrap_or_else(PoisonError::into_inner);

        let mut failures = 0;
        for (chunk, result) in results {
            match result {
                Ok(()) => debug!("Chunk {} done", chunk),
                Err(ToolError::Cancelled { .. }) => {
                    remove_partial_fragment(&settings.fragment_file(chunk.start));
                },
                Err(err) => {
                    error!("Chunk {} of job {} failed: {}", chunk, settings.job_index, err);
                    remove_partial_fragment(&settings.fragment_file(chunk.start));
                    failures += 1;
                },
            }
        }
        Ok(failures)
    }

    fn finish(&self, settings: &mut EncodeSettings, analysis: &SegmentAnalysis) -> anyhow::Result<PathBuf> {
        let concat_list = settings.concat_list_file();
        write_concat_list(&concat_list, &analysis.fragments)?;

        let output = settings.final_file();
        self.tools
            .mux(&concat_list, &output, settings)
            .with_context(|| format!("Failed to mux job {}", settings.job_index))?;
        info!("Job {} finished: {}", settings.job_index, output.display());

        settings.status = CompletionStatus::Success;
        settings.save()?;

        if !self.options.keep_intermediates {
            remove_intermediates(settings, &analysis.fragments);
            let settings_file = settings.settings_file();
            if let Err(err) = remove_file_with_retry(&settings_file) {
                warn!("Failed to remove {}: {}", settings_file.display(), err);
            }
        }
        Ok(output)
    }

    fn cancel(&self, settings: &mut EncodeSettings) -> anyhow::Result<EncodeReport> {
        info!("Job {} cancelled", settings.job_index);
        settings.status = CompletionStatus::Cancelled;
        settings.save()?;
        Ok(EncodeReport::Cancelled)
    }
}

/// Write an ffmpeg concat demuxer list of `fragments`.
#[inline]
pub fn write_concat_list(path: &Path, fragments: &[PathBuf]) -> anyhow::Result<()> {
    let mut contents = String::with_capacity(24 * fragments.len());
    for fragment in fragments {
        let fixed_path = fragment
            .display()
            .to_string()
            .replace('\\', r"\\")
            .replace(' ', r"\ ")
            .replace('\'', r"\'");
        contents.push_str("file ");
        contents.push_str(&fixed_path);
        contents.push('\n');
    }
    fs::write(path, contents).with_context(|| format!("Failed to write concat list {}", path.display()))
}

fn remove_partial_fragment(path: &Path) {
    if let Err(err) = remove_file_with_retry(path) {
        warn!("Failed to remove partial fragment {}: {}", path.display(), err);
    }
}

/// Remove every intermediate file of a job. The settings file and the final
/// output stay.
#[inline]
pub fn remove_intermediates(settings: &EncodeSettings, fragments: &[PathBuf]) {
    let mut files = vec![
        settings.script_file(),
        settings.deshaker_script_file(),
        settings.deshaker_log_file(),
        settings.frame_count_script_file(),
        settings.frame_count_file(),
        settings.concat_list_file(),
    ];
    files.extend(fragments.iter().cloned());
    files.extend(segment_scripts(settings));

    for file in files {
        if let Err(err) = remove_file_with_retry(&file) {
            warn!("Failed to remove {}: {}", file.display(), err);
        }
    }
}

fn segment_scripts(settings: &EncodeSettings) -> Vec<PathBuf> {
    let prefix = format!("Job{}_Script_", settings.job_index);
    fs::read_dir(&settings.temp_directory)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| {
                    path.file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.starts_with(&prefix) && name.ends_with(".avs"))
                })
                .collect()
        })
        .unwrap_or_default()
}
