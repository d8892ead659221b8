use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

use anyhow::{Context, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::{
    avs::script_builder::script::AvisynthScript,
    compiler::{frame_count_script, reset_segment_trim},
    error::ToolError,
    segments::{Fragment, SegmentAnalysis, compute_segments},
    settings::{EncodeSettings, FragmentName},
    tools::FrameProbe,
    util::retry::remove_file_with_retry,
};

/// Discovers which parts of a job are already encoded by probing the
/// fragments left in its working directory.
pub struct SegmentScanner<'a, P> {
    probe: &'a P,
}

/// Fragment files found in the working directory before probing.
#[derive(Debug, Default)]
struct Listing {
    candidates: Vec<(PathBuf, usize)>,
    corrupt:    Vec<PathBuf>,
}

impl<'a, P: FrameProbe> SegmentScanner<'a, P> {
    #[inline]
    pub fn new(probe: &'a P) -> Self {
        Self {
            probe,
        }
    }

    /// Lay the job's valid fragments over the source. Invalid fragments are
    /// deleted. Cancellation or an unknown frame count yield an empty
    /// analysis.
    #[inline]
    #[instrument(level = "debug", skip_all, fields(job = settings.job_index))]
    pub fn analyze(
        &self,
        settings: &EncodeSettings,
        cancelled: &AtomicBool,
    ) -> anyhow::Result<SegmentAnalysis> {
        let probe_script = prepare_probe_script(settings)?;
        let side_file = settings.frame_count_file();

        // Fragment probes run alongside the total probe, not after it
        let probe = self.probe;
        let (total, listing, measured) = thread::scope(|s| {
            let total = s.spawn(|| probe.script_frame_count(&probe_script, &side_file));
            let listing = list_fragments(settings)?;
            let handles: Vec<_> = listing
                .candidates
                .iter()
                .map(|(path, _)| {
                    let path = path.clone();
                    s.spawn(move || probe.media_frame_count(&path))
                })
                .collect();

            let total = total.join().map_err(|_| anyhow!("total frame probe panicked"))?;
            let measured = handles
                .into_iter()
                .map(|handle| handle.join().map_err(|_| anyhow!("fragment frame probe panicked")))
                .collect::<anyhow::Result<Vec<_>>>()?;
            anyhow::Ok((total, listing, measured))
        })?;

        let total_frames = match total {
            Ok(frames) => frames,
            Err(err @ (ToolError::NotFound { .. } | ToolError::Launch { .. })) => {
                return Err(err).context("Failed to probe the script frame count");
            },
            Err(err) => {
                warn!("Script frame count unavailable: {}", err);
                0
            },
        };
        if total_frames == 0 {
            warn!("Source of job {} reports no frames", settings.job_index);
            return Ok(SegmentAnalysis::default());
        }
        if cancelled.load(Ordering::Relaxed) {
            debug!("Analysis of job {} cancelled", settings.job_index);
            return Ok(SegmentAnalysis::default());
        }

        for path in &listing.corrupt {
            info!("Deleting corrupt fragment {}", path.display());
            remove_file_with_retry(path)
                .with_context(|| format!("Failed to delete corrupt fragment {}", path.display()))?;
        }

        let fragments = measured_fragments(listing.candidates, measured)?;
        let layout = compute_segments(fragments, total_frames);
        for fragment in &layout.rejected {
            info!(
                "Deleting fragment {} ({} frames from {})",
                fragment.path.display(),
                fragment.frames,
                fragment.start
            );
            remove_file_with_retry(&fragment.path).with_context(|| {
                format!("Failed to delete invalid fragment {}", fragment.path.display())
            })?;
        }

        let analysis = SegmentAnalysis {
            total_frames,
            done: layout.done,
            left: layout.left,
            fragments: layout.accepted.into_iter().map(|fragment| fragment.path).collect(),
        };
        debug!(
            "Job {}: {} of {} frames done, {} segments left",
            settings.job_index,
            analysis.frames_done(),
            total_frames,
            analysis.left.len()
        );
        Ok(analysis)
    }
}

/// Pair candidates with their probed frame counts. Unreadable fragments count
/// as empty.
fn measured_fragments(
    candidates: Vec<(PathBuf, usize)>,
    measured: Vec<Result<usize, ToolError>>,
) -> anyhow::Result<Vec<Fragment>> {
    candidates
        .into_iter()
        .zip(measured)
        .map(|((path, start), frames)| {
            let frames = match frames {
                Ok(frames) => frames,
                Err(err @ (ToolError::NotFound { .. } | ToolError::Launch { .. })) => {
                    return Err(err).context("Failed to probe fragment frame count");
                },
                Err(err) => {
                    warn!("Fragment {} unreadable: {}", path.display(), err);
                    0
                },
            };
            Ok(Fragment {
                path,
                start,
                frames,
            })
        })
        .collect()
}

/// Strip segment markers from the main script and write the frame count
/// probe next to it.
fn prepare_probe_script(settings: &EncodeSettings) -> anyhow::Result<PathBuf> {
    let script_file = settings.script_file();
    let mut script = AvisynthScript::read(&script_file)
        .with_context(|| format!("Job {} has no compiled script", settings.job_index))?;
    if reset_segment_trim(&mut script) > 0 {
        script.write(&script_file)?;
    }

    let probe_script = settings.frame_count_script_file();
    frame_count_script(&script_file, &settings.frame_count_file()).write(&probe_script)?;
    Ok(probe_script)
}

fn list_fragments(settings: &EncodeSettings) -> anyhow::Result<Listing> {
    let mut listing = Listing::default();
    let entries = fs::read_dir(&settings.temp_directory).with_context(|| {
        format!("Failed to list job directory {}", settings.temp_directory.display())
    })?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        match settings.parse_fragment_name(name) {
            FragmentName::Foreign => (),
            FragmentName::Malformed => listing.corrupt.push(path),
            FragmentName::Start(start) => {
                if is_empty_file(&path) {
                    listing.corrupt.push(path);
                } else {
                    listing.candidates.push((path, start));
                }
            },
        }
    }

    Ok(listing)
}

fn is_empty_file(path: &Path) -> bool {
    fs::metadata(path).map_or(true, |metadata| metadata.len() == 0)
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Mutex, atomic::AtomicUsize},
        time::Duration,
    };

    use crossbeam_channel::{Receiver, Sender, unbounded};
    use tempfile::TempDir;

    use super::*;
    use crate::{
        avs::script_builder::script::Line,
        segments::SegmentInfo,
    };

    /// Reports the number written inside each fragment file as its frame
    /// count.
    struct FakeProbe {
        total:   Result<usize, ()>,
        missing: bool,
        probes:  AtomicUsize,
        /// When set, the total probe only answers once a fragment probe started
        gate:    Option<(Sender<()>, Receiver<()>)>,
        events:  Mutex<Vec<&'static str>>,
    }

    impl FakeProbe {
        fn new(total: usize) -> Self {
            Self {
                total:   Ok(total),
                missing: false,
                probes:  AtomicUsize::new(0),
                gate:    None,
                events:  Mutex::new(vec![]),
            }
        }
    }

    impl FrameProbe for FakeProbe {
        fn script_frame_count(&self, probe_script: &Path, _side_file: &Path) -> Result<usize, ToolError> {
            assert!(probe_script.exists());
            if let Some((_, started)) = &self.gate {
                let _ = started.recv_timeout(Duration::from_secs(5));
            }
            self.events.lock().unwrap().push("total_done");
            if self.missing {
                return Err(ToolError::NotFound {
                    tool: "avs2pipemod".to_owned(),
                });
            }
            self.total.map_err(|()| ToolError::Timeout {
                tool:    "avs2pipemod".to_owned(),
                timeout: std::time::Duration::from_secs(1),
            })
        }

        fn media_frame_count(&self, media: &Path) -> Result<usize, ToolError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.events.lock().unwrap().push("fragment_start");
            if let Some((started, _)) = &self.gate {
                let _ = started.send(());
            }
            let contents = fs::read_to_string(media).map_err(|source| ToolError::Output {
                tool: "ffprobe".to_owned(),
                source,
            })?;
            Ok(contents.trim().parse().unwrap_or(0))
        }
    }

    fn job(dir: &TempDir) -> EncodeSettings {
        let settings = EncodeSettings::new(Path::new("/media/clip.mkv"), dir.path(), 2);
        let mut script = AvisynthScript::new();
        script
            .add_line(Line::term("LWLibavVideoSource(\"/media/clip.mkv\", cache=false)"))
            .add_line(Line::TermWithComment("Trim(300, 499)".to_owned(), "segment".to_owned()))
            .add_line(Line::term("Prefetch(4)"));
        script.write(&settings.script_file()).unwrap();
        settings
    }

    fn write_fragment(settings: &EncodeSettings, start: usize, frames: usize) -> PathBuf {
        let path = settings.fragment_file(start);
        fs::write(&path, frames.to_string()).unwrap();
        path
    }

    fn not_cancelled() -> AtomicBool {
        AtomicBool::new(false)
    }

    #[test]
    fn resumes_around_existing_fragments() {
        let dir = TempDir::new().unwrap();
        let settings = job(&dir);
        write_fragment(&settings, 0, 300);
        write_fragment(&settings, 500, 200);

        let probe = FakeProbe::new(1000);
        let analysis = SegmentScanner::new(&probe).analyze(&settings, &not_cancelled()).unwrap();

        assert_eq!(analysis.total_frames, 1000);
        assert_eq!(analysis.done, vec![SegmentInfo::new(0, 299), SegmentInfo::new(500, 699)]);
        assert_eq!(analysis.left, vec![SegmentInfo::new(300, 499), SegmentInfo::new(700, 999)]);
        assert_eq!(analysis.fragments, vec![settings.fragment_file(0), settings.fragment_file(500)]);
        assert_eq!(probe.probes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn segment_markers_are_cleared() {
        let dir = TempDir::new().unwrap();
        let settings = job(&dir);

        let probe = FakeProbe::new(100);
        SegmentScanner::new(&probe).analyze(&settings, &not_cancelled()).unwrap();

        let script = fs::read_to_string(settings.script_file()).unwrap();
        assert!(!script.contains("Trim(300, 499)"));
        assert!(script.contains("Prefetch(4)"));
        let probe_script = fs::read_to_string(settings.frame_count_script_file()).unwrap();
        assert!(probe_script.contains("WriteFileStart("));
    }

    #[test]
    fn corrupt_fragments_are_deleted() {
        let dir = TempDir::new().unwrap();
        let settings = job(&dir);
        let valid = write_fragment(&settings, 0, 100);
        let malformed = dir.path().join("Job2_Output_abc.mkv");
        fs::write(&malformed, "50").unwrap();
        let empty = settings.fragment_file(100);
        fs::write(&empty, "").unwrap();
        let no_frames = write_fragment(&settings, 200, 0);
        let overlapping = write_fragment(&settings, 50, 100);
        let beyond = write_fragment(&settings, 5000, 10);
        let foreign = dir.path().join("Job3_Output_0.mkv");
        fs::write(&foreign, "10").unwrap();

        let probe = FakeProbe::new(400);
        let analysis = SegmentScanner::new(&probe).analyze(&settings, &not_cancelled()).unwrap();

        assert_eq!(analysis.done, vec![SegmentInfo::new(0, 99)]);
        assert_eq!(analysis.left, vec![SegmentInfo::new(100, 399)]);
        assert!(valid.exists());
        assert!(foreign.exists());
        for deleted in [malformed, empty, no_frames, overlapping, beyond] {
            assert!(!deleted.exists(), "{} survived", deleted.display());
        }
    }

    #[test]
    fn unknown_total_leaves_fragments_alone() {
        let dir = TempDir::new().unwrap();
        let settings = job(&dir);
        let malformed = dir.path().join("Job2_Output_x.mkv");
        fs::write(&malformed, "1").unwrap();

        let probe = FakeProbe {
            total: Err(()),
            ..FakeProbe::new(0)
        };
        let analysis = SegmentScanner::new(&probe).analyze(&settings, &not_cancelled()).unwrap();

        assert_eq!(analysis, SegmentAnalysis::default());
        assert!(!analysis.is_complete());
        assert!(malformed.exists());
    }

    #[test]
    fn cancellation_discards_results() {
        let dir = TempDir::new().unwrap();
        let settings = job(&dir);
        write_fragment(&settings, 0, 300);
        let empty = settings.fragment_file(300);
        fs::write(&empty, "").unwrap();

        let probe = FakeProbe::new(1000);
        let analysis = SegmentScanner::new(&probe).analyze(&settings, &AtomicBool::new(true)).unwrap();

        assert_eq!(analysis, SegmentAnalysis::default());
        assert!(empty.exists());
        assert!(settings.fragment_file(0).exists());
    }

    #[test]
    fn fragment_counts_overlap_the_total_count() {
        let dir = TempDir::new().unwrap();
        let settings = job(&dir);
        write_fragment(&settings, 0, 300);

        let probe = FakeProbe {
            gate: Some(unbounded()),
            ..FakeProbe::new(1000)
        };
        let analysis = SegmentScanner::new(&probe).analyze(&settings, &not_cancelled()).unwrap();

        assert_eq!(analysis.done, vec![SegmentInfo::new(0, 299)]);
        assert_eq!(*probe.events.lock().unwrap(), vec!["fragment_start", "total_done"]);
    }

    #[test]
    fn missing_engine_is_an_error() {
        let dir = TempDir::new().unwrap();
        let settings = job(&dir);

        let probe = FakeProbe {
            missing: true,
            ..FakeProbe::new(0)
        };
        assert!(SegmentScanner::new(&probe).analyze(&settings, &not_cancelled()).is_err());
    }

    #[test]
    fn missing_script_is_an_error() {
        let dir = TempDir::new().unwrap();
        let settings = EncodeSettings::new(Path::new("/media/clip.mkv"), dir.path(), 9);

        let probe = FakeProbe::new(100);
        assert!(SegmentScanner::new(&probe).analyze(&settings, &not_cancelled()).is_err());
    }
}
