use std::{
    io::{self, Read},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::bounded;
use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};
use tracing::{debug, instrument, warn};

use crate::{
    error::ToolError,
    settings::{AudioAction, EncodeSettings},
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, IntoStaticStr)]
pub enum ProcessPriority {
    #[default]
    Normal,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunOptions {
    /// Kill the process once it runs longer than this.
    pub timeout:  Option<Duration>,
    pub priority: ProcessPriority,
    /// Let the process show its own console output.
    pub display:  bool,
}

/// Runs the filter engine on scripts.
pub trait ScriptRunner: Sync {
    /// Run a script to its end without keeping the frames.
    fn run_script(&self, script: &Path, options: &RunOptions) -> Result<(), ToolError>;

    /// Encode the frames of a script into `output`. Every process launched on
    /// the way is reported to `on_spawn`.
    fn encode_segment(
        &self,
        script: &Path,
        output: &Path,
        settings: &EncodeSettings,
        options: &RunOptions,
        on_spawn: &(dyn Fn(u32) + Sync),
    ) -> Result<(), ToolError>;
}

/// Measures frame counts.
pub trait FrameProbe: Sync {
    /// Frame count of a script through a probe script writing a side file.
    fn script_frame_count(&self, probe_script: &Path, side_file: &Path) -> Result<usize, ToolError>;

    /// Frame count of an encoded media file.
    fn media_frame_count(&self, media: &Path) -> Result<usize, ToolError>;
}

/// Joins encoded fragments with the source audio into the final file.
pub trait Muxer: Sync {
    fn mux(&self, concat_list: &Path, output: &Path, settings: &EncodeSettings) -> Result<(), ToolError>;
}

/// Locations of the external binaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPaths {
    /// Runs AviSynth scripts and writes y4m to stdout.
    pub avs_pipe: PathBuf,
    pub ffmpeg:   PathBuf,
    pub ffprobe:  PathBuf,
}

impl Default for ToolPaths {
    #[inline]
    fn default() -> Self {
        Self {
            avs_pipe: PathBuf::from("avs2pipemod"),
            ffmpeg:   PathBuf::from("ffmpeg"),
            ffprobe:  PathBuf::from("ffprobe"),
        }
    }
}

/// Process backed implementation of the engine, probe and mux interfaces.
#[derive(Debug, Clone)]
pub struct ExternalTools {
    paths:         ToolPaths,
    cancelled:     Arc<AtomicBool>,
    probe_timeout: Duration,
}

impl ExternalTools {
    #[inline]
    pub fn new(paths: ToolPaths, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            paths,
            cancelled,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    #[inline]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Check every binary can be found.
    #[inline]
    pub fn verify(&self) -> Result<(), ToolError> {
        for tool in [&self.paths.avs_pipe, &self.paths.ffmpeg, &self.paths.ffprobe] {
            resolve(tool)?;
        }
        Ok(())
    }

    fn command(&self, program: &Path, options: &RunOptions) -> Result<Command, ToolError> {
        let program = resolve(program)?;
        let mut command = platform::command(&program, options.priority, options.display);
        command.stdin(Stdio::null());
        command.stdout(Stdio::null());
        command.stderr(if options.display { Stdio::inherit() } else { Stdio::piped() });
        Ok(command)
    }

    fn spawn(&self, tool: &str, command: &mut Command) -> Result<Child, ToolError> {
        let child = command.spawn().map_err(|source| ToolError::Launch {
            tool: tool.to_owned(),
            source,
        })?;
        debug!("Launched {} as process {}", tool, child.id());
        Ok(child)
    }

    /// Wait for `child`, killing it on timeout or cancellation.
    fn wait(
        &self,
        tool: &str,
        child: &mut Child,
        timeout: Option<Duration>,
    ) -> Result<ExitStatus, ToolError> {
        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => (),
                Err(source) => {
                    return Err(ToolError::Output {
                        tool: tool.to_owned(),
                        source,
                    });
                },
            }

            if self.cancelled.load(Ordering::Relaxed) {
                kill(tool, child);
                return Err(ToolError::Cancelled {
                    tool: tool.to_owned(),
                });
            }
            if let Some(timeout) = timeout.filter(|timeout| started.elapsed() > *timeout) {
                kill(tool, child);
                return Err(ToolError::Timeout {
                    tool: tool.to_owned(),
                    timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn resolve(tool: &Path) -> Result<PathBuf, ToolError> {
    which::which(tool).map_err(|_| ToolError::NotFound {
        tool: tool.display().to_string(),
    })
}

fn kill(tool: &str, child: &mut Child) {
    if let Err(err) = child.kill() {
        warn!("Failed to kill {} (process {}): {}", tool, child.id(), err);
    }
    // Reap so the process does not linger as a zombie
    if let Err(err) = child.wait() {
        warn!("Failed to reap {} (process {}): {}", tool, child.id(), err);
    }
}

fn capture_stderr(child: &mut Child) -> Option<JoinHandle<String>> {
    let mut stderr = child.stderr.take()?;
    Some(thread::spawn(move || {
        let mut output = String::new();
        if let Err(err) = stderr.read_to_string(&mut output) {
            debug!("Incomplete stderr capture: {}", err);
        }
        output
    }))
}

fn collect_stderr(capture: Option<JoinHandle<String>>) -> String {
    capture.and_then(|handle| handle.join().ok()).unwrap_or_default().trim().to_owned()
}

fn check_status(tool: &str, status: ExitStatus, stderr: String) -> Result<(), ToolError> {
    if status.success() {
        Ok(())
    } else {
        Err(ToolError::Failed {
            tool: tool.to_owned(),
            status,
            stderr,
        })
    }
}

/// Frame count from a `<framerate>,<framecount>` side file. Malformed content
/// counts as no frames.
#[inline]
pub fn parse_frame_count(contents: &str) -> usize {
    contents
        .trim()
        .rsplit(',')
        .next()
        .and_then(|field| field.trim().parse().ok())
        .unwrap_or(0)
}

/// ffmpeg arguments encoding y4m from stdin with the job's codec settings.
#[inline]
pub fn encoder_arguments(settings: &EncodeSettings) -> Vec<String> {
    let encode = &settings.encode;
    let mut arguments = ["-hide_banner", "-loglevel", "error", "-y", "-f", "yuv4mpegpipe", "-i", "-"]
        .map(String::from)
        .to_vec();
    arguments.extend([
        "-c:v".to_owned(),
        encode.codec.ffmpeg_encoder().to_owned(),
        "-crf".to_owned(),
        encode.quality.to_string(),
        "-preset".to_owned(),
        encode.preset.clone(),
        "-an".to_owned(),
    ]);
    arguments
}

/// ffmpeg arguments adding the source audio to the concatenated video.
#[inline]
pub fn audio_arguments(settings: &EncodeSettings) -> Vec<String> {
    if settings.encode.audio == AudioAction::Discard {
        return ["-map", "0:v", "-an"].map(String::from).to_vec();
    }

    let mut arguments = vec![];
    // Audio has to follow the trim applied to the video
    if settings.source.frame_rate.is_some_and(|fps| fps > 0.0) {
        if let Some(start) = settings.trim.start {
            arguments.extend(["-ss".to_owned(), start.to_string()]);
        }
        if let Some(end) = settings.trim.end {
            arguments.extend(["-to".to_owned(), end.to_string()]);
        }
    }
    arguments.extend(["-i".to_owned(), settings.file_name.display().to_string()]);
    arguments.extend(["-map", "0:v", "-map", "1:a?"].map(String::from));

    let speed = settings.change_speed.filter(|speed| *speed > 0.0 && (speed - 1.0).abs() > f64::EPSILON);
    let codec = match (settings.encode.audio, speed) {
        (AudioAction::Copy, None) => "copy",
        (AudioAction::Opus, _) => "libopus",
        _ => "aac",
    };
    arguments.extend(["-c:a".to_owned(), codec.to_owned()]);
    if let Some(speed) = speed {
        arguments.extend(["-filter:a".to_owned(), format!("atempo={}", speed)]);
    }
    arguments
}

impl ScriptRunner for ExternalTools {
    #[inline]
    fn run_script(&self, script: &Path, options: &RunOptions) -> Result<(), ToolError> {
        let tool = self.paths.avs_pipe.display().to_string();
        let mut command = self.command(&self.paths.avs_pipe, options)?;
        command.arg("-benchmark").arg(script);

        let mut child = self.spawn(&tool, &mut command)?;
        let stderr = capture_stderr(&mut child);
        let status = self.wait(&tool, &mut child, options.timeout)?;
        check_status(&tool, status, collect_stderr(stderr))
    }

    #[inline]
    #[instrument(level = "debug", skip_all, fields(output = %output.display()))]
    fn encode_segment(
        &self,
        script: &Path,
        output: &Path,
        settings: &EncodeSettings,
        options: &RunOptions,
        on_spawn: &(dyn Fn(u32) + Sync),
    ) -> Result<(), ToolError> {
        let source_tool = self.paths.avs_pipe.display().to_string();
        let encoder_tool = self.paths.ffmpeg.display().to_string();

        let mut source_command = self.command(&self.paths.avs_pipe, options)?;
        source_command.arg("-y4mp").arg(script).stdout(Stdio::piped());
        let mut encoder_command = self.command(&self.paths.ffmpeg, options)?;
        encoder_command.args(encoder_arguments(settings)).arg(output);

        let mut source = self.spawn(&source_tool, &mut source_command)?;
        on_spawn(source.id());
        let Some(frames) = source.stdout.take() else {
            kill(&source_tool, &mut source);
            return Err(ToolError::Output {
                tool:   source_tool,
                source: io::Error::other("frame pipe was not opened"),
            });
        };
        encoder_command.stdin(Stdio::from(frames));

        let mut encoder = match self.spawn(&encoder_tool, &mut encoder_command) {
            Ok(encoder) => encoder,
            Err(err) => {
                kill(&source_tool, &mut source);
                return Err(err);
            },
        };
        on_spawn(encoder.id());

        let source_stderr = capture_stderr(&mut source);
        let encoder_stderr = capture_stderr(&mut encoder);

        let encoder_status = match self.wait(&encoder_tool, &mut encoder, options.timeout) {
            Ok(status) => status,
            Err(err) => {
                kill(&source_tool, &mut source);
                return Err(err);
            },
        };
        let source_status = self.wait(&source_tool, &mut source, options.timeout)?;

        check_status(&source_tool, source_status, collect_stderr(source_stderr))?;
        check_status(&encoder_tool, encoder_status, collect_stderr(encoder_stderr))
    }
}

impl FrameProbe for ExternalTools {
    #[inline]
    fn script_frame_count(&self, probe_script: &Path, side_file: &Path) -> Result<usize, ToolError> {
        if let Err(err) = std::fs::remove_file(side_file) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove stale {}: {}", side_file.display(), err);
            }
        }

        self.run_script(probe_script, &RunOptions {
            timeout: Some(self.probe_timeout),
            ..RunOptions::default()
        })?;

        match std::fs::read_to_string(side_file) {
            Ok(contents) => Ok(parse_frame_count(&contents)),
            Err(err) => {
                warn!("Frame count side file {} unreadable: {}", side_file.display(), err);
                Ok(0)
            },
        }
    }

    #[inline]
    fn media_frame_count(&self, media: &Path) -> Result<usize, ToolError> {
        let tool = self.paths.ffprobe.display().to_string();
        let mut command = self.command(&self.paths.ffprobe, &RunOptions::default())?;
        command
            .args(["-v", "error", "-select_streams", "v:0", "-count_packets"])
            .args(["-show_entries", "stream=nb_read_packets", "-of", "csv=p=0"])
            .arg(media)
            .stdout(Stdio::piped());

        let output = command.output().map_err(|source| ToolError::Launch {
            tool: tool.clone(),
            source,
        })?;
        check_status(&tool, output.status, String::from_utf8_lossy(&output.stderr).trim().to_owned())?;

        Ok(parse_frame_count(&String::from_utf8_lossy(&output.stdout)))
    }
}

impl Muxer for ExternalTools {
    #[inline]
    #[instrument(level = "debug", skip_all, fields(output = %output.display()))]
    fn mux(&self, concat_list: &Path, output: &Path, settings: &EncodeSettings) -> Result<(), ToolError> {
        let tool = self.paths.ffmpeg.display().to_string();
        let mut command = self.command(&self.paths.ffmpeg, &RunOptions::default())?;
        command.args(["-y", "-hide_banner", "-loglevel", "error", "-f", "concat", "-safe", "0", "-i"]);
        command.arg(concat_list);
        command.args(audio_arguments(settings));
        command.args(["-c:v", "copy"]);
        command.arg(output);

        let mut child = self.spawn(&tool, &mut command)?;
        let stderr = capture_stderr(&mut child);
        let status = self.wait(&tool, &mut child, None)?;
        check_status(&tool, status, collect_stderr(stderr))
    }
}

/// Whether `script` runs successfully within `timeout`. Timeouts and failures
/// both mean the capability is absent.
#[inline]
pub fn probe_capability<R>(runner: Arc<R>, script: PathBuf, timeout: Duration) -> bool
where
    R: ScriptRunner + Send + 'static,
{
    let (sender, receiver) = bounded(1);
    let spawned = thread::Builder::new().name("capability-probe".to_owned()).spawn(move || {
        let options = RunOptions {
            timeout: Some(timeout.saturating_mul(2)),
            ..RunOptions::default()
        };
        // Nobody listens anymore once the probe timed out
        let _ = sender.send(runner.run_script(&script, &options));
    });
    if let Err(err) = spawned {
        warn!("Failed to start capability probe: {}", err);
        return false;
    }

    match receiver.recv_timeout(timeout) {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            debug!("Capability probe failed: {}", err);
            false
        },
        Err(_) => {
            warn!("Capability probe did not answer within {:?}", timeout);
            false
        },
    }
}

#[cfg(not(target_os = "windows"))]
mod platform {
    use std::{path::Path, process::Command};

    use super::ProcessPriority;

    pub fn command(program: &Path, priority: ProcessPriority, _display: bool) -> Command {
        match priority {
            ProcessPriority::Normal => Command::new(program),
            ProcessPriority::Low => {
                let mut command = Command::new("nice");
                command.args(["-n", "10"]).arg(program);
                command
            },
        }
    }
}

#[cfg(target_os = "windows")]
mod platform {
    use std::{os::windows::process::CommandExt, path::Path, process::Command};

    use windows_sys::Win32::System::Threading::{BELOW_NORMAL_PRIORITY_CLASS, CREATE_NO_WINDOW};

    use super::ProcessPriority;

    pub fn command(program: &Path, priority: ProcessPriority, display: bool) -> Command {
        let mut command = Command::new(program);
        let mut flags = 0;
        if priority == ProcessPriority::Low {
            flags |= BELOW_NORMAL_PRIORITY_CLASS;
        }
        if !display {
            flags |= CREATE_NO_WINDOW;
        }
        command.creation_flags(flags);
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{Container, TrimRange};

    struct FakeRunner {
        delay:   Duration,
        succeed: bool,
    }

    impl ScriptRunner for FakeRunner {
        fn run_script(&self, _script: &Path, _options: &RunOptions) -> Result<(), ToolError> {
            thread::sleep(self.delay);
            if self.succeed {
                Ok(())
            } else {
                Err(ToolError::NotFound {
                    tool: "fake".to_owned(),
                })
            }
        }

        fn encode_segment(
            &self,
            _script: &Path,
            _output: &Path,
            _settings: &EncodeSettings,
            _options: &RunOptions,
            _on_spawn: &(dyn Fn(u32) + Sync),
        ) -> Result<(), ToolError> {
            unreachable!("capability probes never encode")
        }
    }

    fn probe(delay: Duration, succeed: bool) -> bool {
        let runner = Arc::new(FakeRunner {
            delay,
            succeed,
        });
        probe_capability(runner, PathBuf::from("gpu.avs"), Duration::from_millis(500))
    }

    #[test]
    fn capability_probe_outcomes() {
        assert!(probe(Duration::ZERO, true));
        assert!(!probe(Duration::ZERO, false));
        assert!(!probe(Duration::from_secs(3), true));
    }

    #[test]
    fn side_file_parsing() {
        assert_eq!(parse_frame_count("29.970030,1000\n"), 1000);
        assert_eq!(parse_frame_count("25,42"), 42);
        assert_eq!(parse_frame_count("517\n"), 517);
        assert_eq!(parse_frame_count("25,"), 0);
        assert_eq!(parse_frame_count("garbage"), 0);
        assert_eq!(parse_frame_count(""), 0);
        assert_eq!(parse_frame_count("25,-3"), 0);
    }

    #[test]
    fn audio_follows_trim_and_speed() {
        let mut settings = EncodeSettings::new(Path::new("/media/clip.mkv"), Path::new("/jobs"), 1);
        assert_eq!(audio_arguments(&settings), vec![
            "-i", "/media/clip.mkv", "-map", "0:v", "-map", "1:a?", "-c:a", "copy"
        ]);

        settings.source.frame_rate = Some(25.0);
        settings.trim = TrimRange {
            start: Some(1.5),
            end:   Some(12.0),
        };
        settings.change_speed = Some(1.04);
        assert_eq!(audio_arguments(&settings), vec![
            "-ss", "1.5", "-to", "12", "-i", "/media/clip.mkv", "-map", "0:v", "-map", "1:a?", "-c:a", "aac",
            "-filter:a", "atempo=1.04"
        ]);

        settings.encode.audio = AudioAction::Discard;
        assert_eq!(audio_arguments(&settings), vec!["-map", "0:v", "-an"]);
    }

    #[test]
    fn encoder_arguments_follow_codec() {
        let mut settings = EncodeSettings::new(Path::new("/media/clip.mkv"), Path::new("/jobs"), 1);
        settings.encode.container = Container::Mp4;
        let arguments = encoder_arguments(&settings);
        assert!(arguments.windows(2).any(|pair| pair == ["-c:v", "libx264"]));
        assert!(arguments.windows(2).any(|pair| pair == ["-crf", "20"]));
        assert!(arguments.windows(2).any(|pair| pair == ["-i", "-"]));
    }

    #[test]
    fn missing_tool_is_reported() {
        let tools = ExternalTools::new(
            ToolPaths {
                avs_pipe: PathBuf::from("/nonexistent/avs2pipemod"),
                ..ToolPaths::default()
            },
            Arc::new(AtomicBool::new(false)),
        );
        let err = tools.run_script(Path::new("script.avs"), &RunOptions::default()).unwrap_err();
        assert!(matches!(err, ToolError::NotFound { tool } if tool == "/nonexistent/avs2pipemod"));
    }

    #[cfg(unix)]
    #[test]
    fn slow_process_is_killed_on_timeout() {
        let tools = ExternalTools::new(ToolPaths::default(), Arc::new(AtomicBool::new(false)));
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let started = Instant::now();
        let err = tools.wait("sleep", &mut child, Some(Duration::from_millis(100))).unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn cancellation_stops_process() {
        let cancelled = Arc::new(AtomicBool::new(true));
        let tools = ExternalTools::new(ToolPaths::default(), cancelled);
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let err = tools.wait("sleep", &mut child, None).unwrap_err();
        assert!(matches!(err, ToolError::Cancelled { .. }));
    }
}
