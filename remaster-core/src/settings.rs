use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use tracing::{debug, warn};

use crate::error::SettingsError;

/// One encode request: the source file, the transformations to apply and the
/// job control state the coordinator mutates while encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeSettings {
    pub file_name:      PathBuf,
    /// Per-job working directory holding scripts, fragments and the settings
    /// file.
    pub temp_directory: PathBuf,
    pub job_index:      usize,

    #[serde(default)]
    pub source: SourceInfo,

    #[serde(default)]
    pub crop_source:      Option<CropRect>,
    #[serde(default)]
    pub crop_after:       Option<CropRect>,
    #[serde(default)]
    pub output_width:     Option<u32>,
    #[serde(default)]
    pub output_height:    Option<u32>,
    /// Number of doubling passes. 0 = none, 1 = double, 2 = quadruple.
    #[serde(default)]
    pub upscale_factor:   u8,
    #[serde(default)]
    pub upscale_method:   UpscaleMethod,
    /// Quality boost variant of the upscaler.
    #[serde(default)]
    pub super_res:        Option<SuperResOptions>,
    #[serde(default)]
    pub downscale_method: DownscaleMethod,

    #[serde(default)]
    pub denoise:       Option<DenoiseOptions>,
    #[serde(default)]
    pub dering:        bool,
    #[serde(default)]
    pub degrain:       Option<DegrainOptions>,
    #[serde(default)]
    pub deshaker:      Option<DeshakerOptions>,
    #[serde(default)]
    pub interpolation: Option<FrameRateMode>,
    #[serde(default)]
    pub trim:          TrimRange,
    #[serde(default)]
    pub change_speed:  Option<f64>,

    #[serde(default)]
    pub encode: EncodeOptions,

    /// First frame that still has to be encoded.
    #[serde(default)]
    pub resume_position: usize,
    #[serde(default = "default_parallelism")]
    pub parallelism:     u8,
    #[serde(default)]
    pub status:          CompletionStatus,
    /// Ids of the external processes launched for this job.
    #[serde(skip)]
    pub processes:       Vec<u32>,
}

fn default_parallelism() -> u8 {
    1
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceInfo {
    pub width:            Option<u32>,
    pub height:           Option<u32>,
    pub aspect_ratio:     Option<f64>,
    pub frame_rate:       Option<f64>,
    #[serde(default)]
    pub color_matrix:     ColorMatrix,
    #[serde(default)]
    pub chroma_placement: ChromaPlacement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CropRect {
    pub left:   u32,
    pub top:    u32,
    pub right:  u32,
    pub bottom: u32,
}

impl CropRect {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.left == 0 && self.top == 0 && self.right == 0 && self.bottom == 0
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
    IntoStaticStr,
)]
pub enum ColorMatrix {
    #[strum(serialize = "Rec601")]
    Rec601,
    #[strum(serialize = "Pc601")]
    Pc601,
    #[default]
    #[strum(serialize = "Rec709")]
    Rec709,
    #[strum(serialize = "Pc709")]
    Pc709,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
    IntoStaticStr,
)]
pub enum ChromaPlacement {
    #[strum(serialize = "MPEG1")]
    Mpeg1,
    #[default]
    #[strum(serialize = "MPEG2")]
    Mpeg2,
    #[strum(serialize = "DV")]
    Dv,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
    IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum UpscaleMethod {
    #[default]
    Nnedi3,
    SuperXbr,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
    IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum DownscaleMethod {
    Bicubic,
    #[default]
    Spline36,
    Lanczos,
    SSim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperResOptions {
    pub passes:   u8,
    /// 0-100
    pub strength: u8,
    /// 0-100
    pub softness: u8,
}

impl Default for SuperResOptions {
    #[inline]
    fn default() -> Self {
        Self {
            passes:   2,
            strength: 43,
            softness: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenoiseOptions {
    pub strength:        u8,
    pub temporal_radius: u8,
    pub spatial_radius:  u8,
}

impl Default for DenoiseOptions {
    #[inline]
    fn default() -> Self {
        Self {
            strength:        2,
            temporal_radius: 1,
            spatial_radius:  2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegrainOptions {
    pub strength:  u32,
    pub prefilter: DegrainPrefilter,
}

impl Default for DegrainOptions {
    #[inline]
    fn default() -> Self {
        Self {
            strength:  300,
            prefilter: DegrainPrefilter::None,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
    IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum DegrainPrefilter {
    #[default]
    None,
    Gaussian,
    KnlMeans,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeshakerOptions {
    pub smoothness:        u32,
    pub edge_compensation: bool,
}

impl Default for DeshakerOptions {
    #[inline]
    fn default() -> Self {
        Self {
            smoothness:        1000,
            edge_compensation: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FrameRateMode {
    /// Multiply the source frame rate.
    Multiply(u8),
    /// Convert to a fixed frame rate.
    Target(f64),
}

/// Trim range in seconds of source time.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrimRange {
    pub start: Option<f64>,
    pub end:   Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeOptions {
    pub codec:     VideoCodec,
    pub quality:   u8,
    pub preset:    String,
    pub audio:     AudioAction,
    pub container: Container,
}

impl Default for EncodeOptions {
    #[inline]
    fn default() -> Self {
        Self {
            codec:     VideoCodec::X264,
            quality:   20,
            preset:    "medium".to_owned(),
            audio:     AudioAction::Copy,
            container: Container::Mkv,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
    IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum VideoCodec {
    #[default]
    X264,
    X265,
    Av1,
}

impl VideoCodec {
    #[inline]
    pub fn ffmpeg_encoder(self) -> &'static str {
        match self {
            VideoCodec::X264 => "libx264",
            VideoCodec::X265 => "libx265",
            VideoCodec::Av1 => "libsvtav1",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
    IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum AudioAction {
    #[default]
    Copy,
    Discard,
    Aac,
    Opus,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
    IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum Container {
    #[default]
    Mkv,
    Mp4,
}

impl Container {
    #[inline]
    pub fn extension(self) -> &'static str {
        match self {
            Container::Mkv => "mkv",
            Container::Mp4 => "mp4",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, IntoStaticStr,
)]
pub enum CompletionStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

/// How a file name in the job directory relates to the job's fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentName {
    /// `Job<n>_Output_<start>.<ext>`
    Start(usize),
    /// Carries the job's fragment prefix and extension but no frame offset.
    Malformed,
    /// Not a fragment of this job.
    Foreign,
}

impl EncodeSettings {
    #[inline]
    pub fn new(file_name: &Path, temp_directory: &Path, job_index: usize) -> Self {
        Self {
            file_name: file_name.to_path_buf(),
            temp_directory: temp_directory.to_path_buf(),
            job_index,
            source: SourceInfo::default(),
            crop_source: None,
            crop_after: None,
            output_width: None,
            output_height: None,
            upscale_factor: 0,
            upscale_method: UpscaleMethod::default(),
            super_res: None,
            downscale_method: DownscaleMethod::default(),
            denoise: None,
            dering: false,
            degrain: None,
            deshaker: None,
            interpolation: None,
            trim: TrimRange::default(),
            change_speed: None,
            encode: EncodeOptions::default(),
            resume_position: 0,
            parallelism: default_parallelism(),
            status: CompletionStatus::default(),
            processes: Vec::new(),
        }
    }

    fn job_file(&self, suffix: &str) -> PathBuf {
        self.temp_directory.join(format!("Job{}_{}", self.job_index, suffix))
    }

    #[inline]
    pub fn script_file(&self) -> PathBuf {
        self.job_file("Script.avs")
    }

    #[inline]
    pub fn segment_script_file(&self, start: usize) -> PathBuf {
        self.job_file(&format!("Script_{}.avs", start))
    }

    #[inline]
    pub fn deshaker_script_file(&self) -> PathBuf {
        self.job_file("Deshaker.avs")
    }

    #[inline]
    pub fn deshaker_log_file(&self) -> PathBuf {
        self.job_file("Deshaker.log")
    }

    #[inline]
    pub fn frame_count_script_file(&self) -> PathBuf {
        self.job_file("FrameCount.avs")
    }

    #[inline]
    pub fn frame_count_file(&self) -> PathBuf {
        self.job_file("FrameCount.txt")
    }

    #[inline]
    pub fn fragment_prefix(&self) -> String {
        format!("Job{}_Output_", self.job_index)
    }

    #[inline]
    pub fn fragment_file(&self, start: usize) -> PathBuf {
        self.temp_directory.join(format!(
            "{}{}.{}",
            self.fragment_prefix(),
            start,
            self.encode.container.extension()
        ))
    }

    #[inline]
    pub fn concat_list_file(&self) -> PathBuf {
        self.job_file("Concat.txt")
    }

    #[inline]
    pub fn final_file(&self) -> PathBuf {
        self.job_file(&format!("Final.{}", self.encode.container.extension()))
    }

    #[inline]
    pub fn settings_file(&self) -> PathBuf {
        self.job_file("Settings.json")
    }

    /// Classify a file name found in the job directory.
    #[inline]
    pub fn parse_fragment_name(&self, file_name: &str) -> FragmentName {
        let prefix = self.fragment_prefix();
        let extension = format!(".{}", self.encode.container.extension());
        let Some(offset) = file_name
            .strip_prefix(prefix.as_str())
            .and_then(|rest| rest.strip_suffix(extension.as_str()))
        else {
            return FragmentName::Foreign;
        };

        match offset.parse::<usize>() {
            Ok(start) if !offset.starts_with('+') => FragmentName::Start(start),
            _ => FragmentName::Malformed,
        }
    }

    /// Copy of these settings continuing from `position`.
    #[inline]
    pub fn resumed_at(&self, position: usize) -> Self {
        let mut settings = self.clone();
        settings.resume_position = position;
        settings.status = CompletionStatus::Pending;
        settings.processes.clear();
        settings
    }

    /// Worker thread budget of one encoder instance.
    #[inline]
    pub fn threads_per_instance(&self, available_threads: usize) -> usize {
        (available_threads / usize::from(self.parallelism.max(1))).max(1)
    }

    /// Source size after the pre-filter crop, when the source was probed.
    #[inline]
    pub fn cropped_source_size(&self) -> Option<(u32, u32)> {
        let (width, height) = (self.source.width?, self.source.height?);
        let crop = self.crop_source.unwrap_or_default();
        Some((
            width.saturating_sub(crop.left + crop.right),
            height.saturating_sub(crop.top + crop.bottom),
        ))
    }

    /// Requested output size. A missing width is derived from the height and
    /// the display aspect ratio, rounded to a multiple of 4.
    #[inline]
    pub fn target_size(&self) -> Option<(u32, u32)> {
        let height = self.output_height?;
        if let Some(width) = self.output_width {
            return Some((width, height));
        }

        let aspect_ratio = self.source.aspect_ratio.or_else(|| {
            let (width, height) = self.cropped_source_size()?;
            (height > 0).then(|| f64::from(width) / f64::from(height))
        })?;
        let width = (f64::from(height) * aspect_ratio / 4.0).round() as u32 * 4;

        Some((width, height))
    }

    #[inline]
    pub fn save(&self) -> Result<(), SettingsError> {
        Self::save_data(self, &self.settings_file())
    }

    #[inline]
    pub fn save_data(data: &EncodeSettings, path: &Path) -> Result<(), SettingsError> {
        let mut buffer = vec![];
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        data.serialize(&mut serializer).map_err(SettingsError::Serialize)?;
        if let Some(directory) = path.parent() {
            std::fs::create_dir_all(directory).map_err(|source| SettingsError::Save {
                path: path.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, buffer).map_err(|source| SettingsError::Save {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Saved job {} settings to {}", data.job_index, path.display());
        Ok(())
    }

    #[inline]
    pub fn load(path: &Path) -> Result<EncodeSettings, SettingsError> {
        let data = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Re-hydrate every job settings file found in `directory`, sorted by job
    /// index. Unreadable files are skipped.
    #[inline]
    pub fn recover_jobs(directory: &Path) -> Result<Vec<EncodeSettings>, SettingsError> {
        let entries = std::fs::read_dir(directory).map_err(|source| SettingsError::Read {
            path: directory.to_path_buf(),
            source,
        })?;

        let mut jobs = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| {
                path.file_name().and_then(|name| name.to_str()).is_some_and(|name| {
                    name.starts_with("Job") && name.ends_with("_Settings.json")
                })
            })
            .filter_map(|path| match Self::load(&path) {
                Ok(settings) => Some(settings),
                Err(err) => {
                    warn!("Skipping job settings: {}", err);
                    None
                },
            })
            .collect::<Vec<_>>();
        jobs.sort_by_key(|job| job.job_index);

        Ok(jobs)
    }
}
