use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Args;
use remaster_core::{
    EncodeQueue,
    EncodeSettings,
    settings::{
        AudioAction,
        ColorMatrix,
        Container,
        DegrainOptions,
        DenoiseOptions,
        DeshakerOptions,
        DownscaleMethod,
        FrameRateMode,
        SuperResOptions,
        UpscaleMethod,
        VideoCodec,
    },
};
use tracing::{error, info};

use crate::{RemasterCliError, configuration::Configuration};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Source video
    pub input:            PathBuf,
    /// Working directory. Defaults to the configured one
    #[arg(long)]
    pub temp:             Option<PathBuf>,
    /// Job index. Defaults to the next free index in the working directory
    #[arg(long)]
    pub job:              Option<usize>,

    /// Source frame rate
    #[arg(long)]
    pub fps:              Option<f64>,
    #[arg(long)]
    pub source_width:     Option<u32>,
    #[arg(long)]
    pub source_height:    Option<u32>,
    /// Display aspect ratio of the source
    #[arg(long)]
    pub aspect_ratio:     Option<f64>,
    /// Source color matrix: Rec601, Pc601, Rec709 or Pc709
    #[arg(long)]
    pub matrix:           Option<ColorMatrix>,

    #[arg(long)]
    pub width:            Option<u32>,
    #[arg(long)]
    pub height:           Option<u32>,
    /// Doubling passes
    #[arg(long, default_value_t = 0)]
    pub upscale:          u8,
    #[arg(long)]
    pub upscale_method:   Option<UpscaleMethod>,
    /// Use the quality boost variant of the upscaler
    #[arg(long)]
    pub super_res:        bool,
    #[arg(long)]
    pub downscale_method: Option<DownscaleMethod>,

    /// Denoise strength
    #[arg(long)]
    pub denoise:          Option<u8>,
    #[arg(long)]
    pub dering:           bool,
    /// Degrain strength
    #[arg(long)]
    pub degrain:          Option<u32>,
    #[arg(long)]
    pub deshake:          bool,
    /// Interpolate to this frame rate
    #[arg(long)]
    pub interpolate:      Option<f64>,
    /// Seconds
    #[arg(long)]
    pub trim_start:       Option<f64>,
    /// Seconds
    #[arg(long)]
    pub trim_end:         Option<f64>,
    #[arg(long)]
    pub speed:            Option<f64>,

    #[arg(long)]
    pub codec:            Option<VideoCodec>,
    #[arg(long)]
    pub quality:          Option<u8>,
    #[arg(long)]
    pub preset:           Option<String>,
    #[arg(long)]
    pub audio:            Option<AudioAction>,
    #[arg(long)]
    pub container:        Option<Container>,
    /// Encoder instances for this job
    #[arg(long)]
    pub parallelism:      Option<u8>,
}

pub fn init_handler(config_path: &Path, args: InitArgs) -> Result<PathBuf> {
    let configuration = Configuration::load(config_path)?;
    let temp = std::path::absolute(args.temp.as_deref().unwrap_or(configuration.temp.as_path()))?;
    let input = std::path::absolute(&args.input)?;

    let job_index = match args.job {
        Some(index) => index,
        None => {
            let recovered = if temp.exists() { EncodeSettings::recover_jobs(&temp)? } else { vec![] };
            EncodeQueue::new(1, Default::default()).seeded(&recovered).allocate_index()
        },
    };

    let mut settings = EncodeSettings::new(&input, &temp, job_index);
    apply_arguments(&mut settings, &args, &configuration);

    let settings_file = settings.settings_file();
    if settings_file.exists() {
        let err = RemasterCliError::JobAlreadyExists(settings_file);
        error!("{}", err);
        bail!(err);
    }
    settings.save().context("Failed to write the job settings")?;

    info!("Initialized job {} at: {}", settings.job_index, settings_file.display());
    info!("Run \"remaster compile\" to write its script or \"remaster encode\" to start encoding.");

    Ok(settings_file)
}

fn apply_arguments(settings: &mut EncodeSettings, args: &InitArgs, configuration: &Configuration) {
    let source = &mut settings.source;
    source.frame_rate = args.fps;
    source.width = args.source_width;
    source.height = args.source_height;
    source.aspect_ratio = args.aspect_ratio;
    if let Some(matrix) = args.matrix {
        source.color_matrix = matrix;
    }

    settings.output_width = args.width;
    settings.output_height = args.height;
    settings.upscale_factor = args.upscale;
    if let Some(method) = args.upscale_method {
        settings.upscale_method = method;
    }
    settings.super_res = args.super_res.then(SuperResOptions::default);
    if let Some(method) = args.downscale_method {
        settings.downscale_method = method;
    }

    settings.denoise = args.denoise.map(|strength| DenoiseOptions {
        strength,
        ..DenoiseOptions::default()
    });
    settings.dering = args.dering;
    settings.degrain = args.degrain.map(|strength| DegrainOptions {
        strength,
        ..DegrainOptions::default()
    });
    settings.deshaker = args.deshake.then(DeshakerOptions::default);
    settings.interpolation = args.interpolate.map(FrameRateMode::Target);
    settings.trim.start = args.trim_start;
    settings.trim.end = args.trim_end;
    settings.change_speed = args.speed;

    let encode = &mut settings.encode;
    if let Some(codec) = args.codec {
        encode.codec = codec;
    }
    if let Some(quality) = args.quality {
        encode.quality = quality;
    }
    if let Some(preset) = &args.preset {
        encode.preset.clone_from(preset);
    }
    if let Some(audio) = args.audio {
        encode.audio = audio;
    }
    if let Some(container) = args.container {
        encode.container = container;
    }

    settings.parallelism = args.parallelism.unwrap_or(configuration.parallelism).max(1);
}
