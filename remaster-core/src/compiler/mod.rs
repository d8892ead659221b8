use std::path::{Path, PathBuf};

use tracing::{debug, instrument, trace};

use crate::{
    avs::{
        plugins::{
            color_matrix::ColorMatrixFix,
            degrain::SMDegrain,
            dering::HQDeringmod,
            deshaker::{Deshaker, DeshakerPass},
            dither::DitherConversion,
            frame_rate_fraction,
            interframe::{InterFrame, InterpolatedRate},
            knlmeans::KNLMeansCL,
            lsmash::LWLibavVideoSource,
            resize::Resize,
            standard::{
                assume_fps::AssumeFPS,
                crop::Crop,
                prefetch::Prefetch,
                preview::Preview,
                trim::{SEGMENT_MARKER, Trim},
            },
            upscale::{FinalResize, Upscale},
        },
        script_builder::{
            AvisynthPluginScript,
            script::{AvisynthScript, Dependency, Line},
        },
    },
    error::ScriptError,
    format_state::FormatState,
    segments::SegmentInfo,
    settings::{ColorMatrix, DenoiseOptions, EncodeSettings, FrameRateMode},
    util::path::ascii_safe_path,
};

pub mod stages;

pub use stages::Stage;

/// Environment a script is compiled for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Directory dependency file names are resolved against.
    pub plugin_directory: PathBuf,
    /// Worker threads available to one engine instance.
    pub threads:          usize,
    /// Whether OpenCL capable filters may use the GPU.
    pub gpu:              bool,
    pub preview:          bool,
}

impl Default for CompileOptions {
    #[inline]
    fn default() -> Self {
        Self {
            plugin_directory: PathBuf::from("plugins"),
            threads:          1,
            gpu:              false,
            preview:          false,
        }
    }
}

/// Compile the filter graph of a job into a script.
#[inline]
#[instrument(level = "debug", skip_all, fields(job = settings.job_index, preview = options.preview))]
pub fn compile(
    settings: &EncodeSettings,
    options: &CompileOptions,
) -> Result<AvisynthScript, ScriptError> {
    let stages = plan(settings, options);
    render(&stages, settings, options)
}

/// Ordered list of stages for a job.
#[inline]
pub fn plan(settings: &EncodeSettings, options: &CompileOptions) -> Vec<Stage> {
    let mut stages = opening_stages(settings, options.preview);

    if let Some(crop) = settings.crop_source.filter(|crop| !crop.is_empty()) {
        stages.push(Stage::Crop(Crop::from(crop)));
    }
    if let Some(denoise) = settings.denoise {
        stages.push(Stage::Denoise {
            plugin:      KNLMeansCL::new(denoise, options.gpu),
            full_chroma: settings.upscale_factor > 0 && settings.super_res.is_some(),
        });
    }
    if settings.dering {
        stages.push(Stage::Dering(HQDeringmod));
    }

    let target_size = settings.target_size();
    let mut resized = false;
    if settings.upscale_factor > 0 {
        for pass in 0..settings.upscale_factor {
            let last_pass = pass + 1 == settings.upscale_factor;
            let final_resize = target_size
                .filter(|_| last_pass && settings.downscale_method.resizer().is_some())
                .map(|(width, height)| FinalResize {
                    width,
                    height,
                    kernel: settings.downscale_method,
                });
            resized |= final_resize.is_some();

            stages.push(Stage::Upscale(Upscale {
                method: settings.upscale_method,
                super_res: settings.super_res,
                last_pass,
                final_resize,
                threads: options.threads,
            }));
            if pass == 0 {
                stages.extend(motion_stages(settings, options));
            }
        }
    } else {
        stages.extend(motion_stages(settings, options));
    }

    if let Some(crop) = settings.crop_after.filter(|crop| !crop.is_empty()) {
        stages.push(Stage::Crop(Crop::from(crop)));
    }
    if let Some((width, height)) = target_size.filter(|_| !resized) {
        stages.push(Stage::Resize(Resize {
            width,
            height,
            method: settings.downscale_method,
        }));
    }

    let corrected = stages.iter().any(Stage::corrects_matrix);
    if settings.source.color_matrix != ColorMatrix::Rec709 && !corrected {
        stages.push(Stage::ColorMatrixFix(ColorMatrixFix {
            source: settings.source.color_matrix,
        }));
    }

    stages.push(Stage::Output);
    if options.preview {
        stages.push(Stage::Preview(Preview));
    }
    if options.threads > 1 {
        stages.push(Stage::Prefetch(Prefetch {
            threads: options.threads,
        }));
    }

    trace!(
        "Planned stages: {}",
        stages.iter().map(Stage::name).collect::<Vec<_>>().join(", ")
    );
    stages
}

/// Open the source, retime it and cut it to the requested range.
fn opening_stages(settings: &EncodeSettings, preview: bool) -> Vec<Stage> {
    let frame_rate = settings.source.frame_rate.filter(|fps| *fps > 0.0);
    let mut stages = vec![Stage::Source(LWLibavVideoSource {
        source: settings.file_name.clone(),
        fps:    frame_rate.map(frame_rate_fraction),
    })];

    if let (Some(fps), Some(speed)) = (frame_rate, settings.change_speed) {
        if speed > 0.0 && (speed - 1.0).abs() > f64::EPSILON {
            let (numerator, denominator) = frame_rate_fraction(fps * speed);
            stages.push(Stage::Retime(AssumeFPS {
                numerator,
                denominator,
            }));
        }
    }

    let trim = settings.trim;
    let wanted = trim.start.is_some() || trim.end.is_some();
    if let Some(fps) = frame_rate.filter(|_| wanted && !(preview && trim.end.is_none())) {
        let to_frame = |seconds: f64| (seconds.max(0.0) * fps).round() as usize;
        stages.push(Stage::Trim(Trim {
            first:   trim.start.map_or(0, to_frame),
            last:    trim.end.map(to_frame),
            segment: false,
        }));
    }

    stages
}

/// Degrain, stabilization and frame rate conversion, in that order.
fn motion_stages(settings: &EncodeSettings, options: &CompileOptions) -> Vec<Stage> {
    let mut stages = vec![];

    if let Some(degrain) = settings.degrain {
        stages.push(Stage::Degrain(SMDegrain {
            options: degrain,
        }));
    }
    if let Some(deshaker) = settings.deshaker {
        stages.push(Stage::Deshake(Deshaker {
            pass:     DeshakerPass::Stabilize,
            log_file: ascii_safe_path(&settings.deshaker_log_file()),
            options:  deshaker,
        }));
    }
    if let Some(mode) = settings.interpolation {
        let rate = match mode {
            FrameRateMode::Multiply(factor) => InterpolatedRate::Multiply(factor),
            FrameRateMode::Target(fps) => {
                let (numerator, denominator) = frame_rate_fraction(fps);
                InterpolatedRate::Fixed(numerator, denominator)
            },
        };
        stages.push(Stage::Interpolate(InterFrame {
            rate,
            threads: options.threads,
            gpu: options.gpu,
        }));
    }

    stages
}

/// Fold the stages over the format state, inserting the conversions each
/// stage needs ahead of it.
#[inline]
pub fn render(
    stages: &[Stage],
    settings: &EncodeSettings,
    options: &CompileOptions,
) -> Result<AvisynthScript, ScriptError> {
    let mut script = AvisynthScript::new();
    let mut state = FormatState::new(settings.source.color_matrix);

    for stage in stages {
        let requirement = state.requirement_for(stage.contract());
        for conversion in state.transitions_to(requirement) {
            trace!("Converting {} before {}: {}", state.samples, stage.name(), conversion);
            let plugin = DitherConversion {
                conversion,
                chroma_placement: settings.source.chroma_placement,
            };
            emit(&mut script, &plugin, &state, &options.plugin_directory)?;
            state = state.apply(conversion)?;
        }
        state.require(stage.name(), requirement)?;

        if matches!(stage, Stage::Output) && !state.is_resolved() {
            return Err(ScriptError::Unresolved {
                samples: state.samples,
                pending: state.pending_matrix.is_some(),
            });
        }
        if let Some(plugin) = stage.plugin() {
            emit(&mut script, plugin, &state, &options.plugin_directory)?;
        }
        state = stage.output(state);
    }

    if !state.is_resolved() {
        return Err(ScriptError::Unresolved {
            samples: state.samples,
            pending: state.pending_matrix.is_some(),
        });
    }

    script.cleanup();
    debug!("Rendered {} stages into {} lines", stages.len(), script.lines().len());
    Ok(script)
}

fn emit(
    script: &mut AvisynthScript,
    plugin: &dyn AvisynthPluginScript,
    state: &FormatState,
    plugin_directory: &Path,
) -> Result<(), ScriptError> {
    let (dependencies, lines) = plugin.generate_script(state)?;
    if let Some(dependencies) = dependencies {
        script.add_dependencies(
            dependencies.into_iter().map(|dependency| dependency.rooted_at(plugin_directory)).collect(),
        );
    }
    script.add_lines(lines);
    Ok(())
}

/// First pass of a stabilized job: writes the Deshaker motion log.
#[inline]
pub fn compile_deshaker_pass1(
    settings: &EncodeSettings,
    options: &CompileOptions,
) -> Result<AvisynthScript, ScriptError> {
    let mut stages = opening_stages(settings, false);
    if let Some(crop) = settings.crop_source.filter(|crop| !crop.is_empty()) {
        stages.push(Stage::Crop(Crop::from(crop)));
    }
    stages.push(Stage::Deshake(Deshaker {
        pass:     DeshakerPass::Analyze,
        log_file: ascii_safe_path(&settings.deshaker_log_file()),
        options:  settings.deshaker.unwrap_or_default(),
    }));

    // Only the motion log matters, the color matrix is left alone
    let mut analysis = settings.clone();
    analysis.source.color_matrix = ColorMatrix::Rec709;
    stages.push(Stage::Output);
    render(&stages, &analysis, options)
}

/// Copy of `script` restricted to `segment`. Prefetch stays the last line.
#[inline]
pub fn segment_script(script: &AvisynthScript, segment: SegmentInfo) -> Result<AvisynthScript, ScriptError> {
    let mut script = script.clone();
    reset_segment_trim(&mut script);

    let trim = Trim {
        first:   segment.start,
        last:    Some(segment.end),
        segment: true,
    };
    let (_, lines) = trim.generate_script(&FormatState::new(ColorMatrix::Rec709))?;
    for line in lines {
        script.insert_before_last("Prefetch(", line);
    }
    Ok(script)
}

/// Remove every segment restriction so the script spans the full source.
#[inline]
pub fn reset_segment_trim(script: &mut AvisynthScript) -> usize {
    script.remove_lines_containing(&format!("# {}", SEGMENT_MARKER))
}

/// Script that makes the engine write `<framerate>,<framecount>` of `script`
/// to `side_file`.
#[inline]
pub fn frame_count_script(script: &Path, side_file: &Path) -> AvisynthScript {
    let mut probe = AvisynthScript::new();
    probe
        .add_line(Line::Dependency(Dependency::Import(ascii_safe_path(script))))
        .add_line(Line::Term(format!(
            "WriteFileStart(\"{}\", \"FrameRate\", \"\"\",\"\"\", \"FrameCount\")",
            side_file.display()
        )))
        .add_line(Line::term("Trim(0, -1)"));
    probe
}

/// Script that only runs when OpenCL filtering works on the GPU.
#[inline]
pub fn gpu_probe_script(plugin_directory: &Path) -> Result<AvisynthScript, ScriptError> {
    let mut probe = AvisynthScript::new();
    probe.add_line(Line::term("BlankClip(length=10, width=64, height=64, pixel_type=\"YV12\")"));

    let denoise = KNLMeansCL::new(DenoiseOptions::default(), true);
    emit(&mut probe, &denoise, &FormatState::new(ColorMatrix::Rec709), plugin_directory)?;
    probe.cleanup();
    Ok(probe)
}

#[cfg(test)]
mod tests {
    use itertools::iproduct;

    use super::*;
    use crate::settings::{
        ChromaPlacement,
        CropRect,
        DegrainOptions,
        DenoiseOptions,
        DeshakerOptions,
        DownscaleMethod,
        SourceInfo,
        SuperResOptions,
        TrimRange,
        UpscaleMethod,
    };

    fn settings() -> EncodeSettings {
        let mut settings = EncodeSettings::new(Path::new("/media/clip.mkv"), Path::new("/jobs"), 3);
        settings.source = SourceInfo {
            width:            Some(720),
            height:           Some(480),
            aspect_ratio:     Some(4.0 / 3.0),
            frame_rate:       Some(29.97),
            color_matrix:     ColorMatrix::Rec601,
            chroma_placement: ChromaPlacement::Mpeg2,
        };
        settings
    }

    fn options() -> CompileOptions {
        CompileOptions {
            plugin_directory: PathBuf::from("/plugins"),
            threads:          4,
            gpu:              true,
            preview:          false,
        }
    }

    /// Walks the rendered text and checks every filter sees the sample format
    /// it was written for, and that depth is promoted at most once.
    fn assert_formats_line_up(script: &AvisynthScript) {
        let standard_only = [
            "Crop(",
            "nnedi3_rpow2(",
            "InterFrame(",
            "Deshaker(",
            "ColorMatrix(",
            "ColorYUV(",
            "AddBorders(",
            "SSimDownscaler(",
            "Spline36Resize(",
        ];
        let extended_only = ["Dither_resize16nr(", "Dither_convert_yuv_to_rgb(", "DitherPost()"];

        let mut promoted = false;
        let mut extended = false;
        let mut full_chroma = false;
        for line in script.lines().iter().map(ToString::to_string) {
            if standard_only.iter().any(|call| line.starts_with(call)) {
                assert!(!extended, "{} on extended samples in\n{}", line, script);
            }
            if extended_only.iter().any(|call| line.starts_with(call)) {
                assert!(extended, "{} on standard samples in\n{}", line, script);
            }
            if line.contains("lsb_in=true") || line.contains("lsb_inout=true") {
                assert!(extended, "{} on standard samples in\n{}", line, script);
            }
            if line.contains("lsb_in=false") || line.contains("lsb_inout=false") {
                assert!(!extended, "{} on extended samples in\n{}", line, script);
            }
            if (line.starts_with("SuperRes") && line.contains("lsb_in=true")) || line.contains("cmode=true") {
                assert!(full_chroma, "{} without full chroma in\n{}", line, script);
            }
            if line.starts_with("Dither_convert_rgb_to_yuv(") {
                assert_eq!(line.contains("output=\"YV24\""), full_chroma);
            }

            if line == "Dither_convert_8_to_16()" {
                assert!(!promoted, "promoted twice in\n{}", script);
                promoted = true;
                extended = true;
            } else if line == "DitherPost()" {
                assert!(!full_chroma);
                extended = false;
            } else if line.contains("csp=\"YV24\"") {
                assert!(extended && !full_chroma);
                full_chroma = true;
            } else if line.contains("csp=\"YV12\"") {
                assert!(full_chroma);
                full_chroma = false;
            } else if line.starts_with("SuperRes") && line.contains("fCsp=\"YV12\"") {
                full_chroma = false;
            }
        }
        assert!(!extended && !full_chroma, "unresolved output in\n{}", script);
    }

    fn promotions(script: &AvisynthScript) -> usize {
        script.to_string().matches("Dither_convert_8_to_16()").count()
    }

    #[test]
    fn plain_job() {
        let mut settings = settings();
        settings.source.color_matrix = ColorMatrix::Rec709;
        settings.crop_source = Some(CropRect {
            left:   8,
            top:    0,
            right:  8,
            bottom: 0,
        });
        settings.output_height = Some(720);
        settings.output_width = Some(960);

        let script = compile(&settings, &options()).unwrap();
        assert_eq!(
            script.to_string(),
            "LoadPlugin(\"/plugins/LSMASHSource.dll\")\n\
             LWLibavVideoSource(\"/media/clip.mkv\", cache=false, fpsnum=2997, fpsden=100)\n\
             Crop(8, 0, -8, -0)\n\
             Spline36Resize(960, 720)\n\
             Prefetch(4)\n"
        );
    }

    #[test]
    fn denoise_and_upscale_promote_once() {
        let mut settings = settings();
        settings.denoise = Some(DenoiseOptions::default());
        settings.dering = true;
        settings.upscale_factor = 1;
        settings.super_res = Some(SuperResOptions::default());
        settings.output_height = Some(1080);
        settings.output_width = Some(1440);

        let script = compile(&settings, &options()).unwrap();
        let text = script.to_string();
        assert_formats_line_up(&script);
        assert_eq!(text.matches("Dither_convert_8_to_16()").count(), 1);
        assert!(text.contains("KNLMeansCL(D=1, A=2, h=2, cmode=true, lsb_inout=true, device_type=\"GPU\")"));
        assert!(text.contains("MatrixIn=\"Rec601\""));
        // The quality boost upscaler already converted the matrix
        assert!(!text.contains("ColorMatrix("));
        assert!(!text.contains("Resize(1440"));
        assert!(text.contains("fWidth=1440, fHeight=1080"));
    }

    #[test]
    fn color_matrix_fix_uses_source_matrix() {
        // Nothing else asks for 16-bit samples, so the fix itself runs on them
        let mut settings = settings();
        settings.source.color_matrix = ColorMatrix::Pc709;
        let script = compile(&settings, &options()).unwrap();
        assert_formats_line_up(&script);
        assert_eq!(promotions(&script), 1);
        assert!(script.to_string().contains(
            "Dither_convert_8_to_16()\n\
             Dither_convert_yuv_to_rgb(matrix=\"709\", tv_range=false, lsb_in=true, output=\"rgb48y\")\n"
        ));

        // After the depth was flushed for an 8-bit upscaler the dedicated filters are used
        settings.denoise = Some(DenoiseOptions::default());
        settings.upscale_factor = 1;
        let text = compile(&settings, &options()).unwrap().to_string();
        assert!(text.contains("ColorYUV(levels=\"PC->TV\")"));

        settings.source.color_matrix = ColorMatrix::Pc601;
        let text = compile(&settings, &options()).unwrap().to_string();
        assert!(text.contains("ColorMatrix(mode=\"Rec.601->Rec.709\", inputFR=true)"));
        assert!(text.contains("LoadPlugin(\"/plugins/ColorMatrix.dll\")\n"));

        settings.source.color_matrix = ColorMatrix::Rec709;
        let text = compile(&settings, &options()).unwrap().to_string();
        assert!(!text.contains("ColorMatrix(") && !text.contains("ColorYUV(") && !text.contains("Dither_convert_yuv_to_rgb("));
    }

    #[test]
    fn eight_bit_upscale_does_not_promote_again() {
        let mut settings = settings();
        settings.denoise = Some(DenoiseOptions::default());
        settings.upscale_factor = 1;
        settings.upscale_method = UpscaleMethod::Nnedi3;
        settings.degrain = Some(DegrainOptions::default());

        let script = compile(&settings, &options()).unwrap();
        assert_formats_line_up(&script);
        assert_eq!(promotions(&script), 1);

        let text = script.to_string();
        // Chroma is only promoted for a quality boost pass
        assert!(!text.contains("csp=\"YV24\""));
        let position = |call: &str| text.find(call).unwrap_or_else(|| panic!("{} missing in\n{}", call, text));
        assert!(position("Dither_convert_8_to_16()") < position("KNLMeansCL(D=1, A=2, h=2, cmode=false, lsb_inout=true"));
        assert!(position("KNLMeansCL(") < position("DitherPost()"));
        assert!(position("DitherPost()") < position("nnedi3_rpow2("));
        assert!(position("nnedi3_rpow2(") < position("SMDegrain("));
        assert!(text.lines().any(|line| line.starts_with("SMDegrain(") && line.ends_with("lsb_in=false, lsb_out=false)")));
        assert!(position("SMDegrain(") < position("ColorMatrix(mode=\"Rec.601->Rec.709\")"));
    }

    #[test]
    fn promotion_triggers() {
        let neutral = || {
            let mut settings = settings();
            settings.source.color_matrix = ColorMatrix::Rec709;
            settings
        };
        let count = |settings: &EncodeSettings| {
            let script = compile(settings, &options()).unwrap();
            assert_formats_line_up(&script);
            promotions(&script)
        };

        assert_eq!(count(&neutral()), 0);
        let mut plain = neutral();
        plain.upscale_factor = 2;
        plain.deshaker = Some(DeshakerOptions::default());
        plain.interpolation = Some(FrameRateMode::Multiply(2));
        plain.output_height = Some(1080);
        assert_eq!(count(&plain), 0);

        let mut triggers = vec![];
        let mut denoise = neutral();
        denoise.denoise = Some(DenoiseOptions::default());
        triggers.push(denoise);
        let mut dering = neutral();
        dering.dering = true;
        triggers.push(dering);
        let mut degrain = neutral();
        degrain.degrain = Some(DegrainOptions::default());
        triggers.push(degrain);
        let mut quality_boost = neutral();
        quality_boost.upscale_factor = 1;
        quality_boost.super_res = Some(SuperResOptions::default());
        triggers.push(quality_boost);
        for matrix in [ColorMatrix::Rec601, ColorMatrix::Pc601, ColorMatrix::Pc709] {
            let mut source = neutral();
            source.source.color_matrix = matrix;
            triggers.push(source);
        }

        for settings in &triggers {
            assert_eq!(count(settings), 1, "{:?}", settings);
        }
    }

    #[test]
    fn motion_filters_follow_first_upscale_pass() {
        let mut settings = settings();
        settings.upscale_factor = 2;
        settings.degrain = Some(DegrainOptions::default());
        settings.deshaker = Some(DeshakerOptions::default());
        settings.interpolation = Some(FrameRateMode::Multiply(2));

        let names = plan(&settings, &options()).iter().map(Stage::name).collect::<Vec<_>>();
        assert_eq!(names, vec![
            "Source",
            "Upscale",
            "Degrain",
            "Deshake",
            "Interpolate",
            "Upscale",
            "ColorMatrixFix",
            "Output",
            "Prefetch"
        ]);

        let script = compile(&settings, &options()).unwrap();
        assert_formats_line_up(&script);
        assert!(script.contains_any(&["InterFrame(Cores=4, GPU=true, NewNum=FrameRateNumerator*2, NewDen=FrameRateDenominator)"]));
    }

    #[test]
    fn trim_and_retime() {
        let mut settings = settings();
        settings.source.frame_rate = Some(25.0);
        settings.change_speed = Some(1.04);
        settings.trim = TrimRange {
            start: Some(2.0),
            end:   Some(10.0),
        };

        let text = compile(&settings, &options()).unwrap().to_string();
        assert!(text.contains("AssumeFPS(26, 1)\nTrim(50, 250)\n"));

        // Previews only honor an explicit end
        let mut preview = options();
        preview.preview = true;
        settings.trim.end = None;
        let text = compile(&settings, &preview).unwrap().to_string();
        assert!(!text.contains("Trim("));
        assert!(text.contains("AddBorders(2, 2, 2, 2, $FF0000) # preview\nConvertToRGB32()\nPrefetch(4)\n"));

        // Unknown frame rate disables anything timed
        settings.source.frame_rate = None;
        settings.trim.end = Some(10.0);
        let text = compile(&settings, &options()).unwrap().to_string();
        assert!(!text.contains("Trim(") && !text.contains("AssumeFPS("));
        assert!(text.contains("LWLibavVideoSource(\"/media/clip.mkv\", cache=false)\n"));
    }

    #[test]
    fn single_thread_has_no_prefetch() {
        let mut options = options();
        options.threads = 1;
        let text = compile(&settings(), &options).unwrap().to_string();
        assert!(!text.contains("Prefetch("));
    }

    #[test]
    fn every_combination_resolves() {
        let matrices = [ColorMatrix::Rec601, ColorMatrix::Pc601, ColorMatrix::Rec709, ColorMatrix::Pc709];
        let upscales = [
            (0, UpscaleMethod::Nnedi3, None),
            (1, UpscaleMethod::Nnedi3, None),
            (2, UpscaleMethod::SuperXbr, None),
            (1, UpscaleMethod::Nnedi3, Some(SuperResOptions::default())),
            (2, UpscaleMethod::SuperXbr, Some(SuperResOptions::default())),
        ];
        let interpolations = [None, Some(FrameRateMode::Multiply(2)), Some(FrameRateMode::Target(59.94))];
        let downscales = [DownscaleMethod::Spline36, DownscaleMethod::SSim];

        let mut compiled = 0;
        for (matrix, upscale, interpolation, downscale, denoise, dering, degrain, deshake, resize, preview) in iproduct!(
            matrices,
            upscales,
            interpolations,
            downscales,
            [false, true],
            [false, true],
            [false, true],
            [false, true],
            [false, true],
            [false, true]
        ) {
            let mut settings = settings();
            settings.source.color_matrix = matrix;
            (settings.upscale_factor, settings.upscale_method, settings.super_res) = upscale;
            settings.interpolation = interpolation;
            settings.downscale_method = downscale;
            settings.denoise = denoise.then(DenoiseOptions::default);
            settings.dering = dering;
            settings.degrain = degrain.then(DegrainOptions::default);
            settings.deshaker = deshake.then(DeshakerOptions::default);
            settings.output_height = resize.then_some(720);
            settings.crop_after = resize.then_some(CropRect {
                left:   0,
                top:    4,
                right:  0,
                bottom: 4,
            });
            let mut options = options();
            options.preview = preview;

            let script = compile(&settings, &options).unwrap_or_else(|err| panic!("{}: {:?}", err, settings));
            assert_formats_line_up(&script);
            assert!(promotions(&script) <= 1, "{:?}\n{}", settings, script);
            compiled += 1;
        }
        assert_eq!(compiled, 4 * 5 * 3 * 2 * 64);
    }

    #[test]
    fn compiling_is_idempotent() {
        let mut settings = settings();
        settings.denoise = Some(DenoiseOptions::default());
        settings.upscale_factor = 2;
        settings.super_res = Some(SuperResOptions::default());
        settings.deshaker = Some(DeshakerOptions::default());
        settings.output_height = Some(1080);

        let first = compile(&settings, &options()).unwrap().to_string();
        let second = compile(&settings, &options()).unwrap().to_string();
        assert_eq!(first, second);
    }

    #[test]
    fn segment_trim_round_trip() {
        let script = compile(&settings(), &options()).unwrap();
        let segment = segment_script(&script, SegmentInfo::new(300, 499)).unwrap();
        let text = segment.to_string();
        assert!(text.ends_with("Trim(300, 499) # segment\nPrefetch(4)\n"));

        // Restricting again replaces the previous range
        let again = segment_script(&segment, SegmentInfo::new(700, 999)).unwrap().to_string();
        assert!(!again.contains("Trim(300, 499)"));
        assert!(again.contains("Trim(700, 999) # segment"));

        let mut reset = AvisynthScript::parse(&again);
        assert_eq!(reset_segment_trim(&mut reset), 1);
        assert_eq!(reset, script);
    }

    #[test]
    fn deshaker_first_pass() {
        let mut settings = settings();
        settings.deshaker = Some(DeshakerOptions::default());
        let text = compile_deshaker_pass1(&settings, &options()).unwrap().to_string();

        assert!(text.starts_with(
            "LoadPlugin(\"/plugins/LSMASHSource.dll\")\nLoadVirtualDubPlugin(\"/plugins/Deshaker.vdf\", \"Deshaker\", 0)\n"
        ));
        assert!(text.contains("Deshaker(\"19|1|"));
        assert!(text.contains("/jobs/Job3_Deshaker.log"));
        assert!(!text.contains("ColorMatrix("));
    }

    #[test]
    fn frame_count_probe() {
        let probe = frame_count_script(Path::new("/jobs/Job3_Script.avs"), Path::new("/jobs/Job3_FrameCount.txt"));
        assert_eq!(
            probe.to_string(),
            "Import(\"/jobs/Job3_Script.avs\")\n\
             WriteFileStart(\"/jobs/Job3_FrameCount.txt\", \"FrameRate\", \"\"\",\"\"\", \"FrameCount\")\n\
             Trim(0, -1)\n"
        );
    }

    #[test]
    fn gpu_probe() {
        let text = gpu_probe_script(Path::new("/plugins")).unwrap().to_string();
        assert!(text.starts_with("LoadPlugin(\"/plugins/KNLMeansCL.dll\")\nBlankClip("));
        assert!(text.contains("device_type=\"GPU\""));
    }
}
