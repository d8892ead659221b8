use crate::{
    avs::{
        plugins::{
            color_matrix::ColorMatrixFix,
            degrain::SMDegrain,
            dering::HQDeringmod,
            deshaker::Deshaker,
            interframe::InterFrame,
            knlmeans::KNLMeansCL,
            lsmash::LWLibavVideoSource,
            resize::Resize,
            standard::{assume_fps::AssumeFPS, crop::Crop, prefetch::Prefetch, preview::Preview, trim::Trim},
            upscale::Upscale,
        },
        script_builder::AvisynthPluginScript,
    },
    format_state::{Contract, FormatState, Requirement, SampleFormat},
    settings::UpscaleMethod,
};

/// One filter of the graph together with its format contract.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Source(LWLibavVideoSource),
    Retime(AssumeFPS),
    Trim(Trim),
    Crop(Crop),
    Denoise {
        plugin:      KNLMeansCL,
        /// Denoise luma and chroma together at full chroma resolution
        full_chroma: bool,
    },
    Dering(HQDeringmod),
    Upscale(Upscale),
    Degrain(SMDegrain),
    Deshake(Deshaker),
    Interpolate(InterFrame),
    Resize(Resize),
    ColorMatrixFix(ColorMatrixFix),
    /// Hand-off point to the encoder. Emits nothing.
    Output,
    Preview(Preview),
    Prefetch(Prefetch),
}

impl Stage {
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Source(_) => "Source",
            Stage::Retime(_) => "Retime",
            Stage::Trim(_) => "Trim",
            Stage::Crop(_) => "Crop",
            Stage::Denoise {
                ..
            } => "Denoise",
            Stage::Dering(_) => "Dering",
            Stage::Upscale(_) => "Upscale",
            Stage::Degrain(_) => "Degrain",
            Stage::Deshake(_) => "Deshake",
            Stage::Interpolate(_) => "Interpolate",
            Stage::Resize(_) => "Resize",
            Stage::ColorMatrixFix(_) => "ColorMatrixFix",
            Stage::Output => "Output",
            Stage::Preview(_) => "Preview",
            Stage::Prefetch(_) => "Prefetch",
        }
    }

    /// Sample formats the stage can be fed.
    #[inline]
    pub fn contract(&self) -> Contract {
        match self {
            Stage::Source(_) | Stage::Retime(_) | Stage::Trim(_) | Stage::Prefetch(_) => Contract::Any,
            // Cropping stacked clips would cut into the LSB half
            Stage::Crop(_) => Contract::Standard,
            Stage::Denoise {
                full_chroma,
                ..
            } => Contract::PrefersExtended {
                full_chroma: *full_chroma,
            },
            Stage::Dering(_) | Stage::Degrain(_) | Stage::ColorMatrixFix(_) => {
                Contract::PrefersExtended {
                    full_chroma: false,
                }
            },
            Stage::Upscale(upscale) => match (upscale.super_res, upscale.method) {
                (Some(_), _) => Contract::PrefersExtended {
                    full_chroma: true,
                },
                (None, UpscaleMethod::Nnedi3) => Contract::Standard,
                (None, UpscaleMethod::SuperXbr) => Contract::Any,
            },
            Stage::Deshake(_) | Stage::Interpolate(_) | Stage::Output | Stage::Preview(_) => {
                Contract::Standard
            },
            Stage::Resize(resize) => match resize.method.requirement() {
                Requirement::Standard => Contract::Standard,
                _ => Contract::Any,
            },
        }
    }

    /// State after the stage ran on `state`.
    #[inline]
    pub fn output(&self, state: FormatState) -> FormatState {
        match self {
            Stage::Upscale(Upscale {
                super_res: Some(_),
                last_pass,
                ..
            }) => {
                // The last pass hands back 4:2:0 chroma
                let reduced = *last_pass && state.samples.is_full_chroma();
                let state = state.matrix_corrected();
                if reduced { state.with_samples(SampleFormat::Extended) } else { state }
            },
            Stage::ColorMatrixFix(_) => state.matrix_corrected(),
            _ => state,
        }
    }

    /// Whether the stage converts the color matrix to Rec.709 on its own.
    #[inline]
    pub fn corrects_matrix(&self) -> bool {
        matches!(
            self,
            Stage::Upscale(Upscale {
                super_res: Some(_),
                ..
            }) | Stage::ColorMatrixFix(_)
        )
    }

    #[inline]
    pub fn plugin(&self) -> Option<&dyn AvisynthPluginScript> {
        let plugin: &dyn AvisynthPluginScript = match self {
            Stage::Source(plugin) => plugin,
            Stage::Retime(plugin) => plugin,
            Stage::Trim(plugin) => plugin,
            Stage::Crop(plugin) => plugin,
            Stage::Denoise {
                plugin, ..
            } => plugin,
            Stage::Dering(plugin) => plugin,
            Stage::Upscale(plugin) => plugin,
            Stage::Degrain(plugin) => plugin,
            Stage::Deshake(plugin) => plugin,
            Stage::Interpolate(plugin) => plugin,
            Stage::Resize(plugin) => plugin,
            Stage::ColorMatrixFix(plugin) => plugin,
            Stage::Output => return None,
            Stage::Preview(plugin) => plugin,
            Stage::Prefetch(plugin) => plugin,
        };
        Some(plugin)
    }
}
