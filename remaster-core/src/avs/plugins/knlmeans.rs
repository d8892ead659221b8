use std::{fmt::Write, path::PathBuf};

use crate::{
    avs::script_builder::{
        AvisynthPluginScript,
        script::{Dependencies, Dependency, Line},
    },
    error::ScriptError,
    format_state::FormatState,
    settings::DenoiseOptions,
};

/// Non-local means denoiser running on OpenCL, fed stacked 16-bit samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KNLMeansCL {
    /// Temporal radius
    pub d:   u8,
    /// Spatial search radius
    pub a:   u8,
    /// Filtering strength
    pub h:   u8,
    pub gpu: bool,
}

impl KNLMeansCL {
    #[inline]
    pub fn new(options: DenoiseOptions, gpu: bool) -> Self {
        Self {
            d: options.temporal_radius,
            a: options.spatial_radius,
            h: options.strength,
            gpu,
        }
    }
}

impl AvisynthPluginScript for KNLMeansCL {
    #[inline]
    fn generate_script(
        &self,
        state: &FormatState,
    ) -> Result<(Option<Dependencies>, Vec<Line>), ScriptError> {
        let dependencies = vec![Dependency::LoadPlugin(PathBuf::from("KNLMeansCL.dll"))];

        let mut line = String::new();
        write!(&mut line, "KNLMeansCL(D={}, A={}, h={}", self.d, self.a, self.h)?;
        // Chroma is only denoised together with luma when it has full resolution
        write!(&mut line, ", cmode={}", state.samples.is_full_chroma())?;
        write!(&mut line, ", lsb_inout={}", state.samples.is_extended())?;
        write!(&mut line, ", device_type=\"{}\")", if self.gpu { "GPU" } else { "CPU" })?;

        Ok((Some(dependencies), vec![Line::Term(line)]))
    }
}
