use std::path::PathBuf;

use crate::{
    avs::script_builder::{
        AvisynthPluginScript,
        script::{Dependencies, Dependency, Line},
    },
    error::ScriptError,
    format_state::FormatState,
    settings::{DegrainOptions, DegrainPrefilter},
};

/// Motion compensated temporal degrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SMDegrain {
    pub options: DegrainOptions,
}

impl SMDegrain {
    fn prefilter(self) -> i8 {
        match self.options.prefilter {
            DegrainPrefilter::None => -1,
            DegrainPrefilter::Gaussian => 1,
            DegrainPrefilter::KnlMeans => 4,
        }
    }
}

impl AvisynthPluginScript for SMDegrain {
    #[inline]
    fn generate_script(
        &self,
        state: &FormatState,
    ) -> Result<(Option<Dependencies>, Vec<Line>), ScriptError> {
        let mut dependencies = vec![
            Dependency::LoadPlugin(PathBuf::from("mvtools2.dll")),
            Dependency::LoadPlugin(PathBuf::from("RgTools.dll")),
            Dependency::LoadPlugin(PathBuf::from("mt_masktools-26.dll")),
            Dependency::Import(PathBuf::from("SMDegrain.avsi")),
        ];
        if self.options.prefilter == DegrainPrefilter::KnlMeans {
            dependencies.push(Dependency::LoadPlugin(PathBuf::from("KNLMeansCL.dll")));
        }

        let lsb = state.samples.is_extended();
        let line = format!(
            "SMDegrain(tr=2, thSAD={}, prefilter={}, lsb_in={}, lsb_out={})",
            self.options.strength,
            self.prefilter(),
            lsb,
            lsb
        );
        Ok((Some(dependencies), vec![Line::Term(line)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{format_state::SampleFormat, settings::ColorMatrix};

    #[test]
    fn lsb_follows_samples() {
        let degrain = SMDegrain {
            options: DegrainOptions::default(),
        };
        let state = FormatState::new(ColorMatrix::Rec709);

        let (_, lines) = degrain.generate_script(&state.with_samples(SampleFormat::Extended)).unwrap();
        assert!(lines[0].to_string().ends_with("lsb_in=true, lsb_out=true)"));
        let (_, lines) = degrain.generate_script(&state).unwrap();
        assert!(lines[0].to_string().ends_with("lsb_in=false, lsb_out=false)"));
    }
}
