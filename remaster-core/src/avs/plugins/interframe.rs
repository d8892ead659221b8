use std::path::PathBuf;

use crate::{
    avs::script_builder::{
        AvisynthPluginScript,
        script::{Dependencies, Dependency, Line},
    },
    error::ScriptError,
    format_state::FormatState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolatedRate {
    /// Multiple of the clip's own frame rate
    Multiply(u8),
    Fixed(u64, u64),
}

/// Motion interpolated frame rate conversion through SVP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterFrame {
    pub rate:    InterpolatedRate,
    pub threads: usize,
    pub gpu:     bool,
}

impl AvisynthPluginScript for InterFrame {
    #[inline]
    fn generate_script(
        &self,
        _state: &FormatState,
    ) -> Result<(Option<Dependencies>, Vec<Line>), ScriptError> {
        let dependencies = vec![
            Dependency::LoadPlugin(PathBuf::from("svpflow1.dll")),
            Dependency::LoadPlugin(PathBuf::from("svpflow2.dll")),
            Dependency::Import(PathBuf::from("InterFrame2.avsi")),
        ];

        let (numerator, denominator) = match self.rate {
            InterpolatedRate::Multiply(factor) => (
                format!("FrameRateNumerator*{}", factor),
                "FrameRateDenominator".to_owned(),
            ),
            InterpolatedRate::Fixed(numerator, denominator) => {
                (numerator.to_string(), denominator.to_string())
            },
        };
        let line = format!(
            "InterFrame(Cores={}, GPU={}, NewNum={}, NewDen={})",
            self.threads, self.gpu, numerator, denominator
        );

        Ok((Some(dependencies), vec![Line::Term(line)]))
    }
}
