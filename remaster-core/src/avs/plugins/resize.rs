use std::path::PathBuf;

use crate::{
    avs::{
        plugins::dither::dither_dependencies,
        script_builder::{
            AvisynthPluginScript,
            script::{Dependencies, Dependency, Line},
        },
    },
    error::ScriptError,
    format_state::{FormatState, Requirement},
    settings::DownscaleMethod,
};

impl DownscaleMethod {
    /// Built-in resizer implementing the kernel, if any.
    #[inline]
    pub fn resizer(self) -> Option<&'static str> {
        match self {
            DownscaleMethod::Bicubic => Some("BicubicResize"),
            DownscaleMethod::Spline36 => Some("Spline36Resize"),
            DownscaleMethod::Lanczos => Some("LanczosResize"),
            DownscaleMethod::SSim => None,
        }
    }

    /// Input the resizer for this kernel accepts.
    #[inline]
    pub fn requirement(self) -> Requirement {
        match self {
            DownscaleMethod::SSim => Requirement::Standard,
            _ => Requirement::Any,
        }
    }

    fn dither_kernel(self) -> &'static str {
        match self {
            DownscaleMethod::Bicubic => "bicubic",
            DownscaleMethod::Spline36 | DownscaleMethod::SSim => "spline36",
            DownscaleMethod::Lanczos => "lanczos",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resize {
    pub width:  u32,
    pub height: u32,
    pub method: DownscaleMethod,
}

impl AvisynthPluginScript for Resize {
    #[inline]
    fn generate_script(
        &self,
        state: &FormatState,
    ) -> Result<(Option<Dependencies>, Vec<Line>), ScriptError> {
        if state.samples.is_extended() {
            state.require("Resize", self.method.requirement())?;
            let line = format!(
                "Dither_resize16nr({}, {}, kernel=\"{}\")",
                self.width,
                self.height,
                self.method.dither_kernel()
            );
            return Ok((Some(dither_dependencies()), vec![Line::Term(line)]));
        }

        Ok(match self.method.resizer() {
            Some(resizer) => {
                (None, vec![Line::Term(format!("{}({}, {})", resizer, self.width, self.height))])
            },
            None => (
                Some(vec![
                    Dependency::LoadPlugin(PathBuf::from("mt_masktools-26.dll")),
                    Dependency::Import(PathBuf::from("SSimDownscaler.avsi")),
                ]),
                vec![Line::Term(format!("SSimDownscaler({}, {})", self.width, self.height))],
            ),
        })
    }
}
