use std::path::PathBuf;

use crate::{
    avs::script_builder::{
        AvisynthPluginScript,
        script::{Dependencies, Dependency, Line},
    },
    error::ScriptError,
    format_state::{Conversion, FormatState},
    settings::ChromaPlacement,
};

/// Dither tools and the masktools build they rely on.
#[inline]
pub fn dither_dependencies() -> Dependencies {
    vec![
        Dependency::LoadPlugin(PathBuf::from("mt_masktools-26.dll")),
        Dependency::LoadPlugin(PathBuf::from("dither.dll")),
        Dependency::Import(PathBuf::from("dither.avsi")),
    ]
}

/// Sample format conversion between 8-bit and stacked 16-bit, and between
/// 4:2:0 and 4:4:4 chroma.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DitherConversion {
    pub conversion:       Conversion,
    pub chroma_placement: ChromaPlacement,
}

impl AvisynthPluginScript for DitherConversion {
    #[inline]
    fn generate_script(
        &self,
        state: &FormatState,
    ) -> Result<(Option<Dependencies>, Vec<Line>), ScriptError> {
        if state.samples != self.conversion.input() {
            return Err(ScriptError::InvalidConversion {
                conversion: self.conversion,
                actual:     state.samples,
            });
        }

        let line = match self.conversion {
            Conversion::PromoteDepth => "Dither_convert_8_to_16()".to_owned(),
            // Stacked clips are twice as high as the picture
            Conversion::PromoteChroma => format!(
                "Dither_resize16nr(Width, Height/2, csp=\"YV24\", cplace=\"{}\")",
                self.chroma_placement
            ),
            Conversion::ReduceChroma => {
                "Dither_resize16nr(Width, Height/2, csp=\"YV12\")".to_owned()
            },
            Conversion::FlushDepth => "DitherPost()".to_owned(),
        };

        Ok((Some(dither_dependencies()), vec![Line::Term(line)]))
    }
}
