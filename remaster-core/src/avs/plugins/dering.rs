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
    format_state::FormatState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HQDeringmod;

impl AvisynthPluginScript for HQDeringmod {
    #[inline]
    fn generate_script(
        &self,
        state: &FormatState,
    ) -> Result<(Option<Dependencies>, Vec<Line>), ScriptError> {
        let lsb = state.samples.is_extended();
        let mut dependencies = if lsb { dither_dependencies() } else { vec![] };
        dependencies.push(Dependency::LoadPlugin(PathBuf::from("RgTools.dll")));
        dependencies.push(Dependency::Import(PathBuf::from("HQDeringmod.avsi")));

        let line = format!("HQDeringmod(lsb_in={}, lsb={})", lsb, lsb);
        Ok((Some(dependencies), vec![Line::Term(line)]))
    }
}
