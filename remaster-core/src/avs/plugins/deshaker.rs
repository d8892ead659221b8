use std::path::PathBuf;

use crate::{
    avs::script_builder::{
        AvisynthPluginScript,
        script::{Dependencies, Dependency, Line},
    },
    error::ScriptError,
    format_state::FormatState,
    settings::DeshakerOptions,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeshakerPass {
    /// Writes the motion log
    Analyze,
    /// Reads the motion log and stabilizes
    Stabilize,
}

/// VirtualDub's Deshaker, run through the RGB32 bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deshaker {
    pub pass:     DeshakerPass,
    pub log_file: PathBuf,
    pub options:  DeshakerOptions,
}

impl Deshaker {
    /// Deshaker's positional settings string. Frame size is spliced in by the
    /// engine.
    fn settings(&self) -> String {
        let pass = match self.pass {
            DeshakerPass::Analyze => 1,
            DeshakerPass::Stabilize => 2,
        };
        let smoothness = self.options.smoothness;
        format!(
            "\"19|{}|30|4|1|0|1|0|\" + String(Width) + \"|\" + String(Height) + \
             \"|1|2|{s}|{s}|{s}|{s}|4|1|{}|2|8|30|300|4|{}|0|0|0|0|0|0|0|0|0|0|0|0|0|1|15|15|5|15|0|0|30|30|0|0|0|0|1|0|0|10|1000|1|88|1|1|20|5000|100|20|1\"",
            pass,
            u8::from(self.options.edge_compensation),
            self.log_file.display(),
            s = smoothness,
        )
    }
}

impl AvisynthPluginScript for Deshaker {
    #[inline]
    fn generate_script(
        &self,
        _state: &FormatState,
    ) -> Result<(Option<Dependencies>, Vec<Line>), ScriptError> {
        let dependencies = vec![Dependency::LoadVirtualDubPlugin {
            path:    PathBuf::from("Deshaker.vdf"),
            name:    "Deshaker".to_owned(),
            preroll: 0,
        }];

        Ok((Some(dependencies), vec![
            Line::term("ConvertToRGB32()"),
            Line::Term(format!("Deshaker({})", self.settings())),
            Line::term("ConvertToYV12()"),
        ]))
    }
}
