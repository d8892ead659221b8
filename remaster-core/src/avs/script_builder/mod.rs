use crate::{
    avs::script_builder::script::{Dependencies, Line},
    error::ScriptError,
    format_state::FormatState,
};

pub mod script;

/// A filter family that can render itself as AviSynth statements for the
/// sample format the graph is currently in.
pub trait AvisynthPluginScript {
    fn generate_script(
        &self,
        state: &FormatState,
    ) -> Result<(Option<Dependencies>, Vec<Line>), ScriptError>;
}
