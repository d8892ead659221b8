use crate::{
    avs::script_builder::{
        AvisynthPluginScript,
        script::{Dependencies, Line},
    },
    error::ScriptError,
    format_state::FormatState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefetch {
    pub threads: usize,
}

impl AvisynthPluginScript for Prefetch {
    #[inline]
    fn generate_script(
        &self,
        _state: &FormatState,
    ) -> Result<(Option<Dependencies>, Vec<Line>), ScriptError> {
        Ok((None, vec![Line::Term(format!("Prefetch({})", self.threads))]))
    }
}
