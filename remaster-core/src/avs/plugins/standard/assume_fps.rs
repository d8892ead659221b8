use crate::{
    avs::script_builder::{
        AvisynthPluginScript,
        script::{Dependencies, Line},
    },
    error::ScriptError,
    format_state::FormatState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssumeFPS {
    pub numerator:   u64,
    pub denominator: u64,
}

impl AvisynthPluginScript for AssumeFPS {
    #[inline]
    fn generate_script(
        &self,
        _state: &FormatState,
    ) -> Result<(Option<Dependencies>, Vec<Line>), ScriptError> {
        Ok((None, vec![Line::Term(format!(
            "AssumeFPS({}, {})",
            self.numerator, self.denominator
        ))]))
    }
}
