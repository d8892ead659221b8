use crate::{
    avs::script_builder::{
        AvisynthPluginScript,
        script::{Dependencies, Line},
    },
    error::ScriptError,
    format_state::FormatState,
};

/// Frames the picture so a preview is recognisable in the player, then hands
/// it over as RGB32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Preview;

pub const PREVIEW_MARKER: &str = "preview";

impl AvisynthPluginScript for Preview {
    #[inline]
    fn generate_script(
        &self,
        _state: &FormatState,
    ) -> Result<(Option<Dependencies>, Vec<Line>), ScriptError> {
        Ok((None, vec![
            Line::TermWithComment("AddBorders(2, 2, 2, 2, $FF0000)".to_owned(), PREVIEW_MARKER.to_owned()),
            Line::term("ConvertToRGB32()"),
        ]))
    }
}
