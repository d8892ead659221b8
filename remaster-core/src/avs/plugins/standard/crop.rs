use crate::{
    avs::script_builder::{
        AvisynthPluginScript,
        script::{Dependencies, Line},
    },
    error::ScriptError,
    format_state::FormatState,
    settings::CropRect,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Crop {
    pub left:   u32,
    pub top:    u32,
    pub right:  u32,
    pub bottom: u32,
}

impl From<CropRect> for Crop {
    #[inline]
    fn from(rect: CropRect) -> Self {
        Self {
            left:   rect.left,
            top:    rect.top,
            right:  rect.right,
            bottom: rect.bottom,
        }
    }
}

impl AvisynthPluginScript for Crop {
    #[inline]
    fn generate_script(
        &self,
        _state: &FormatState,
    ) -> Result<(Option<Dependencies>, Vec<Line>), ScriptError> {
        Ok((None, vec![Line::Term(format!(
            "Crop({}, {}, -{}, -{})",
            self.left, self.top, self.right, self.bottom
        ))]))
    }
}
