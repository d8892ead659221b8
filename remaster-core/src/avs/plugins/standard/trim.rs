use std::fmt::Write;

use crate::{
    avs::script_builder::{
        AvisynthPluginScript,
        script::{Dependencies, Line},
    },
    error::ScriptError,
    format_state::FormatState,
};

/// Marks trim lines that restrict a script to one segment.
pub const SEGMENT_MARKER: &str = "segment";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Trim {
    pub first:   usize,
    /// Last frame, inclusive. Until the end of the clip when unset.
    pub last:    Option<usize>,
    /// Render with the segment marker so the line can be found again.
    pub segment: bool,
}

impl AvisynthPluginScript for Trim {
    #[inline]
    fn generate_script(
        &self,
        _state: &FormatState,
    ) -> Result<(Option<Dependencies>, Vec<Line>), ScriptError> {
        let mut line = String::new();
        // AviSynth reads a last frame of 0 as "to the end" and a negative one
        // as a frame count
        match self.last {
            Some(last) if last <= self.first => write!(&mut line, "Trim({}, -1)", self.first)?,
            Some(last) => write!(&mut line, "Trim({}, {})", self.first, last)?,
            None => write!(&mut line, "Trim({}, 0)", self.first)?,
        }

        let line = if self.segment {
            Line::TermWithComment(line, SEGMENT_MARKER.to_owned())
        } else {
            Line::Term(line)
        };
        Ok((None, vec![line]))
    }
}
