use std::{fmt::Write, path::PathBuf};

use crate::{
    avs::script_builder::{
        AvisynthPluginScript,
        script::{Dependencies, Dependency, Line},
    },
    error::ScriptError,
    format_state::FormatState,
    util::path::ascii_safe_path,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LWLibavVideoSource {
    /// The path of the source file.
    pub source: PathBuf,
    /// Output frame rate as numerator and denominator for VFR to CFR
    /// conversion. The average frame rate is used when unset.
    pub fps:    Option<(u64, u64)>,
}

impl AvisynthPluginScript for LWLibavVideoSource {
    #[inline]
    fn generate_script(
        &self,
        _state: &FormatState,
    ) -> Result<(Option<Dependencies>, Vec<Line>), ScriptError> {
        let dependencies = vec![Dependency::LoadPlugin(PathBuf::from("LSMASHSource.dll"))];

        let line = {
            let mut line = String::new();
            write!(
                &mut line,
                "LWLibavVideoSource(\"{}\", cache=false",
                ascii_safe_path(&self.source).display()
            )?;
            if let Some((numerator, denominator)) = self.fps {
                write!(&mut line, ", fpsnum={}, fpsden={}", numerator, denominator)?;
            }
            write!(&mut line, ")")?;
            line
        };

        Ok((Some(dependencies), vec![Line::Term(line)]))
    }
}
