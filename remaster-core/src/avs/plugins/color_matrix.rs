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
    settings::ColorMatrix,
};

/// Converts the source color matrix to Rec.709.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorMatrixFix {
    pub source: ColorMatrix,
}

impl ColorMatrixFix {
    /// Stacked 16-bit conversion through planar RGB48, which handles matrix
    /// and range in one step.
    fn stacked(&self, state: &FormatState) -> (Option<Dependencies>, Vec<Line>) {
        let (matrix, tv_range) = match self.source {
            ColorMatrix::Rec601 => ("601", true),
            ColorMatrix::Pc601 => ("601", false),
            ColorMatrix::Rec709 => ("709", true),
            ColorMatrix::Pc709 => ("709", false),
        };
        let csp = if state.samples.is_full_chroma() { "YV24" } else { "YV12" };

        (Some(dither_dependencies()), vec![
            Line::Term(format!(
                "Dither_convert_yuv_to_rgb(matrix=\"{}\", tv_range={}, lsb_in=true, output=\"rgb48y\")",
                matrix, tv_range
            )),
            Line::Term(format!(
                "Dither_convert_rgb_to_yuv(SelectEvery(3, 0), SelectEvery(3, 1), SelectEvery(3, 2), \
                 matrix=\"709\", lsb=true, output=\"{}\")",
                csp
            )),
        ])
    }
}

impl AvisynthPluginScript for ColorMatrixFix {
    #[inline]
    fn generate_script(
        &self,
        state: &FormatState,
    ) -> Result<(Option<Dependencies>, Vec<Line>), ScriptError> {
        if self.source == ColorMatrix::Rec709 {
            return Ok((None, vec![]));
        }
        if state.samples.is_extended() {
            return Ok(self.stacked(state));
        }

        let color_matrix = || Some(vec![Dependency::LoadPlugin(PathBuf::from("ColorMatrix.dll"))]);

        Ok(match self.source {
            ColorMatrix::Rec709 => (None, vec![]),
            ColorMatrix::Pc709 => (None, vec![Line::term("ColorYUV(levels=\"PC->TV\")")]),
            ColorMatrix::Rec601 => (color_matrix(), vec![Line::term(
                "ColorMatrix(mode=\"Rec.601->Rec.709\")",
            )]),
            ColorMatrix::Pc601 => (color_matrix(), vec![Line::term(
                "ColorMatrix(mode=\"Rec.601->Rec.709\", inputFR=true)",
            )]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format_state::SampleFormat;

    fn render(source: ColorMatrix, samples: SampleFormat) -> Vec<String> {
        let state = FormatState::new(source).with_samples(samples);
        let (_, lines) = ColorMatrixFix {
            source,
        }
        .generate_script(&state)
        .unwrap();
        lines.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn eight_bit_uses_dedicated_filters() {
        assert_eq!(render(ColorMatrix::Pc709, SampleFormat::Standard), vec!["ColorYUV(levels=\"PC->TV\")"]);
        assert_eq!(render(ColorMatrix::Rec601, SampleFormat::Standard), vec![
            "ColorMatrix(mode=\"Rec.601->Rec.709\")"
        ]);
        assert!(render(ColorMatrix::Rec709, SampleFormat::Standard).is_empty());
    }

    #[test]
    fn stacked_samples_convert_through_rgb() {
        let lines = render(ColorMatrix::Pc601, SampleFormat::Extended);
        assert_eq!(
            lines[0],
            "Dither_convert_yuv_to_rgb(matrix=\"601\", tv_range=false, lsb_in=true, output=\"rgb48y\")"
        );
        assert_eq!(
            lines[1],
            "Dither_convert_rgb_to_yuv(SelectEvery(3, 0), SelectEvery(3, 1), SelectEvery(3, 2), matrix=\"709\", lsb=true, output=\"YV12\")"
        );
        assert!(render(ColorMatrix::Rec601, SampleFormat::ExtendedFullChroma)[1].ends_with("output=\"YV24\")"));
    }
}
