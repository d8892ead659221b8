use std::{fmt::Write, path::PathBuf};

use crate::{
    avs::script_builder::{
        AvisynthPluginScript,
        script::{Dependencies, Dependency, Line},
    },
    error::ScriptError,
    format_state::FormatState,
    settings::{ColorMatrix, DownscaleMethod, SuperResOptions, UpscaleMethod},
};

/// Size the last doubling pass scales down to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalResize {
    pub width:  u32,
    pub height: u32,
    pub kernel: DownscaleMethod,
}

/// One doubling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upscale {
    pub method:       UpscaleMethod,
    /// Quality boost variant, which also converts the color matrix to Rec.709.
    pub super_res:    Option<SuperResOptions>,
    /// Set on the last pass only.
    pub last_pass:    bool,
    pub final_resize: Option<FinalResize>,
    pub threads:      usize,
}

const NNEDI3_DOUBLE: &str = "nnedi3_rpow2(2, nns=4, cshift=\"Spline16Resize\"";

impl Upscale {
    fn dependencies(&self) -> Dependencies {
        let shader = || Dependency::LoadPlugin(PathBuf::from("Shader.dll"));
        let nnedi3 = || Dependency::LoadPlugin(PathBuf::from("nnedi3.dll"));
        let super_xbr = || Dependency::Import(PathBuf::from("SuperXBR.avsi"));

        match (self.method, self.super_res.is_some()) {
            (UpscaleMethod::Nnedi3, false) => vec![nnedi3()],
            (UpscaleMethod::SuperXbr, false) => vec![shader(), super_xbr()],
            (UpscaleMethod::Nnedi3, true) => {
                vec![shader(), nnedi3(), Dependency::Import(PathBuf::from("SuperRes.avsi"))]
            },
            (UpscaleMethod::SuperXbr, true) => vec![
                shader(),
                super_xbr(),
                Dependency::Import(PathBuf::from("SuperResXBR.avsi")),
            ],
        }
    }

    fn write_final_resize(&self, line: &mut String) -> Result<(), ScriptError> {
        if let Some(resize) = self.final_resize {
            write!(
                line,
                ", fWidth={}, fHeight={}, fKernel=\"{}\"",
                resize.width, resize.height, resize.kernel
            )?;
        }
        Ok(())
    }
}

impl AvisynthPluginScript for Upscale {
    #[inline]
    fn generate_script(
        &self,
        state: &FormatState,
    ) -> Result<(Option<Dependencies>, Vec<Line>), ScriptError> {
        let mut line = String::new();

        match (self.method, self.super_res) {
            (UpscaleMethod::Nnedi3, None) => match self.final_resize.and_then(|resize| {
                resize.kernel.resizer().map(|resizer| (resize, resizer))
            }) {
                Some((resize, resizer)) => write!(
                    &mut line,
                    "nnedi3_rpow2(2, nns=4, cshift=\"{}\", fwidth={}, fheight={})",
                    resizer, resize.width, resize.height
                )?,
                None => write!(&mut line, "{})", NNEDI3_DOUBLE)?,
            },
            (UpscaleMethod::SuperXbr, None) => {
                let extended = state.samples.is_extended();
                write!(&mut line, "SuperXBR(lsb_in={}, lsb_out={}", extended, extended)?;
                self.write_final_resize(&mut line)?;
                write!(&mut line, ")")?;
            },
            (method, Some(options)) => {
                let matrix = state.pending_matrix.unwrap_or(ColorMatrix::Rec709);
                let strength = f64::from(options.strength) / 100.0;
                let softness = f64::from(options.softness) / 100.0;
                match method {
                    UpscaleMethod::Nnedi3 => write!(
                        &mut line,
                        "SuperRes({}, {:.2}, {:.2}, \"\"\"{}, threads={})\"\"\"",
                        options.passes, strength, softness, NNEDI3_DOUBLE, self.threads
                    )?,
                    UpscaleMethod::SuperXbr => write!(
                        &mut line,
                        "SuperResXBR({}, {:.2}, {:.2}",
                        options.passes, strength, softness
                    )?,
                }
                // Passes after the depth flush run on 8-bit samples
                let lsb = state.samples.is_extended();
                write!(&mut line, ", MatrixIn=\"{}\", lsb_in={}, lsb_out={}", matrix, lsb, lsb)?;
                if self.last_pass && state.samples.is_full_chroma() {
                    write!(&mut line, ", fCsp=\"YV12\"")?;
                }
                self.write_final_resize(&mut line)?;
                write!(&mut line, ")")?;
            },
        }

        Ok((Some(self.dependencies()), vec![Line::Term(line)]))
    }
}
