use strum::{Display, EnumIter, IntoStaticStr};

use crate::{error::ScriptError, settings::ColorMatrix};

/// Working sample representation between two filters. Full chroma only exists
/// in combination with extended depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, IntoStaticStr)]
pub enum SampleFormat {
    /// 8-bit 4:2:0
    #[strum(serialize = "8-bit 4:2:0")]
    Standard,
    /// 16-bit stacked 4:2:0
    #[strum(serialize = "16-bit stacked 4:2:0")]
    Extended,
    /// 16-bit stacked 4:4:4
    #[strum(serialize = "16-bit stacked 4:4:4")]
    ExtendedFullChroma,
}

impl SampleFormat {
    #[inline]
    pub fn is_extended(self) -> bool {
        !matches!(self, SampleFormat::Standard)
    }

    #[inline]
    pub fn is_full_chroma(self) -> bool {
        matches!(self, SampleFormat::ExtendedFullChroma)
    }
}

/// Input format a stage accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, IntoStaticStr)]
pub enum Requirement {
    #[strum(serialize = "any")]
    Any,
    #[strum(serialize = "8-bit 4:2:0")]
    Standard,
    #[strum(serialize = "16-bit stacked 4:2:0")]
    Extended,
    #[strum(serialize = "16-bit stacked 4:4:4")]
    ExtendedFullChroma,
}

impl Requirement {
    #[inline]
    pub fn satisfied_by(self, samples: SampleFormat) -> bool {
        match self {
            Requirement::Any => true,
            Requirement::Standard => samples == SampleFormat::Standard,
            Requirement::Extended => samples == SampleFormat::Extended,
            Requirement::ExtendedFullChroma => samples == SampleFormat::ExtendedFullChroma,
        }
    }
}

/// What a stage can be fed. Resolved against the current state into a
/// [`Requirement`] by [`FormatState::requirement_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contract {
    /// Runs on whatever it is fed
    Any,
    /// 8-bit 4:2:0 only
    Standard,
    /// Runs on stacked 16-bit samples while depth has not been flushed back,
    /// on 8-bit samples afterwards.
    PrefersExtended { full_chroma: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, IntoStaticStr)]
pub enum Conversion {
    /// 8-bit to stacked 16-bit
    PromoteDepth,
    /// 4:2:0 to 4:4:4 at 16-bit
    PromoteChroma,
    /// 4:4:4 to 4:2:0 at 16-bit
    ReduceChroma,
    /// Stacked 16-bit back to 8-bit, dithered
    FlushDepth,
}

impl Conversion {
    /// Format the conversion must be applied to.
    #[inline]
    pub fn input(self) -> SampleFormat {
        match self {
            Conversion::PromoteDepth => SampleFormat::Standard,
            Conversion::PromoteChroma => SampleFormat::Extended,
            Conversion::ReduceChroma => SampleFormat::ExtendedFullChroma,
            Conversion::FlushDepth => SampleFormat::Extended,
        }
    }

    #[inline]
    pub fn output(self) -> SampleFormat {
        match self {
            Conversion::PromoteDepth => SampleFormat::Extended,
            Conversion::PromoteChroma => SampleFormat::ExtendedFullChroma,
            Conversion::ReduceChroma => SampleFormat::Extended,
            Conversion::FlushDepth => SampleFormat::Standard,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatState {
    pub samples:        SampleFormat,
    /// Source matrix still waiting for a conversion to Rec.709.
    pub pending_matrix: Option<ColorMatrix>,
    /// Depth was promoted at some point. A graph promotes at most once.
    pub depth_promoted: bool,
}

impl FormatState {
    /// State right after opening a source with the given color matrix.
    #[inline]
    pub fn new(source_matrix: ColorMatrix) -> Self {
        Self {
            samples:        SampleFormat::Standard,
            pending_matrix: (source_matrix != ColorMatrix::Rec709).then_some(source_matrix),
            depth_promoted: false,
        }
    }

    /// Nothing left to convert before the script may be handed to an encoder.
    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.samples == SampleFormat::Standard && self.pending_matrix.is_none()
    }

    /// Conversions that take the current samples to a format satisfying
    /// `requirement`. Empty when the requirement already holds.
    #[inline]
    pub fn transitions_to(&self, requirement: Requirement) -> Vec<Conversion> {
        use Conversion::{FlushDepth, PromoteChroma, PromoteDepth, ReduceChroma};

        if requirement.satisfied_by(self.samples) {
            return vec![];
        }

        match (self.samples, requirement) {
            (SampleFormat::Standard, Requirement::Extended) => vec![PromoteDepth],
            (SampleFormat::Standard, Requirement::ExtendedFullChroma) => {
                vec![PromoteDepth, PromoteChroma]
            },
            (SampleFormat::Extended, Requirement::Standard) => vec![FlushDepth],
            (SampleFormat::Extended, Requirement::ExtendedFullChroma) => vec![PromoteChroma],
            (SampleFormat::ExtendedFullChroma, Requirement::Standard) => {
                vec![ReduceChroma, FlushDepth]
            },
            (SampleFormat::ExtendedFullChroma, Requirement::Extended) => vec![ReduceChroma],
            _ => vec![],
        }
    }

    /// Requirement a stage with `contract` imposes on the current samples.
    /// Extended work is only requested while the promotion is still ahead or
    /// its samples have not been flushed yet.
    #[inline]
    pub fn requirement_for(&self, contract: Contract) -> Requirement {
        match contract {
            Contract::Any => Requirement::Any,
            Contract::Standard => Requirement::Standard,
            Contract::PrefersExtended {
                full_chroma,
            } => match self.samples {
                SampleFormat::Standard if self.depth_promoted => Requirement::Standard,
                SampleFormat::ExtendedFullChroma => Requirement::ExtendedFullChroma,
                _ if full_chroma => Requirement::ExtendedFullChroma,
                _ => Requirement::Extended,
            },
        }
    }

    #[inline]
    pub fn apply(self, conversion: Conversion) -> Result<Self, ScriptError> {
        if self.samples != conversion.input() {
            return Err(ScriptError::InvalidConversion {
                conversion,
                actual: self.samples,
            });
        }
        if conversion == Conversion::PromoteDepth && self.depth_promoted {
            return Err(ScriptError::RepeatedPromotion);
        }
        Ok(Self {
            samples: conversion.output(),
            depth_promoted: self.depth_promoted || conversion == Conversion::PromoteDepth,
            ..self
        })
    }

    #[inline]
    pub fn require(&self, stage: &'static str, requirement: Requirement) -> Result<(), ScriptError> {
        if requirement.satisfied_by(self.samples) {
            Ok(())
        } else {
            Err(ScriptError::FormatMismatch {
                stage,
                required: requirement,
                actual: self.samples,
            })
        }
    }

    #[inline]
    pub fn with_samples(self, samples: SampleFormat) -> Self {
        Self {
            samples,
            ..self
        }
    }

    #[inline]
    pub fn matrix_corrected(self) -> Self {
        Self {
            pending_matrix: None,
            ..self
        }
    }
}
