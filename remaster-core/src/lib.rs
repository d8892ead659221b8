//! Compiles AviSynth filter graphs for video remastering jobs and encodes
//! them in resumable, independently encoded segments.

pub mod avs;
pub mod compiler;
pub mod coordinator;
pub mod error;
pub mod format_state;
pub mod queue;
pub mod segments;
pub mod settings;
pub mod tools;
pub mod util;

pub use crate::{
    compiler::{CompileOptions, compile},
    coordinator::{CoordinatorOptions, EncodeReport, SegmentCoordinator},
    error::{ScriptError, SettingsError, ToolError},
    queue::{EncodeQueue, JobOutcome},
    segments::{SegmentAnalysis, SegmentInfo},
    settings::EncodeSettings,
    tools::{ExternalTools, ToolPaths},
};
