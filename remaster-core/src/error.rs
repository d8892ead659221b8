use std::{path::PathBuf, process::ExitStatus, time::Duration};

use thiserror::Error;

use crate::format_state::{Conversion, Requirement, SampleFormat};

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Stage {stage} requires {required} input but the graph is {actual}")]
    FormatMismatch {
        stage:    &'static str,
        required: Requirement,
        actual:   SampleFormat,
    },
    #[error("Conversion {conversion} cannot be applied to {actual} samples")]
    InvalidConversion {
        conversion: Conversion,
        actual:     SampleFormat,
    },
    #[error("Depth was already promoted once in this graph")]
    RepeatedPromotion,
    #[error("Script left unresolved at output: {samples} samples, pending color matrix fix: {pending}")]
    Unresolved { samples: SampleFormat, pending: bool },
    #[error("Failed to format script line")]
    Format(#[from] std::fmt::Error),
    #[error("Failed to access script {path}: {source}")]
    Io {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} not found. Is it installed in the system path?")]
    NotFound { tool: String },
    #[error("Failed to launch {tool}: {source}")]
    Launch {
        tool:   String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool:   String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("{tool} did not finish within {timeout:?}")]
    Timeout { tool: String, timeout: Duration },
    #[error("{tool} was stopped because the job was cancelled")]
    Cancelled { tool: String },
    #[error("Failed to read output of {tool}: {source}")]
    Output {
        tool:   String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to serialize job settings")]
    Serialize(#[source] serde_json::Error),
    #[error("Failed to save job settings to {path}: {source}")]
    Save {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read job settings from {path}: {source}")]
    Read {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse job settings {path}: {source}")]
    Parse {
        path:   PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
