use std::{
    path::{Path, PathBuf},
    sync::Arc,
    thread::available_parallelism,
    time::Duration,
};

use remaster_core::{
    CompileOptions,
    CoordinatorOptions,
    ExternalTools,
    ToolPaths,
    compiler::gpu_probe_script,
    tools::{ProcessPriority, RunOptions, probe_capability},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_GPU_PROBE_TIMEOUT: u64 = 20;

/// Machine wide settings shared by every job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub tools:              ToolPaths,
    /// Directory the filter plugins are loaded from.
    pub plugin_directory:   PathBuf,
    /// Working directory of new jobs.
    pub temp:               PathBuf,
    /// Encoder instances per job for new jobs.
    pub parallelism:        u8,
    /// Jobs encoded at the same time.
    pub slots:              usize,
    /// CPU threads shared by the encoder instances of one job. Defaults to
    /// every available thread.
    pub threads:            Option<usize>,
    /// Force OpenCL filters on or off instead of probing the GPU.
    pub gpu:                Option<bool>,
    /// Seconds
    pub gpu_probe_timeout:  u64,
    pub low_priority:       bool,
    pub keep_intermediates: bool,
}

impl Default for Configuration {
    #[inline]
    fn default() -> Self {
        Self {
            tools:              ToolPaths::default(),
            plugin_directory:   PathBuf::from("plugins"),
            temp:               PathBuf::from(crate::DEFAULT_TEMP_PATH),
            parallelism:        1,
            slots:              1,
            threads:            None,
            gpu:                None,
            gpu_probe_timeout:  DEFAULT_GPU_PROBE_TIMEOUT,
            low_priority:       false,
            keep_intermediates: false,
        }
    }
}

impl Configuration {
    #[inline]
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        Self::save_data(self, path)
    }

    #[inline]
    pub fn save_data(data: &Configuration, path: &Path) -> Result<(), ConfigError> {
        let mut buffer = vec![];
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        data.serialize(&mut serializer).map_err(ConfigError::Serialize)?;
        if let Some(directory) = path.parent() {
            std::fs::create_dir_all(directory).map_err(ConfigError::Save)?;
        }
        std::fs::write(path, buffer).map_err(ConfigError::Save)?;
        Ok(())
    }

    /// Read the configuration file. A missing file yields the defaults.
    #[inline]
    pub fn load(config_path: &Path) -> Result<Configuration, ConfigError> {
        if !config_path.exists() {
            debug!("No configuration at {}, using defaults", config_path.display());
            return Ok(Configuration::default());
        }
        let data = std::fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            path: config_path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source,
        })
    }

    #[inline]
    pub fn available_threads(&self) -> usize {
        self.threads
            .unwrap_or_else(|| available_parallelism().map_or(1, std::num::NonZero::get))
            .max(1)
    }

    #[inline]
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            timeout:  None,
            priority: if self.low_priority { ProcessPriority::Low } else { ProcessPriority::Normal },
            display:  false,
        }
    }

    /// Whether OpenCL filters can run on the GPU, probing when the
    /// configuration does not say.
    #[inline]
    pub fn detect_gpu(&self, tools: &Arc<ExternalTools>, scratch: &Path) -> bool {
        if let Some(gpu) = self.gpu {
            return gpu;
        }

        let script = match gpu_probe_script(&self.plugin_directory)
            .and_then(|probe| probe.write(&scratch.join("GpuProbe.avs")))
        {
            Ok(script) => script,
            Err(err) => {
                warn!("Could not write the GPU probe: {}", err);
                return false;
            },
        };
        let gpu = probe_capability(
            Arc::clone(tools),
            script,
            Duration::from_secs(self.gpu_probe_timeout),
        );
        info!("OpenCL filtering on the GPU: {}", if gpu { "available" } else { "unavailable" });
        gpu
    }

    #[inline]
    pub fn compile_options(&self, gpu: bool, preview: bool, parallelism: u8) -> CompileOptions {
        CompileOptions {
            plugin_directory: self.plugin_directory.clone(),
            threads: (self.available_threads() / usize::from(parallelism.max(1))).max(1),
            gpu,
            preview,
        }
    }

    #[inline]
    pub fn coordinator_options(&self, gpu: bool) -> CoordinatorOptions {
        CoordinatorOptions {
            compile:            CompileOptions {
                plugin_directory: self.plugin_directory.clone(),
                gpu,
                ..CompileOptions::default()
            },
            available_threads:  self.available_threads(),
            run:                self.run_options(),
            keep_intermediates: self.keep_intermediates,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path:   PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to serialize config file: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("Failed to save config file: {0}")]
    Save(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let configuration = Configuration::load(&dir.path().join("remaster.json")).unwrap();
        assert_eq!(configuration, Configuration::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("remaster.json");
        std::fs::write(&path, r#"{ "parallelism": 4, "gpu": false }"#).unwrap();

        let configuration = Configuration::load(&path).unwrap();
        assert_eq!(configuration.parallelism, 4);
        assert_eq!(configuration.gpu, Some(false));
        assert_eq!(configuration.tools, ToolPaths::default());
    }

    #[test]
    fn malformed_file_names_its_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("remaster.json");
        std::fs::write(&path, "{ parallelism").unwrap();

        let err = Configuration::load(&path).unwrap_err();
        assert!(err.to_string().contains("remaster.json"));
    }

    #[test]
    fn saved_file_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("remaster.json");
        let configuration = Configuration {
            threads: Some(12),
            keep_intermediates: true,
            ..Configuration::default()
        };
        configuration.save(&path).unwrap();

        assert!(std::fs::read_to_string(&path).unwrap().contains("\n    \"threads\": 12"));
        assert_eq!(Configuration::load(&path).unwrap(), configuration);
    }

    #[test]
    fn thread_budget_is_split_between_instances() {
        let configuration = Configuration {
            threads: Some(8),
            ..Configuration::default()
        };
        assert_eq!(configuration.compile_options(false, false, 3).threads, 2);
        assert_eq!(configuration.compile_options(false, false, 16).threads, 1);
    }
}
