// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::path::Path;

use serde::Deserialize;

use crate::config::ModuleConfig;
use crate::errors::ConfigError;

/// The top-level job document.
///
/// The recognized shape, in JSON or YAML:
///
/// ```yaml
/// source:
///   plugin: number_generator
///   config:
///     max_numbers: 10
/// modules:
///   - plugin: running_sum
///     module_label: totals
///     config: {}
/// max_allowed_parallelism: 4
/// ```
#[derive(Debug, Deserialize)]
pub struct JobConfig {
    pub source: PluginSpec,
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
    #[serde(default)]
    pub max_allowed_parallelism: Option<usize>,
}

/// The source entry: which plugin, with which options.
#[derive(Debug, Deserialize)]
pub struct PluginSpec {
    pub plugin: String,
    #[serde(default)]
    pub config: ModuleConfig,
}

/// One module entry: which plugin, registered under which label, with
/// which options.
#[derive(Debug, Deserialize)]
pub struct ModuleSpec {
    pub plugin: String,
    pub module_label: String,
    #[serde(default)]
    pub config: ModuleConfig,
}

impl JobConfig {
    /// The worker pool size this job asks for, defaulting to the host's
    /// hardware concurrency. Zero is rejected.
    pub fn parallelism(&self) -> Result<usize, ConfigError> {
        match self.max_allowed_parallelism {
            Some(0) => Err(ConfigError::InvalidParallelism { value: 0 }),
            Some(n) => Ok(n),
            None => Ok(std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)),
        }
    }
}

/// Loads and validates a job document; the format is chosen by file
/// extension (`.json`, `.yaml`, `.yml`).
pub fn load_job_config(path: impl AsRef<Path>) -> Result<JobConfig, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let config: JobConfig = match extension.as_str() {
        "json" => serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?,
        "yaml" | "yml" => serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?,
        other => {
            return Err(ConfigError::UnsupportedFormat {
                extension: other.to_string(),
            })
        }
    };

    // Surface a zero parallelism at load time rather than at launch.
    config.parallelism()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &tempfile::TempDir, name: &str, text: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).expect("create");
        file.write_all(text.as_bytes()).expect("write");
        path
    }

    #[test]
    fn loads_json_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(
            &dir,
            "job.json",
            r#"{
                "source": {"plugin": "number_generator", "config": {"max_numbers": 5}},
                "modules": [
                    {"plugin": "running_sum", "module_label": "totals", "config": {}}
                ],
                "max_allowed_parallelism": 2
            }"#,
        );

        let config = load_job_config(&path).expect("loads");
        assert_eq!(config.source.plugin, "number_generator");
        assert_eq!(config.modules.len(), 1);
        assert_eq!(config.modules[0].module_label, "totals");
        assert_eq!(config.parallelism().expect("valid"), 2);
    }

    #[test]
    fn loads_yaml_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(
            &dir,
            "job.yaml",
            "source:\n  plugin: number_generator\n  config:\n    max_numbers: 3\n",
        );

        let config = load_job_config(&path).expect("loads");
        assert_eq!(config.source.plugin, "number_generator");
        assert!(config.modules.is_empty());
        assert_eq!(
            config.source.config.get::<usize>("max_numbers").expect("typed"),
            3
        );
    }

    #[test]
    fn rejects_unknown_extensions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(&dir, "job.toml", "source = 1");
        assert!(matches!(
            load_job_config(&path).unwrap_err(),
            ConfigError::UnsupportedFormat { .. }
        ));
    }

    #[test]
    fn rejects_zero_parallelism() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(
            &dir,
            "job.json",
            r#"{"source": {"plugin": "s"}, "max_allowed_parallelism": 0}"#,
        );
        assert!(matches!(
            load_job_config(&path).unwrap_err(),
            ConfigError::InvalidParallelism { value: 0 }
        ));
    }

    #[test]
    fn missing_files_are_io_errors() {
        assert!(matches!(
            load_job_config("does/not/exist.json").unwrap_err(),
            ConfigError::Io { .. }
        ));
    }

    #[test]
    fn parse_errors_carry_the_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(&dir, "bad.json", "{not json");
        let err = load_job_config(&path).unwrap_err();
        assert!(err.to_string().contains("bad.json"));
    }
}
