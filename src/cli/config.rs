//! `dagrunner.yaml` configuration.
//!
//! All fields are optional, missing fields fall back to CLI flags, which
//! themselves fall back to built-in defaults (CLI > config file >
//! default precedence).

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context as _, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct RunnerConfig {
    pub max_workers: Option<usize>,
    pub executor: Option<String>,
    pub tag_limits: Option<HashMap<String, usize>>,
    pub cache_dir: Option<String>,
    pub summary_json: Option<String>,
    pub timeout: Option<f64>,
}

impl RunnerConfig {
    /// Load configuration from a YAML file.
    ///
    /// - If `path` is `Some`, load that specific file (error if missing).
    /// - If `path` is `None`, auto-detect `dagrunner.yaml` in cwd; return
    ///   defaults if absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_path = match path {
            Some(p) => {
                if !p.exists() {
                    anyhow::bail!("Config file not found: {}", p.display());
                }
                p.to_path_buf()
            }
            None => {
                let default_path = Path::new("dagrunner.yaml");
                if !default_path.exists() {
                    return Ok(Self::default());
                }
                default_path.to_path_buf()
            }
        };

        let contents = std::fs::read_to_string(&file_path)
            .with_context(|| format!("Failed to read config file: {}", file_path.display()))?;

        let config: RunnerConfig = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", file_path.display()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_valid_config_all_fields() {
        let yaml = r#"
max_workers: 8
executor: "thread"
cache_dir: ".cache"
summary_json: "summary.json"
timeout: 30.0
tag_limits:
  io: 2
  cpu: 4
"#;
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(yaml.as_bytes()).unwrap();

        let cfg = RunnerConfig::load(Some(f.path())).unwrap();
        assert_eq!(cfg.max_workers, Some(8));
        assert_eq!(cfg.executor.as_deref(), Some("thread"));
        assert_eq!(cfg.cache_dir.as_deref(), Some(".cache"));
        assert_eq!(cfg.tag_limits.unwrap().get("io"), Some(&2));
    }

    #[test]
    fn explicit_missing_path_is_an_error_not_silent_default() {
        let err = RunnerConfig::load(Some(Path::new("/nonexistent/dagrunner.yaml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
