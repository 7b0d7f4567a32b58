use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};

/// Top-level Weft configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub templates: TemplatesConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Execution limits applied by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Per-node timeout used when a node declares none.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: f64,
    /// Sub-workflow depth limit used when a node declares none.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Maximum concurrently running members of one parallel group (0 = unbounded).
    #[serde(default)]
    pub max_parallel: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            max_depth: default_max_depth(),
            max_parallel: 0,
        }
    }
}

impl EngineSettings {
    /// Zero, negative and non-finite values fall back to 300 seconds, the
    /// same way node timeouts do.
    pub fn default_timeout(&self) -> Duration {
        let secs = match self.default_timeout_secs {
            s if s.is_finite() && s > 0.0 => s,
            _ => default_timeout_secs(),
        };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// Where workflow templates are discovered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesConfig {
    #[serde(default = "default_template_dirs")]
    pub dirs: Vec<String>,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            dirs: default_template_dirs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

pub const DEFAULT_MAX_DEPTH: usize = 5;

fn default_timeout_secs() -> f64 { 300.0 }
fn default_max_depth() -> usize { DEFAULT_MAX_DEPTH }
fn default_template_dirs() -> Vec<String> { vec!["./workflows".to_string()] }
fn default_log_filter() -> String { "weft=info,warn".to_string() }

impl EngineConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WeftError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| WeftError::Config(e.to_string()))
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Template directories, with `~/` expanded.
    pub fn template_dirs(&self) -> Vec<PathBuf> {
        self.templates.dirs.iter().map(|d| expand_home(d)).collect()
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn expand_home(dir: &str) -> PathBuf {
    if let Some(rest) = dir.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_WEFT_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_WEFT_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_WEFT_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_WEFT_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_WEFT_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.engine.max_depth, 5);
        assert_eq!(config.engine.default_timeout_secs, 300.0);
        assert_eq!(config.engine.max_parallel, 0);
        assert_eq!(config.templates.dirs, vec!["./workflows"]);
        assert_eq!(config.log.filter, "weft=info,warn");
    }

    #[test]
    fn test_partial_engine_section() {
        let config: EngineConfig = toml::from_str(
            r#"
[engine]
max_depth = 3
"#,
        )
        .unwrap();
        assert_eq!(config.engine.max_depth, 3);
        assert_eq!(config.engine.default_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_unusable_default_timeout_falls_back() {
        for secs in [0.0, -1.0, f64::INFINITY, f64::NAN] {
            let settings = EngineSettings {
                default_timeout_secs: secs,
                ..Default::default()
            };
            assert_eq!(settings.default_timeout(), Duration::from_secs(300), "{}", secs);
        }
        let settings = EngineSettings {
            default_timeout_secs: 0.5,
            ..Default::default()
        };
        assert_eq!(settings.default_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_load_missing_file() {
        let err = EngineConfig::load(Path::new("/nonexistent/weft.toml")).unwrap_err();
        assert!(matches!(err, WeftError::ConfigNotFound(_)));
    }

    #[test]
    fn test_expand_home() {
        std::env::set_var("HOME", "/home/weft");
        assert_eq!(expand_home("~/flows"), PathBuf::from("/home/weft/flows"));
        assert_eq!(expand_home("/abs"), PathBuf::from("/abs"));
    }
}
