//! Configuration for autoplay paths and execution settings.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (AUTOPLAY_HOME, AUTOPLAY_PLAYBOOKS)
//! 2. Config file (.autoplay/config.yaml)
//! 3. Defaults (~/.autoplay)
//!
//! Config file discovery:
//! - Searches current directory and parents for .autoplay/config.yaml
//! - Paths in config file are relative to the .autoplay/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::{ExecutionMode, ExecutorOptions, SafetyLimits};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".autoplay";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub execution: Option<ExecutionConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .autoplay/)
    pub home: Option<String>,
    /// Playbook lookup directory (relative to .autoplay/)
    pub playbooks: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionConfig {
    pub best_effort: Option<bool>,
    pub max_steps: Option<u32>,
    pub max_depth: Option<u32>,
    pub step_timeout_seconds: Option<u64>,
    pub run_timeout_seconds: Option<u64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Engine state directory (journal lives here)
    pub home: PathBuf,
    /// Where playbooks are looked up by name
    pub playbooks: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub execution: ExecutionSettings,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionSettings {
    pub best_effort: bool,
    pub limits: SafetyLimits,
}

impl ExecutionSettings {
    fn from_config(config: Option<&ExecutionConfig>) -> Self {
        let Some(config) = config else {
            return Self::default();
        };
        let defaults = SafetyLimits::default();

        Self {
            best_effort: config.best_effort.unwrap_or(false),
            limits: SafetyLimits {
                max_steps: config.max_steps.unwrap_or(defaults.max_steps),
                max_depth: config.max_depth.unwrap_or(defaults.max_depth),
                step_timeout_seconds: config
                    .step_timeout_seconds
                    .unwrap_or(defaults.step_timeout_seconds),
                run_timeout_seconds: config
                    .run_timeout_seconds
                    .unwrap_or(defaults.run_timeout_seconds),
            },
        }
    }

    /// Executor options for these settings
    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            mode: if self.best_effort {
                ExecutionMode::BestEffort
            } else {
                ExecutionMode::Abort
            },
            limits: self.limits.clone(),
        }
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Environment overrides, captured once so resolution stays testable
#[derive(Debug, Clone, Default)]
struct EnvOverrides {
    home: Option<PathBuf>,
    playbooks: Option<PathBuf>,
}

impl EnvOverrides {
    fn from_env() -> Self {
        Self {
            home: std::env::var_os("AUTOPLAY_HOME").map(PathBuf::from),
            playbooks: std::env::var_os("AUTOPLAY_PLAYBOOKS").map(PathBuf::from),
        }
    }
}

fn resolve(
    config_file: Option<PathBuf>,
    env: EnvOverrides,
    default_home: PathBuf,
) -> Result<ResolvedConfig> {
    let Some(config_path) = config_file else {
        let home = env.home.unwrap_or(default_home);
        let playbooks = env.playbooks.unwrap_or_else(|| home.join("playbooks"));
        return Ok(ResolvedConfig {
            home,
            playbooks,
            config_file: None,
            execution: ExecutionSettings::default(),
        });
    };

    let config = load_config_file(&config_path)?;
    let config_dir = config_path.parent().unwrap_or(Path::new("."));

    let home = match (env.home, &config.paths.home) {
        (Some(home), _) => home,
        (None, Some(home)) => resolve_path(config_dir, home),
        (None, None) => default_home,
    };

    let playbooks = match (env.playbooks, &config.paths.playbooks) {
        (Some(dir), _) => dir,
        (None, Some(dir)) => resolve_path(config_dir, dir),
        (None, None) => home.join("playbooks"),
    };

    Ok(ResolvedConfig {
        home,
        playbooks,
        execution: ExecutionSettings::from_config(config.execution.as_ref()),
        config_file: Some(config_path),
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;

    resolve(find_config_file(&cwd), EnvOverrides::from_env(), default_home)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the autoplay home directory (engine state)
pub fn autoplay_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the playbook lookup directory
pub fn playbooks_dir() -> Result<PathBuf> {
    Ok(config()?.playbooks.clone())
}

/// Get the journal directory ($AUTOPLAY_HOME/journal)
pub fn journal_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("journal"))
}
