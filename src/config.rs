//! Execution defaults from a config file and the environment.
//!
//! Precedence, highest first: command-line flag, environment variable,
//! config file, built-in default.

use crate::exec::ExecOptions;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const CONFIG_ENV: &str = "BOSH_CONFIG";
pub const IMAGE_PATH_ENV: &str = "BOSH_IMAGEPATH";
pub const FORCE_SINGULARITY_ENV: &str = "BOSH_FORCE_SINGULARITY";
pub const FORCE_DOCKER_ENV: &str = "BOSH_FORCE_DOCKER";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct BoshConfig {
    pub image_path: Option<PathBuf>,
    pub force_docker: Option<bool>,
    pub force_singularity: Option<bool>,
    pub no_automounts: Option<bool>,
    pub change_user: Option<bool>,
    pub stream: Option<bool>,
    pub volumes: Option<Vec<String>>,
    pub stale_lock_after_secs: Option<u64>,
    pub pull_retry_delay_secs: Option<u64>,
    pub pull_max_attempts: Option<u32>,
}

/// Config file in effect: `explicit`, else `$BOSH_CONFIG`, else the user
/// config directory's `boutiques/config.json` when it exists.
pub fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env::var_os(CONFIG_ENV).filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|dir| dir.join("boutiques").join("config.json"))
        .filter(|path| path.is_file())
}

impl BoshConfig {
    /// Load the config file in effect, or defaults when there is none.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match config_path(explicit) {
            Some(path) => Self::from_path(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("parse config {}", path.display()))?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Layer the environment and this file under the options given on the
    /// command line.
    pub fn exec_options(&self, env: &EnvOverrides, cli: ExecOptions) -> ExecOptions {
        let layered = |flag: bool, env: Option<bool>, file: Option<bool>| {
            flag || env.or(file).unwrap_or(false)
        };
        ExecOptions {
            force_docker: layered(cli.force_docker, env.force_docker, self.force_docker),
            force_singularity: layered(
                cli.force_singularity,
                env.force_singularity,
                self.force_singularity,
            ),
            no_automounts: layered(cli.no_automounts, None, self.no_automounts),
            change_user: layered(cli.change_user, None, self.change_user),
            stream: layered(cli.stream, None, self.stream),
            image_path: cli
                .image_path
                .or_else(|| env.image_path.clone())
                .or_else(|| self.image_path.clone()),
            volumes: if cli.volumes.is_empty() {
                self.volumes.clone().unwrap_or_default()
            } else {
                cli.volumes
            },
            stale_lock_after: self
                .stale_lock_after_secs
                .map_or(cli.stale_lock_after, Duration::from_secs),
            pull_retry_delay: self
                .pull_retry_delay_secs
                .map_or(cli.pull_retry_delay, Duration::from_secs),
            pull_max_attempts: self.pull_max_attempts.unwrap_or(cli.pull_max_attempts),
            ..cli
        }
    }
}

/// Settings read from `BOSH_*` environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub image_path: Option<PathBuf>,
    pub force_docker: Option<bool>,
    pub force_singularity: Option<bool>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |name: &str| lookup(name).and_then(|raw| parse_bool(name, &raw));
        Self {
            image_path: lookup(IMAGE_PATH_ENV)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from),
            force_docker: flag(FORCE_DOCKER_ENV),
            force_singularity: flag(FORCE_SINGULARITY_ENV),
        }
    }
}

fn parse_bool(name: &str, raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        other => {
            warn!(variable = name, value = other, "ignoring unrecognized boolean");
            None
        }
    }
}
