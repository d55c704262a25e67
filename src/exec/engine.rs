//! Container engine selection.

use crate::descriptor::ContainerType;
use crate::error::ExecutorError;
use serde::Serialize;
use std::fmt;
use std::process::{Command, Stdio};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Docker,
    Singularity,
}

impl Engine {
    pub fn program(&self) -> &'static str {
        match self {
            Engine::Docker => "docker",
            Engine::Singularity => "singularity",
        }
    }

    /// Whether images declared as `declared` run natively on this engine.
    pub fn matches(&self, declared: ContainerType) -> bool {
        matches!(
            (self, declared),
            (Engine::Docker, ContainerType::Docker)
                | (Engine::Singularity, ContainerType::Singularity)
        )
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// Pick the engine for an image declared as `declared`. Docker is used for
/// Docker images unless Singularity is forced, or for any image when Docker
/// is forced, as long as it is installed; Singularity is the fallback.
pub fn choose_engine<F>(
    declared: ContainerType,
    force_docker: bool,
    force_singularity: bool,
    installed: F,
) -> Result<Engine, ExecutorError>
where
    F: Fn(Engine) -> bool,
{
    let wants_docker =
        (declared == ContainerType::Docker && !force_singularity) || force_docker;
    if wants_docker && installed(Engine::Docker) {
        return Ok(Engine::Docker);
    }
    if installed(Engine::Singularity) {
        return Ok(Engine::Singularity);
    }
    Err(ExecutorError::NoContainerEngine)
}

/// The engine's binary is on `PATH` and answers `--version`.
pub fn is_installed(engine: Engine) -> bool {
    let Ok(path) = which::which(engine.program()) else {
        debug!(engine = %engine, "not found on PATH");
        return false;
    };
    Command::new(&path)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only(engine: Engine) -> impl Fn(Engine) -> bool {
        move |candidate| candidate == engine
    }

    #[test]
    fn docker_images_prefer_docker() {
        let chosen = choose_engine(ContainerType::Docker, false, false, |_| true);
        assert_eq!(chosen.ok(), Some(Engine::Docker));
    }

    #[test]
    fn forced_singularity_runs_docker_images_under_singularity() {
        let chosen = choose_engine(ContainerType::Docker, false, true, |_| true);
        assert_eq!(chosen.ok(), Some(Engine::Singularity));
    }

    #[test]
    fn falls_back_when_docker_is_missing() {
        let chosen = choose_engine(ContainerType::Docker, false, false, only(Engine::Singularity));
        assert_eq!(chosen.ok(), Some(Engine::Singularity));
    }

    #[test]
    fn forced_docker_applies_to_singularity_images() {
        let chosen = choose_engine(ContainerType::Singularity, true, false, |_| true);
        assert_eq!(chosen.ok(), Some(Engine::Docker));
        let chosen = choose_engine(ContainerType::Singularity, false, false, |_| true);
        assert_eq!(chosen.ok(), Some(Engine::Singularity));
    }

    #[test]
    fn no_engine_is_an_error() {
        let err = choose_engine(ContainerType::Singularity, false, false, |_| false)
            .expect_err("nothing installed");
        assert!(matches!(err, ExecutorError::NoContainerEngine));
        assert!(!Engine::Docker.matches(ContainerType::Singularity));
    }
}
