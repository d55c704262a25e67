//! Container orchestrator.
//!
//! One execution moves through: invocation completed and validated, engine
//! chosen (or the host when there is no image), command rendered against the
//! launch directory, image prepared, configuration files written, command
//! run, outputs classified. A failing tool is not an error here; its exit
//! code and missing outputs are reported in [`ExecutorOutput`].

use crate::descriptor::{ContainerImage, Descriptor, InputType, Invocation, DEFAULT_SHELL};
use crate::invocation_schema::validate_invocation;
use crate::render::{Rendered, Renderer};
use crate::util::shell_quote;
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

pub mod engine;
pub mod mounts;
pub mod outcome;
pub mod process;
pub mod pull;

pub use engine::Engine;
pub use outcome::{ContainerLocation, ExecutorOutput, FileDescription};
pub use process::Capture;
pub use pull::PullPolicy;

use mounts::{host_path, mount_list, normalize_path, MountRequest};
use process::ProcessOutput;
use pull::{SingularityCli, SingularityImage};

const SCRIPT_PREFIX: &str = "temp-";
const SCRIPT_SUFFIX: &str = ".localExec.boshjob.sh";

/// Every switch that changes how an invocation is executed.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub force_docker: bool,
    pub force_singularity: bool,
    /// Run on the host even when the descriptor declares an image.
    pub no_container: bool,
    pub no_automounts: bool,
    /// Run Docker containers as the calling user.
    pub change_user: bool,
    pub stream: bool,
    /// Keep the generated container script.
    pub debug: bool,
    /// Where the Singularity image file lives (or is pulled to).
    pub image_path: Option<PathBuf>,
    /// Extra `host:container` bind mounts.
    pub volumes: Vec<String>,
    pub shell_override: Option<String>,
    pub stale_lock_after: Duration,
    pub pull_retry_delay: Duration,
    pub pull_max_attempts: u32,
}

impl Default for ExecOptions {
    fn default() -> Self {
        let policy = PullPolicy::default();
        Self {
            force_docker: false,
            force_singularity: false,
            no_container: false,
            no_automounts: false,
            change_user: false,
            stream: false,
            debug: false,
            image_path: None,
            volumes: Vec::new(),
            shell_override: None,
            stale_lock_after: policy.stale_after,
            pull_retry_delay: policy.retry_delay,
            pull_max_attempts: policy.max_attempts,
        }
    }
}

impl ExecOptions {
    pub fn pull_policy(&self) -> PullPolicy {
        PullPolicy {
            retry_delay: self.pull_retry_delay,
            max_attempts: self.pull_max_attempts,
            stale_after: self.stale_lock_after,
        }
    }

    pub fn capture(&self) -> Capture {
        if self.stream {
            Capture::Stream
        } else {
            Capture::Buffered
        }
    }
}

/// A local image reference ready to run, and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedImage {
    /// Docker image name or Singularity image file path.
    pub reference: String,
    pub engine: Engine,
    pub location: ContainerLocation,
}

pub struct Executor<'a> {
    descriptor: &'a Descriptor,
    options: ExecOptions,
    cwd: PathBuf,
}

impl<'a> Executor<'a> {
    pub fn new(descriptor: &'a Descriptor, options: ExecOptions) -> Result<Self> {
        let cwd = std::env::current_dir().context("resolve current directory")?;
        Ok(Self {
            descriptor,
            options,
            cwd,
        })
    }

    /// Run and resolve relative paths in `cwd` instead of the process's
    /// current directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn descriptor(&self) -> &'a Descriptor {
        self.descriptor
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    fn shell(&self) -> &str {
        self.options
            .shell_override
            .as_deref()
            .unwrap_or_else(|| self.descriptor.shell())
    }

    fn container(&self) -> Option<&'a ContainerImage> {
        if self.options.no_container {
            return None;
        }
        self.descriptor.container_image.as_ref()
    }

    /// Directory the command runs in: the image's working directory inside
    /// a container, the current directory otherwise.
    pub fn launch_dir(&self) -> String {
        self.container()
            .and_then(|container| container.working_directory.as_deref())
            .map(normalize_path)
            .unwrap_or_else(|| normalize_path(&self.cwd.display().to_string()))
    }

    /// Inject default values and check the result against the invocation
    /// schema.
    pub fn complete_invocation(&self, invocation: &Invocation) -> Result<Invocation> {
        let invocation = invocation
            .clone()
            .with_defaults(self.descriptor)
            .sorted_by_inputs(self.descriptor);
        validate_invocation(self.descriptor, &invocation)?;
        Ok(invocation)
    }

    /// Render without touching the filesystem.
    pub fn simulate(&self, invocation: &Invocation) -> Result<Rendered> {
        let invocation = self.complete_invocation(invocation)?;
        let rendered = Renderer::new(self.descriptor)
            .with_base_dir(self.launch_dir())
            .render(&invocation);
        debug!(command = %rendered.command, "simulated");
        Ok(rendered)
    }

    /// Simulation as a result record: the command is the stdout and the
    /// exit code is 0.
    pub fn dry_run(&self, invocation: &Invocation) -> Result<ExecutorOutput> {
        let rendered = self.simulate(invocation)?;
        Ok(ExecutorOutput::simulated(&rendered.command))
    }

    pub fn launch(&self, invocation: &Invocation) -> Result<ExecutorOutput> {
        let invocation = self.complete_invocation(invocation)?;
        match self.container() {
            None => self.launch_on_host(&invocation),
            Some(container) => self.launch_in_container(container, &invocation),
        }
    }

    /// Resolve or pull the descriptor's image without running anything.
    /// `None` when the descriptor declares no image.
    pub fn prepare(&self) -> Result<Option<PreparedImage>> {
        let Some(container) = self.descriptor.container_image.as_ref() else {
            return Ok(None);
        };
        let engine = self.engine(container)?;
        Ok(Some(self.prepare_image(engine, container)?))
    }

    fn engine(&self, container: &ContainerImage) -> Result<Engine> {
        let engine = engine::choose_engine(
            container.kind,
            self.options.force_docker,
            self.options.force_singularity,
            engine::is_installed,
        )?;
        info!(%engine, declared = container.kind.as_str(), "container engine selected");
        Ok(engine)
    }

    fn prepare_image(&self, engine: Engine, container: &ContainerImage) -> Result<PreparedImage> {
        match engine {
            Engine::Docker => Ok(PreparedImage {
                reference: container.image.clone(),
                engine,
                location: pull::pull_docker(&container.image),
            }),
            Engine::Singularity => {
                let mut image =
                    SingularityImage::resolve(container, self.options.image_path.as_deref());
                image.dir = self.cwd.join(&image.dir);
                let (path, location) = pull::acquire_singularity(
                    &image,
                    &self.options.pull_policy(),
                    &SingularityCli,
                )?;
                Ok(PreparedImage {
                    reference: path.display().to_string(),
                    engine,
                    location,
                })
            }
        }
    }

    fn launch_on_host(&self, invocation: &Invocation) -> Result<ExecutorOutput> {
        let rendered = Renderer::new(self.descriptor)
            .with_base_dir(&self.cwd)
            .render(invocation);
        rendered.write_config_files(&self.cwd)?;
        info!(command = %rendered.command, "running on host");
        let output = process::run_shell(
            self.shell(),
            &rendered.command,
            &rendered.environment,
            &self.cwd,
            self.options.capture(),
        )?;
        Ok(self.finish(output, &rendered, None, None))
    }

    fn launch_in_container(
        &self,
        container: &ContainerImage,
        invocation: &Invocation,
    ) -> Result<ExecutorOutput> {
        let engine = self.engine(container)?;
        let launch_dir = self.launch_dir();
        let rendered = Renderer::new(self.descriptor)
            .with_base_dir(&launch_dir)
            .render(invocation);
        let prepared = self.prepare_image(engine, container)?;
        let on_host = self.host_view(&rendered, &launch_dir);
        on_host.write_config_files(&self.cwd)?;
        let script = self.write_script(&rendered.command)?;
        let script_name = script
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let script_in_container = Path::new(&launch_dir).join(script_name);

        let file_values = self.file_values(&rendered.invocation);
        let mounts = mount_list(&MountRequest {
            cwd: &self.cwd,
            launch_dir: &launch_dir,
            volumes: &self.options.volumes,
            file_values: &file_values,
            automount: !self.options.no_automounts,
        });
        debug!(?mounts, "container mounts");

        let options: &[String] = if engine.matches(container.kind) {
            &container.container_opts
        } else {
            if !container.container_opts.is_empty() {
                warn!(
                    %engine,
                    declared = container.kind.as_str(),
                    "ignoring container-opts declared for another engine"
                );
            }
            &[]
        };
        let run = ContainerRun {
            image: &prepared.reference,
            shell: self.shell(),
            environment: &rendered.environment,
            mounts: &mounts,
            launch_dir: &launch_dir,
            options,
            script: &script_in_container.display().to_string(),
        };
        let (command, env) = match engine {
            Engine::Docker => (run.docker_command(self.options.change_user), Vec::new()),
            Engine::Singularity => run.singularity_command(),
        };
        info!(%engine, %command, "running in container");
        let output = process::run_shell(
            DEFAULT_SHELL,
            &command,
            &env,
            &self.cwd,
            self.options.capture(),
        )?;
        self.release_script(script)?;
        Ok(self.finish(output, &on_host, Some(command), Some(prepared.location)))
    }

    /// Write `command` to an executable script in the working directory. The
    /// name never starts with a dot, since engines refuse to mount dotfiles.
    fn write_script(&self, command: &str) -> Result<NamedTempFile> {
        let shell = self.shell();
        let login = if shell == DEFAULT_SHELL { " -l" } else { "" };
        let mut script = tempfile::Builder::new()
            .prefix(SCRIPT_PREFIX)
            .suffix(SCRIPT_SUFFIX)
            .tempfile_in(&self.cwd)
            .with_context(|| format!("create script in {}", self.cwd.display()))?;
        writeln!(script, "#!{shell}{login}")
            .and_then(|()| writeln!(script, "{command}"))
            .and_then(|()| script.flush())
            .context("write container script")?;
        fs::set_permissions(script.path(), fs::Permissions::from_mode(0o755))
            .with_context(|| format!("chmod {}", script.path().display()))?;
        debug!(script = %script.path().display(), "wrote container script");
        Ok(script)
    }

    fn release_script(&self, script: NamedTempFile) -> Result<()> {
        if self.options.debug {
            let (_, path) = script.keep().context("keep container script")?;
            info!(script = %path.display(), "kept container script");
            return Ok(());
        }
        script.close().context("remove container script")
    }

    /// `rendered` with output and configuration paths as the host sees them.
    fn host_view(&self, rendered: &Rendered, launch_dir: &str) -> Rendered {
        let mut host = rendered.clone();
        for path in host.output_paths.values_mut() {
            *path = host_path(path, launch_dir, &self.cwd);
        }
        for file in &mut host.config_files {
            file.path = host_path(&file.path, launch_dir, &self.cwd);
        }
        host
    }

    /// Values of File inputs, flattened.
    fn file_values(&self, invocation: &Invocation) -> Vec<String> {
        let mut values = Vec::new();
        for input in self
            .descriptor
            .inputs
            .iter()
            .filter(|input| input.kind == InputType::File)
        {
            match invocation.get(&input.id) {
                Some(Value::String(path)) => values.push(path.clone()),
                Some(Value::Array(items)) => values.extend(
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string),
                ),
                _ => {}
            }
        }
        values
    }

    fn finish(
        &self,
        output: ProcessOutput,
        rendered: &Rendered,
        container_command: Option<String>,
        container_location: Option<ContainerLocation>,
    ) -> ExecutorOutput {
        let (output_files, missing_files) =
            outcome::classify_outputs(self.descriptor, &rendered.output_paths, &self.cwd);
        let error_message = outcome::error_message(self.descriptor, output.exit_code);
        if !missing_files.is_empty() {
            warn!(missing = missing_files.len(), "required output files are missing");
        }
        info!(exit_code = output.exit_code, "execution finished");
        ExecutorOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
            error_message,
            output_files,
            missing_files,
            shell_command: rendered.command.clone(),
            container_command,
            container_location,
        }
    }
}

/// Everything needed to spell out one `docker run` or `singularity exec`.
#[derive(Debug, Clone, Copy)]
struct ContainerRun<'r> {
    image: &'r str,
    shell: &'r str,
    environment: &'r [(String, String)],
    mounts: &'r [String],
    launch_dir: &'r str,
    options: &'r [String],
    script: &'r str,
}

impl ContainerRun<'_> {
    /// With `as_caller`, the container runs as the calling user; the ids are
    /// expanded by the shell that runs the command.
    fn docker_command(&self, as_caller: bool) -> String {
        let mut parts = vec!["docker run".to_string()];
        if as_caller {
            parts.push("-u $(id -u):$(id -g)".to_string());
        }
        parts.push(format!("--entrypoint={}", shell_quote(self.shell)));
        parts.push("--rm".to_string());
        for (name, value) in self.environment {
            parts.push(format!("-e {name}={}", shell_quote(value)));
        }
        for mount in self.mounts {
            parts.push(format!("-v {}", shell_quote(mount)));
        }
        parts.push(format!("-w {}", shell_quote(self.launch_dir)));
        parts.extend(self.options.iter().cloned());
        parts.push(shell_quote(self.image));
        parts.push(shell_quote(self.script));
        parts.join(" ")
    }

    /// The command and the `SINGULARITYENV_*` variables it must run with.
    fn singularity_command(&self) -> (String, Vec<(String, String)>) {
        let env = self
            .environment
            .iter()
            .map(|(name, value)| (format!("SINGULARITYENV_{name}"), value.clone()))
            .collect();
        let mut parts = vec!["singularity exec --cleanenv".to_string()];
        for mount in self.mounts {
            parts.push(format!("-B {}", shell_quote(mount)));
        }
        parts.push(format!("-W {}", shell_quote(self.launch_dir)));
        parts.extend(self.options.iter().cloned());
        parts.push(shell_quote(self.image));
        parts.push(shell_quote(self.script));
        (parts.join(" "), env)
    }
}

#[cfg(test)]
#[path = "exec_tests.rs"]
mod tests;
