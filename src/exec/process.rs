//! Running a command line through a shell.

use crate::error::ExecutorError;
use crate::util::decode_output;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use tracing::debug;

/// How the child's output reaches the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Capture {
    /// Collect stdout and stderr separately until the child exits.
    #[default]
    Buffered,
    /// Merge stderr into stdout and echo each line to our stdout as it
    /// arrives; the collected text is returned as stdout.
    Stream,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Run `command` with `<shell> -c` in `cwd`. The child inherits our
/// environment plus `env`; ours is never modified.
pub fn run_shell(
    shell: &str,
    command: &str,
    env: &[(String, String)],
    cwd: &Path,
    capture: Capture,
) -> Result<ProcessOutput, ExecutorError> {
    debug!(%shell, %command, cwd = %cwd.display(), ?capture, "spawning");
    let script = match capture {
        Capture::Buffered => command.to_string(),
        Capture::Stream => format!("exec 2>&1\n{command}"),
    };
    let mut child = Command::new(shell);
    child
        .arg("-c")
        .arg(&script)
        .envs(env.iter().map(|(key, value)| (key, value)))
        .current_dir(cwd)
        .stdin(Stdio::inherit());
    match capture {
        Capture::Buffered => {
            let output = child
                .output()
                .map_err(ExecutorError::io(format!("spawn {shell}")))?;
            Ok(ProcessOutput {
                stdout: decode_output(&output.stdout),
                stderr: decode_output(&output.stderr),
                exit_code: exit_code(output.status),
            })
        }
        Capture::Stream => stream(child),
    }
}

fn stream(mut command: Command) -> Result<ProcessOutput, ExecutorError> {
    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(ExecutorError::io("spawn streamed command"))?;
    let mut collected = String::new();
    if let Some(stdout) = child.stdout.take() {
        let mut reader = BufReader::new(stdout);
        let mut line = Vec::new();
        let mut terminal = std::io::stdout();
        loop {
            line.clear();
            let read = reader
                .read_until(b'\n', &mut line)
                .map_err(ExecutorError::io("read command output"))?;
            if read == 0 {
                break;
            }
            let text = decode_output(&line);
            // A closed terminal must not abort the child.
            let _ = terminal.write_all(text.as_bytes());
            let _ = terminal.flush();
            collected.push_str(&text);
        }
    }
    let status = child
        .wait()
        .map_err(ExecutorError::io("wait for streamed command"))?;
    Ok(ProcessOutput {
        stdout: collected,
        stderr: String::new(),
        exit_code: exit_code(status),
    })
}

/// The exit code, or `128 + signal` for a child killed by a signal.
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}
