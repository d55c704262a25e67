//! Host/container path normalization and bind-mount lists.

use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

/// POSIX form of `path`: a leading drive letter `C:` becomes `/c` and
/// backslashes become slashes. Other paths are returned as-is.
pub fn normalize_path(path: &str) -> String {
    static DRIVE: OnceLock<Option<Regex>> = OnceLock::new();
    let drive = DRIVE.get_or_init(|| Regex::new(r"^([A-Za-z]):").ok());
    let Some(captures) = drive.as_ref().and_then(|re| re.captures(path)) else {
        return path.to_string();
    };
    let letter = captures[1].to_ascii_lowercase();
    let rest = path[2..].replace('\\', "/");
    format!("/{letter}{rest}")
}

/// Absolute, normalized form of `path` relative to `cwd`. Existing paths are
/// canonicalized; others are resolved lexically.
pub fn make_absolute(path: &str, cwd: &Path) -> String {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        return normalize_path(path);
    }
    let joined = cwd.join(candidate);
    let resolved = joined
        .canonicalize()
        .unwrap_or_else(|_| lexical_clean(&joined));
    normalize_path(&resolved.display().to_string())
}

fn lexical_clean(path: &Path) -> PathBuf {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                clean.pop();
            }
            other => clean.push(other),
        }
    }
    clean
}

/// Where a container-side `path` lives on the host. The working directory
/// is mounted on `launch_dir`, so paths below it move under `cwd`; all other
/// paths are returned unchanged.
pub fn host_path(path: &str, launch_dir: &str, cwd: &Path) -> String {
    match Path::new(path).strip_prefix(launch_dir) {
        Ok(rest) if Path::new(path).is_absolute() => cwd.join(rest).display().to_string(),
        _ => path.to_string(),
    }
}

/// Inputs to [`mount_list`].
#[derive(Debug, Clone)]
pub struct MountRequest<'a> {
    pub cwd: &'a Path,
    pub launch_dir: &'a str,
    /// User volumes, `host[:container]`.
    pub volumes: &'a [String],
    /// Values of File inputs to mount automatically.
    pub file_values: &'a [String],
    pub automount: bool,
}

/// `host:container` bind specifications for one run: user volumes, then the
/// working directory on the launch directory, then one mount per File input
/// value whose target is not already mounted.
pub fn mount_list(request: &MountRequest<'_>) -> Vec<String> {
    let mut mounts: Vec<String> = request
        .volumes
        .iter()
        .map(|volume| {
            let (host, target) = volume
                .rsplit_once(':')
                .unwrap_or((volume.as_str(), volume.as_str()));
            format!("{}:{target}", make_absolute(host, request.cwd))
        })
        .collect();
    mounts.push(format!(
        "{}:{}",
        make_absolute(".", request.cwd),
        request.launch_dir
    ));
    if !request.automount {
        return mounts;
    }
    let mut targets: Vec<String> = mounts.iter().map(|mount| target_of(mount)).collect();
    for value in request.file_values {
        if value.is_empty() || targets.iter().any(|target| target == value) {
            continue;
        }
        let target = Path::new(request.launch_dir)
            .join(value)
            .display()
            .to_string();
        if targets.contains(&target) {
            continue;
        }
        mounts.push(format!("{}:{target}", make_absolute(value, request.cwd)));
        targets.push(target);
    }
    mounts
}

fn target_of(mount: &str) -> String {
    mount
        .rsplit_once(':')
        .map_or(mount, |(_, target)| target)
        .to_string()
}
