//! Container image acquisition.
//!
//! Singularity images are cached as files named after the image reference.
//! Concurrent pulls of the same image, from threads or separate processes,
//! are serialized by a lock directory created next to the image: creating a
//! directory either succeeds or fails atomically, so exactly one caller pulls
//! while the others wait and then find the finished file.

use super::outcome::ContainerLocation;
use crate::descriptor::{ContainerImage, ContainerType};
use crate::error::ExecutorError;
use crate::util::decode_output;
use regex::Regex;
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 36;
pub const DEFAULT_STALE_LOCK_AFTER: Duration = Duration::from_secs(30 * 60);

/// Retry and staleness settings for the pull lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullPolicy {
    pub retry_delay: Duration,
    pub max_attempts: u32,
    /// Lock directories older than this are assumed abandoned and removed.
    pub stale_after: Duration,
}

impl Default for PullPolicy {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            stale_after: DEFAULT_STALE_LOCK_AFTER,
        }
    }
}

/// A Singularity image file and where it comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingularityImage {
    /// Pull source, `<index><image>`.
    pub source: String,
    pub name: String,
    /// Directory holding the image; empty for the current directory.
    pub dir: PathBuf,
}

impl SingularityImage {
    /// Resolve the file name, directory and pull source for `container`.
    /// With `image_path` set, the image is stored exactly there.
    pub fn resolve(container: &ContainerImage, image_path: Option<&Path>) -> Self {
        let mut index = container.index.clone().unwrap_or_default();
        let mut image = container.image.clone();
        if container.kind == ContainerType::Docker {
            let registry = if index.is_empty() || index == "docker://" {
                ""
            } else {
                index.as_str()
            };
            index = format!("docker://{registry}");
        }
        if let Some(scheme) = scheme_prefix(&image) {
            image = image[scheme.len()..].to_string();
            index = scheme;
        }
        if index.is_empty() {
            index = "shub://".to_string();
        }
        if !index.ends_with('/') {
            index.push('/');
        }

        let (name, dir) = match image_path {
            Some(path) => (
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                path.parent().map(Path::to_path_buf).unwrap_or_default(),
            ),
            None => (format!("{}.simg", image.replace(['/', ':'], "-")), PathBuf::new()),
        };
        Self {
            source: format!("{index}{image}"),
            name,
            dir,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }

    /// Where a puller must write the image before it is renamed into place.
    pub fn temp_path(&self) -> PathBuf {
        self.dir.join(format!("{}.tmp", self.name))
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.dir.join(format!("{}-lock", self.name))
    }

    pub fn exists(&self) -> bool {
        self.path().is_file()
    }

    pub fn absolute_path(&self) -> PathBuf {
        let path = self.path();
        if path.is_absolute() {
            return path;
        }
        std::env::current_dir()
            .map(|cwd| cwd.join(&path))
            .unwrap_or(path)
    }

    fn local(&self) -> (PathBuf, ContainerLocation) {
        (
            self.absolute_path(),
            ContainerLocation::Local {
                name: self.name.clone(),
            },
        )
    }
}

/// The leading `<scheme>://` of an image reference or index, if any.
pub(crate) fn scheme_prefix(image: &str) -> Option<String> {
    let scheme = Regex::new(r"^[a-zA-Z0-9]+://").ok()?;
    scheme.find(image).map(|found| found.as_str().to_string())
}

/// Fetches an image into [`SingularityImage::temp_path`].
pub trait Puller {
    fn pull(&self, image: &SingularityImage) -> Result<(), ExecutorError>;
}

/// Pulls with `singularity pull`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingularityCli;

impl SingularityCli {
    pub fn pull_args(image: &SingularityImage) -> Vec<String> {
        vec![
            "pull".to_string(),
            "--name".to_string(),
            format!("{}.tmp", image.name),
            image.source.clone(),
        ]
    }
}

impl Puller for SingularityCli {
    fn pull(&self, image: &SingularityImage) -> Result<(), ExecutorError> {
        let args = SingularityCli::pull_args(image);
        let mut command = Command::new("singularity");
        command.args(&args).stdin(Stdio::null());
        if !image.dir.as_os_str().is_empty() {
            command
                .current_dir(&image.dir)
                .env("SINGULARITY_PULLFOLDER", &image.dir);
        }
        let output = command
            .output()
            .map_err(ExecutorError::io("spawn singularity pull"))?;
        if !output.status.success() {
            return Err(ExecutorError::PullFailed {
                command: format!("singularity {}", shell_words::join(&args)),
                stderr: decode_output(&output.stderr),
            });
        }
        Ok(())
    }
}

/// Held while this process owns the pull of one image.
#[derive(Debug)]
struct LockDir {
    path: PathBuf,
}

impl LockDir {
    fn try_create(path: &Path) -> Result<Option<Self>, ExecutorError> {
        match fs::create_dir(path) {
            Ok(()) => Ok(Some(Self {
                path: path.to_path_buf(),
            })),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(source) => Err(ExecutorError::Io {
                context: format!("create lock directory {}", path.display()),
                source,
            }),
        }
    }
}

impl Drop for LockDir {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_dir(&self.path) {
            warn!(lock = %self.path.display(), %err, "failed to remove lock directory");
        }
    }
}

/// Which lock directory was inspected, and how old it was then.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LockStamp {
    dev: u64,
    ino: u64,
    modified: SystemTime,
}

impl LockStamp {
    fn read(lock: &Path) -> Option<Self> {
        let meta = fs::metadata(lock).ok()?;
        Some(Self {
            dev: meta.dev(),
            ino: meta.ino(),
            modified: meta.modified().ok()?,
        })
    }
}

fn reclaim_if_stale(lock: &Path, stale_after: Duration) {
    let Some(stamp) = LockStamp::read(lock) else {
        return;
    };
    let age = SystemTime::now()
        .duration_since(stamp.modified)
        .unwrap_or_default();
    if age < stale_after {
        return;
    }
    warn!(
        lock = %lock.display(),
        age_secs = age.as_secs(),
        "reclaiming stale pull lock"
    );
    reclaim(lock, &stamp);
}

/// Move the lock aside, then delete it only if it is still the directory
/// described by `stamp`. A lock re-created since the inspection is put back.
fn reclaim(lock: &Path, stamp: &LockStamp) {
    static RECLAIMS: AtomicU64 = AtomicU64::new(0);
    let mut aside = lock.as_os_str().to_owned();
    aside.push(format!(
        ".stale-{}-{}",
        std::process::id(),
        RECLAIMS.fetch_add(1, Ordering::Relaxed)
    ));
    let aside = PathBuf::from(aside);
    if let Err(err) = fs::rename(lock, &aside) {
        debug!(lock = %lock.display(), %err, "stale lock already gone");
        return;
    }
    if LockStamp::read(&aside).as_ref() == Some(stamp) {
        if let Err(err) = fs::remove_dir(&aside) {
            warn!(lock = %aside.display(), %err, "failed to remove stale lock");
        }
        return;
    }
    warn!(lock = %lock.display(), "pull lock was re-created while reclaiming; restoring it");
    if let Err(err) = fs::rename(&aside, lock) {
        warn!(lock = %lock.display(), %err, "failed to restore pull lock");
    }
}

/// Return the local image, pulling it under the lock when absent.
pub fn acquire_singularity(
    image: &SingularityImage,
    policy: &PullPolicy,
    puller: &dyn Puller,
) -> Result<(PathBuf, ContainerLocation), ExecutorError> {
    if !image.dir.as_os_str().is_empty() {
        fs::create_dir_all(&image.dir).map_err(ExecutorError::io(format!(
            "create image directory {}",
            image.dir.display()
        )))?;
    }
    let lock_path = image.lock_dir();
    for attempt in 1..=policy.max_attempts {
        if image.exists() {
            return Ok(image.local());
        }
        reclaim_if_stale(&lock_path, policy.stale_after);
        let Some(_lock) = LockDir::try_create(&lock_path)? else {
            info!(
                lock = %lock_path.display(),
                attempt,
                "another process is pulling this image; waiting"
            );
            std::thread::sleep(policy.retry_delay);
            continue;
        };
        if image.exists() {
            return Ok(image.local());
        }
        info!(source = %image.source, name = %image.name, "pulling Singularity image");
        puller.pull(image)?;
        fs::rename(image.temp_path(), image.path()).map_err(ExecutorError::io(format!(
            "move pulled image into {}",
            image.path().display()
        )))?;
        info!(name = %image.name, "pull finished");
        return Ok((
            image.absolute_path(),
            ContainerLocation::Pulled {
                source: image.source.clone(),
                name: image.name.clone(),
            },
        ));
    }
    if image.exists() {
        return Ok(image.local());
    }
    Err(ExecutorError::ImageUnavailable {
        image: image.source.clone(),
    })
}

/// `docker pull`; a failed pull falls back to the engine's local copy.
pub fn pull_docker(image: &str) -> ContainerLocation {
    info!(%image, "pulling Docker image");
    let output = Command::new("docker")
        .args(["pull", image])
        .stdin(Stdio::null())
        .output();
    match output {
        Ok(output) if output.status.success() => ContainerLocation::PulledFromDocker,
        Ok(output) => {
            warn!(
                %image,
                stderr = %decode_output(&output.stderr).trim_end(),
                "docker pull failed; using local copy"
            );
            ContainerLocation::LocalCopy
        }
        Err(err) => {
            warn!(%image, %err, "docker pull could not start; using local copy");
            ContainerLocation::LocalCopy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn container(value: serde_json::Value) -> ContainerImage {
        serde_json::from_value(value).expect("container image")
    }

    #[test]
    fn names_images_after_the_reference() {
        let image = SingularityImage::resolve(
            &container(json!({"type": "singularity", "image": "org/tool:1.0"})),
            None,
        );
        assert_eq!(image.name, "org-tool-1.0.simg");
        assert_eq!(image.source, "shub://org/tool:1.0");
        assert_eq!(image.lock_dir(), PathBuf::from("org-tool-1.0.simg-lock"));
    }

    #[test]
    fn docker_images_pull_through_the_docker_scheme() {
        let plain = SingularityImage::resolve(
            &container(json!({"type": "docker", "image": "org/tool"})),
            None,
        );
        assert_eq!(plain.source, "docker://org/tool");
        let registry = SingularityImage::resolve(
            &container(json!({"type": "docker", "image": "org/tool", "index": "quay.io"})),
            None,
        );
        assert_eq!(registry.source, "docker://quay.io/org/tool");
    }

    #[test]
    fn scheme_in_the_image_overrides_the_index() {
        let image = SingularityImage::resolve(
            &container(json!({"type": "singularity", "image": "library://org/tool",
                              "index": "shub://"})),
            Some(Path::new("/cache/tool.sif")),
        );
        assert_eq!(image.source, "library://org/tool");
        assert_eq!(image.name, "tool.sif");
        assert_eq!(image.path(), PathBuf::from("/cache/tool.sif"));
        assert_eq!(image.lock_dir(), PathBuf::from("/cache/tool.sif-lock"));
    }

    struct SlowPuller {
        pulls: AtomicUsize,
    }

    impl Puller for SlowPuller {
        fn pull(&self, image: &SingularityImage) -> Result<(), ExecutorError> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(200));
            fs::write(image.temp_path(), b"image").map_err(ExecutorError::io("write"))
        }
    }

    fn fast_policy() -> PullPolicy {
        PullPolicy {
            retry_delay: Duration::from_millis(20),
            max_attempts: 200,
            stale_after: DEFAULT_STALE_LOCK_AFTER,
        }
    }

    #[test]
    fn concurrent_requests_pull_once() {
        let dir = tempfile::tempdir().expect("temp dir");
        let image = SingularityImage::resolve(
            &container(json!({"type": "singularity", "image": "org/tool"})),
            Some(&dir.path().join("tool.simg")),
        );
        let puller = SlowPuller {
            pulls: AtomicUsize::new(0),
        };
        let policy = fast_policy();
        let results: Vec<(PathBuf, ContainerLocation)> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| scope.spawn(|| acquire_singularity(&image, &policy, &puller)))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("thread").expect("acquire"))
                .collect()
        });
        assert_eq!(puller.pulls.load(Ordering::SeqCst), 1);
        assert_eq!(results[0].0, results[1].0);
        assert!(results.iter().any(|(_, location)| matches!(location, ContainerLocation::Pulled { .. })));
        assert!(results.iter().any(|(_, location)| matches!(location, ContainerLocation::Local { .. })));
        assert!(!image.lock_dir().exists());
        assert!(!image.temp_path().exists());
    }

    #[test]
    fn stale_locks_are_reclaimed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let image = SingularityImage::resolve(
            &container(json!({"type": "singularity", "image": "org/tool"})),
            Some(&dir.path().join("tool.simg")),
        );
        fs::create_dir(image.lock_dir()).expect("abandoned lock");
        let puller = SlowPuller {
            pulls: AtomicUsize::new(0),
        };
        let policy = PullPolicy {
            stale_after: Duration::ZERO,
            ..fast_policy()
        };
        let (path, _) = acquire_singularity(&image, &policy, &puller).expect("acquire");
        assert_eq!(path, dir.path().join("tool.simg"));
        assert_eq!(puller.pulls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lock_recreated_after_inspection_is_kept() {
        let dir = tempfile::tempdir().expect("temp dir");
        let lock = dir.path().join("tool.simg-lock");
        fs::create_dir(&lock).expect("abandoned lock");
        let stamp = LockStamp::read(&lock).expect("stamp");

        // Another caller reclaims the abandoned lock and takes a fresh one.
        fs::remove_dir(&lock).expect("reclaimed elsewhere");
        std::thread::sleep(Duration::from_millis(50));
        fs::create_dir(&lock).expect("fresh lock");
        let fresh = LockStamp::read(&lock).expect("stamp");
        assert_ne!(fresh, stamp);

        reclaim(&lock, &stamp);
        assert_eq!(LockStamp::read(&lock), Some(fresh));
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name())
            .collect();
        assert_eq!(leftovers, vec![lock.file_name().expect("name").to_owned()]);
    }

    #[test]
    fn reclaim_removes_the_inspected_lock() {
        let dir = tempfile::tempdir().expect("temp dir");
        let lock = dir.path().join("tool.simg-lock");
        fs::create_dir(&lock).expect("abandoned lock");
        reclaim_if_stale(&lock, DEFAULT_STALE_LOCK_AFTER);
        assert!(lock.exists());
        reclaim_if_stale(&lock, Duration::ZERO);
        assert!(!lock.exists());
        assert_eq!(fs::read_dir(dir.path()).expect("read dir").count(), 0);
    }

    #[test]
    fn waits_for_a_lock_held_by_another_process() {
        if !Path::new("/bin/sh").exists() {
            return;
        }
        let dir = tempfile::tempdir().expect("temp dir");
        let image = SingularityImage::resolve(
            &container(json!({"type": "singularity", "image": "org/tool"})),
            Some(&dir.path().join("tool.simg")),
        );
        let lock = image.lock_dir();
        let released = dir.path().join("released");
        fs::create_dir(&lock).expect("lock for the holder");
        let mut holder = Command::new("/bin/sh")
            .arg("-c")
            .arg("sleep 0.3; : > \"$1\"; rmdir \"$2\"")
            .arg("holder")
            .arg(&released)
            .arg(&lock)
            .spawn()
            .expect("spawn holder");

        struct CheckingPuller<'p> {
            released: &'p Path,
        }
        impl Puller for CheckingPuller<'_> {
            fn pull(&self, image: &SingularityImage) -> Result<(), ExecutorError> {
                assert!(self.released.exists(), "pulled while another process held the lock");
                fs::write(image.temp_path(), b"image").map_err(ExecutorError::io("write"))
            }
        }
        let puller = CheckingPuller {
            released: &released,
        };
        let (_, location) = acquire_singularity(&image, &fast_policy(), &puller).expect("acquire");
        assert!(matches!(location, ContainerLocation::Pulled { .. }));
        assert!(holder.wait().expect("holder").success());
        assert!(!lock.exists());
    }

    #[test]
    fn held_lock_without_image_gives_up() {
        let dir = tempfile::tempdir().expect("temp dir");
        let image = SingularityImage::resolve(
            &container(json!({"type": "singularity", "image": "org/tool"})),
            Some(&dir.path().join("tool.simg")),
        );
        fs::create_dir(image.lock_dir()).expect("held lock");
        let puller = SlowPuller {
            pulls: AtomicUsize::new(0),
        };
        let policy = PullPolicy {
            retry_delay: Duration::from_millis(1),
            max_attempts: 3,
            stale_after: DEFAULT_STALE_LOCK_AFTER,
        };
        let err = acquire_singularity(&image, &policy, &puller).expect_err("lock never released");
        assert!(matches!(err, ExecutorError::ImageUnavailable { .. }));
        assert_eq!(puller.pulls.load(Ordering::SeqCst), 0);
    }
}
