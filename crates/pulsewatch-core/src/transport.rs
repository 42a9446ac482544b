//! Remote device transport. The remote side only supports listing a folder
//! and copying a whole file; there is no partial read, which is why the
//! tailer works on full snapshots.

use crate::error::TransportError;
use async_trait::async_trait;
use pulsewatch_config::TransportConfig;
use std::path::{Path, PathBuf};
use tracing::warn;

#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Names of the entries currently visible in `folder`.
    async fn list(&self, folder: &str) -> Result<Vec<String>, TransportError>;

    /// Full current content of `folder/name`. Idempotent; safe to call every
    /// poll cycle.
    async fn fetch(&self, folder: &str, name: &str) -> Result<Vec<u8>, TransportError>;
}

/// Talks to an Android device through the `adb` binary: `adb shell ls` for
/// listings and `adb pull` into a scratch directory for fetches.
pub struct AdbTransport {
    adb_path: String,
    scratch_dir: PathBuf,
}

impl AdbTransport {
    pub fn new(cfg: &TransportConfig) -> Result<Self, TransportError> {
        let scratch_dir = PathBuf::from(&cfg.scratch_dir);
        std::fs::create_dir_all(&scratch_dir)?;

        Ok(Self {
            adb_path: cfg.adb_path.clone(),
            scratch_dir,
        })
    }

    /// First attached device wins; multiple devices are tolerated with a
    /// warning, none is an error.
    async fn device_id(&self) -> Result<String, TransportError> {
        let stdout = run_command(&self.adb_path, &["devices"]).await?;
        parse_device_listing(&stdout)
    }

    async fn run_adb(&self, args: &[&str]) -> Result<String, TransportError> {
        let device = self.device_id().await?;
        let mut full_args = vec!["-s", device.as_str()];
        full_args.extend_from_slice(args);
        run_command(&self.adb_path, &full_args).await
    }
}

fn parse_device_listing(stdout: &str) -> Result<String, TransportError> {
    let device_lines: Vec<&str> = stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    match device_lines.first() {
        None => Err(TransportError::Device("no devices attached".to_string())),
        Some(first) => {
            if device_lines.len() > 1 {
                warn!("multiple devices attached; using the first one");
            }
            first
                .split_whitespace()
                .next()
                .map(str::to_string)
                .ok_or_else(|| TransportError::Device("unparseable device line".to_string()))
        }
    }
}

async fn run_command(program: &str, args: &[&str]) -> Result<String, TransportError> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.contains("No such file or directory")
            || stderr.contains("does not exist")
        {
            return Err(TransportError::NotFound(stderr));
        }
        return Err(TransportError::Command(format!(
            "`{program}` exited with {}: {stderr}",
            output.status
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[async_trait]
impl RemoteTransport for AdbTransport {
    async fn list(&self, folder: &str) -> Result<Vec<String>, TransportError> {
        let listing = self.run_adb(&["shell", &format!("ls {folder}")]).await?;
        Ok(listing.split_whitespace().map(str::to_string).collect())
    }

    async fn fetch(&self, folder: &str, name: &str) -> Result<Vec<u8>, TransportError> {
        let local = self.scratch_dir.join(name);
        let remote = format!("{folder}/{name}");
        let local_arg = local.to_string_lossy().to_string();

        self.run_adb(&["pull", &remote, &local_arg])
            .await
            .map_err(|exc| match exc {
                TransportError::NotFound(_) => TransportError::NotFound(remote.clone()),
                other => other,
            })?;

        Ok(tokio::fs::read(&local).await?)
    }
}

/// Same contract against a local directory tree; used in development and
/// tests. Remote folder paths are joined beneath the root, leading slashes
/// stripped.
pub struct LocalDirTransport {
    root: PathBuf,
}

impl LocalDirTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn folder_path(&self, folder: &str) -> PathBuf {
        self.root.join(folder.trim_start_matches('/'))
    }
}

fn map_not_found(exc: std::io::Error, target: &Path) -> TransportError {
    if exc.kind() == std::io::ErrorKind::NotFound {
        TransportError::NotFound(target.to_string_lossy().to_string())
    } else {
        TransportError::Io(exc)
    }
}

#[async_trait]
impl RemoteTransport for LocalDirTransport {
    async fn list(&self, folder: &str) -> Result<Vec<String>, TransportError> {
        let dir = self.folder_path(folder);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|exc| map_not_found(exc, &dir))?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }

    async fn fetch(&self, folder: &str, name: &str) -> Result<Vec<u8>, TransportError> {
        let path = self.folder_path(folder).join(name);
        tokio::fs::read(&path)
            .await
            .map_err(|exc| map_not_found(exc, &path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_listing_takes_first_device() {
        let stdout = "List of devices attached\nRF8M12WQKYJ\tdevice\nemulator-5554\tdevice\n";
        assert_eq!(
            parse_device_listing(stdout).expect("device expected"),
            "RF8M12WQKYJ"
        );
    }

    #[test]
    fn empty_device_listing_is_an_error() {
        let stdout = "List of devices attached\n\n";
        assert!(matches!(
            parse_device_listing(stdout),
            Err(TransportError::Device(_))
        ));
    }

    #[tokio::test]
    async fn local_transport_lists_and_fetches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let folder = dir.path().join("incoming");
        std::fs::create_dir_all(&folder).expect("mkdir");
        std::fs::write(folder.join("b.csv"), b"beta").expect("write");
        std::fs::write(folder.join("a.csv"), b"alpha").expect("write");

        let transport = LocalDirTransport::new(dir.path());
        let names = transport.list("incoming").await.expect("listing");
        assert_eq!(names, vec!["a.csv".to_string(), "b.csv".to_string()]);

        let content = transport.fetch("incoming", "a.csv").await.expect("fetch");
        assert_eq!(content, b"alpha");
    }

    #[tokio::test]
    async fn local_transport_maps_missing_file_to_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("incoming")).expect("mkdir");

        let transport = LocalDirTransport::new(dir.path());
        let err = transport
            .fetch("incoming", "gone.csv")
            .await
            .expect_err("missing file should error");
        assert!(err.is_fatal_for_file());
    }
}
