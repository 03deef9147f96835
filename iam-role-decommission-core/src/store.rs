//! Dual-location snapshot persistence and per-account archives
//!
//! A [`BackupArtifact`] only exists once the local file has been written,
//! read back and re-parsed, and the same bytes have been accepted by the
//! remote sink. Its presence is the precondition for any teardown.

use crate::aws::s3::ObjectSink;
use crate::config::RetryPolicy;
use crate::error::BackupError;
use crate::snapshot::RoleSnapshot;
use log::{debug, error, info, warn};
use regex::Regex;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const JSON_DIR: &str = "json";
const REMOTE_PREFIX: &str = "role_backups";

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_component(raw: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    UNSAFE
        .get_or_init(|| {
            Regex::new(r"[^A-Za-z0-9_-]").unwrap_or_else(|e| panic!("invalid sanitize regex: {e}"))
        })
        .replace_all(raw, "_")
        .into_owned()
}

/// `role_backup_<account>_<role>_<YYYYMMDD_HHMMSS>.json`
pub fn backup_file_name(snapshot: &RoleSnapshot, account_id: &str, role_name: &str) -> String {
    format!(
        "role_backup_{}_{}_{}.json",
        sanitize_component(account_id),
        sanitize_component(role_name),
        snapshot.collected_at.format("%Y%m%d_%H%M%S")
    )
}

/// A verified local file plus its verified remote copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupArtifact {
    pub local_path: PathBuf,
    pub remote_key: String,
    pub remote_location: String,
}

pub struct SnapshotStore {
    workspace: PathBuf,
    sink: Arc<dyn ObjectSink>,
    retry: RetryPolicy,
}

impl SnapshotStore {
    pub fn new(workspace: impl Into<PathBuf>, sink: Arc<dyn ObjectSink>, retry: RetryPolicy) -> Self {
        Self {
            workspace: workspace.into(),
            sink,
            retry,
        }
    }

    fn account_dir(&self, account_id: &str) -> PathBuf {
        self.workspace.join(sanitize_component(account_id))
    }

    pub fn archive_path(&self, account_id: &str) -> PathBuf {
        let account = sanitize_component(account_id);
        self.account_dir(account_id)
            .join(format!("role_backups_{account}.zip"))
    }

    /// Write, verify and upload `snapshot`. Fails closed: any error means no
    /// artifact and therefore no teardown.
    pub async fn persist(
        &self,
        snapshot: &RoleSnapshot,
        account_id: &str,
        role_name: &str,
    ) -> Result<BackupArtifact, BackupError> {
        let document = snapshot.to_document()?;
        let file_name = backup_file_name(snapshot, account_id, role_name);
        let json_dir = self.account_dir(account_id).join(JSON_DIR);
        let local_path = json_dir.join(&file_name);

        fs::create_dir_all(&json_dir)
            .await
            .map_err(|source| BackupError::Write {
                path: json_dir.clone(),
                source,
            })?;
        write_new(&local_path, document.as_bytes())
            .await
            .map_err(|source| {
                if source.kind() == std::io::ErrorKind::AlreadyExists {
                    error!(
                        "Refusing to overwrite existing backup {} with role {role_name} in account {account_id}",
                        local_path.display()
                    );
                }
                BackupError::Write {
                    path: local_path.clone(),
                    source,
                }
            })?;
        info!(
            "Wrote backup of role {role_name} in account {account_id} to {}",
            local_path.display()
        );

        let verified = self.verify_local(&local_path, snapshot).await?;

        let remote_key = format!(
            "{REMOTE_PREFIX}/{}/{file_name}",
            sanitize_component(account_id)
        );
        let remote_location = self.upload(&remote_key, verified).await?;
        info!("Uploaded backup of role {role_name} in account {account_id} to {remote_location}");

        Ok(BackupArtifact {
            local_path,
            remote_key,
            remote_location,
        })
    }

    /// Re-read the written file and require it to parse back into the same
    /// snapshot. Returns the bytes on disk for upload.
    async fn verify_local(&self, path: &Path, expected: &RoleSnapshot) -> Result<Vec<u8>, BackupError> {
        let verification = |detail: String| {
            error!("Backup verification failed for {}: {detail}", path.display());
            BackupError::Verification {
                path: path.to_path_buf(),
                detail,
            }
        };

        let bytes = fs::read(path).await.map_err(|e| verification(format!("unreadable: {e}")))?;
        if bytes.is_empty() {
            return Err(verification("file is empty".to_string()));
        }
        let text =
            std::str::from_utf8(&bytes).map_err(|e| verification(format!("not UTF-8: {e}")))?;
        let parsed = RoleSnapshot::from_document(text)
            .map_err(|e| verification(format!("not a valid snapshot: {e}")))?;
        if parsed.role.name.is_empty() {
            return Err(verification("snapshot has no role name".to_string()));
        }
        if parsed != *expected {
            return Err(verification(
                "content differs from the collected snapshot".to_string(),
            ));
        }
        debug!("Verified {} ({} bytes)", path.display(), bytes.len());
        Ok(bytes)
    }

    /// Upload with bounded exponential backoff. Rejections are not retried.
    async fn upload(&self, key: &str, body: Vec<u8>) -> Result<String, BackupError> {
        let location = self.sink.location(key);
        let mut attempt = 0;
        loop {
            let attempts = attempt + 1;
            match self.sink.put_object(key, body.clone()).await {
                Ok(()) => return Ok(location),
                Err(e) if e.is_retryable_upload() && attempts < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        "Upload to {location} failed (attempt {attempts}/{}), retrying in {delay:?}: {e}",
                        self.retry.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(source) => {
                    error!("Upload to {location} failed after {attempts} attempt(s): {source}");
                    return Err(BackupError::Upload {
                        location,
                        attempts,
                        source,
                    });
                }
            }
        }
    }

    /// Bundle every JSON backup of the account into
    /// `<workspace>/<account>/role_backups_<account>.zip`, replacing any
    /// previous archive. `Ok(None)` when there is nothing to archive.
    pub async fn archive_account(&self, account_id: &str) -> Result<Option<PathBuf>, BackupError> {
        let json_dir = self.account_dir(account_id).join(JSON_DIR);
        let files = match json_files(&json_dir).await {
            Ok(files) => files,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => {
                return Err(BackupError::Write {
                    path: json_dir,
                    source,
                })
            }
        };
        if files.is_empty() {
            warn!("No backups to archive for account {account_id} in {}", json_dir.display());
            return Ok(None);
        }

        let archive_path = self.archive_path(account_id);
        let target = archive_path.clone();
        let count = files.len();
        let written = tokio::task::spawn_blocking(move || write_archive(&target, &files))
            .await
            .map_err(|e| e.to_string())
            .and_then(|result| result);

        match written {
            Ok(()) => {
                info!(
                    "Archived {count} backup(s) for account {account_id} to {}",
                    archive_path.display()
                );
                Ok(Some(archive_path))
            }
            Err(detail) => {
                if let Err(e) = fs::remove_file(&archive_path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to remove partial archive {}: {e}", archive_path.display());
                    }
                }
                error!("Failed to archive backups for account {account_id}: {detail}");
                Err(BackupError::Archive {
                    path: archive_path,
                    detail,
                })
            }
        }
    }
}

/// Create `path` and write `contents`, failing if the file already exists.
/// Distinct role names can sanitize to the same file name, and a backup is
/// never replaced once written.
async fn write_new(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(contents).await?;
    file.flush().await?;
    file.sync_all().await
}

/// `*.json` files directly inside `dir`, sorted.
async fn json_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        if is_json && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn write_archive(archive_path: &Path, files: &[PathBuf]) -> Result<(), String> {
    let file = std::fs::File::create(archive_path)
        .map_err(|e| format!("cannot create {}: {e}", archive_path.display()))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for path in files {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Err(format!("unsupported file name {}", path.display()));
        };
        let contents =
            std::fs::read(path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        writer
            .start_file(format!("{JSON_DIR}/{name}"), options)
            .map_err(|e| format!("cannot add {name}: {e}"))?;
        writer
            .write_all(&contents)
            .map_err(|e| format!("cannot write {name}: {e}"))?;
    }
    writer
        .finish()
        .map_err(|e| format!("cannot finalize archive: {e}"))?;
    Ok(())
}
