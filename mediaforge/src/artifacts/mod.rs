//! Artifact lifecycle management.
//!
//! Every file the service writes (uploaded inputs, engine outputs, generated
//! subtitle documents, frame directories) is allocated here under an opaque
//! random name and tracked in a registry. The registry is the single source of
//! truth for downloads and for the retention sweep; resolving a download and
//! deleting an expired artifact both happen under the same lock, so a file that
//! is leased to a reader is never removed from under it.
//!
//! Allocations made inside [`with_job_scope`] belong to that job. The sweep
//! leaves them alone until the job's future completes or is dropped.

pub mod extensions;

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use regex::Regex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::media::Extension;
use crate::{Error, Result};

pub use extensions::ExtensionPolicy;

/// Managed root an artifact lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum DirectoryClass {
    /// Request-scoped inputs and scratch files.
    Temp,
    /// Transform results, downloadable until their retention deadline.
    Output,
}

/// Roots and timings for the artifact manager.
#[derive(Debug, Clone)]
pub struct ArtifactSettings {
    pub temp_root: PathBuf,
    pub output_root: PathBuf,
    pub retention: Duration,
    /// How long an expired file is kept on disk for downloads already in flight.
    pub grace: Duration,
}

/// Registry view of one managed file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub id: String,
    pub class: DirectoryClass,
    pub created_at: SystemTime,
    /// `None` while the artifact is still being produced.
    pub expires_at: Option<SystemTime>,
}

#[derive(Debug)]
struct Entry {
    artifact: Artifact,
    readers: usize,
    /// Job that allocated the entry, if it was allocated inside one.
    owner: Option<Weak<JobToken>>,
}

impl Entry {
    fn new(artifact: Artifact) -> Self {
        Self {
            artifact,
            readers: 0,
            owner: None,
        }
    }

    /// Unregistered and still owned by a running job.
    fn in_flight(&self) -> bool {
        self.artifact.expires_at.is_none()
            && self.owner.as_ref().is_some_and(|job| job.strong_count() > 0)
    }
}

#[derive(Debug)]
struct JobToken;

tokio::task_local! {
    static ACTIVE_JOB: Arc<JobToken>;
}

/// Run `fut` as one job. Files it allocates and never registers are not swept
/// while `fut` is alive; once it finishes or is dropped they fall back to the
/// retention clock.
pub async fn with_job_scope<F: Future>(fut: F) -> F::Output {
    ACTIVE_JOB.scope(Arc::new(JobToken), fut).await
}

fn current_job() -> Option<Weak<JobToken>> {
    ACTIVE_JOB.try_with(Arc::downgrade).ok()
}

type Registry = Arc<Mutex<HashMap<String, Entry>>>;

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[0-9a-f]{32}(\.[a-z0-9]{1,8})?$").expect("artifact name pattern is valid")
    })
}

/// Whether `name` has the shape of an allocated artifact name.
pub fn is_artifact_name(name: &str) -> bool {
    name_pattern().is_match(name)
}

/// A download in progress. The artifact is not deleted while a lease is alive.
#[derive(Debug)]
pub struct DownloadLease {
    name: String,
    path: PathBuf,
    registry: Registry,
}

impl DownloadLease {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DownloadLease {
    fn drop(&mut self) {
        if let Some(entry) = self.registry.lock().get_mut(&self.name) {
            entry.readers = entry.readers.saturating_sub(1);
        }
    }
}

/// Allocates, tracks and evicts managed files.
#[derive(Debug)]
pub struct ArtifactManager {
    settings: ArtifactSettings,
    registry: Registry,
}

impl ArtifactManager {
    pub fn new(settings: ArtifactSettings) -> Self {
        Self {
            settings,
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn settings(&self) -> &ArtifactSettings {
        &self.settings
    }

    pub fn root(&self, class: DirectoryClass) -> &Path {
        match class {
            DirectoryClass::Temp => &self.settings.temp_root,
            DirectoryClass::Output => &self.settings.output_root,
        }
    }

    /// Create both roots and clear scratch files left by a previous run.
    pub async fn prepare(&self) -> Result<()> {
        let temp = &self.settings.temp_root;
        match tokio::fs::remove_dir_all(temp).await {
            Ok(()) => debug!(path = %temp.display(), "cleared stale temp root"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io_path("clearing temp root", temp, e)),
        }
        for root in [temp, &self.settings.output_root] {
            tokio::fs::create_dir_all(root)
                .await
                .map_err(|e| Error::io_path("creating managed root", root, e))?;
        }
        Ok(())
    }

    fn insert_pending(&self, class: DirectoryClass, name: String) -> PathBuf {
        let path = self.root(class).join(&name);
        let artifact = Artifact {
            id: name.clone(),
            class,
            created_at: SystemTime::now(),
            expires_at: None,
        };
        let entry = Entry {
            owner: current_job(),
            ..Entry::new(artifact)
        };
        self.registry.lock().insert(name, entry);
        path
    }

    /// Reserve a fresh file path in `class` with the given extension.
    ///
    /// Nothing is written; the caller creates the file.
    pub fn allocate(&self, class: DirectoryClass, extension: &Extension) -> PathBuf {
        let name = format!("{}.{}", Uuid::new_v4().simple(), extension);
        self.insert_pending(class, name)
    }

    /// Reserve a fresh directory path in `class`. The caller creates it.
    pub fn allocate_dir(&self, class: DirectoryClass) -> PathBuf {
        self.insert_pending(class, Uuid::new_v4().simple().to_string())
    }

    fn forget(&self, path: &Path) -> Option<Entry> {
        let name = path.file_name()?.to_str()?;
        self.registry.lock().remove(name)
    }

    /// Start the retention clock for an allocated artifact.
    pub fn register(&self, path: &Path, retention: Duration) -> Result<Artifact> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::not_found("artifact"))?;

        let mut registry = self.registry.lock();
        let entry = registry
            .get_mut(name)
            .filter(|e| self.root(e.artifact.class) == path.parent().unwrap_or(path))
            .ok_or_else(|| Error::not_found("artifact"))?;
        entry.artifact.expires_at = Some(SystemTime::now() + retention);
        debug!(artifact = %name, class = %entry.artifact.class, "artifact registered");
        Ok(entry.artifact.clone())
    }

    /// [`register`](Self::register) with the configured retention.
    pub fn register_default(&self, path: &Path) -> Result<Artifact> {
        self.register(path, self.settings.retention)
    }

    /// Registry view of `name`, if it is tracked.
    pub fn artifact(&self, name: &str) -> Option<Artifact> {
        self.registry.lock().get(name).map(|e| e.artifact.clone())
    }

    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve a client-supplied name to a live artifact and lease it.
    ///
    /// Anything other than the exact name of a registered, unexpired artifact
    /// of `class` is `NotFound`.
    pub fn resolve_for_download(&self, class: DirectoryClass, name: &str) -> Result<DownloadLease> {
        self.resolve_at(class, name, SystemTime::now())
    }

    fn resolve_at(&self, class: DirectoryClass, name: &str, now: SystemTime) -> Result<DownloadLease> {
        if !is_artifact_name(name) {
            return Err(Error::not_found("file"));
        }

        let path = {
            let mut registry = self.registry.lock();
            let entry = registry
                .get_mut(name)
                .filter(|e| e.artifact.class == class)
                .filter(|e| e.artifact.expires_at.is_some_and(|exp| now < exp))
                .ok_or_else(|| Error::not_found("file"))?;
            entry.readers += 1;
            self.root(class).join(name)
        };

        let lease = DownloadLease {
            name: name.to_string(),
            path,
            registry: Arc::clone(&self.registry),
        };
        if !lease.path.is_file() {
            return Err(Error::not_found("file"));
        }
        Ok(lease)
    }

    /// Delete an artifact now, regardless of its deadline.
    pub async fn discard(&self, path: &Path) {
        let Some(entry) = self.forget(path) else {
            return;
        };
        let target = self.root(entry.artifact.class).join(&entry.artifact.id);
        remove_path(&target).await;
    }

    /// Registered artifacts expire at their deadline. Allocations that were
    /// never registered are reclaimed one retention period after they were
    /// reserved, unless their job is still running.
    fn deadline(&self, artifact: &Artifact) -> SystemTime {
        artifact
            .expires_at
            .unwrap_or(artifact.created_at + self.settings.retention)
    }

    /// Remove every expired artifact whose grace period has passed, that has
    /// no active download and whose job is not running. Returns the number of
    /// artifacts deleted.
    pub async fn sweep(&self) -> usize {
        self.sweep_at(SystemTime::now()).await
    }

    async fn sweep_at(&self, now: SystemTime) -> usize {
        let grace = self.settings.grace;
        let doomed: Vec<PathBuf> = {
            let mut registry = self.registry.lock();
            let expired: Vec<String> = registry
                .iter()
                .filter(|(_, e)| {
                    e.readers == 0 && !e.in_flight() && now >= self.deadline(&e.artifact) + grace
                })
                .map(|(name, _)| name.clone())
                .collect();
            expired
                .into_iter()
                .filter_map(|name| registry.remove(&name))
                .map(|e| self.root(e.artifact.class).join(&e.artifact.id))
                .collect()
        };

        for path in &doomed {
            remove_path(path).await;
        }
        if !doomed.is_empty() {
            info!(count = doomed.len(), "retention sweep removed artifacts");
        }
        doomed.len()
    }

    /// Track output files left behind by a previous run.
    ///
    /// Their deadline is computed from the file's modification time.
    pub async fn adopt_existing(&self) -> Result<usize> {
        let root = &self.settings.output_root;
        let mut entries = tokio::fs::read_dir(root)
            .await
            .map_err(|e| Error::io_path("scanning output root", root, e))?;

        let mut adopted = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::io_path("scanning output root", root, e))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !is_artifact_name(&name) {
                debug!(file = %name, "ignoring unmanaged file in output root");
                continue;
            }
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let created_at = metadata.modified().unwrap_or_else(|_| SystemTime::now());
            let artifact = Artifact {
                id: name.clone(),
                class: DirectoryClass::Output,
                created_at,
                expires_at: Some(created_at + self.settings.retention),
            };
            self.registry.lock().insert(name, Entry::new(artifact));
            adopted += 1;
        }

        if adopted > 0 {
            info!(count = adopted, "adopted existing output artifacts");
        }
        Ok(adopted)
    }

    /// Remove the temp root entirely (shutdown).
    pub async fn remove_temp_root(&self) {
        remove_path(&self.settings.temp_root).await;
    }

    /// Run the retention sweep every `interval` until `cancel_token` fires.
    pub fn start_sweeper(
        self: &Arc<Self>,
        cancel_token: CancellationToken,
        interval: Duration,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("artifact sweeper shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        manager.sweep().await;
                    }
                }
            }
        })
    }
}

async fn remove_path(path: &Path) {
    let result = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => debug!(path = %path.display(), "artifact removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove artifact"),
    }
}
