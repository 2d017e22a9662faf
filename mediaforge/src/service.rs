//! Request execution: probe inputs, build the plan, run the engine, register
//! the results and optionally relay them to remote storage.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::artifacts::{ArtifactManager, DirectoryClass, ExtensionPolicy};
use crate::config::AppConfig;
use crate::media::archive::bundle_frames;
use crate::media::fetch::{SegmentFetcher, build_http_client};
use crate::media::{MediaAsset, ProbeSet, Prober};
use crate::runner::EngineRunner;
use crate::storage::{ObjectUploader, UploadResult};
use crate::transform::{CommandSynthesizer, InvocationPlan, PlanOutput, TransformRequest};
use crate::{Error, Result};

/// Timeout for a single `ffprobe` call.
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);
/// Connect timeout for segment downloads.
const FETCH_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The common `upload` / `upload_location` request fields.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub enabled: bool,
    pub location: String,
}

/// What a finished transform produced.
#[derive(Debug)]
pub struct TransformOutcome {
    /// Artifact name of the result, downloadable from the output root.
    pub filename: String,
    pub sidecar_filename: Option<String>,
    /// Frames in the archive, for frame extraction.
    pub frame_count: Option<usize>,
    /// Duration of the primary input, when it has one.
    pub source_duration: Option<f64>,
    /// `None` when no upload was requested. A failed upload leaves the local
    /// artifact in place.
    pub upload: Option<Result<UploadResult>>,
}

/// Drives one transform from validated request to registered artifact.
pub struct MediaService {
    artifacts: Arc<ArtifactManager>,
    prober: Prober,
    synthesizer: CommandSynthesizer,
    runner: EngineRunner,
    fetcher: SegmentFetcher,
    uploader: Option<Arc<dyn ObjectUploader>>,
}

impl std::fmt::Debug for MediaService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaService")
            .field("synthesizer", &self.synthesizer)
            .field("runner", &self.runner)
            .field("uploader", &self.uploader.is_some())
            .finish()
    }
}

impl MediaService {
    pub fn new(
        artifacts: Arc<ArtifactManager>,
        prober: Prober,
        synthesizer: CommandSynthesizer,
        runner: EngineRunner,
        fetcher: SegmentFetcher,
    ) -> Self {
        Self {
            artifacts,
            prober,
            synthesizer,
            runner,
            fetcher,
            uploader: None,
        }
    }

    /// Wire every component from the startup configuration.
    pub fn from_config(config: &AppConfig, artifacts: Arc<ArtifactManager>) -> Result<Self> {
        let engine = &config.engine;
        let client = build_http_client(FETCH_CONNECT_TIMEOUT)?;
        Ok(Self::new(
            artifacts,
            Prober::new(&engine.ffprobe_path, PROBE_TIMEOUT),
            CommandSynthesizer::new(engine.timeout, engine.threads),
            EngineRunner::new(&engine.ffmpeg_path, engine.max_concurrent_jobs),
            SegmentFetcher::new(client, config.max_upload_bytes),
        ))
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn ObjectUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn artifacts(&self) -> &Arc<ArtifactManager> {
        &self.artifacts
    }

    pub fn runner(&self) -> &EngineRunner {
        &self.runner
    }

    /// Whether the engine binary responds.
    pub async fn engine_available(&self) -> bool {
        self.runner.is_available().await
    }

    /// Download a remote segment into a temp artifact.
    pub async fn fetch_segment(&self, url: &str, field: &str, policy: &ExtensionPolicy) -> Result<MediaAsset> {
        self.fetcher.fetch(url, field, &self.artifacts, policy).await
    }

    /// Delete request inputs that will not reach [`execute`](Self::execute).
    pub async fn discard_inputs(&self, assets: &[MediaAsset]) {
        for asset in assets {
            self.artifacts.discard(&asset.path).await;
        }
    }

    /// Run `request` to completion.
    ///
    /// The request's temp inputs are deleted on every path. On failure nothing
    /// the request reserved is left behind.
    pub async fn execute(&self, request: TransformRequest, upload: &UploadOptions) -> Result<TransformOutcome> {
        let kind = request.kind();
        let result = self.produce(&request).await;
        for (_, asset) in request.assets() {
            self.artifacts.discard(&asset.path).await;
        }

        let mut outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(kind, error = %e, "transform failed");
                return Err(e);
            }
        };
        info!(kind, artifact = %outcome.filename, "transform finished");

        if upload.enabled {
            outcome.upload = Some(self.upload_output(&outcome.filename, &upload.location).await);
        }
        Ok(outcome)
    }

    async fn produce(&self, request: &TransformRequest) -> Result<TransformOutcome> {
        let mut probes = ProbeSet::new();
        for (field, asset) in request.assets() {
            if !probes.contains(asset) {
                let info = self.prober.probe(asset, field).await?;
                probes.insert(asset, info);
            }
        }
        let source_duration = request
            .assets()
            .first()
            .and_then(|(_, asset)| probes.get(asset).ok())
            .and_then(|info| info.duration);

        let plan = self
            .synthesizer
            .synthesize(request, &probes, &self.artifacts)
            .await?;

        let finished = self.finish_plan(&plan).await;
        for file in plan.support_files() {
            self.artifacts.discard(&file.path).await;
        }
        let (filename, sidecar_filename, frame_count) = match finished {
            Ok(done) => done,
            Err(e) => {
                self.abandon(&plan).await;
                return Err(e);
            }
        };

        Ok(TransformOutcome {
            filename,
            sidecar_filename,
            frame_count,
            source_duration,
            upload: None,
        })
    }

    /// Run the engine and register every artifact the plan produces.
    async fn finish_plan(&self, plan: &InvocationPlan) -> Result<(String, Option<String>, Option<usize>)> {
        self.runner.run(plan).await?;

        let mut frame_count = None;
        if let PlanOutput::ImageSequence { dir, archive, .. } = plan.output() {
            let bundled = bundle_frames(dir, archive).await;
            self.artifacts.discard(dir).await;
            let count = bundled?;
            debug!(frames = count, "frame archive written");
            frame_count = Some(count);
        }

        let sidecar_filename = match plan.sidecar() {
            Some(sidecar) => {
                tokio::fs::write(&sidecar.path, &sidecar.contents)
                    .await
                    .map_err(|e| Error::io_path("writing cue sheet", &sidecar.path, e))?;
                Some(self.artifacts.register_default(&sidecar.path)?.id)
            }
            None => None,
        };

        let artifact = self.artifacts.register_default(plan.artifact_path())?;
        Ok((artifact.id, sidecar_filename, frame_count))
    }

    async fn abandon(&self, plan: &InvocationPlan) {
        self.artifacts.discard(plan.artifact_path()).await;
        if let PlanOutput::ImageSequence { dir, .. } = plan.output() {
            self.artifacts.discard(dir).await;
        }
        if let Some(sidecar) = plan.sidecar() {
            self.artifacts.discard(&sidecar.path).await;
        }
    }

    fn uploader(&self) -> Result<&Arc<dyn ObjectUploader>> {
        self.uploader
            .as_ref()
            .ok_or_else(|| Error::storage("remote storage is not configured"))
    }

    /// Upload a live output artifact. The artifact is leased for the duration
    /// of the upload so the retention sweep cannot remove it midway.
    pub async fn upload_output(&self, name: &str, key_prefix: &str) -> Result<UploadResult> {
        let uploader = self.uploader()?;
        let lease = self
            .artifacts
            .resolve_for_download(DirectoryClass::Output, name)?;
        uploader.upload(lease.path(), lease.name(), key_prefix).await
    }

    /// Upload a client-supplied file, then delete it.
    pub async fn upload_input(&self, asset: MediaAsset, filename: &str, key_prefix: &str) -> Result<UploadResult> {
        let result = match self.uploader() {
            Ok(uploader) => uploader.upload(&asset.path, filename, key_prefix).await,
            Err(e) => Err(e),
        };
        self.artifacts.discard(&asset.path).await;
        result
    }

    /// Path of a registered output, for tests and diagnostics.
    pub fn output_path(&self, name: &str) -> Option<PathBuf> {
        self.artifacts
            .artifact(name)
            .filter(|a| a.class == DirectoryClass::Output)
            .map(|a| self.artifacts.root(DirectoryClass::Output).join(a.id))
    }
}
