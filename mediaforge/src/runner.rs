//! Execution of invocation plans against the external engine.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use process_utils::engine_command;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::error::ProcessingError;
use crate::transform::{InvocationPlan, PlanOutput};
use crate::{Error, Result};

/// Diagnostic lines kept from the engine's stderr.
const STDERR_TAIL_LINES: usize = 20;
/// Lines of the tail reported to callers.
const REPORTED_LINES: usize = 3;
/// Longest diagnostic message reported to callers.
const MAX_MESSAGE_CHARS: usize = 400;

fn path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(^|[\s'"(=])(?:/|[A-Za-z]:\\)[^\s'":]*"#).expect("path pattern is valid")
    })
}

/// Reduce engine diagnostics to a short message without filesystem paths.
///
/// Paths known to the plan are replaced first (they may contain spaces), then
/// anything that still looks like an absolute path.
pub fn sanitize_diagnostics(lines: &[String], known_paths: &[&Path]) -> String {
    let mut message = lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .rev()
        .take(REPORTED_LINES)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect::<Vec<_>>()
        .join("; ");

    for path in known_paths {
        let text = path.to_string_lossy();
        if !text.is_empty() {
            message = message.replace(text.as_ref(), "<path>");
        }
    }
    let mut message = path_pattern()
        .replace_all(&message, "${1}<path>")
        .into_owned();

    if message.chars().count() > MAX_MESSAGE_CHARS {
        message = message.chars().take(MAX_MESSAGE_CHARS).collect::<String>() + "...";
    }
    if message.is_empty() {
        message = "no diagnostic output".to_string();
    }
    message
}

/// Runs plans with a bounded number of concurrent engine processes.
#[derive(Debug, Clone)]
pub struct EngineRunner {
    program: String,
    jobs: Arc<Semaphore>,
}

impl EngineRunner {
    pub fn new(program: impl Into<String>, max_jobs: usize) -> Self {
        Self {
            program: program.into(),
            jobs: Arc::new(Semaphore::new(max_jobs.max(1))),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Number of engine processes that could start right now.
    pub fn available_slots(&self) -> usize {
        self.jobs.available_permits()
    }

    /// Whether the engine answers `-version` within a few seconds.
    pub async fn is_available(&self) -> bool {
        let mut command = engine_command(&self.program);
        command.arg("-version").stdout(Stdio::null()).stderr(Stdio::null());
        match tokio::time::timeout(Duration::from_secs(5), command.status()).await {
            Ok(Ok(status)) => status.success(),
            _ => false,
        }
    }

    /// Execute `plan`. On success the engine's output exists on disk.
    ///
    /// Support files are always removed afterwards; on failure any partial
    /// output is removed too.
    pub async fn run(&self, plan: &InvocationPlan) -> Result<()> {
        let _permit = self
            .jobs
            .acquire()
            .await
            .map_err(|_| Error::Other("engine runner is shut down".to_string()))?;

        let result = match self.prepare(plan).await {
            Ok(()) => self.execute(plan).await,
            Err(e) => Err(e),
        };

        for file in plan.support_files() {
            remove_quietly(&file.path).await;
        }
        if result.is_err() {
            match plan.output() {
                PlanOutput::File(path) => remove_quietly(path).await,
                PlanOutput::ImageSequence { dir, .. } => {
                    if let Err(e) = tokio::fs::remove_dir_all(dir).await
                        && e.kind() != std::io::ErrorKind::NotFound
                    {
                        warn!(error = %e, "failed to remove partial frame directory");
                    }
                }
            }
        }
        result
    }

    async fn prepare(&self, plan: &InvocationPlan) -> Result<()> {
        for file in plan.support_files() {
            tokio::fs::write(&file.path, &file.contents)
                .await
                .map_err(|e| Error::io_path("writing support file", &file.path, e))?;
        }
        if let PlanOutput::ImageSequence { dir, .. } = plan.output() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| Error::io_path("creating frame directory", dir, e))?;
        }
        Ok(())
    }

    async fn execute(&self, plan: &InvocationPlan) -> Result<()> {
        let args = plan.to_args();
        debug!(kind = plan.kind(), program = %self.program, args = ?args, "starting engine");
        let started = Instant::now();

        let mut command = engine_command(&self.program);
        command.args(&args).stdout(Stdio::null()).stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound
                || e.kind() == std::io::ErrorKind::PermissionDenied
            {
                error!(program = %self.program, "media engine is not available");
                Error::Processing(ProcessingError::EngineMissing)
            } else {
                Error::Other(format!("failed to spawn media engine: {e}"))
            }
        })?;

        let stderr_handle = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("engine stderr: {}", line);
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                Vec::from(tail)
            })
        });

        let status = match tokio::time::timeout(plan.timeout(), child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(Error::Other(format!("failed to wait for media engine: {e}"))),
            Err(_) => {
                warn!(kind = plan.kind(), timeout_secs = plan.timeout().as_secs(), "media engine timed out");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill timed out engine");
                }
                return Err(ProcessingError::TimedOut {
                    after: plan.timeout(),
                }
                .into());
            }
        };

        let tail = match stderr_handle {
            Some(handle) => handle.await.unwrap_or_default(),
            None => Vec::new(),
        };

        if !status.success() {
            let mut known: Vec<&Path> = plan.inputs().iter().map(|i| i.path.as_path()).collect();
            known.extend(plan.support_files().iter().map(|f| f.path.as_path()));
            known.push(plan.artifact_path());
            if let PlanOutput::ImageSequence { dir, .. } = plan.output() {
                known.push(dir);
            }
            let message = sanitize_diagnostics(&tail, &known);
            let code = status.code().unwrap_or(-1);
            warn!(kind = plan.kind(), code, message = %message, "media engine failed");
            return Err(ProcessingError::NonZeroExit { code, message }.into());
        }

        let produced = match plan.output() {
            PlanOutput::File(path) => tokio::fs::metadata(path).await.is_ok_and(|m| m.len() > 0),
            PlanOutput::ImageSequence { dir, .. } => tokio::fs::metadata(dir).await.is_ok(),
        };
        if !produced {
            return Err(Error::Other("media engine produced no output".to_string()));
        }

        info!(
            kind = plan.kind(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "media engine finished"
        );
        Ok(())
    }
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(error = %e, "failed to remove engine file"),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::transform::plan::PlanBuilder;

    #[test]
    fn diagnostics_never_contain_paths() {
        let lines = vec![
            "Input #0, mov,mp4".to_string(),
            String::new(),
            "/srv/media/temp/abc.mp4: Invalid data found when processing input".to_string(),
            "Error opening output file '/srv/media/output/x y.mp4'".to_string(),
            "C:\\media\\in.mp4: not found".to_string(),
        ];
        let known = [Path::new("/srv/media/output/x y.mp4")];
        let message = sanitize_diagnostics(&lines, &known);
        assert!(!message.contains("/srv"), "{message}");
        assert!(!message.contains("C:\\"), "{message}");
        assert!(message.contains("<path>: Invalid data found"));
        assert!(message.contains("'<path>'"));
        assert!(!message.contains("Input #0"));
    }

    #[test]
    fn ratios_in_diagnostics_survive() {
        let message = sanitize_diagnostics(&["frame rate 30000/1001".to_string()], &[]);
        assert_eq!(message, "frame rate 30000/1001");
    }

    #[test]
    fn long_diagnostics_are_truncated() {
        let message = sanitize_diagnostics(&["x".repeat(2_000)], &[]);
        assert_eq!(message.chars().count(), MAX_MESSAGE_CHARS + 3);
        assert_eq!(sanitize_diagnostics(&[], &[]), "no diagnostic output");
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("engine.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn plan(output: PathBuf, support: PathBuf, timeout: Duration) -> InvocationPlan {
        PlanBuilder::new("test", PlanOutput::File(output), timeout)
            .input(Path::new("/nonexistent/input.mp4"))
            .support_file(support, "doc".to_string())
            .build()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_run_cleans_support_files() {
        let dir = tempfile::tempdir().unwrap();
        let support = dir.path().join("doc.ass");
        let output = dir.path().join("out.mp4");
        let program = script(
            dir.path(),
            &format!("for a; do last=$a; done; cat '{}' > \"$last\"", support.display()),
        );

        let runner = EngineRunner::new(program, 2);
        runner
            .run(&plan(output.clone(), support.clone(), Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "doc");
        assert!(!support.exists());
        assert_eq!(runner.available_slots(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failure_is_classified_and_partial_output_removed() {
        let dir = tempfile::tempdir().unwrap();
        let support = dir.path().join("doc.ass");
        let output = dir.path().join("out.mp4");
        let program = script(
            dir.path(),
            &format!(
                "echo partial > '{}'; echo \"/nonexistent/input.mp4: Invalid data\" >&2; exit 3",
                output.display()
            ),
        );

        let err = EngineRunner::new(program, 1)
            .run(&plan(output.clone(), support.clone(), Duration::from_secs(10)))
            .await
            .unwrap_err();
        match err {
            Error::Processing(ProcessingError::NonZeroExit { code, message }) => {
                assert_eq!(code, 3);
                assert_eq!(message, "<path>: Invalid data");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!output.exists());
        assert!(!support.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_engine_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "exec sleep 10");
        let started = Instant::now();
        let err = EngineRunner::new(program, 1)
            .run(&plan(
                dir.path().join("out.mp4"),
                dir.path().join("doc.ass"),
                Duration::from_millis(200),
            ))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Processing(ProcessingError::TimedOut { .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_engine_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let support = dir.path().join("doc.ass");
        let runner = EngineRunner::new("/nonexistent/bin/ffmpeg", 1);
        assert!(!runner.is_available().await);
        let err = runner
            .run(&plan(dir.path().join("out.mp4"), support.clone(), Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Processing(ProcessingError::EngineMissing)
        ));
        assert!(!support.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn empty_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "exit 0");
        let err = EngineRunner::new(program, 1)
            .run(&plan(
                dir.path().join("out.mp4"),
                dir.path().join("doc.ass"),
                Duration::from_secs(5),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Other(_)));
    }
}
