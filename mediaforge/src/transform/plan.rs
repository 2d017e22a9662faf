//! Invocation plans: everything one engine run needs, fixed at build time.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// One engine input with the options that precede its `-i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanInput {
    pub options: Vec<String>,
    pub path: PathBuf,
}

/// The filter description handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterSpec {
    None,
    /// Single-input chain passed with `-vf`.
    Simple(String),
    /// Labelled graph passed with `-filter_complex`.
    Complex(String),
    /// Single-input chain read from a support file with `-filter_script:v`.
    /// Used for chains that can outgrow the per-argument length limit.
    Script(PathBuf),
}

/// Where the engine writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutput {
    File(PathBuf),
    /// Numbered images in `dir`, bundled into `archive` after the run.
    ImageSequence {
        dir: PathBuf,
        pattern: String,
        archive: PathBuf,
    },
}

/// A file whose contents are generated by the synthesizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub path: PathBuf,
    pub contents: String,
}

/// Fully resolved engine invocation. Immutable once built.
#[derive(Debug, Clone)]
pub struct InvocationPlan {
    kind: &'static str,
    inputs: Vec<PlanInput>,
    filter: FilterSpec,
    output_args: Vec<String>,
    output: PlanOutput,
    support_files: Vec<GeneratedFile>,
    sidecar: Option<GeneratedFile>,
    timeout: Duration,
    threads: u32,
}

impl InvocationPlan {
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn inputs(&self) -> &[PlanInput] {
        &self.inputs
    }

    pub fn filter(&self) -> &FilterSpec {
        &self.filter
    }

    pub fn output_args(&self) -> &[String] {
        &self.output_args
    }

    pub fn output(&self) -> &PlanOutput {
        &self.output
    }

    /// Files the runner writes before spawning and removes afterwards.
    pub fn support_files(&self) -> &[GeneratedFile] {
        &self.support_files
    }

    /// Extra output artifact written after a successful run.
    pub fn sidecar(&self) -> Option<&GeneratedFile> {
        self.sidecar.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The artifact handed back to the caller.
    pub fn artifact_path(&self) -> &Path {
        match &self.output {
            PlanOutput::File(path) => path,
            PlanOutput::ImageSequence { archive, .. } => archive,
        }
    }

    /// Engine argument vector, without the program name.
    pub fn to_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-y", "-loglevel", "error"]
            .into_iter()
            .map(String::from)
            .collect();

        for input in &self.inputs {
            args.extend(input.options.iter().cloned());
            args.push("-i".to_string());
            args.push(input.path.to_string_lossy().into_owned());
        }

        match &self.filter {
            FilterSpec::None => {}
            FilterSpec::Simple(chain) => {
                args.push("-vf".to_string());
                args.push(chain.clone());
            }
            FilterSpec::Complex(graph) => {
                args.push("-filter_complex".to_string());
                args.push(graph.clone());
            }
            FilterSpec::Script(path) => {
                args.push("-filter_script:v".to_string());
                args.push(path.to_string_lossy().into_owned());
            }
        }

        if self.threads > 0 {
            args.push("-threads".to_string());
            args.push(self.threads.to_string());
        }
        args.extend(self.output_args.iter().cloned());

        let target = match &self.output {
            PlanOutput::File(path) => path.clone(),
            PlanOutput::ImageSequence { dir, pattern, .. } => dir.join(pattern),
        };
        args.push(target.to_string_lossy().into_owned());
        args
    }
}

/// Incremental construction of an [`InvocationPlan`].
#[derive(Debug)]
pub struct PlanBuilder {
    plan: InvocationPlan,
}

impl PlanBuilder {
    pub fn new(kind: &'static str, output: PlanOutput, timeout: Duration) -> Self {
        Self {
            plan: InvocationPlan {
                kind,
                inputs: Vec::new(),
                filter: FilterSpec::None,
                output_args: Vec::new(),
                output,
                support_files: Vec::new(),
                sidecar: None,
                timeout,
                threads: 0,
            },
        }
    }

    pub fn input(mut self, path: &Path) -> Self {
        self.plan.inputs.push(PlanInput {
            options: Vec::new(),
            path: path.to_path_buf(),
        });
        self
    }

    pub fn input_with<I, S>(mut self, options: I, path: &Path) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.plan.inputs.push(PlanInput {
            options: options.into_iter().map(Into::into).collect(),
            path: path.to_path_buf(),
        });
        self
    }

    pub fn filter(mut self, filter: FilterSpec) -> Self {
        self.plan.filter = filter;
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.plan.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn support_file(mut self, path: PathBuf, contents: String) -> Self {
        self.plan.support_files.push(GeneratedFile { path, contents });
        self
    }

    pub fn sidecar(mut self, path: PathBuf, contents: String) -> Self {
        self.plan.sidecar = Some(GeneratedFile { path, contents });
        self
    }

    pub fn threads(mut self, threads: u32) -> Self {
        self.plan.threads = threads;
        self
    }

    pub fn build(self) -> InvocationPlan {
        self.plan
    }
}
