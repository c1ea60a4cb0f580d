//! Stage resolution and invocation.
//!
//! A stage is a named external program owned either by the harness or by the
//! execution backend. Resolution walks an ordered chain of [`StageResolver`]s;
//! the default chain prefers a Python script, then a compiled executable under
//! `build/`, and finally treats the stage as an optional no-op.

use crate::error::{describe_exit, BenchError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

/// Which collaborator directory a stage lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOwner {
    Harness,
    Backend,
}

impl StageOwner {
    pub fn as_str(self) -> &'static str {
        match self {
            StageOwner::Harness => "harness",
            StageOwner::Backend => "backend",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInvocation {
    pub stage: String,
    pub owner: StageOwner,
    pub args: Vec<String>,
    pub strict: bool,
}

impl StageInvocation {
    pub fn new(owner: StageOwner, stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            owner,
            args: Vec::new(),
            strict: true,
        }
    }

    pub fn harness(stage: impl Into<String>) -> Self {
        Self::new(StageOwner::Harness, stage)
    }

    pub fn backend(stage: impl Into<String>) -> Self {
        Self::new(StageOwner::Backend, stage)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Failure of a soft stage is logged and handed back to the caller.
    pub fn soft(mut self) -> Self {
        self.strict = false;
        self
    }
}

/// Concrete command line a resolver produced for a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    pub program: PathBuf,
    pub leading_args: Vec<OsString>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Command(StageCommand),
    Skip,
}

pub trait StageResolver {
    fn name(&self) -> &'static str;

    /// Returns `None` when this resolver has no opinion about `stage`.
    fn resolve(&self, base_dir: &Path, stage: &str) -> Option<Resolution>;
}

/// `<base>/<stage>.<extension>` run through an interpreter.
#[derive(Debug, Clone)]
pub struct ScriptResolver {
    interpreter: PathBuf,
    extension: String,
}

impl ScriptResolver {
    pub fn new(interpreter: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            extension: extension.into(),
        }
    }
}

impl Default for ScriptResolver {
    fn default() -> Self {
        Self::new("python3", "py")
    }
}

impl StageResolver for ScriptResolver {
    fn name(&self) -> &'static str {
        "script"
    }

    fn resolve(&self, base_dir: &Path, stage: &str) -> Option<Resolution> {
        let script = base_dir.join(format!("{}.{}", stage, self.extension));
        if !script.is_file() {
            return None;
        }
        Some(Resolution::Command(StageCommand {
            program: self.interpreter.clone(),
            leading_args: vec![script.into_os_string()],
        }))
    }
}

/// `<base>/build/<stage>`, the output of the backend's native build.
#[derive(Debug, Clone, Default)]
pub struct ExecutableResolver;

impl StageResolver for ExecutableResolver {
    fn name(&self) -> &'static str {
        "executable"
    }

    fn resolve(&self, base_dir: &Path, stage: &str) -> Option<Resolution> {
        let exe = base_dir.join("build").join(stage);
        if !exe.is_file() {
            return None;
        }
        Some(Resolution::Command(StageCommand {
            program: exe,
            leading_args: Vec::new(),
        }))
    }
}

/// Terminal resolver: anything left unresolved is an optional stage.
#[derive(Debug, Clone, Default)]
pub struct NoopResolver;

impl StageResolver for NoopResolver {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn resolve(&self, _base_dir: &Path, _stage: &str) -> Option<Resolution> {
        Some(Resolution::Skip)
    }
}

pub fn default_resolvers() -> Vec<Box<dyn StageResolver>> {
    vec![
        Box::new(ScriptResolver::default()),
        Box::new(ExecutableResolver),
        Box::new(NoopResolver),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    Skipped,
    /// Only produced for soft stages; strict failures become errors.
    SoftFailed { code: Option<i32> },
}

pub struct StageDispatcher {
    harness_dir: PathBuf,
    backend_dir: PathBuf,
    work_dir: PathBuf,
    resolvers: Vec<Box<dyn StageResolver>>,
}

impl StageDispatcher {
    /// Stages run with `work_dir` as their current directory, which is the
    /// benchmark root so that relative paths inside collaborators line up.
    pub fn new(harness_dir: PathBuf, backend_dir: PathBuf, work_dir: PathBuf) -> Self {
        Self {
            harness_dir,
            backend_dir,
            work_dir,
            resolvers: default_resolvers(),
        }
    }

    pub fn with_resolvers(mut self, resolvers: Vec<Box<dyn StageResolver>>) -> Self {
        self.resolvers = resolvers;
        self
    }

    pub fn base_dir(&self, owner: StageOwner) -> &Path {
        match owner {
            StageOwner::Harness => &self.harness_dir,
            StageOwner::Backend => &self.backend_dir,
        }
    }

    /// First resolver with an opinion wins; an exhausted chain is a skip.
    pub fn resolve(&self, base_dir: &Path, stage: &str) -> Resolution {
        for resolver in &self.resolvers {
            if let Some(resolution) = resolver.resolve(base_dir, stage) {
                debug!(stage, resolver = resolver.name(), "stage resolved");
                return resolution;
            }
        }
        Resolution::Skip
    }

    pub fn dispatch(&self, invocation: &StageInvocation) -> Result<StageOutcome> {
        self.run(
            self.base_dir(invocation.owner),
            &invocation.stage,
            &invocation.args,
            invocation.strict,
        )
    }

    pub fn run(
        &self,
        base_dir: &Path,
        stage: &str,
        args: &[String],
        strict: bool,
    ) -> Result<StageOutcome> {
        let command = match self.resolve(base_dir, stage) {
            Resolution::Command(command) => command,
            Resolution::Skip => {
                info!(stage, base_dir = %base_dir.display(), "stage not provided, skipping");
                return Ok(StageOutcome::Skipped);
            }
        };

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.leading_args);
        cmd.args(args);
        cmd.current_dir(&self.work_dir);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());
        debug!(stage, command = ?cmd, "launching stage");

        let status = cmd.status().map_err(|source| BenchError::StageSpawn {
            stage: stage.to_string(),
            program: command.program.clone(),
            source,
        })?;
        if status.success() {
            return Ok(StageOutcome::Completed);
        }

        let code = status.code();
        if strict {
            return Err(BenchError::StageFailed {
                stage: stage.to_string(),
                code,
            });
        }
        warn!(
            stage,
            "soft stage failed ({}), continuing",
            describe_exit(&code)
        );
        Ok(StageOutcome::SoftFailed { code })
    }
}
