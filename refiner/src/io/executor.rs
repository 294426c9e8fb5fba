//! Compiling and running a candidate test inside the user's project.
//!
//! The [`TestExecutor`] trait decouples the refinement loop from the build
//! tool. Tests use scripted executors that return canned reports without
//! touching a project tree.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::target::TestTarget;
use crate::core::types::ExecutionReport;
use crate::io::config::ExecutorConfig;
use crate::io::process::{CapturedOutput, run_captured};

/// Compiles and runs one candidate test, reporting raw build output.
pub trait TestExecutor: Send + Sync {
    fn compile_and_execute(&self, artifact: &str, target: &TestTarget) -> Result<ExecutionReport>;
}

/// Writes the candidate into the project and drives the configured build
/// commands (Maven by default).
///
/// Whatever occupied the test path beforehand is put back once the run is
/// over, so the project is left as it was found.
pub struct MavenExecutor {
    config: ExecutorConfig,
}

impl MavenExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    fn command(&self, template: &[String], target: &TestTarget) -> Result<Command> {
        let (program, args) = template
            .split_first()
            .ok_or_else(|| anyhow!("empty build command"))?;
        let mut cmd = Command::new(program);
        for arg in args {
            cmd.arg(arg.replace("{test_class}", &target.test_class));
        }
        cmd.current_dir(&target.project_dir);
        Ok(cmd)
    }

    fn run(&self, template: &[String], target: &TestTarget) -> Result<CapturedOutput> {
        let cmd = self.command(template, target)?;
        run_captured(cmd, self.config.timeout(), self.config.output_limit_bytes)
    }
}

impl TestExecutor for MavenExecutor {
    #[instrument(skip_all, fields(test_class = %target.test_class))]
    fn compile_and_execute(&self, artifact: &str, target: &TestTarget) -> Result<ExecutionReport> {
        let path = resolve_test_path(target);
        let _restore = ScopedArtifact::install(&path, artifact)?;

        info!(path = %path.display(), "compiling candidate test");
        let compile = self
            .run(&self.config.compile_command, target)
            .context("run compile command")?;
        let mut report = ExecutionReport {
            compile_log: compile.log(),
            compile_succeeded: compile.succeeded(),
            ..ExecutionReport::default()
        };
        if !report.compile_succeeded {
            debug!(exit_code = ?compile.status.code(), "candidate failed to compile");
            return Ok(report);
        }

        info!("running candidate test");
        let execute = self
            .run(&self.config.test_command, target)
            .context("run test command")?;
        report.execute_log = execute.log();
        report.execute_succeeded = execute.succeeded();
        debug!(exit_code = ?execute.status.code(), "candidate test finished");
        Ok(report)
    }
}

fn resolve_test_path(target: &TestTarget) -> PathBuf {
    let path = Path::new(&target.test_path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        Path::new(&target.project_dir).join(path)
    }
}

/// Candidate file written for the duration of one run.
struct ScopedArtifact {
    path: PathBuf,
    original: Option<Vec<u8>>,
}

impl ScopedArtifact {
    fn install(path: &Path, artifact: &str) -> Result<Self> {
        let original = match fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create test dir {}", parent.display()))?;
        }
        fs::write(path, artifact).with_context(|| format!("write {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            original,
        })
    }
}

impl Drop for ScopedArtifact {
    fn drop(&mut self) {
        let result = match &self.original {
            Some(bytes) => fs::write(&self.path, bytes),
            None => fs::remove_file(&self.path),
        };
        if let Err(err) = result {
            warn!(path = %self.path.display(), err = %err, "failed to restore test file");
        }
    }
}
