//! External linter invocation.
//!
//! The linter is an advisory check: its outcome is reported and never stops a
//! build. A linter that cannot even be spawned is reported the same way.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info, warn};

use cascade_util::path::{relative_to, to_slash};

use crate::project::LintConfig;

/// Program and leading arguments used when the config names none.
pub const DEFAULT_COMMAND: &[&str] = &["npx", "stylelint"];

/// Fully resolved linter invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintOptions {
    /// Program followed by its leading arguments.
    pub command: Vec<String>,
    /// File globs handed to the linter.
    pub globs: Vec<String>,
    /// Linter config file (`--config`).
    pub config: Option<PathBuf>,
    /// Pass `--fix`.
    pub fix: bool,
    /// Working directory for the linter process.
    pub cwd: PathBuf,
}

impl LintOptions {
    /// Resolve linter settings. Returns `None` when linting is disabled.
    ///
    /// Default globs cover `**/*.scss` under `source_dir`, written relative to
    /// `cwd` when possible.
    #[must_use]
    pub fn from_project(config: &LintConfig, cwd: &Path, source_dir: &Path) -> Option<Self> {
        if !config.enabled {
            return None;
        }

        let command = match &config.command {
            Some(command) if !command.is_empty() => command.clone(),
            _ => DEFAULT_COMMAND.iter().map(|s| (*s).to_string()).collect(),
        };

        let globs = if config.globs.is_empty() {
            let src = to_slash(&relative_to(source_dir, cwd));
            vec![format!("{src}/**/*.scss")]
        } else {
            config.globs.clone()
        };

        Some(Self {
            command,
            globs,
            config: config.config.clone(),
            fix: config.fix,
            cwd: cwd.to_path_buf(),
        })
    }

    /// Arguments after the program name.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = self.command.iter().skip(1).cloned().collect();
        args.extend(self.globs.iter().cloned());
        args.push("--formatter".to_string());
        args.push("string".to_string());
        if let Some(config) = &self.config {
            args.push("--config".to_string());
            args.push(config.display().to_string());
        }
        if self.fix {
            args.push("--fix".to_string());
        }
        args
    }

    fn program(&self) -> &str {
        self.command.first().map_or(DEFAULT_COMMAND[0], String::as_str)
    }
}

/// Outcome of one linter run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LintReport {
    /// Exit status 0.
    pub ok: bool,
    /// `None` when the process could not be spawned or was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Why the linter could not be started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spawn_error: Option<String>,
    pub duration_ms: u64,
}

/// Run the linter and wait for it.
pub async fn run_lint(options: &LintOptions) -> LintReport {
    let start = Instant::now();
    let args = options.args();
    debug!(program = options.program(), ?args, "Running linter");

    let output = Command::new(options.program())
        .args(&args)
        .current_dir(&options.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await;

    let duration_ms = start.elapsed().as_millis() as u64;

    match output {
        Ok(output) => {
            let report = LintReport {
                ok: output.status.success(),
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                spawn_error: None,
                duration_ms,
            };
            if report.ok {
                info!(duration_ms, "Lint passed");
            } else {
                warn!(exit_code = ?report.exit_code, duration_ms, "Lint reported problems");
            }
            report
        }
        Err(e) => {
            warn!(program = options.program(), error = %e, "Failed to start linter");
            LintReport {
                ok: false,
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                spawn_error: Some(format!("failed to start `{}`: {e}", options.program())),
                duration_ms,
            }
        }
    }
}
