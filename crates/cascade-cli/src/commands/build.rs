//! `cascade build` command implementation.

use cascade_core::{
    BuildContext, BuildResult, Config, CycleResult, LintReport, LoadOptions, Registry,
};
use cascade_core::version::SUMMARY_SCHEMA_VERSION;
use cascade_util::path::relative_to;
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use super::lint::print_report;

/// `--json` summary.
#[derive(Serialize)]
struct BuildJson<'a> {
    schema_version: u32,
    ok: bool,
    cwd: String,
    environment: &'a str,
    mode: &'a str,
    plugins: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    build: Option<&'a BuildResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lint: Option<&'a LintReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    notes: Vec<String>,
}

/// Lint (advisory) and build once. Only a failed build is a failed command.
pub async fn run(config: &Config, load: &LoadOptions, lint: bool) -> Result<ExitCode> {
    let ctx = match BuildContext::load(&config.cwd, load) {
        Ok(ctx) => ctx,
        Err(e) if config.json_logs => {
            let doc = BuildJson {
                schema_version: SUMMARY_SCHEMA_VERSION,
                ok: false,
                cwd: config.cwd.display().to_string(),
                environment: load.environment.as_deref().unwrap_or("static"),
                mode: load.mode.as_str(),
                plugins: Vec::new(),
                build: None,
                lint: None,
                error: Some(e.to_string()),
                notes: Vec::new(),
            };
            println!("{}", serde_json::to_string_pretty(&doc).into_diagnostic()?);
            return Ok(ExitCode::from(2));
        }
        Err(e) => return Err(e).into_diagnostic(),
    };

    let pipeline = Arc::new(ctx.pipeline(&Registry::builtin(), lint));
    let CycleResult { lint, build } = pipeline.run_cycle(ctx.project.watch.lint_policy).await;

    let notes: Vec<String> = pipeline
        .plugins()
        .skipped()
        .iter()
        .map(|s| format!("plugin {} skipped: {}", s.name, s.reason))
        .collect();

    if config.json_logs {
        let doc = BuildJson {
            schema_version: SUMMARY_SCHEMA_VERSION,
            ok: build.ok,
            cwd: ctx.cwd.display().to_string(),
            environment: ctx.build.environment.as_str(),
            mode: ctx.mode.as_str(),
            plugins: pipeline.plugins().names(),
            build: Some(&build),
            lint: lint.as_ref(),
            error: None,
            notes,
        };
        println!("{}", serde_json::to_string_pretty(&doc).into_diagnostic()?);
    } else {
        if let Some(report) = &lint {
            print_report(report);
        }
        for note in &notes {
            println!("  Warning: {note}");
        }
        print_build(&ctx.cwd, &build);
    }

    Ok(if build.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

/// Human one-liner for a build result; failures go to stderr with the error.
pub fn print_build(cwd: &Path, build: &BuildResult) {
    if build.ok {
        let path = build
            .stylesheet
            .as_deref()
            .map(|p| relative_to(p, cwd).display().to_string())
            .unwrap_or_default();
        let status = if build.changed { "Built" } else { "Unchanged" };
        println!("  ✓ {status} {path} in {}ms", build.duration_ms);
    } else {
        let stage = build.failed_stage.map_or("building", |s| s.as_str());
        eprintln!("  ✗ Build failed while {stage}");
        if let Some(error) = &build.error {
            for line in error.lines() {
                eprintln!("    {line}");
            }
        }
    }
}
