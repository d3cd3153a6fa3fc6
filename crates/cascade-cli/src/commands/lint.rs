//! `cascade lint` command implementation, plus the lint report printer
//! shared with `build` and `serve`.

use cascade_core::lint::run_lint;
use cascade_core::version::SUMMARY_SCHEMA_VERSION;
use cascade_core::{BuildContext, Config, LintOptions, LintReport, LoadOptions};
use console::style;
use miette::{IntoDiagnostic, Result};
use regex_lite::{Captures, Regex};
use serde::Serialize;
use std::process::ExitCode;

#[derive(Serialize)]
struct LintJson<'a> {
    schema_version: u32,
    ok: bool,
    enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    lint: Option<&'a LintReport>,
}

/// Run the linter once. Lint problems never fail the command.
pub async fn run(config: &Config, load: &LoadOptions) -> Result<ExitCode> {
    let ctx = BuildContext::load(&config.cwd, load).into_diagnostic()?;
    let options = LintOptions::from_project(&ctx.project.stylelint, &ctx.cwd, &ctx.build.source_dir);

    let report = match &options {
        Some(options) => Some(run_lint(options).await),
        None => None,
    };

    if config.json_logs {
        let doc = LintJson {
            schema_version: SUMMARY_SCHEMA_VERSION,
            ok: report.as_ref().map_or(true, |r| r.ok),
            enabled: options.is_some(),
            lint: report.as_ref(),
        };
        println!("{}", serde_json::to_string_pretty(&doc).into_diagnostic()?);
    } else {
        match &report {
            Some(report) => print_report(report),
            None => println!("  Linting disabled (stylelint.enabled = false)"),
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Print the linter's output with highlighting, then a verdict line.
pub fn print_report(report: &LintReport) {
    let colors = console::colors_enabled();
    let highlighter = Highlighter::new(colors);
    for line in report.stdout.lines().chain(report.stderr.lines()) {
        println!("{}", highlighter.line(line));
    }
    println!("{}", verdict(report, colors));
}

/// Highlights lines of `stylelint --formatter string` output.
///
/// `✖` is red, `⚠` yellow, `.scss` paths cyan and `(rule-name)` dimmed.
pub struct Highlighter {
    /// `None` when colors are off.
    patterns: Option<(Regex, Regex)>,
}

impl Highlighter {
    pub fn new(colors: bool) -> Self {
        let patterns = if colors {
            Regex::new(r"[^\s:()]+\.scss")
                .ok()
                .zip(Regex::new(r"\([a-z0-9@/-]+\)").ok())
        } else {
            None
        };
        Self { patterns }
    }

    pub fn line(&self, line: &str) -> String {
        let Some((path, rule)) = &self.patterns else {
            return line.to_string();
        };

        let out = path.replace_all(line, |caps: &Captures| {
            style(&caps[0]).cyan().force_styling(true).to_string()
        });
        let out = rule.replace_all(&out, |caps: &Captures| {
            style(&caps[0]).dim().force_styling(true).to_string()
        });
        out.replace('✖', &style('✖').red().force_styling(true).to_string())
            .replace('⚠', &style('⚠').yellow().force_styling(true).to_string())
    }
}

/// One-line summary of a lint run.
pub fn verdict(report: &LintReport, colors: bool) -> String {
    let (mark, text) = if let Some(error) = &report.spawn_error {
        ('⚠', format!("Linter could not run: {error}"))
    } else if report.ok {
        ('✓', format!("Lint passed in {}ms", report.duration_ms))
    } else {
        let code = report
            .exit_code
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        ('✖', format!("Lint found problems (exit {code}); build is not blocked"))
    };

    if !colors {
        return format!("  {mark} {text}");
    }
    let mark = match mark {
        '✓' => style(mark).green(),
        '⚠' => style(mark).yellow(),
        _ => style(mark).red(),
    };
    format!("  {} {text}", mark.force_styling(true))
}
