//! `cascade config` command implementation.

use cascade_core::{BuildConfig, BuildContext, Config, LoadOptions, PluginSpec};
use cascade_core::version::SUMMARY_SCHEMA_VERSION;
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::process::ExitCode;

#[derive(Serialize)]
struct ConfigJson<'a> {
    schema_version: u32,
    config_file: Option<String>,
    mode: &'a str,
    build: &'a BuildConfig,
    stylesheet: String,
    source_map: String,
    /// Plugin names in the order they run.
    plugin_order: Vec<&'a str>,
    plugins: &'a PluginSpec,
}

/// Print the resolved configuration as JSON. Always JSON, so `--json` is implied.
pub fn run(config: &Config, load: &LoadOptions) -> Result<ExitCode> {
    let ctx = BuildContext::load(&config.cwd, load).into_diagnostic()?;
    let doc = ConfigJson {
        schema_version: SUMMARY_SCHEMA_VERSION,
        config_file: ctx.config_file.as_ref().map(|p| p.display().to_string()),
        mode: ctx.mode.as_str(),
        build: &ctx.build,
        stylesheet: ctx.build.output_path().display().to_string(),
        source_map: ctx.build.source_map_path().display().to_string(),
        plugin_order: ctx.plugin_spec.names(),
        plugins: &ctx.plugin_spec,
    };
    println!("{}", serde_json::to_string_pretty(&doc).into_diagnostic()?);
    Ok(ExitCode::SUCCESS)
}
