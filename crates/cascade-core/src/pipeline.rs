//! The stylesheet pipeline: lint → compile → transform → prefix → write → notify.
//!
//! A [`Pipeline`] is built once per invocation from a [`BuildConfig`], a
//! [`ResolvedPluginList`] and [`PipelineOptions`]. `build` is synchronous
//! (filesystem and CPU bound); async callers run it on the blocking pool via
//! [`Pipeline::run_cycle`].
//!
//! ## Stages
//!
//! ```text
//! Idle → Linting → Compiling → Transforming → Writing → Notifying → Idle
//! ```
//!
//! Any failure returns to `Idle` with an error in the [`BuildResult`]. The
//! current stage is published on a `tokio::sync::watch` channel.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use cascade_util::fs::write_if_changed;
use cascade_util::hash::short_digest;

use crate::css::minify_css;
use crate::css::sass::{self, SassOptions};
use crate::css::sourcemap::{self, SourceMapOptions};
use crate::env::BuildConfig;
use crate::error::Error;
use crate::lint::{run_lint, LintOptions, LintReport};
use crate::plugin::{Placement, ResolvedPluginList, Transform, TransformContext, TransformError};
use crate::project::LintPolicy;

/// Capacity of the build event channel.
const EVENT_CAPACITY: usize = 64;

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Idle,
    Linting,
    Compiling,
    Transforming,
    Writing,
    Notifying,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Linting => "linting",
            Self::Compiling => "compiling",
            Self::Transforming => "transforming",
            Self::Writing => "writing",
            Self::Notifying => "notifying",
        }
    }
}

/// Settings that are not paths.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Minify and drop inlined source content.
    pub production: bool,
    pub source_maps: SourceMapOptions,
    /// `None` disables linting.
    pub lint: Option<LintOptions>,
    /// Extra Sass load paths.
    pub include_paths: Vec<PathBuf>,
}

/// Something live observers care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    /// The stylesheet on disk changed.
    StylesheetWritten { path: PathBuf },
    /// A build failed; the previous output is still in place.
    BuildFailed { message: String },
    /// A watched HTML file changed.
    HtmlChanged { path: PathBuf },
}

/// Outcome of one build.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    pub ok: bool,
    /// Compiled stylesheet path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stylesheet: Option<PathBuf>,
    /// Source map path, when maps are enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_map: Option<PathBuf>,
    /// Whether the stylesheet bytes on disk changed.
    pub changed: bool,
    /// Short content digest of the stylesheet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// Number of input files (entry and partials).
    pub sources: usize,
    pub duration_ms: u64,
    /// Stage the build failed in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BuildResult {
    fn failed(stage: Stage, message: String, duration_ms: u64) -> Self {
        Self {
            ok: false,
            failed_stage: Some(stage),
            error: Some(message),
            duration_ms,
            ..Default::default()
        }
    }
}

/// Lint and build outcome of one watch/serve cycle.
#[derive(Debug, Clone)]
pub struct CycleResult {
    pub lint: Option<LintReport>,
    pub build: BuildResult,
}

struct Written {
    stylesheet: PathBuf,
    source_map: Option<PathBuf>,
    changed: bool,
    digest: String,
    sources: usize,
}

/// Stylesheet pipeline for one build configuration.
#[derive(Debug)]
pub struct Pipeline {
    config: BuildConfig,
    plugins: ResolvedPluginList,
    options: PipelineOptions,
    stage: watch::Sender<Stage>,
    events: broadcast::Sender<BuildEvent>,
}

impl Pipeline {
    #[must_use]
    pub fn new(config: BuildConfig, plugins: ResolvedPluginList, options: PipelineOptions) -> Self {
        let (stage, _) = watch::channel(Stage::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            plugins,
            options,
            stage,
            events,
        }
    }

    #[must_use]
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    #[must_use]
    pub fn plugins(&self) -> &ResolvedPluginList {
        &self.plugins
    }

    #[must_use]
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Subscribe to build events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BuildEvent> {
        self.events.subscribe()
    }

    /// Observe stage transitions.
    #[must_use]
    pub fn stage(&self) -> watch::Receiver<Stage> {
        self.stage.subscribe()
    }

    fn enter(&self, stage: Stage) {
        debug!(stage = stage.as_str(), "Pipeline stage");
        self.stage.send_replace(stage);
    }

    fn emit(&self, event: BuildEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Report a changed HTML page to observers. No rebuild happens.
    pub fn notify_html(&self, path: &Path) {
        self.emit(BuildEvent::HtmlChanged {
            path: path.to_path_buf(),
        });
    }

    /// Run the linter. Returns `None` when linting is disabled.
    pub async fn lint(&self) -> Option<LintReport> {
        let options = self.options.lint.as_ref()?;
        self.enter(Stage::Linting);
        let report = run_lint(options).await;
        self.enter(Stage::Idle);
        Some(report)
    }

    /// Compile, transform and write the stylesheet once.
    pub fn build(&self) -> BuildResult {
        let start = Instant::now();
        let mut stage = Stage::Compiling;
        let result = self.run_stages(&mut stage);
        let duration_ms = start.elapsed().as_millis() as u64;

        let result = match result {
            Ok(written) => {
                info!(
                    path = %written.stylesheet.display(),
                    changed = written.changed,
                    duration_ms,
                    "Built stylesheet"
                );
                BuildResult {
                    ok: true,
                    stylesheet: Some(written.stylesheet),
                    source_map: written.source_map,
                    changed: written.changed,
                    digest: Some(written.digest),
                    sources: written.sources,
                    duration_ms,
                    failed_stage: None,
                    error: None,
                }
            }
            Err(e) => {
                let message = e.to_string();
                error!(stage = stage.as_str(), duration_ms, "Build failed: {message}");
                self.emit(BuildEvent::BuildFailed {
                    message: message.clone(),
                });
                BuildResult::failed(stage, message, duration_ms)
            }
        };

        self.enter(Stage::Idle);
        result
    }

    fn run_stages(&self, stage: &mut Stage) -> Result<Written, Error> {
        let entry = self.config.entry_path();
        let filename = entry.display().to_string();

        *stage = Stage::Compiling;
        self.enter(*stage);
        let compiled = sass::compile_file(
            &entry,
            &SassOptions {
                include_paths: self.options.include_paths.clone(),
                minify: false,
            },
        )?;

        *stage = Stage::Transforming;
        self.enter(*stage);
        let ctx = TransformContext {
            filename: &filename,
            production: self.options.production,
        };
        let mut css = compiled.css;
        for placement in [Placement::Normal, Placement::Post] {
            for transform in self.plugins.stage(placement) {
                debug!(plugin = transform.name(), "Applying transform");
                css = transform.transform(&css, &ctx)?;
            }
        }
        if self.options.production && !self.plugins.contains("cssnano") {
            css = minify_css(&css, &filename).map_err(|e| TransformError::new("minify", e.to_string()))?;
        }

        *stage = Stage::Writing;
        self.enter(*stage);
        let output_path = self.config.output_path();
        let mut source_map = None;

        if self.options.source_maps.enabled {
            let map = sourcemap::generate(
                &css,
                &self.config.output_file_name,
                &compiled.sources,
                &self.config.source_dir,
                &self.config.output_dir,
                &self.options.source_maps,
            )
            .map_err(|e| Error::other(format!("Failed to serialize source map: {e}")))?;

            let map_path = self.config.source_map_path();
            write_if_changed(&map_path, map.as_bytes()).map_err(|source| Error::Write {
                path: map_path.clone(),
                source,
            })?;
            source_map = Some(map_path);

            css = format!(
                "{}\n{}\n",
                css.trim_end(),
                sourcemap::mapping_url_comment(&self.config.source_map_file_name())
            );
        } else if !css.ends_with('\n') {
            css.push('\n');
        }

        let changed = write_if_changed(&output_path, css.as_bytes()).map_err(|source| Error::Write {
            path: output_path.clone(),
            source,
        })?;

        if changed {
            *stage = Stage::Notifying;
            self.enter(*stage);
            self.emit(BuildEvent::StylesheetWritten {
                path: output_path.clone(),
            });
        } else {
            debug!(path = %output_path.display(), "Stylesheet unchanged, skipping notify");
        }

        Ok(Written {
            stylesheet: output_path,
            source_map,
            changed,
            digest: short_digest(css.as_bytes()),
            sources: compiled.sources.len(),
        })
    }

    /// Lint and build according to `policy`.
    ///
    /// `Series` waits for the linter and then builds whatever it reported.
    /// `Parallel` runs both at once. The build runs on the blocking pool.
    pub async fn run_cycle(self: &Arc<Self>, policy: LintPolicy) -> CycleResult {
        match policy {
            LintPolicy::Series => {
                let lint = self.lint().await;
                log_lint(lint.as_ref());
                let build = self.build_blocking().await;
                CycleResult { lint, build }
            }
            LintPolicy::Parallel => {
                let (lint, build) = tokio::join!(self.lint(), self.build_blocking());
                log_lint(lint.as_ref());
                CycleResult { lint, build }
            }
        }
    }

    /// [`Pipeline::build`] on the blocking pool.
    pub async fn build_blocking(self: &Arc<Self>) -> BuildResult {
        let pipeline = Arc::clone(self);
        match tokio::task::spawn_blocking(move || pipeline.build()).await {
            Ok(result) => result,
            Err(e) => {
                self.enter(Stage::Idle);
                BuildResult::failed(Stage::Compiling, format!("build task failed: {e}"), 0)
            }
        }
    }
}

fn log_lint(report: Option<&LintReport>) {
    if let Some(report) = report {
        if !report.ok {
            warn!("Lint failed (advisory, build continues)");
        }
    }
}
