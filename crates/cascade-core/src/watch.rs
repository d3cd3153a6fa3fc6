//! Watch supervisor: file events → coalesced lint/build cycles.
//!
//! Raw events from a `notify` watcher are classified against the source and
//! HTML globs, coalesced inside a debounce window, and turned into at most one
//! build at a time. A change that arrives while a build is running schedules
//! exactly one follow-up build ([`BuildQueue`]).

use notify::{
    event::{CreateKind, ModifyKind, RemoveKind, RenameMode},
    Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _,
};
use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use cascade_util::path::to_slash;

use crate::env::BuildConfig;
use crate::pipeline::{CycleResult, Pipeline};
use crate::project::{LintPolicy, WatchConfig};

/// Watcher error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchError {
    #[error("Invalid watch root: {}", .0.display())]
    InvalidRoot(PathBuf),

    #[error("Invalid watch glob `{pattern}`: {message}")]
    Pattern { pattern: String, message: String },

    #[error("Watcher failed: {0}")]
    WatcherFailed(String),
}

/// What a changed path means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A stylesheet: lint and rebuild.
    Source,
    /// A page: reload browsers, no rebuild.
    Html,
}

/// Resolved watch settings.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Directories registered with the OS watcher.
    pub roots: Vec<PathBuf>,
    pub sources: Vec<glob::Pattern>,
    pub html: Vec<glob::Pattern>,
    pub debounce: Duration,
    pub lint_policy: LintPolicy,
}

fn compile_glob(pattern: &str) -> Result<glob::Pattern, WatchError> {
    glob::Pattern::new(pattern).map_err(|e| WatchError::Pattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// Absolute glob text for a user glob, relative ones anchored at `cwd`.
fn anchor_glob(cwd: &Path, glob: &str) -> String {
    if Path::new(glob).is_absolute() {
        glob.to_string()
    } else {
        let glob = glob.trim_start_matches("./");
        format!("{}/{glob}", glob::Pattern::escape(&to_slash(cwd)))
    }
}

/// The literal directory prefix of a glob (`/site/scss/**/*.scss` → `/site/scss`).
fn glob_root(glob: &str) -> PathBuf {
    let mut root = PathBuf::new();
    for part in Path::new(glob).components() {
        let text = part.as_os_str().to_string_lossy();
        if text.contains(['*', '?', '[', '{']) {
            break;
        }
        root.push(part);
    }
    root
}

impl WatchOptions {
    /// Resolve globs from config, defaulting to the build's source and output dirs.
    pub fn from_project(config: &WatchConfig, build: &BuildConfig, cwd: &Path) -> Result<Self, WatchError> {
        let src = glob::Pattern::escape(&to_slash(&build.source_dir));
        let dist = glob::Pattern::escape(&to_slash(&build.output_dir));

        let source_globs: Vec<String> = if config.globs.is_empty() {
            ["scss", "sass", "css"]
                .iter()
                .map(|ext| format!("{src}/**/*.{ext}"))
                .collect()
        } else {
            config.globs.iter().map(|g| anchor_glob(cwd, g)).collect()
        };

        let html_globs: Vec<String> = if config.html.is_empty() {
            vec![format!("{dist}/**/*.html")]
        } else {
            config.html.iter().map(|g| anchor_glob(cwd, g)).collect()
        };

        let mut roots: Vec<PathBuf> = Vec::new();
        if config.globs.is_empty() {
            roots.push(build.source_dir.clone());
        }
        if config.html.is_empty() {
            roots.push(build.output_dir.clone());
        }
        for glob in config.globs.iter().chain(&config.html) {
            roots.push(glob_root(&anchor_glob(cwd, glob)));
        }
        roots.sort();
        roots.dedup();

        Ok(Self {
            roots,
            sources: source_globs.iter().map(|g| compile_glob(g)).collect::<Result<_, _>>()?,
            html: html_globs.iter().map(|g| compile_glob(g)).collect::<Result<_, _>>()?,
            debounce: Duration::from_millis(config.debounce_ms),
            lint_policy: config.lint_policy,
        })
    }

    /// Classify a changed path. `None` for paths nobody cares about.
    #[must_use]
    pub fn classify(&self, path: &Path) -> Option<ChangeKind> {
        let options = glob::MatchOptions {
            require_literal_separator: true,
            ..Default::default()
        };
        if self.sources.iter().any(|p| p.matches_path_with(path, options)) {
            Some(ChangeKind::Source)
        } else if self.html.iter().any(|p| p.matches_path_with(path, options)) {
            Some(ChangeKind::Html)
        } else {
            None
        }
    }
}

/// Build serialization with a queue of depth one.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BuildQueue {
    in_flight: bool,
    pending: bool,
}

impl BuildQueue {
    /// Ask for a build. Returns `true` if it should start now; otherwise one
    /// follow-up is remembered.
    pub fn request(&mut self) -> bool {
        if self.in_flight {
            self.pending = true;
            false
        } else {
            self.in_flight = true;
            true
        }
    }

    /// Mark the running build finished. Returns `true` if the remembered
    /// follow-up should start now.
    pub fn finish(&mut self) -> bool {
        if self.pending {
            self.pending = false;
            true
        } else {
            self.in_flight = false;
            false
        }
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        !self.in_flight
    }
}

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub builds: u64,
    pub failed_builds: u64,
    pub html_reloads: u64,
}

fn spawn_cycle(pipeline: &Arc<Pipeline>, policy: LintPolicy, done: &mpsc::UnboundedSender<CycleResult>) {
    let pipeline = Arc::clone(pipeline);
    let done = done.clone();
    tokio::spawn(async move {
        let result = pipeline.run_cycle(policy).await;
        let _ = done.send(result);
    });
}

/// Drive builds from a stream of changed paths until `shutdown` resolves or
/// the stream closes (pending work is finished first).
pub async fn run_loop<F>(
    pipeline: Arc<Pipeline>,
    options: WatchOptions,
    mut changes: mpsc::UnboundedReceiver<PathBuf>,
    shutdown: F,
) -> WatchStats
where
    F: Future<Output = ()>,
{
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<CycleResult>();
    let mut queue = BuildQueue::default();
    let mut stats = WatchStats::default();

    let mut source_changed = false;
    let mut html_changed: BTreeSet<PathBuf> = BTreeSet::new();
    let mut deadline: Option<Instant> = None;
    let mut closed = false;

    tokio::pin!(shutdown);

    loop {
        let flush_at = deadline.unwrap_or_else(Instant::now);

        tokio::select! {
            () = &mut shutdown => {
                info!("Watch loop shutting down");
                break;
            }
            change = changes.recv(), if !closed => match change {
                Some(path) => match options.classify(&path) {
                    Some(kind) => {
                        debug!(path = %path.display(), ?kind, "Change detected");
                        match kind {
                            ChangeKind::Source => source_changed = true,
                            ChangeKind::Html => {
                                html_changed.insert(path);
                            }
                        }
                        deadline = Some(Instant::now() + options.debounce);
                    }
                    None => debug!(path = %path.display(), "Ignoring change"),
                },
                None => {
                    debug!("Change stream closed");
                    closed = true;
                }
            },
            () = tokio::time::sleep_until(flush_at), if deadline.is_some() => {
                deadline = None;
                if let Some(path) = html_changed.iter().next() {
                    debug!(count = html_changed.len(), "HTML changed, reloading");
                    pipeline.notify_html(path);
                    stats.html_reloads += 1;
                    html_changed.clear();
                }
                if source_changed {
                    source_changed = false;
                    if queue.request() {
                        spawn_cycle(&pipeline, options.lint_policy, &done_tx);
                    } else {
                        debug!("Build in flight, queued one follow-up");
                    }
                }
            }
            Some(result) = done_rx.recv() => {
                stats.builds += 1;
                if !result.build.ok {
                    stats.failed_builds += 1;
                }
                if queue.finish() {
                    spawn_cycle(&pipeline, options.lint_policy, &done_tx);
                }
            }
        }

        if closed && deadline.is_none() && queue.is_idle() {
            break;
        }
    }

    stats
}

/// Whether a raw event can change file contents.
fn should_process_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(CreateKind::File | CreateKind::Any)
            | EventKind::Modify(
                ModifyKind::Data(_)
                    | ModifyKind::Any
                    | ModifyKind::Name(RenameMode::To | RenameMode::From | RenameMode::Both)
            )
            | EventKind::Remove(RemoveKind::File)
    )
}

/// Start an OS watcher over `roots`, forwarding changed paths.
///
/// The returned watcher must be kept alive for events to flow.
pub fn start_watcher(
    roots: &[PathBuf],
) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<PathBuf>), WatchError> {
    let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                if should_process_event(&event) {
                    for path in event.paths {
                        if tx.send(path).is_err() {
                            return;
                        }
                    }
                }
            }
            Err(e) => error!(error = %e, "Watch error"),
        },
        NotifyConfig::default().with_poll_interval(Duration::from_secs(2)),
    )
    .map_err(|e| WatchError::WatcherFailed(e.to_string()))?;

    let mut watched = 0;
    for root in roots {
        if !root.is_dir() {
            warn!(root = %root.display(), "Skipping missing watch root");
            continue;
        }
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| WatchError::WatcherFailed(e.to_string()))?;
        info!(root = %root.display(), "Watching directory");
        watched += 1;
    }

    if watched == 0 {
        let root = roots.first().cloned().unwrap_or_default();
        return Err(WatchError::InvalidRoot(root));
    }

    Ok((watcher, rx))
}

/// Watch the configured roots and rebuild on change until `shutdown` resolves.
pub async fn watch<F>(pipeline: Arc<Pipeline>, options: WatchOptions, shutdown: F) -> Result<WatchStats, WatchError>
where
    F: Future<Output = ()>,
{
    let (watcher, changes) = start_watcher(&options.roots)?;
    let stats = run_loop(pipeline, options, changes, shutdown).await;
    drop(watcher);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Environment;
    use crate::pipeline::{BuildEvent, PipelineOptions};
    use crate::plugin::ResolvedPluginList;
    use tempfile::tempdir;

    fn build_config(root: &Path) -> BuildConfig {
        BuildConfig {
            source_dir: root.join("scss"),
            output_dir: root.join("test"),
            entry_file_name: "cascade.scss".to_string(),
            output_file_name: "styles.css".to_string(),
            environment: Environment::Static,
        }
    }

    fn watch_options(root: &Path, debounce_ms: u64) -> WatchOptions {
        let config = WatchConfig {
            debounce_ms,
            ..Default::default()
        };
        WatchOptions::from_project(&config, &build_config(root), root).unwrap()
    }

    #[test]
    fn test_queue_depth_one() {
        let mut queue = BuildQueue::default();
        assert!(queue.request());
        assert!(!queue.request());
        assert!(!queue.request());
        // Exactly one follow-up, however many requests arrived.
        assert!(queue.finish());
        assert!(!queue.finish());
        assert!(queue.is_idle());
    }

    #[test]
    fn test_classify_defaults() {
        let options = watch_options(Path::new("/site"), 100);
        assert_eq!(
            options.classify(Path::new("/site/scss/partials/_a.scss")),
            Some(ChangeKind::Source)
        );
        assert_eq!(
            options.classify(Path::new("/site/test/index.html")),
            Some(ChangeKind::Html)
        );
        assert_eq!(options.classify(Path::new("/site/test/styles.css")), None);
        assert_eq!(options.classify(Path::new("/site/README.md")), None);
        assert_eq!(
            options.roots,
            vec![PathBuf::from("/site/scss"), PathBuf::from("/site/test")]
        );
    }

    #[test]
    fn test_custom_globs_are_anchored() {
        let config = WatchConfig {
            globs: vec!["styles/**/*.scss".to_string()],
            html: vec!["./pages/*.html".to_string()],
            ..Default::default()
        };
        let options = WatchOptions::from_project(&config, &build_config(Path::new("/site")), Path::new("/site")).unwrap();
        assert_eq!(
            options.classify(Path::new("/site/styles/a/b.scss")),
            Some(ChangeKind::Source)
        );
        assert_eq!(
            options.classify(Path::new("/site/pages/about.html")),
            Some(ChangeKind::Html)
        );
        assert_eq!(options.classify(Path::new("/site/scss/a.scss")), None);
        assert_eq!(
            options.roots,
            vec![PathBuf::from("/site/pages"), PathBuf::from("/site/styles")]
        );
    }

    #[test]
    fn test_invalid_glob() {
        let config = WatchConfig {
            globs: vec!["[".to_string()],
            ..Default::default()
        };
        let err = WatchOptions::from_project(&config, &build_config(Path::new("/site")), Path::new("/site"))
            .unwrap_err();
        assert!(matches!(err, WatchError::Pattern { .. }));
    }

    fn project() -> (tempfile::TempDir, Arc<Pipeline>) {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("scss")).unwrap();
        std::fs::write(dir.path().join("scss/cascade.scss"), "a { color: red; }\n").unwrap();
        let pipeline = Pipeline::new(
            build_config(dir.path()),
            ResolvedPluginList::empty(),
            PipelineOptions::default(),
        );
        (dir, Arc::new(pipeline))
    }

    #[tokio::test]
    async fn test_burst_coalesces_into_one_build() {
        let (dir, pipeline) = project();
        let options = watch_options(dir.path(), 30);
        let (tx, rx) = mpsc::unbounded_channel();

        for name in ["cascade.scss", "_a.scss", "_b.scss", "cascade.scss"] {
            tx.send(dir.path().join("scss").join(name)).unwrap();
        }
        drop(tx);

        let stats = run_loop(pipeline, options, rx, std::future::pending()).await;
        assert_eq!(stats.builds, 1);
        assert_eq!(stats.failed_builds, 0);
        assert!(dir.path().join("test/styles.css").is_file());
    }

    #[tokio::test]
    async fn test_html_change_reloads_without_build() {
        let (dir, pipeline) = project();
        let options = watch_options(dir.path(), 10);
        let mut events = pipeline.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send(dir.path().join("test/index.html")).unwrap();
        tx.send(dir.path().join("test/about.html")).unwrap();
        drop(tx);

        let stats = run_loop(pipeline, options, rx, std::future::pending()).await;
        assert_eq!(stats.builds, 0);
        assert_eq!(stats.html_reloads, 1);
        assert!(matches!(events.try_recv(), Ok(BuildEvent::HtmlChanged { .. })));
    }

    #[tokio::test]
    async fn test_irrelevant_changes_do_nothing() {
        let (dir, pipeline) = project();
        let options = watch_options(dir.path(), 10);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(dir.path().join("notes.txt")).unwrap();
        drop(tx);

        let stats = run_loop(pipeline, options, rx, std::future::pending()).await;
        assert_eq!(stats, WatchStats::default());
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let (dir, pipeline) = project();
        let options = watch_options(dir.path(), 10);
        let (_tx, rx) = mpsc::unbounded_channel::<PathBuf>();

        let stats = run_loop(pipeline, options, rx, async {
            tokio::time::sleep(Duration::from_millis(20)).await;
        })
        .await;
        assert_eq!(stats.builds, 0);
    }
}
