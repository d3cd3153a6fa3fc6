//! Project configuration file discovery and parsing.
//!
//! Loads `cascade.config.json` (or `.cascaderc.json`) from the project root.
//! Every section is optional; a missing file means "all defaults".
//!
//! ## Supported config format
//!
//! ```json
//! {
//!   "paths": { "src": "scss", "dist": "test", "cssEntry": "cascade.scss", "cssOutput": "styles.css" },
//!   "environments": { "next": { "dist": "public/css" } },
//!   "sass": { "loadPaths": ["node_modules"] },
//!   "postcss": {
//!     "plugins": {
//!       "postcss-pxv": { "siteMin": 0, "siteBasis": 375, "siteMax": 1440, "writeVars": false },
//!       "autoprefixer": {},
//!       "cssnano": false
//!     }
//!   },
//!   "stylelint": { "config": ".stylelintrc.js", "fix": true },
//!   "sourceMaps": { "sourceRoot": "../scss", "includeContent": true },
//!   "server": { "port": 3000, "host": "localhost", "open": false },
//!   "watch": { "lintPolicy": "series", "debounceMs": 100 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::plugin::PluginSpec;

/// Config file names in priority order.
pub const CONFIG_FILES: &[&str] = &["cascade.config.json", ".cascaderc.json"];

/// Configuration loaded from a config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectConfig {
    /// Path overrides applied to every environment.
    pub paths: PathOverrides,
    /// Per-environment path overrides (keyed by environment name).
    pub environments: BTreeMap<String, PathOverrides>,
    /// Compiler settings.
    pub sass: SassConfig,
    /// Transformation plugins.
    pub postcss: PostcssConfig,
    /// Linter settings.
    pub stylelint: LintConfig,
    /// Source map settings.
    pub source_maps: SourceMapConfig,
    /// Dev server settings.
    pub server: ServerConfig,
    /// Watcher settings.
    pub watch: WatchConfig,
}

/// Field-by-field path overrides. `None` keeps the environment default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PathOverrides {
    /// Source directory.
    pub src: Option<PathBuf>,
    /// Output directory.
    pub dist: Option<PathBuf>,
    /// Entry file name, relative to the source directory.
    pub css_entry: Option<String>,
    /// Output file name, relative to the output directory.
    pub css_output: Option<String>,
}

impl PathOverrides {
    /// Layer `other` on top of `self`: fields set in `other` win.
    #[must_use]
    pub fn merged_with(&self, other: &PathOverrides) -> PathOverrides {
        PathOverrides {
            src: other.src.clone().or_else(|| self.src.clone()),
            dist: other.dist.clone().or_else(|| self.dist.clone()),
            css_entry: other.css_entry.clone().or_else(|| self.css_entry.clone()),
            css_output: other.css_output.clone().or_else(|| self.css_output.clone()),
        }
    }
}

/// `sass` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SassConfig {
    /// Extra directories searched by `@use`/`@import`, relative to the
    /// project root. The entry's directory is always searched first.
    pub load_paths: Vec<PathBuf>,
}

/// `postcss` section. `plugins: None` means "use the default plugin set".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PostcssConfig {
    pub plugins: Option<PluginSpec>,
}

/// Linter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LintConfig {
    /// Set to false to skip linting entirely.
    pub enabled: bool,
    /// Program and leading arguments. Defaults to `npx stylelint`.
    pub command: Option<Vec<String>>,
    /// Linter config file passed as `--config`.
    pub config: Option<PathBuf>,
    /// File globs to lint. Defaults to `<src>/**/*.scss`.
    pub globs: Vec<String>,
    /// Pass `--fix` to the linter.
    pub fix: bool,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: None,
            config: None,
            globs: Vec::new(),
            fix: false,
        }
    }
}

/// Source map settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceMapConfig {
    pub enabled: bool,
    /// `sourceRoot` written into the map. Defaults to the source directory
    /// relative to the output directory.
    pub source_root: Option<String>,
    /// Inline original sources (`sourcesContent`). Always off in production.
    pub include_content: bool,
}

impl Default for SourceMapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            source_root: None,
            include_content: true,
        }
    }
}

/// Server configuration from config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Port to listen on.
    pub port: Option<u16>,
    /// Host to bind to.
    pub host: Option<String>,
    /// Open browser automatically.
    pub open: Option<bool>,
}

/// Whether lint gates the build or runs alongside it in watch mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LintPolicy {
    /// Lint, wait for it, then build (the build runs whatever lint reports).
    #[default]
    Series,
    /// Lint and build run concurrently.
    Parallel,
}

/// Watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchConfig {
    /// Stylesheet globs that trigger a rebuild. Defaults to
    /// `<src>/**/*.scss`, `<src>/**/*.sass` and `<src>/**/*.css`.
    pub globs: Vec<String>,
    /// Globs that trigger a full page reload. Defaults to `<dist>/**/*.html`.
    pub html: Vec<String>,
    pub lint_policy: LintPolicy,
    /// Coalescing window for bursts of file events.
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            globs: Vec::new(),
            html: Vec::new(),
            lint_policy: LintPolicy::default(),
            debounce_ms: 100,
        }
    }
}

/// Find a config file in the given root directory.
#[must_use]
pub fn find_config_file(root: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.is_file())
}

/// Load configuration from a config file in the given root directory.
///
/// If `config_path` is `Some`, that file must exist. Otherwise the root is
/// searched and `Ok(None)` is returned when no config file is present.
pub fn load_config(
    root: &Path,
    config_path: Option<&Path>,
) -> Result<Option<(PathBuf, ProjectConfig)>, Error> {
    let path = match config_path {
        Some(p) => {
            let abs = if p.is_absolute() {
                p.to_path_buf()
            } else {
                root.join(p)
            };
            if !abs.is_file() {
                return Err(Error::ConfigNotFound { path: abs });
            }
            abs
        }
        None => match find_config_file(root) {
            Some(p) => p,
            None => return Ok(None),
        },
    };

    let source = std::fs::read_to_string(&path).map_err(|source| Error::ConfigRead {
        path: path.clone(),
        source,
    })?;
    let config = parse_config(&source).map_err(|source| Error::ConfigParse {
        path: path.clone(),
        source,
    })?;

    Ok(Some((path, config)))
}

/// Parse config JSON.
pub fn parse_config(source: &str) -> Result<ProjectConfig, serde_json::Error> {
    serde_json::from_str(source)
}
