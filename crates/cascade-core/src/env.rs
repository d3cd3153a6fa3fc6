//! Environment resolution: environment name + base directory → [`BuildConfig`].
//!
//! Each environment carries a default source/output layout. The config file's
//! `paths` section and then `environments.<name>` are layered on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::project::{PathOverrides, ProjectConfig};

/// Environment variable that selects the active environment.
pub const ENV_VAR: &str = "CASCADE_ENV";

/// Supported build environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Plain static site; output next to the test HTML pages.
    #[default]
    Static,
    /// WordPress theme; output into the theme's asset folder.
    Wordpress,
    /// Next.js app; output into `public/`.
    Next,
}

/// Default layout of one environment, relative to the base directory.
#[derive(Debug, Clone, Copy)]
struct Layout {
    src: &'static str,
    dist: &'static str,
    entry: &'static str,
    output: &'static str,
}

impl Environment {
    pub const ALL: [Environment; 3] = [Self::Static, Self::Wordpress, Self::Next];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Wordpress => "wordpress",
            Self::Next => "next",
        }
    }

    /// Strict lookup; `None` for unknown names.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|env| env.as_str().eq_ignore_ascii_case(name))
    }

    /// Lenient lookup: unknown or empty names fall back to [`Environment::Static`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self::parse(name).unwrap_or_else(|| {
            debug!(requested = name, "Unknown environment, using static");
            Self::default()
        })
    }

    fn layout(self) -> Layout {
        match self {
            Self::Static => Layout {
                src: "scss",
                dist: "test",
                entry: "cascade.scss",
                output: "styles.css",
            },
            Self::Wordpress => Layout {
                src: "scss",
                dist: "assets/css",
                entry: "cascade.scss",
                output: "styles.css",
            },
            Self::Next => Layout {
                src: "scss",
                dist: "public/css",
                entry: "cascade.scss",
                output: "styles.css",
            },
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved paths for one build. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    pub entry_file_name: String,
    pub output_file_name: String,
    pub environment: Environment,
}

impl BuildConfig {
    /// Absolute path of the entry stylesheet.
    #[must_use]
    pub fn entry_path(&self) -> PathBuf {
        self.source_dir.join(&self.entry_file_name)
    }

    /// Absolute path of the compiled stylesheet.
    #[must_use]
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_file_name)
    }

    /// Absolute path of the companion source map.
    #[must_use]
    pub fn source_map_path(&self) -> PathBuf {
        self.output_dir.join(self.source_map_file_name())
    }

    #[must_use]
    pub fn source_map_file_name(&self) -> String {
        format!("{}.map", self.output_file_name)
    }
}

pub(crate) fn join_base(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Resolve the build paths for `name` under `base_dir`.
///
/// `name: None` selects the default environment. The result depends only on
/// the inputs; nothing is read from disk or the process environment.
#[must_use]
pub fn resolve(name: Option<&str>, base_dir: &Path, project: &ProjectConfig) -> BuildConfig {
    let environment = name.map_or_else(Environment::default, Environment::from_name);
    let layout = environment.layout();

    let overrides = match project.environments.get(environment.as_str()) {
        Some(env_overrides) => project.paths.merged_with(env_overrides),
        None => project.paths.clone(),
    };
    let PathOverrides {
        src,
        dist,
        css_entry,
        css_output,
    } = overrides;

    let config = BuildConfig {
        source_dir: join_base(base_dir, src.as_deref().unwrap_or(Path::new(layout.src))),
        output_dir: join_base(base_dir, dist.as_deref().unwrap_or(Path::new(layout.dist))),
        entry_file_name: css_entry.unwrap_or_else(|| layout.entry.to_string()),
        output_file_name: css_output.unwrap_or_else(|| layout.output.to_string()),
        environment,
    };

    debug!(
        environment = %environment,
        src = %config.source_dir.display(),
        dist = %config.output_dir.display(),
        "Resolved build environment"
    );

    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_defaults() {
        let config = resolve(Some("static"), Path::new("/site"), &ProjectConfig::default());
        assert_eq!(config.environment, Environment::Static);
        assert_eq!(config.source_dir, PathBuf::from("/site/scss"));
        assert_eq!(config.output_dir, PathBuf::from("/site/test"));
        assert_eq!(config.entry_file_name, "cascade.scss");
        assert_eq!(config.output_file_name, "styles.css");
        assert_eq!(config.output_path(), PathBuf::from("/site/test/styles.css"));
        assert_eq!(
            config.source_map_path(),
            PathBuf::from("/site/test/styles.css.map")
        );
    }

    #[test]
    fn test_none_is_static() {
        let a = resolve(None, Path::new("/site"), &ProjectConfig::default());
        let b = resolve(Some("static"), Path::new("/site"), &ProjectConfig::default());
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_environment_falls_back() {
        let config = resolve(Some("drupal"), Path::new("/site"), &ProjectConfig::default());
        assert_eq!(config.environment, Environment::Static);
        assert_eq!(config.output_dir, PathBuf::from("/site/test"));
    }

    #[test]
    fn test_framework_layouts() {
        let wp = resolve(Some("WordPress"), Path::new("/site"), &ProjectConfig::default());
        assert_eq!(wp.environment, Environment::Wordpress);
        assert_eq!(wp.output_dir, PathBuf::from("/site/assets/css"));

        let next = resolve(Some("next"), Path::new("/site"), &ProjectConfig::default());
        assert_eq!(next.output_dir, PathBuf::from("/site/public/css"));
    }

    #[test]
    fn test_overrides_layer_in_order() {
        let mut project = ProjectConfig::default();
        project.paths.src = Some(PathBuf::from("styles"));
        project.paths.css_output = Some("site.css".to_string());
        project.environments.insert(
            "next".to_string(),
            PathOverrides {
                dist: Some(PathBuf::from("/abs/out")),
                css_output: Some("next.css".to_string()),
                ..Default::default()
            },
        );

        let st = resolve(Some("static"), Path::new("/site"), &project);
        assert_eq!(st.source_dir, PathBuf::from("/site/styles"));
        assert_eq!(st.output_file_name, "site.css");

        let next = resolve(Some("next"), Path::new("/site"), &project);
        assert_eq!(next.source_dir, PathBuf::from("/site/styles"));
        assert_eq!(next.output_dir, PathBuf::from("/abs/out"));
        assert_eq!(next.output_file_name, "next.css");
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(Environment::parse(" NEXT "), Some(Environment::Next));
        assert_eq!(Environment::parse("gatsby"), None);
    }
}
