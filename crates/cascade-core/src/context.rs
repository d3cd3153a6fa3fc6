//! Everything one invocation needs, resolved once from the working directory.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::Mode;
use crate::css::sourcemap::SourceMapOptions;
use crate::env::{self, BuildConfig};
use crate::error::Error;
use crate::lint::LintOptions;
use crate::pipeline::{Pipeline, PipelineOptions};
use crate::plugin::{build_plugin_list, PluginSpec, ResolvedPluginList, TransformRegistry};
use crate::project::{load_config, ProjectConfig};
use crate::watch::{WatchError, WatchOptions};

/// Inputs that do not come from the config file.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file (`--config`).
    pub config_path: Option<PathBuf>,
    /// Environment name (`--env` / `CASCADE_ENV`).
    pub environment: Option<String>,
    pub mode: Mode,
}

/// Resolved configuration for one invocation.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub cwd: PathBuf,
    /// Config file that was loaded, if any.
    pub config_file: Option<PathBuf>,
    pub project: ProjectConfig,
    pub build: BuildConfig,
    /// Effective plugin spec (the config's, or the default set).
    pub plugin_spec: PluginSpec,
    pub mode: Mode,
}

impl BuildContext {
    /// Load the config file (if any) and resolve the environment.
    pub fn load(cwd: &Path, options: &LoadOptions) -> Result<Self, Error> {
        let (config_file, project) = match load_config(cwd, options.config_path.as_deref())? {
            Some((path, project)) => {
                info!(path = %path.display(), "Loaded config");
                (Some(path), project)
            }
            None => {
                debug!("No config file, using defaults");
                (None, ProjectConfig::default())
            }
        };

        let build = env::resolve(options.environment.as_deref(), cwd, &project);
        let plugin_spec = project
            .postcss
            .plugins
            .clone()
            .unwrap_or_else(PluginSpec::default_set);

        Ok(Self {
            cwd: cwd.to_path_buf(),
            config_file,
            project,
            build,
            plugin_spec,
            mode: options.mode,
        })
    }

    /// Instantiate the plugin list.
    #[must_use]
    pub fn plugin_list(&self, registry: &dyn TransformRegistry) -> ResolvedPluginList {
        build_plugin_list(&self.plugin_spec, registry)
    }

    /// Pipeline settings. `lint: false` disables the linter regardless of config.
    #[must_use]
    pub fn pipeline_options(&self, lint: bool) -> PipelineOptions {
        let production = self.mode.is_production();
        PipelineOptions {
            production,
            source_maps: SourceMapOptions::from_config(&self.project.source_maps, production),
            lint: if lint {
                LintOptions::from_project(&self.project.stylelint, &self.cwd, &self.build.source_dir)
            } else {
                None
            },
            include_paths: self
                .project
                .sass
                .load_paths
                .iter()
                .map(|path| env::join_base(&self.cwd, path))
                .collect(),
        }
    }

    /// Build the pipeline for this context.
    #[must_use]
    pub fn pipeline(&self, registry: &dyn TransformRegistry, lint: bool) -> Pipeline {
        Pipeline::new(
            self.build.clone(),
            self.plugin_list(registry),
            self.pipeline_options(lint),
        )
    }

    pub fn watch_options(&self) -> Result<WatchOptions, WatchError> {
        WatchOptions::from_project(&self.project.watch, &self.build, &self.cwd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Environment;
    use crate::plugin::Registry;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_config() {
        let dir = tempdir().unwrap();
        let ctx = BuildContext::load(dir.path(), &LoadOptions::default()).unwrap();
        assert!(ctx.config_file.is_none());
        assert_eq!(ctx.build.environment, Environment::Static);
        assert_eq!(ctx.build.output_dir, dir.path().join("test"));
        assert_eq!(ctx.plugin_spec.names(), vec!["postcss-pxv", "autoprefixer", "cssnano"]);

        let list = ctx.plugin_list(&Registry::builtin());
        assert_eq!(list.names(), vec!["postcss-pxv", "autoprefixer"]);
    }

    #[test]
    fn test_config_and_environment() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("cascade.config.json"),
            r#"{ "postcss": { "plugins": { "cssnano": {} } }, "environments": { "next": { "cssOutput": "app.css" } } }"#,
        )
        .unwrap();

        let ctx = BuildContext::load(
            dir.path(),
            &LoadOptions {
                environment: Some("next".to_string()),
                mode: Mode::Production,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(ctx.config_file, Some(dir.path().join("cascade.config.json")));
        assert_eq!(ctx.build.output_path(), dir.path().join("public/css/app.css"));
        assert_eq!(ctx.plugin_spec.names(), vec!["cssnano"]);

        let options = ctx.pipeline_options(true);
        assert!(options.production);
        assert!(!options.source_maps.include_content);
        assert!(options.lint.is_some());
        assert!(ctx.pipeline_options(false).lint.is_none());
    }
}
