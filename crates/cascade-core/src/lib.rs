#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod config;
pub mod context;
pub mod css;
pub mod env;
pub mod error;
pub mod lint;
pub mod pipeline;
pub mod plugin;
pub mod project;
pub mod reload;
pub mod version;
pub mod watch;

pub use config::{Config, Mode};
pub use context::{BuildContext, LoadOptions};
pub use env::{BuildConfig, Environment};
pub use error::Error;
pub use lint::{LintOptions, LintReport};
pub use pipeline::{BuildEvent, BuildResult, CycleResult, Pipeline, PipelineOptions, Stage};
pub use plugin::{
    build_plugin_list, PluginSpec, Registry, ResolvedPluginList, Transform, TransformRegistry,
};
pub use project::{LintPolicy, ProjectConfig};
pub use reload::{ReloadHub, ReloadMessage};
pub use version::VERSION;
