#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use cascade_core::{Config, LoadOptions, Mode};
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "cascade")]
#[command(author, version, about = "Sass build orchestrator with lint, watch and live reload", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON logs and a JSON build summary
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Target environment (static, wordpress, next or a configured name)
    #[arg(long = "env", global = true, env = cascade_core::env::ENV_VAR, value_name = "NAME")]
    environment: Option<String>,

    /// Build mode; `production` minifies and drops inlined source content
    #[arg(long, global = true, env = "NODE_ENV", value_parser = parse_mode, default_value = "development")]
    mode: Mode,

    /// Config file (defaults to cascade.config.json in the working directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Lint, then compile the stylesheet once
    Build {
        /// Skip the linter
        #[arg(long)]
        no_lint: bool,
    },

    /// Build, then watch for changes and serve the output with live reload (default)
    Serve {
        /// Port to listen on (overrides `server.port`)
        #[arg(long)]
        port: Option<u16>,

        /// Host to bind to (overrides `server.host`)
        #[arg(long)]
        host: Option<String>,

        /// Open the browser once the server is up
        #[arg(long)]
        open: bool,
    },

    /// Run the linter only
    Lint,

    /// Print the resolved build configuration
    Config,
}

fn parse_mode(value: &str) -> Result<Mode, String> {
    Ok(Mode::from_node_env(value))
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::new(cwd.clone())
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json)
        .with_mode(cli.mode);

    logging::init(config.verbosity, config.json_logs);

    let load = LoadOptions {
        config_path: cli.config,
        environment: cli.environment,
        mode: cli.mode,
    };

    let command = cli.command.unwrap_or(Commands::Serve {
        port: None,
        host: None,
        open: false,
    });

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;

    match command {
        Commands::Build { no_lint } => {
            let span = tracing::info_span!("build", cmd = "build", cwd = %cwd.display());
            let _guard = span.enter();
            runtime.block_on(commands::build::run(&config, &load, !no_lint))
        }
        Commands::Serve { port, host, open } => {
            let span = tracing::info_span!("serve", cmd = "serve", cwd = %cwd.display());
            let _guard = span.enter();
            let action = commands::serve::ServeAction { port, host, open };
            runtime.block_on(commands::serve::run(&config, &load, action))
        }
        Commands::Lint => {
            let span = tracing::info_span!("lint", cmd = "lint", cwd = %cwd.display());
            let _guard = span.enter();
            runtime.block_on(commands::lint::run(&config, &load))
        }
        Commands::Config => commands::config::run(&config, &load),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("cascade").chain(args.iter().copied())).unwrap()
    }

    #[test]
    #[serial]
    fn test_no_subcommand_defaults() {
        std::env::remove_var("CASCADE_ENV");
        std::env::remove_var("NODE_ENV");
        let cli = parse(&[]);
        assert!(cli.command.is_none());
        assert_eq!(cli.mode, Mode::Development);
        assert!(cli.environment.is_none());
    }

    #[test]
    #[serial]
    fn test_env_vars_select_environment_and_mode() {
        std::env::set_var("CASCADE_ENV", "wordpress");
        std::env::set_var("NODE_ENV", "production");
        let cli = parse(&["build"]);
        std::env::remove_var("CASCADE_ENV");
        std::env::remove_var("NODE_ENV");

        assert_eq!(cli.environment.as_deref(), Some("wordpress"));
        assert_eq!(cli.mode, Mode::Production);
        assert_eq!(cli.command, Some(Commands::Build { no_lint: false }));
    }

    #[test]
    #[serial]
    fn test_flags_override_env_vars() {
        std::env::set_var("CASCADE_ENV", "wordpress");
        std::env::set_var("NODE_ENV", "production");
        let cli = parse(&["--env", "next", "--mode", "development", "build", "--no-lint"]);
        std::env::remove_var("CASCADE_ENV");
        std::env::remove_var("NODE_ENV");

        assert_eq!(cli.environment.as_deref(), Some("next"));
        assert_eq!(cli.mode, Mode::Development);
        assert_eq!(cli.command, Some(Commands::Build { no_lint: true }));
    }

    #[test]
    #[serial]
    fn test_unknown_node_env_is_development() {
        std::env::set_var("NODE_ENV", "staging");
        let cli = parse(&["lint"]);
        std::env::remove_var("NODE_ENV");
        assert_eq!(cli.mode, Mode::Development);
    }

    #[test]
    fn test_serve_flags() {
        let cli = parse(&["serve", "--port", "8080", "--host", "0.0.0.0", "--open", "-vv"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(
            cli.command,
            Some(Commands::Serve {
                port: Some(8080),
                host: Some("0.0.0.0".to_string()),
                open: true,
            })
        );
    }
}
