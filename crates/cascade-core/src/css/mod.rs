//! CSS processing using lightningcss.
//!
//! Provides:
//! - Vendor prefixing against browser targets (`autoprefixer`)
//! - Minification (`cssnano`, and the production pass)
//! - Sass/SCSS compilation ([`sass`])
//! - `pxv` unit conversion ([`pxv`])
//! - Line-level source maps ([`sourcemap`])

pub mod pxv;
pub mod sass;
pub mod sourcemap;

use lightningcss::printer::PrinterOptions;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::warn;

use crate::plugin::{Placement, ResolveError, Transform, TransformContext, TransformError};

/// CSS processing options.
#[derive(Debug, Clone, Default)]
pub struct CssOptions {
    /// Compact output.
    pub minify: bool,
    /// Browser targets for prefixing. `None` adds no prefixes.
    pub targets: Option<Browsers>,
    /// Source file name (for error messages).
    pub filename: Option<String>,
}

/// CSS processing error.
#[derive(Debug, Error)]
pub enum CssError {
    #[error("CSS parse error in {filename}: {message}")]
    Parse { filename: String, message: String },

    #[error("CSS transform error: {0}")]
    Transform(String),

    #[error("CSS print error: {0}")]
    Print(String),
}

/// Parse, optionally prefix and minify, and print a stylesheet.
///
/// Prefixes are computed during lightningcss's minify pass, so the pass runs
/// whenever targets are set, even for expanded output.
pub fn process_css(source: &str, options: &CssOptions) -> Result<String, CssError> {
    let filename = options.filename.as_deref().unwrap_or("input.css");

    // Declarations the compiler let through but lightningcss rejects (`*zoom: 1`)
    // are dropped with a warning instead of failing the build.
    let warnings = Arc::new(RwLock::new(Vec::new()));
    let parser_options = ParserOptions {
        filename: filename.to_string(),
        error_recovery: true,
        warnings: Some(Arc::clone(&warnings)),
        ..ParserOptions::default()
    };

    let mut stylesheet =
        StyleSheet::parse(source, parser_options).map_err(|e| CssError::Parse {
            filename: filename.to_string(),
            message: e.to_string(),
        })?;

    if let Ok(warnings) = warnings.read() {
        for warning in warnings.iter() {
            warn!(filename, "Skipped invalid CSS: {warning}");
        }
    }

    let targets = options.targets.map(Targets::from).unwrap_or_default();

    if options.minify || options.targets.is_some() {
        stylesheet
            .minify(MinifyOptions {
                targets,
                ..Default::default()
            })
            .map_err(|e| CssError::Transform(e.to_string()))?;
    }

    let printer_options = PrinterOptions {
        minify: options.minify,
        targets,
        ..Default::default()
    };

    let output = stylesheet
        .to_css(printer_options)
        .map_err(|e| CssError::Print(e.to_string()))?;

    Ok(output.code)
}

/// Minify without adding prefixes.
pub fn minify_css(source: &str, filename: &str) -> Result<String, CssError> {
    process_css(
        source,
        &CssOptions {
            minify: true,
            targets: None,
            filename: Some(filename.to_string()),
        },
    )
}

/// Default browser targets for prefixing: Chrome 80+, Firefox 75+, Safari 13+, Edge 80+.
#[must_use]
pub fn default_browser_targets() -> Browsers {
    Browsers {
        chrome: Some(80 << 16),
        firefox: Some(75 << 16),
        safari: Some(13 << 16),
        edge: Some(80 << 16),
        ..Default::default()
    }
}

/// Encode `major[.minor[.patch]]` the way lightningcss stores versions.
fn parse_version(version: &str) -> Option<u32> {
    let mut parts = version.trim().split('.');
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    let patch: u32 = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    if major > 0xffff || minor > 0xff || patch > 0xff {
        return None;
    }
    Some((major << 16) | (minor << 8) | patch)
}

/// Build browser targets from a `name → version` map.
///
/// Versions may be numbers or strings like `"13.1"`. Browsers missing from the
/// map are not targeted.
pub fn browsers_from_map(map: &BTreeMap<String, Value>) -> Result<Browsers, String> {
    let mut browsers = Browsers::default();

    for (name, version) in map {
        let text = match version {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            other => return Err(format!("version for `{name}` must be a number or string, got {other}")),
        };
        let encoded =
            parse_version(&text).ok_or_else(|| format!("invalid version `{text}` for `{name}`"))?;

        let slot = match name.to_ascii_lowercase().as_str() {
            "android" => &mut browsers.android,
            "chrome" => &mut browsers.chrome,
            "edge" => &mut browsers.edge,
            "firefox" => &mut browsers.firefox,
            "ie" => &mut browsers.ie,
            "ios" | "ios_saf" => &mut browsers.ios_saf,
            "opera" => &mut browsers.opera,
            "safari" => &mut browsers.safari,
            "samsung" => &mut browsers.samsung,
            _ => return Err(format!("unknown browser `{name}`")),
        };
        *slot = Some(encoded);
    }

    Ok(browsers)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AutoprefixerOptions {
    browsers: Option<BTreeMap<String, Value>>,
}

/// Vendor prefixing against browser targets.
#[derive(Debug, Clone)]
pub struct AutoprefixerTransform {
    targets: Browsers,
}

impl AutoprefixerTransform {
    #[must_use]
    pub fn new(targets: Browsers) -> Self {
        Self { targets }
    }

    /// Options: `{ "browsers": { "safari": 12, "chrome": "70" } }`. Other keys are ignored.
    pub fn from_options(options: &Value) -> Result<Self, ResolveError> {
        let invalid = |message: String| ResolveError::InvalidOptions {
            name: "autoprefixer".to_string(),
            message,
        };

        let parsed: AutoprefixerOptions =
            serde_json::from_value(options.clone()).map_err(|e| invalid(e.to_string()))?;

        let targets = match parsed.browsers {
            Some(map) if !map.is_empty() => browsers_from_map(&map).map_err(invalid)?,
            _ => default_browser_targets(),
        };

        Ok(Self::new(targets))
    }
}

impl Transform for AutoprefixerTransform {
    fn name(&self) -> &str {
        "autoprefixer"
    }

    fn placement(&self) -> Placement {
        Placement::Post
    }

    fn transform(&self, css: &str, ctx: &TransformContext<'_>) -> Result<String, TransformError> {
        process_css(
            css,
            &CssOptions {
                minify: false,
                targets: Some(self.targets),
                filename: Some(ctx.filename.to_string()),
            },
        )
        .map_err(|e| TransformError::new(self.name(), e.to_string()))
    }
}

/// Minification.
#[derive(Debug, Clone, Default)]
pub struct MinifyTransform;

impl MinifyTransform {
    /// Accepts any options object (presets are not configurable).
    pub fn from_options(options: &Value) -> Result<Self, ResolveError> {
        if options.is_object() {
            Ok(Self)
        } else {
            Err(ResolveError::InvalidOptions {
                name: "cssnano".to_string(),
                message: format!("expected an object, got {options}"),
            })
        }
    }
}

impl Transform for MinifyTransform {
    fn name(&self) -> &str {
        "cssnano"
    }

    fn placement(&self) -> Placement {
        Placement::Post
    }

    fn transform(&self, css: &str, ctx: &TransformContext<'_>) -> Result<String, TransformError> {
        minify_css(css, ctx.filename).map_err(|e| TransformError::new(self.name(), e.to_string()))
    }
}
