//! Sass/SCSS compilation using grass.
//!
//! Compiles the entry stylesheet and records every file the compiler loaded,
//! so the source map can list partials next to the entry.

use std::cell::RefCell;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::trace;

/// Sass compilation options.
#[derive(Debug, Clone, Default)]
pub struct SassOptions {
    /// Extra include paths for `@import`/`@use` resolution. The entry's
    /// directory is always searched.
    pub include_paths: Vec<PathBuf>,
    /// Compressed instead of expanded output.
    pub minify: bool,
}

/// A file read by the compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSource {
    pub path: PathBuf,
    pub contents: String,
}

/// Compiler output: plain CSS and the files it came from (entry first).
#[derive(Debug, Clone)]
pub struct CompiledStylesheet {
    pub css: String,
    pub sources: Vec<LoadedSource>,
}

/// Sass compilation error.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Syntax or evaluation error. `message` carries the compiler's file and
    /// line context.
    #[error("Sass compile error in {path}:\n{message}")]
    Syntax { path: PathBuf, message: String },
}

/// [`grass::Fs`] that reads from disk and remembers what it read.
#[derive(Debug, Default)]
struct RecordingFs {
    loaded: RefCell<Vec<LoadedSource>>,
}

impl RecordingFs {
    fn into_sources(self) -> Vec<LoadedSource> {
        self.loaded.into_inner()
    }
}

impl grass::Fs for RecordingFs {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let bytes = std::fs::read(path)?;
        let mut loaded = self.loaded.borrow_mut();
        if !loaded.iter().any(|s| s.path == path) {
            trace!(path = %path.display(), "Sass loaded file");
            loaded.push(LoadedSource {
                path: path.to_path_buf(),
                contents: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(bytes)
    }
}

/// Compile a Sass/SCSS file to CSS.
///
/// Supports both `.scss` and `.sass` (indented syntax, by extension).
pub fn compile_file(path: &Path, options: &SassOptions) -> Result<CompiledStylesheet, CompileError> {
    if !path.is_file() {
        return Err(CompileError::Io {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "entry stylesheet not found"),
        });
    }

    let fs = RecordingFs::default();

    let style = if options.minify {
        grass::OutputStyle::Compressed
    } else {
        grass::OutputStyle::Expanded
    };

    let mut grass_options = grass::Options::default().style(style).fs(&fs);

    if let Some(parent) = path.parent() {
        grass_options = grass_options.load_path(parent);
    }
    for include in &options.include_paths {
        grass_options = grass_options.load_path(include);
    }

    let css = grass::from_path(path, &grass_options).map_err(|e| CompileError::Syntax {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    Ok(CompiledStylesheet {
        css,
        sources: fs.into_sources(),
    })
}
