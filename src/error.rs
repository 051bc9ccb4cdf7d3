//! Build pipeline error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the build pipeline.
///
/// Per-document errors (`MalformedFrontMatter`, `TemplateNotFound`) are
/// collected during a stage and the first one is surfaced once the stage
/// finishes; they never abort sibling documents mid-stage.
/// `TemplateParse` aborts template loading before any document is
/// processed.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("malformed front matter in `{path}`: {message}")]
    MalformedFrontMatter { path: PathBuf, message: String },

    #[error("failed to parse template `{path}`")]
    TemplateParse {
        path: PathBuf,
        #[source]
        source: tera::Error,
    },

    #[error("template not found: {name}")]
    TemplateNotFound { name: String },

    #[error("template `{name}` failed to render")]
    TemplateRender {
        name: String,
        #[source]
        source: tera::Error,
    },

    #[error("IO error on `{path}`")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a build is already in progress")]
    BuildInProgress,

    /// Pipeline machinery failures that are not tied to one document,
    /// such as worker-pool construction or path bookkeeping.
    #[error("build internals: {message}")]
    Internal { message: String },
}

impl BuildError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
