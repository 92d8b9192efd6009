use std::io;
use std::path::Path;
use std::path::PathBuf;

use childproc_process::ProcessError;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::diagnostics::TextRange;
use crate::diagnostics::Diagnostic;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{}:{}:{}: {message}", path.display(), range.start.line, range.start.column)]
    Parse {
        path: PathBuf,
        range: TextRange,
        message: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("program `{0}` not found on PATH")]
    ProgramNotFound(String),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl ConfigError {
    /// Multi-line rendering of a parse error against the text it came from.
    /// Other errors render as their `Display` form.
    pub fn render(&self, contents: &str) -> String {
        match self {
            ConfigError::Parse {
                path,
                range,
                message,
                ..
            } => Diagnostic {
                path,
                range: *range,
                message,
                contents,
            }
            .to_string(),
            other => other.to_string(),
        }
    }
}

pub(crate) fn parse<T: DeserializeOwned>(path: &Path, contents: &str) -> Result<T> {
    toml::from_str(contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        range: TextRange::from_span(contents, source.span()),
        message: source.message().to_string(),
        source,
    })
}

pub(crate) fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
