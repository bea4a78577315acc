use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

static URL_PASSWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z][a-z0-9+.\-]*://[^:/@]*):[^@]*@").expect("valid regex"));

/// Masks the password component of a connection URL so it can be logged.
pub fn sanitize_url(url: &str) -> String {
    URL_PASSWORD.replace(url, "$1:****@").to_string()
}

/// Quotes a PostgreSQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Error, Debug)]
pub enum TrekError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Process error: {0}")]
    Process(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Corrupt migrations directory: {0}")]
    CorruptMigrations(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),
}

impl TrekError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// The model failed to compile or to apply. Callers report this and keep going.
    pub fn is_invalid_model(&self) -> bool {
        matches!(self, Self::InvalidModel(_))
    }
}

pub type Result<T> = std::result::Result<T, TrekError>;
