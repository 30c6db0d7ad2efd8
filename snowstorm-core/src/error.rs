use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Broken pipe writing to {0}")]
    BrokenPipe(String),

    #[error("Malformed station header on line {line_no}: {reason}: {line:?}")]
    MalformedHeader {
        line_no: usize,
        line: String,
        reason: &'static str,
    },

    #[error("Malformed client line {line_no}: {reason}: {line:?}")]
    MalformedClientLine {
        line_no: usize,
        line: String,
        reason: &'static str,
    },

    #[error("Server failed to produce database {path} after {attempts} attempts")]
    DatabaseTimeout { path: Utf8PathBuf, attempts: u32 },

    #[error("Server terminated while saving database ({status})")]
    ServerDied { status: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Errors the workload driver absorbs by respawning the slot.
    pub fn is_slot_local(&self) -> bool {
        matches!(self, HarnessError::BrokenPipe(_))
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
