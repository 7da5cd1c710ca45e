use std::path::PathBuf;
use std::process::ExitCode;

use rekon_db::LoadError;

/// Errors produced by elfdump.
///
/// - **Infrastructure errors** (exit code 2): unreadable input, no loader
///   recognises the file, output failures
/// - **Load errors** (exit code 1): a loader accepted the file but could not
///   load it
#[derive(thiserror::Error, Debug)]
pub enum ElfdumpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No loader recognises {path}")]
    NoLoader { path: PathBuf },

    #[error("Loading {path} failed: {source}")]
    Load { path: PathBuf, source: LoadError },
}

impl ElfdumpError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Numeric form of [`exit_code`](Self::exit_code), reported in JSON output.
    pub fn code(&self) -> u8 {
        match self {
            Self::Io(_) | Self::Json(_) | Self::NoLoader { .. } => 2,
            Self::Load { .. } => 1,
        }
    }
}
