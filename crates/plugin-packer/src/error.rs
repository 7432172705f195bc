/// Error types for the plugin packer

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PackError>;

#[derive(Error, Debug)]
pub enum PackError {
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Invalid compiler {path}: {reason}")]
    InvalidCompiler { path: PathBuf, reason: String },

    #[error("Compilation failed ({}):\n{}", exit_label(.exit_code), .output)]
    CompilationFailed { exit_code: Option<i32>, output: String },

    #[error("Compiler did not finish within {}s", .timeout.as_secs_f64())]
    CompilerTimedOut { timeout: Duration, output: String },

    #[error("Duplicate archive entry '{entry}': {} and {}", .first.display(), .second.display())]
    DuplicateEntry {
        entry: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Output directory {path} is unavailable: {reason}")]
    OutputUnavailable { path: PathBuf, reason: String },

    #[error("Invalid packaging request: {0}")]
    InvalidRequest(String),

    #[error("Invalid dependency classpath: {0}")]
    Classpath(#[from] std::env::JoinPathsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl PackError {
    pub fn invalid_compiler(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PackError::InvalidCompiler {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn output_unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PackError::OutputUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn duplicate_entry(
        entry: impl Into<String>,
        first: impl Into<PathBuf>,
        second: impl Into<PathBuf>,
    ) -> Self {
        PackError::DuplicateEntry {
            entry: entry.into(),
            first: first.into(),
            second: second.into(),
        }
    }

    /// Captured compiler output, for errors raised by a compiler run
    pub fn compiler_output(&self) -> Option<&str> {
        match self {
            PackError::CompilationFailed { output, .. }
            | PackError::CompilerTimedOut { output, .. } => Some(output),
            _ => None,
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compilation_failed_message_includes_output() {
        let err = PackError::CompilationFailed {
            exit_code: Some(1),
            output: "A.kt:1:1: syntax error".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("exit code 1"));
        assert!(message.contains("syntax error"));
        assert_eq!(err.compiler_output(), Some("A.kt:1:1: syntax error"));
    }

    #[test]
    fn test_signal_exit_label() {
        let err = PackError::CompilationFailed {
            exit_code: None,
            output: String::new(),
        };
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn test_non_compiler_errors_have_no_output() {
        let err = PackError::PathNotFound(PathBuf::from("/missing"));
        assert!(err.compiler_output().is_none());
    }
}
