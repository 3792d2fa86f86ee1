//! Error types for shell execution.

use std::io;
use thiserror::Error;

/// Result type alias for shell operations.
pub type ShellResult<T> = Result<T, ShellError>;

/// Errors that can occur while running an external command.
#[derive(Debug, Error)]
pub enum ShellError {
    /// The command could not be spawned.
    #[error("Failed to execute shell command '{command}': {source}")]
    Exec {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The command ran and returned a non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        output: String,
    },
}

impl ShellError {
    /// Returns the command line that failed.
    pub fn command(&self) -> &str {
        match self {
            ShellError::Exec { command, .. } | ShellError::CommandFailed { command, .. } => command,
        }
    }

    /// Returns true for "already exists" / "no such process" style
    /// failures that leave the system in the requested state anyway.
    pub fn is_benign(&self) -> bool {
        match self {
            ShellError::CommandFailed { output, .. } => {
                output.contains("File exists") || output.contains("No such process")
            }
            ShellError::Exec { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_display() {
        let err = ShellError::CommandFailed {
            command: "/sbin/ip route add 10.0.0.0/8 dev eth0".to_string(),
            exit_code: 2,
            output: "RTNETLINK answers: File exists".to_string(),
        };
        assert!(err.to_string().contains("exit code 2"));
        assert_eq!(err.command(), "/sbin/ip route add 10.0.0.0/8 dev eth0");
        assert!(err.is_benign());
    }

    #[test]
    fn test_exec_error_is_not_benign() {
        let err = ShellError::Exec {
            command: "/nonexistent".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "missing"),
        };
        assert!(!err.is_benign());
    }
}
