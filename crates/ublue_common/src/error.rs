//! Error types for ublue-update.

use std::path::PathBuf;
use thiserror::Error;

/// Exit status used for every failure that is not the update tool's own code
pub const EXIT_FAILURE: i32 = 1;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("update failed to pass checks: \n - {}", .reasons.join("\n - "))]
    Gated { reasons: Vec<String> },

    #[error("updates are already running for this scope (lock held: {})", .path.display())]
    AlreadyRunning { path: PathBuf },

    #[error("ublue-update needs to be run as root to perform system updates!")]
    RequiresRoot,

    #[error("Update not available")]
    NoUpdate,

    #[error("system update returned code {code}, program output:\n{output}")]
    SystemUpdateFailed { code: i32, output: String },

    #[error("runtime directory not found: {}", .0.display())]
    RuntimeDirMissing(PathBuf),

    #[error("Config error: {0}")]
    Config(String),

    #[error("failed to execute {program}: {source}")]
    Command {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {code:?}: {stderr}")]
    ToolFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UpdateError {
    /// Process exit status for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            UpdateError::SystemUpdateFailed { code, .. } if *code != 0 => *code,
            _ => EXIT_FAILURE,
        }
    }
}

pub type Result<T> = std::result::Result<T, UpdateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gated_message_lists_every_reason() {
        let err = UpdateError::Gated {
            reasons: vec!["Network is metered".into(), "Battery is below 50%".into()],
        };
        assert_eq!(
            err.to_string(),
            "update failed to pass checks: \n - Network is metered\n - Battery is below 50%"
        );
        assert_eq!(err.exit_code(), EXIT_FAILURE);
    }

    #[test]
    fn test_system_failure_propagates_tool_code() {
        let err = UpdateError::SystemUpdateFailed {
            code: 3,
            output: "boom".into(),
        };
        assert_eq!(err.exit_code(), 3);
    }
}
