//! Error taxonomy shared by every volseal crate.

use std::path::PathBuf;
use thiserror::Error;

/// Exit status for a successful run.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit status for any failure other than lock contention.
pub const EXIT_GENERAL: i32 = 1;
/// Exit status when the single-instance lock cannot be taken.
pub const EXIT_LOCK_FAIL: i32 = 2;
/// Base added to the signal number when a run is interrupted.
pub const EXIT_SIGNAL_BASE: i32 = 128;

pub type VolsealResult<T> = Result<T, VolsealError>;

#[derive(Debug, Error)]
pub enum VolsealError {
    /// Another run holds the lock, or ownership could not be determined.
    #[error("lock {} unavailable: {reason}", .lock_dir.display())]
    LockFail { lock_dir: PathBuf, reason: String },

    #[error("no usable target: mountpoint {} is not mounted and {} is not a block device", .mountpoint.display(), .device.display())]
    DeviceNotFound { device: PathBuf, mountpoint: PathBuf },

    #[error("{tool} failed with exit status {status}: {detail}")]
    ToolFailure {
        tool: String,
        status: i32,
        detail: String,
    },

    #[error("mapping `{name}` already exists at {}; refusing to reuse it", .mapper.display())]
    CollisionFailure { name: String, mapper: PathBuf },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid descriptor {}: {reason}", .path.display())]
    InvalidDescriptor { path: PathBuf, reason: String },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("{0}")]
    Privilege(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl VolsealError {
    /// Process exit status the CLI reports for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            VolsealError::LockFail { .. } => EXIT_LOCK_FAIL,
            _ => EXIT_GENERAL,
        }
    }

    /// Build a `ToolFailure`, substituting a placeholder for empty output.
    pub fn tool(tool: impl Into<String>, status: i32, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        VolsealError::ToolFailure {
            tool: tool.into(),
            status,
            detail: if detail.trim().is_empty() {
                "no additional output".to_string()
            } else {
                detail.trim().to_string()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_failures_map_to_dedicated_exit_code() {
        let err = VolsealError::LockFail {
            lock_dir: PathBuf::from("/var/run/fast_luks"),
            reason: "held by live process 42".into(),
        };
        assert_eq!(err.exit_code(), EXIT_LOCK_FAIL);
        assert!(err.to_string().contains("/var/run/fast_luks"));
    }

    #[test]
    fn other_failures_use_general_exit_code() {
        let err = VolsealError::tool("cryptsetup luksFormat", 2, "   ");
        assert_eq!(err.exit_code(), EXIT_GENERAL);
        assert_eq!(
            err.to_string(),
            "cryptsetup luksFormat failed with exit status 2: no additional output"
        );
    }
}
