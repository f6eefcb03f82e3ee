#![forbid(unsafe_code)]

//! Tool contracts shared across volseal.
//!
//! The provisioning engine drives external tools (`cryptsetup`, `mkfs`,
//! `mount`, `umount`) through these traits so the state machine stays testable
//! and system integrations live in their own crates.

pub mod crypto;
pub mod host;

pub use crypto::{InitParams, OpenParams, VolumeCrypto};
pub use host::VolumeHost;

/// Captured result of an external tool invocation.
///
/// Only the exit status and the captured streams matter to the orchestration
/// layer; interactive invocations leave both streams empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Build an output carrying only an exit status.
    pub fn from_status(status: i32) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Prefer stderr, fall back to stdout, for log lines and error messages.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        self.stdout.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_prefers_stderr() {
        let out = ToolOutput {
            status: 1,
            stdout: "noise\n".into(),
            stderr: "  Device /dev/vdb is not a valid LUKS device.\n".into(),
        };
        assert_eq!(out.diagnostic(), "Device /dev/vdb is not a valid LUKS device.");
        assert!(!out.success());
    }

    #[test]
    fn diagnostic_falls_back_to_stdout() {
        let out = ToolOutput {
            status: 0,
            stdout: "ok\n".into(),
            stderr: "   ".into(),
        };
        assert_eq!(out.diagnostic(), "ok");
        assert!(ToolOutput::from_status(0).success());
    }
}
