//! Contract for the volume crypto tool (LUKS via `cryptsetup` on Linux hosts).
//!
//! Header formatting and mapping activation are irreversible or privileged
//! operations; implementations report exit status through [`ToolOutput`] and
//! reserve `Err` for failures to run the tool at all.

use crate::ToolOutput;
use std::error::Error;
use std::path::{Path, PathBuf};

/// Parameters for writing a fresh encrypted container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitParams {
    pub cipher_algorithm: String,
    pub keysize: u32,
    pub hash_algorithm: String,
    /// PBKDF iteration time in milliseconds (`--iter-time`).
    pub iter_time_ms: u32,
    /// Passphrase file used instead of an interactive prompt.
    pub key_file: Option<PathBuf>,
}

/// Parameters for activating a mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenParams {
    pub key_file: Option<PathBuf>,
}

/// Abstraction over the external volume crypto tool.
pub trait VolumeCrypto {
    type Error: Error + Send + Sync + 'static;

    /// Report whether `device` already carries an encrypted container header.
    fn is_encrypted(&self, device: &Path) -> Result<bool, Self::Error>;

    /// Write a new container header to `device`.
    ///
    /// Runs interactively unless `params.key_file` is set, so the passphrase
    /// confirmation reaches the operator's terminal.
    fn initialize(&self, device: &Path, params: &InitParams) -> Result<ToolOutput, Self::Error>;

    /// Activate the container on `device` as mapping `name`.
    fn open_mapping(
        &self,
        device: &Path,
        name: &str,
        params: &OpenParams,
    ) -> Result<ToolOutput, Self::Error>;

    /// Return the container UUID stored in the header of `device`.
    fn device_uuid(&self, device: &Path) -> Result<String, Self::Error>;

    /// Human-readable header dump, used only for the operational log.
    fn header_dump(&self, device: &Path) -> Result<String, Self::Error>;

    /// Resolve the backing device of an active mapping, if `name` is active.
    fn mapping_source(&self, name: &str) -> Result<Option<PathBuf>, Self::Error>;
}
