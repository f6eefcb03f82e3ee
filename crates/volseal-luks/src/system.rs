//! System-backed `VolumeCrypto` implementation.

use crate::command::CryptsetupCommand;
use log::debug;
use std::env;
use std::path::{Path, PathBuf};
use volseal_core::config::{detect_binary_path, looks_like_mapping_name, KNOWN_CRYPTSETUP_PATHS};
use volseal_core::error::{VolsealError, VolsealResult};
use volseal_core::VolsealConfig;
use volseal_provider::{InitParams, OpenParams, ToolOutput, VolumeCrypto};

/// Drives the host `cryptsetup` binary.
#[derive(Debug, Clone)]
pub struct SystemCrypto {
    cryptsetup: CryptsetupCommand,
}

impl SystemCrypto {
    /// Resolve `cryptsetup` (configured path, known locations, then `PATH`).
    pub fn from_config(config: &VolsealConfig) -> VolsealResult<Self> {
        let binary = resolve_cryptsetup_path(config)?;
        debug!("using cryptsetup at {}", binary.display());
        Ok(Self {
            cryptsetup: CryptsetupCommand::new(binary, config.tool_timeout()),
        })
    }

    pub fn binary(&self) -> &Path {
        self.cryptsetup.binary()
    }
}

impl VolumeCrypto for SystemCrypto {
    type Error = VolsealError;

    fn is_encrypted(&self, device: &Path) -> VolsealResult<bool> {
        self.cryptsetup.is_luks(device)
    }

    fn initialize(&self, device: &Path, params: &InitParams) -> VolsealResult<ToolOutput> {
        self.cryptsetup.format(device, params)
    }

    fn open_mapping(
        &self,
        device: &Path,
        name: &str,
        params: &OpenParams,
    ) -> VolsealResult<ToolOutput> {
        if !looks_like_mapping_name(name) {
            return Err(VolsealError::InvalidConfig(format!(
                "refusing to open mapping with unsafe name `{name}`"
            )));
        }
        self.cryptsetup
            .open(device, name, params.key_file.as_deref())
    }

    fn device_uuid(&self, device: &Path) -> VolsealResult<String> {
        self.cryptsetup.uuid(device)
    }

    fn header_dump(&self, device: &Path) -> VolsealResult<String> {
        self.cryptsetup.dump(device)
    }

    fn mapping_source(&self, name: &str) -> VolsealResult<Option<PathBuf>> {
        if !looks_like_mapping_name(name) {
            return Ok(None);
        }
        self.cryptsetup.mapping_source(name)
    }
}

fn resolve_cryptsetup_path(config: &VolsealConfig) -> VolsealResult<PathBuf> {
    if let Some(candidate) = config.cryptsetup_path() {
        if !candidate.exists() {
            return Err(VolsealError::InvalidConfig(format!(
                "cryptsetup binary not found at {}",
                candidate.display()
            )));
        }
        return Ok(candidate);
    }

    if let Some(found) = detect_binary_path(KNOWN_CRYPTSETUP_PATHS) {
        return Ok(PathBuf::from(found));
    }

    find_in_path("cryptsetup").ok_or_else(|| {
        VolsealError::InvalidConfig(format!(
            "unable to locate cryptsetup binary; tried {:?} and PATH",
            KNOWN_CRYPTSETUP_PATHS
        ))
    })
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}
