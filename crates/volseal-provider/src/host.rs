//! Contract for host storage tooling: mount table, block devices, and the
//! mount/unmount/filesystem commands.

use crate::ToolOutput;
use std::error::Error;
use std::path::Path;

/// Abstraction over the host's mount and filesystem tooling.
pub trait VolumeHost {
    type Error: Error + Send + Sync + 'static;

    /// Raw mount table in `/proc/mounts` format.
    fn mount_table(&self) -> Result<String, Self::Error>;

    /// Whether `path` names an existing block special file.
    fn is_block_device(&self, path: &Path) -> bool;

    /// Block-device listing for diagnostics (e.g. `lsblk` output).
    fn block_listing(&self) -> Result<String, Self::Error>;

    fn unmount(&self, mountpoint: &Path) -> Result<ToolOutput, Self::Error>;

    fn mount(&self, device: &Path, mountpoint: &Path) -> Result<ToolOutput, Self::Error>;

    /// Build a filesystem of type `fs_type` on `device`.
    ///
    /// Must run with the operator's terminal attached so any confirmation the
    /// tool asks for stays answerable; only the exit status is reported.
    fn make_filesystem(&self, fs_type: &str, device: &Path) -> Result<ToolOutput, Self::Error>;

    /// Mapping metadata for diagnostics (e.g. `dmsetup info`).
    fn mapping_info(&self, mapper: &Path) -> Result<String, Self::Error>;
}
