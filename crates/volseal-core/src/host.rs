//! [`VolumeHost`] backed by the real mount table and util-linux binaries.

use crate::config::VolsealConfig;
use crate::error::{VolsealError, VolsealResult};
use crate::workflow::privilege::{run_external, run_external_attached};
use std::fs;
use std::path::{Path, PathBuf};
use volseal_provider::{ToolOutput, VolumeHost};

#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;

const MOUNT_BINARIES: &[&str] = &["/bin/mount", "/usr/bin/mount", "/sbin/mount"];
const UMOUNT_BINARIES: &[&str] = &["/bin/umount", "/usr/bin/umount", "/sbin/umount"];
const LSBLK_BINARIES: &[&str] = &["/bin/lsblk", "/usr/bin/lsblk"];
const DMSETUP_BINARIES: &[&str] = &["/sbin/dmsetup", "/usr/sbin/dmsetup", "/usr/bin/dmsetup"];
const SBIN_DIRS: &[&str] = &["/sbin", "/usr/sbin", "/bin", "/usr/bin"];

#[derive(Debug, Clone)]
pub struct SystemHost {
    mounts_path: PathBuf,
}

impl SystemHost {
    pub fn new(mounts_path: impl Into<PathBuf>) -> Self {
        Self {
            mounts_path: mounts_path.into(),
        }
    }

    pub fn from_config(config: &VolsealConfig) -> Self {
        Self::new(config.mounts_path())
    }
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new("/proc/mounts")
    }
}

fn mkfs_candidates(fs_type: &str) -> Vec<String> {
    SBIN_DIRS
        .iter()
        .map(|dir| format!("{dir}/mkfs.{fs_type}"))
        .collect()
}

fn captured(tool: &str, output: ToolOutput) -> VolsealResult<String> {
    if output.success() {
        Ok(output.stdout)
    } else {
        Err(VolsealError::tool(tool, output.status, output.diagnostic()))
    }
}

impl VolumeHost for SystemHost {
    type Error = VolsealError;

    fn mount_table(&self) -> VolsealResult<String> {
        Ok(fs::read_to_string(&self.mounts_path)?)
    }

    #[cfg(unix)]
    fn is_block_device(&self, path: &Path) -> bool {
        fs::metadata(path)
            .map(|meta| meta.file_type().is_block_device())
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    fn is_block_device(&self, _path: &Path) -> bool {
        false
    }

    fn block_listing(&self) -> VolsealResult<String> {
        captured("lsblk", run_external::<_, &str>(LSBLK_BINARIES, &[])?)
    }

    fn unmount(&self, mountpoint: &Path) -> VolsealResult<ToolOutput> {
        run_external(UMOUNT_BINARIES, &[mountpoint])
    }

    fn mount(&self, device: &Path, mountpoint: &Path) -> VolsealResult<ToolOutput> {
        run_external(MOUNT_BINARIES, &[device, mountpoint])
    }

    fn make_filesystem(&self, fs_type: &str, device: &Path) -> VolsealResult<ToolOutput> {
        run_external_attached(&mkfs_candidates(fs_type), &[device])
    }

    fn mapping_info(&self, mapper: &Path) -> VolsealResult<String> {
        let out = run_external(DMSETUP_BINARIES, &[Path::new("info"), mapper])?;
        captured("dmsetup info", out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mount_table_reads_configured_source() {
        let dir = tempdir().unwrap();
        let mounts = dir.path().join("mounts");
        fs::write(&mounts, "/dev/vdb /export ext4 rw 0 0\n").unwrap();

        let host = SystemHost::new(&mounts);
        assert_eq!(host.mount_table().unwrap(), "/dev/vdb /export ext4 rw 0 0\n");
    }

    #[test]
    fn regular_files_are_not_block_devices() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("disk.img");
        fs::write(&file, b"data").unwrap();

        let host = SystemHost::default();
        assert!(!host.is_block_device(&file));
        assert!(!host.is_block_device(&dir.path().join("missing")));
    }

    #[test]
    fn mkfs_candidates_cover_sbin_layouts() {
        let candidates = mkfs_candidates("xfs");
        assert_eq!(candidates[0], "/sbin/mkfs.xfs");
        assert!(candidates.contains(&"/usr/sbin/mkfs.xfs".to_string()));
    }
}
