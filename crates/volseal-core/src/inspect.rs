//! Device inspection: decide whether the target is mounted, raw, or missing.

use crate::error::{VolsealError, VolsealResult};
use log::{error, info};
use std::fs;
use std::path::{Path, PathBuf};
use volseal_provider::{VolumeCrypto, VolumeHost};

/// What the inspector found at the configured mountpoint and device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceState {
    /// Mountpoint is in use; `device` comes from the mount table, not config.
    AlreadyMountedPlain { device: PathBuf },
    /// Device exists as a block special file and nothing is mounted.
    RawUnmounted { device: PathBuf },
    NotFound,
}

/// One parsed line of a `/proc/mounts`-style table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: PathBuf,
    pub mountpoint: PathBuf,
    pub fs_type: String,
}

pub fn parse_mount_table(table: &str) -> Vec<MountEntry> {
    table
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let device = parts.next()?;
            let mountpoint = parts.next()?;
            let fs_type = parts.next().unwrap_or_default();
            Some(MountEntry {
                device: PathBuf::from(unescape_mount_field(device)),
                mountpoint: PathBuf::from(unescape_mount_field(mountpoint)),
                fs_type: fs_type.to_string(),
            })
        })
        .collect()
}

/// Reverse lookup: which device backs `mountpoint`. Later entries shadow
/// earlier ones, matching how stacked mounts resolve.
pub fn device_for_mountpoint(table: &str, mountpoint: &Path) -> Option<PathBuf> {
    parse_mount_table(table)
        .into_iter()
        .filter(|entry| entry.mountpoint == mountpoint)
        .last()
        .map(|entry| entry.device)
}

/// If `device` is a node directly under `mapper_root`, return its mapping name.
pub fn mapping_name_under(mapper_root: &Path, device: &Path) -> Option<String> {
    let name = device.strip_prefix(mapper_root).ok()?;
    let mut components = name.components();
    let first = components.next()?;
    if components.next().is_some() {
        return None;
    }
    Some(first.as_os_str().to_string_lossy().into_owned())
}

/// Classify the target. On `NotFound` the block listing and mount table are
/// written to the log before returning; the caller decides how to abort.
pub fn classify<H>(host: &H, mountpoint: &Path, device: &Path) -> VolsealResult<DeviceState>
where
    H: VolumeHost<Error = VolsealError>,
{
    let table = host.mount_table()?;

    if let Some(mounted) = device_for_mountpoint(&table, mountpoint) {
        info!(
            "{} is mounted from {}",
            mountpoint.display(),
            mounted.display()
        );
        return Ok(DeviceState::AlreadyMountedPlain { device: mounted });
    }

    if host.is_block_device(device) {
        if !mountpoint.exists() {
            info!("creating mountpoint {}", mountpoint.display());
            fs::create_dir_all(mountpoint)?;
        }
        return Ok(DeviceState::RawUnmounted {
            device: device.to_path_buf(),
        });
    }

    error!(
        "{} is not mounted and {} is not a block device",
        mountpoint.display(),
        device.display()
    );
    match host.block_listing() {
        Ok(listing) => error!("block devices:\n{}", listing.trim_end()),
        Err(err) => error!("block device listing unavailable: {err}"),
    }
    error!("mount table:\n{}", table.trim_end());
    Ok(DeviceState::NotFound)
}

/// Whether `device` already carries an encrypted container header.
pub fn is_already_encrypted<C>(crypto: &C, device: &Path) -> VolsealResult<bool>
where
    C: VolumeCrypto<Error = VolsealError>,
{
    crypto.is_encrypted(device)
}

pub(crate) fn unescape_mount_field(input: &str) -> String {
    let mut chars = input.chars().peekable();
    let mut output = String::with_capacity(input.len());

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            output.push(ch);
            continue;
        }
        let mut digits = String::new();
        while digits.len() < 3 {
            match chars.peek() {
                Some(next) if next.is_digit(8) => {
                    digits.push(*next);
                    chars.next();
                }
                _ => break,
            }
        }
        match u8::from_str_radix(&digits, 8) {
            Ok(value) if digits.len() == 3 => output.push(value as char),
            _ => {
                output.push('\\');
                output.push_str(&digits);
            }
        }
    }

    output
}
