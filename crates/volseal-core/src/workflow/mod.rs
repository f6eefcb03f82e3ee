//! Provisioning state machine and status reporting.
//!
//! A run walks `Start → Unmounted → Initialized → Mapped → (Wiped) →
//! FilesystemReady → Mounted → Recorded`. Failures while initializing or
//! mapping put the original mount back; later failures are surfaced as-is.

pub(crate) mod privilege;
mod status;


use crate::config::{looks_like_mapping_name, VolsealConfig};
use crate::descriptor::{DescriptorStore, VolumeDescriptor};
use crate::error::{VolsealError, VolsealResult};
use crate::inspect::{self, DeviceState};
use crate::lock::ProcessLock;
use log::{debug, error, info, warn};
use rand::Rng;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use volseal_provider::{InitParams, OpenParams, ToolOutput, VolumeCrypto, VolumeHost};

pub use privilege::ensure_privilege_support;
pub use status::status;

/// Length of generated mapping names.
pub const MAPPING_NAME_LEN: usize = 8;
pub(crate) const WIPE_BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Severity levels used when reporting workflow events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowLevel {
    Info,
    Success,
    Warn,
    Error,
    Security,
}

/// Single line of output produced by a workflow step.
#[derive(Debug, Clone)]
pub struct WorkflowEvent {
    pub level: WorkflowLevel,
    pub message: String,
}

/// Aggregated report returned by any workflow entry point.
#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub title: String,
    pub events: Vec<WorkflowEvent>,
    /// Present when a provisioning run reached `Recorded`.
    pub descriptor: Option<VolumeDescriptor>,
}

pub(crate) fn event(level: WorkflowLevel, message: impl Into<String>) -> WorkflowEvent {
    WorkflowEvent {
        level,
        message: message.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    Start,
    Unmounted,
    Initialized,
    Mapped,
    Wiped,
    FilesystemReady,
    Mounted,
    Recorded,
    Aborted,
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProvisioningState::Start => "START",
            ProvisioningState::Unmounted => "UNMOUNTED",
            ProvisioningState::Initialized => "INITIALIZED",
            ProvisioningState::Mapped => "MAPPED",
            ProvisioningState::Wiped => "WIPED",
            ProvisioningState::FilesystemReady => "FILESYSTEM_READY",
            ProvisioningState::Mounted => "MOUNTED",
            ProvisioningState::Recorded => "RECORDED",
            ProvisioningState::Aborted => "ABORTED",
        };
        f.write_str(label)
    }
}

/// Random lowercase token used when no mapping name is configured.
pub fn generate_mapping_name() -> String {
    let mut rng = rand::thread_rng();
    (0..MAPPING_NAME_LEN)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect()
}

/// Acquire the host lock and run a full provisioning pass.
pub fn provision<C, H>(config: &VolsealConfig, crypto: &C, host: &H) -> VolsealResult<WorkflowReport>
where
    C: VolumeCrypto<Error = VolsealError>,
    H: VolumeHost<Error = VolsealError>,
{
    let lock = ProcessLock::acquire(config.lock_dir())?;
    run_locked(config, &lock, crypto, host)
}

/// Run provisioning while the caller holds `lock`.
pub fn run_locked<C, H>(
    config: &VolsealConfig,
    lock: &ProcessLock,
    crypto: &C,
    host: &H,
) -> VolsealResult<WorkflowReport>
where
    C: VolumeCrypto<Error = VolsealError>,
    H: VolumeHost<Error = VolsealError>,
{
    config.ensure_valid()?;
    debug!("provisioning under lock {} (pid {})", lock.path().display(), lock.pid());

    let mut session = Session::new(config, crypto, host);
    match session.drive() {
        Ok(descriptor) => Ok(WorkflowReport {
            title: format!(
                "Provisioned {} at {}",
                descriptor.device.display(),
                descriptor.mountpoint.display()
            ),
            events: session.events,
            descriptor: Some(descriptor),
        }),
        Err(err) => {
            error!("provisioning aborted in state {}: {err}", session.state);
            session.state = ProvisioningState::Aborted;
            Err(err)
        }
    }
}

/// Where the target stood before the run touched it.
#[derive(Debug, Clone)]
enum Origin {
    Raw,
    /// Mounted plain; remount this device on early failure.
    Mounted(PathBuf),
    /// An active mapping already serves the mountpoint.
    ActiveMapping { name: String, mapper: PathBuf },
}

struct Session<'a, C, H> {
    config: &'a VolsealConfig,
    crypto: &'a C,
    host: &'a H,
    state: ProvisioningState,
    mountpoint: PathBuf,
    events: Vec<WorkflowEvent>,
}

impl<'a, C, H> Session<'a, C, H>
where
    C: VolumeCrypto<Error = VolsealError>,
    H: VolumeHost<Error = VolsealError>,
{
    fn new(config: &'a VolsealConfig, crypto: &'a C, host: &'a H) -> Self {
        Self {
            config,
            crypto,
            host,
            state: ProvisioningState::Start,
            mountpoint: config.mountpoint_path(),
            events: Vec::new(),
        }
    }

    fn note(&mut self, level: WorkflowLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            WorkflowLevel::Warn => warn!("{message}"),
            WorkflowLevel::Error => error!("{message}"),
            _ => info!("{message}"),
        }
        self.events.push(event(level, message));
    }

    fn advance(&mut self, next: ProvisioningState) {
        debug!("state {} -> {}", self.state, next);
        self.state = next;
    }

    fn drive(&mut self) -> VolsealResult<VolumeDescriptor> {
        let configured = self.config.device_path();
        let (device, origin) = self.locate(&configured)?;

        if let Origin::ActiveMapping { name, mapper } = &origin {
            self.note(
                WorkflowLevel::Info,
                format!(
                    "{} already served by active mapping {name} on {}",
                    self.mountpoint.display(),
                    device.display()
                ),
            );
            return self.finish(&device, name, mapper);
        }

        if inspect::is_already_encrypted(self.crypto, &device)? {
            self.note(
                WorkflowLevel::Info,
                format!("{} already carries an encrypted header; skipping format", device.display()),
            );
            return self.resume_encrypted(&device);
        }

        self.unmount(&origin)?;
        self.initialize(&device, &origin)?;
        let (name, mapper) = self.map(&device, &origin)?;
        if self.config.run.paranoid {
            self.wipe(&mapper)?;
        }
        self.make_filesystem(&mapper)?;
        self.mount(&mapper)?;
        self.finish(&device, &name, &mapper)
    }

    fn locate(&mut self, configured: &Path) -> VolsealResult<(PathBuf, Origin)> {
        match inspect::classify(self.host, &self.mountpoint, configured)? {
            DeviceState::NotFound => Err(VolsealError::DeviceNotFound {
                device: configured.to_path_buf(),
                mountpoint: self.mountpoint.clone(),
            }),
            DeviceState::RawUnmounted { device } => Ok((device, Origin::Raw)),
            DeviceState::AlreadyMountedPlain { device: mounted } => {
                let mapper_root = self.config.mapper_root();
                if let Some(name) = inspect::mapping_name_under(&mapper_root, &mounted) {
                    if let Some(source) = self.crypto.mapping_source(&name)? {
                        return Ok((
                            source,
                            Origin::ActiveMapping {
                                name,
                                mapper: mounted,
                            },
                        ));
                    }
                }
                if mounted != configured {
                    self.note(
                        WorkflowLevel::Warn,
                        format!(
                            "{} is mounted from {}, not the configured {}; using the mounted device",
                            self.mountpoint.display(),
                            mounted.display(),
                            configured.display()
                        ),
                    );
                }
                Ok((mounted.clone(), Origin::Mounted(mounted)))
            }
        }
    }

    fn unmount(&mut self, origin: &Origin) -> VolsealResult<()> {
        if let Origin::Mounted(device) = origin {
            let out = self.host.unmount(&self.mountpoint)?;
            if out.success() {
                self.note(
                    WorkflowLevel::Info,
                    format!("Unmounted {} from {}", device.display(), self.mountpoint.display()),
                );
            } else {
                self.note(
                    WorkflowLevel::Warn,
                    format!(
                        "umount {} exited with {}: {}",
                        self.mountpoint.display(),
                        out.status,
                        out.diagnostic()
                    ),
                );
            }
        }
        self.advance(ProvisioningState::Unmounted);
        Ok(())
    }

    fn initialize(&mut self, device: &Path, origin: &Origin) -> VolsealResult<()> {
        let params = InitParams {
            cipher_algorithm: self.config.luks.cipher_algorithm.clone(),
            keysize: self.config.luks.keysize,
            hash_algorithm: self.config.luks.hash_algorithm.clone(),
            iter_time_ms: self.config.luks.iter_time_ms,
            key_file: self.config.passphrase_file(),
        };
        self.note(
            WorkflowLevel::Security,
            format!(
                "Formatting {} ({} / {} bits / {})",
                device.display(),
                params.cipher_algorithm,
                params.keysize,
                params.hash_algorithm
            ),
        );
        let out = self.crypto.initialize(device, &params);
        self.check_or_restore("cryptsetup luksFormat", out, origin)?;
        self.advance(ProvisioningState::Initialized);
        Ok(())
    }

    fn map(&mut self, device: &Path, origin: &Origin) -> VolsealResult<(String, PathBuf)> {
        let name = self.mapping_name();
        let mapper = self.config.mapper_root().join(&name);
        if mapper.exists() {
            self.restore(origin);
            return Err(VolsealError::CollisionFailure { name, mapper });
        }

        let out = self.crypto.open_mapping(device, &name, &self.open_params());
        self.check_or_restore("cryptsetup luksOpen", out, origin)?;
        self.note(
            WorkflowLevel::Success,
            format!("Opened {} as {}", device.display(), mapper.display()),
        );
        self.advance(ProvisioningState::Mapped);
        Ok((name, mapper))
    }

    fn wipe(&mut self, mapper: &Path) -> VolsealResult<()> {
        self.note(
            WorkflowLevel::Info,
            format!("Wiping {} with zeros; this can take a long time", mapper.display()),
        );
        let written = wipe_mapping(mapper)
            .map_err(|err| VolsealError::tool("wipe", -1, format!("{}: {err}", mapper.display())))?;
        self.note(
            WorkflowLevel::Success,
            format!("Wiped {written} bytes through {}", mapper.display()),
        );
        self.advance(ProvisioningState::Wiped);
        Ok(())
    }

    fn make_filesystem(&mut self, mapper: &Path) -> VolsealResult<()> {
        let fs_type = self.config.volume.filesystem.clone();
        let out = self.host.make_filesystem(&fs_type, mapper)?;
        if !out.success() {
            // The container stays open on this path.
            return Err(VolsealError::tool(
                format!("mkfs.{fs_type}"),
                out.status,
                out.diagnostic(),
            ));
        }
        self.note(
            WorkflowLevel::Success,
            format!("Created {fs_type} filesystem on {}", mapper.display()),
        );
        self.advance(ProvisioningState::FilesystemReady);
        Ok(())
    }

    fn mount(&mut self, mapper: &Path) -> VolsealResult<()> {
        let out = self.host.mount(mapper, &self.mountpoint)?;
        if out.success() {
            self.note(
                WorkflowLevel::Success,
                format!("Mounted {} at {}", mapper.display(), self.mountpoint.display()),
            );
        } else {
            self.note(
                WorkflowLevel::Warn,
                format!(
                    "mount {} {} exited with {}: {}",
                    mapper.display(),
                    self.mountpoint.display(),
                    out.status,
                    out.diagnostic()
                ),
            );
        }
        self.advance(ProvisioningState::Mounted);
        Ok(())
    }

    /// Device already encrypted: open (or adopt) the mapping and mount it.
    fn resume_encrypted(&mut self, device: &Path) -> VolsealResult<VolumeDescriptor> {
        let name = self.resume_name(device);
        let mapper = self.config.mapper_root().join(&name);

        match self.crypto.mapping_source(&name)? {
            Some(source) if source == device => {
                self.note(
                    WorkflowLevel::Info,
                    format!("Reusing active mapping {name} for {}", device.display()),
                );
            }
            Some(_) => return Err(VolsealError::CollisionFailure { name, mapper }),
            None if mapper.exists() => return Err(VolsealError::CollisionFailure { name, mapper }),
            None => {
                let out = self.crypto.open_mapping(device, &name, &self.open_params())?;
                if !out.success() {
                    return Err(VolsealError::tool(
                        "cryptsetup luksOpen",
                        out.status,
                        out.diagnostic(),
                    ));
                }
                self.note(
                    WorkflowLevel::Success,
                    format!("Opened {} as {}", device.display(), mapper.display()),
                );
            }
        }
        self.advance(ProvisioningState::Mapped);

        let table = self.host.mount_table()?;
        if inspect::device_for_mountpoint(&table, &self.mountpoint).as_deref() == Some(mapper.as_path()) {
            self.note(
                WorkflowLevel::Info,
                format!("{} already mounted at {}", mapper.display(), self.mountpoint.display()),
            );
            self.advance(ProvisioningState::Mounted);
        } else {
            self.mount(&mapper)?;
        }
        self.finish(device, &name, &mapper)
    }

    fn finish(&mut self, device: &Path, name: &str, mapper: &Path) -> VolsealResult<VolumeDescriptor> {
        let uuid = self.crypto.device_uuid(device)?;
        let descriptor = VolumeDescriptor {
            cipher_algorithm: self.config.luks.cipher_algorithm.clone(),
            hash_algorithm: self.config.luks.hash_algorithm.clone(),
            keysize: self.config.luks.keysize,
            device: device.to_path_buf(),
            uuid,
            cryptdev: name.to_string(),
            mapper: mapper.to_path_buf(),
            mountpoint: self.mountpoint.clone(),
            filesystem: self.config.volume.filesystem.clone(),
        };

        let store = DescriptorStore::from_config(self.config);
        store.record(&descriptor)?;
        store.capture_diagnostics(self.crypto, self.host, &descriptor);
        store.mark_complete()?;
        self.note(
            WorkflowLevel::Success,
            format!("Recorded descriptor at {}", store.descriptor_path().display()),
        );
        self.advance(ProvisioningState::Recorded);
        Ok(descriptor)
    }

    fn configured_name(&self) -> Option<&str> {
        self.config
            .volume
            .cryptdev
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    fn mapping_name(&self) -> String {
        self.configured_name()
            .map(str::to_string)
            .unwrap_or_else(generate_mapping_name)
    }

    /// Without a configured name, reuse the one recorded for this device so a
    /// mapping left open by an earlier run is found again.
    fn resume_name(&self, device: &Path) -> String {
        if self.configured_name().is_some() {
            return self.mapping_name();
        }
        match DescriptorStore::from_config(self.config).load() {
            Ok(recorded)
                if recorded.device == device && looks_like_mapping_name(&recorded.cryptdev) =>
            {
                debug!(
                    "reusing recorded mapping name {} for {}",
                    recorded.cryptdev,
                    device.display()
                );
                recorded.cryptdev
            }
            Ok(recorded) => {
                debug!(
                    "recorded descriptor names {}, not {}; generating a mapping name",
                    recorded.device.display(),
                    device.display()
                );
                generate_mapping_name()
            }
            Err(err) => {
                debug!("no usable descriptor for {}: {err}", device.display());
                generate_mapping_name()
            }
        }
    }

    fn open_params(&self) -> OpenParams {
        OpenParams {
            key_file: self.config.passphrase_file(),
        }
    }

    /// Turn a tool result into an error, putting the original mount back first.
    fn check_or_restore(
        &mut self,
        tool: &str,
        result: VolsealResult<ToolOutput>,
        origin: &Origin,
    ) -> VolsealResult<()> {
        let failure = match result {
            Ok(out) if out.success() => return Ok(()),
            Ok(out) => VolsealError::tool(tool, out.status, out.diagnostic()),
            Err(err) => err,
        };
        self.restore(origin);
        Err(failure)
    }

    /// Best effort; failures are logged and never mask the original error.
    fn restore(&mut self, origin: &Origin) {
        let Origin::Mounted(device) = origin else {
            return;
        };
        match self.host.mount(device, &self.mountpoint) {
            Ok(out) if out.success() => self.note(
                WorkflowLevel::Info,
                format!("Remounted {} at {}", device.display(), self.mountpoint.display()),
            ),
            Ok(out) => self.note(
                WorkflowLevel::Error,
                format!(
                    "Could not remount {} at {} (exit {}): {}",
                    device.display(),
                    self.mountpoint.display(),
                    out.status,
                    out.diagnostic()
                ),
            ),
            Err(err) => self.note(
                WorkflowLevel::Error,
                format!("Could not remount {}: {err}", device.display()),
            ),
        }
    }
}

/// Overwrite the whole mapping with zeros; returns bytes written.
pub(crate) fn wipe_mapping(path: &Path) -> io::Result<u64> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    let total = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;

    let zeros = vec![0u8; WIPE_BLOCK_SIZE];
    let mut written = 0u64;
    while written < total {
        let chunk = (total - written).min(WIPE_BLOCK_SIZE as u64) as usize;
        file.write_all(&zeros[..chunk])?;
        written += chunk as u64;
    }
    file.sync_all()?;
    Ok(written)
}
