//! Configuration model and helpers used by volseal.
//!
//! A base document (TOML or YAML) supplies defaults; callers layer flat
//! `key=value` overrides on top before the struct is frozen and handed to the
//! provisioning engine by reference.

use crate::error::{VolsealError, VolsealResult};
use directories_next::ProjectDirs;
use log::{info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/volseal.toml";
pub const CONFIG_PATH_ENV: &str = "VOLSEAL_CONFIG";
const BOOTSTRAP_FILE_NAME: &str = "volseal.toml";
const APP_QUALIFIER: &str = "io";
const APP_ORGANIZATION: &str = "Volseal";
const APP_NAME: &str = "volseal";

pub const KNOWN_CRYPTSETUP_PATHS: &[&str] = &[
    "/usr/sbin/cryptsetup",
    "/sbin/cryptsetup",
    "/usr/bin/cryptsetup",
    "/bin/cryptsetup",
    "/usr/local/sbin/cryptsetup",
];

/// Keys accepted by [`VolsealConfig::apply_override`].
pub const OVERRIDE_KEYS: &[&str] = &[
    "cipher_algorithm",
    "keysize",
    "hash_algorithm",
    "iter_time_ms",
    "device",
    "cryptdev",
    "mountpoint",
    "filesystem",
    "paranoid",
    "non_interactive",
    "foreground",
    "passphrase_file",
    "lock_dir",
    "descriptor_path",
    "success_file",
    "mapper_root",
    "mounts_path",
    "log_file",
    "cryptsetup_path",
    "timeout_secs",
];

/// Return the first existing path among `candidates`.
pub fn detect_binary_path(candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .map(Path::new)
        .find(|path| path.exists())
        .map(|path| path.to_string_lossy().into_owned())
}

/// Device-mapper names must stay within a conservative character set.
pub fn looks_like_mapping_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty()
        && trimmed.len() <= 127
        && !trimmed.starts_with('-')
        && trimmed != "."
        && trimmed != ".."
        && trimmed
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'))
}

/// Container header parameters passed to the crypto tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct LuksCfg {
    #[serde(default = "default_cipher")]
    pub cipher_algorithm: String,

    #[serde(default = "default_keysize")]
    pub keysize: u32,

    #[serde(default = "default_hash")]
    pub hash_algorithm: String,

    /// PBKDF iteration time in milliseconds.
    #[serde(default = "default_iter_time_ms")]
    pub iter_time_ms: u32,
}

fn default_cipher() -> String {
    "aes-xts-plain64".to_string()
}

fn default_keysize() -> u32 {
    256
}

fn default_hash() -> String {
    "sha256".to_string()
}

fn default_iter_time_ms() -> u32 {
    2_000
}

impl Default for LuksCfg {
    fn default() -> Self {
        Self {
            cipher_algorithm: default_cipher(),
            keysize: default_keysize(),
            hash_algorithm: default_hash(),
            iter_time_ms: default_iter_time_ms(),
        }
    }
}

/// Target device, mapping, and mount layout.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct VolumeCfg {
    #[serde(default = "default_device")]
    pub device: String,

    /// Mapping name; a random token is generated per run when unset.
    #[serde(default)]
    pub cryptdev: Option<String>,

    #[serde(default = "default_mountpoint")]
    pub mountpoint: String,

    #[serde(default = "default_filesystem")]
    pub filesystem: String,
}

fn default_device() -> String {
    "/dev/vdb".to_string()
}

fn default_mountpoint() -> String {
    "/export".to_string()
}

fn default_filesystem() -> String {
    "ext4".to_string()
}

impl Default for VolumeCfg {
    fn default() -> Self {
        Self {
            device: default_device(),
            cryptdev: None,
            mountpoint: default_mountpoint(),
            filesystem: default_filesystem(),
        }
    }
}

/// Per-run behaviour switches.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RunCfg {
    /// Overwrite the whole mapping before building the filesystem.
    #[serde(default)]
    pub paranoid: bool,

    /// Use `passphrase_file` and batch mode instead of terminal prompts.
    #[serde(default)]
    pub non_interactive: bool,

    /// Log to stderr instead of the operational log file.
    #[serde(default)]
    pub foreground: bool,

    #[serde(default)]
    pub passphrase_file: Option<String>,
}

/// Well-known paths shared with other automation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PathsCfg {
    #[serde(default = "default_lock_dir")]
    pub lock_dir: String,

    #[serde(default = "default_descriptor_path")]
    pub descriptor_path: String,

    #[serde(default = "default_success_file")]
    pub success_file: String,

    #[serde(default = "default_mapper_root")]
    pub mapper_root: String,

    #[serde(default = "default_mounts_path")]
    pub mounts_path: String,

    #[serde(default = "default_log_file")]
    pub log_file: String,
}

fn default_lock_dir() -> String {
    "/var/run/fast_luks".to_string()
}

fn default_descriptor_path() -> String {
    "/etc/luks/luks-cryptdev.ini".to_string()
}

fn default_success_file() -> String {
    "/var/run/fast-luks-encryption".to_string()
}

fn default_mapper_root() -> String {
    "/dev/mapper".to_string()
}

fn default_mounts_path() -> String {
    "/proc/mounts".to_string()
}

fn default_log_file() -> String {
    "/var/log/volseal.log".to_string()
}

impl Default for PathsCfg {
    fn default() -> Self {
        Self {
            lock_dir: default_lock_dir(),
            descriptor_path: default_descriptor_path(),
            success_file: default_success_file(),
            mapper_root: default_mapper_root(),
            mounts_path: default_mounts_path(),
            log_file: default_log_file(),
        }
    }
}

/// External tool resolution and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ToolsCfg {
    #[serde(default)]
    pub cryptsetup_path: Option<String>,

    /// Upper bound for non-interactive tool calls.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ToolsCfg {
    fn default() -> Self {
        Self {
            cryptsetup_path: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Top-level configuration snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct VolsealConfig {
    #[serde(default)]
    pub luks: LuksCfg,

    #[serde(default)]
    pub volume: VolumeCfg,

    #[serde(default)]
    pub run: RunCfg,

    #[serde(default)]
    pub paths: PathsCfg,

    #[serde(default)]
    pub tools: ToolsCfg,

    #[serde(skip)]
    pub path: PathBuf,

    #[serde(skip)]
    pub format: ConfigFormat,
}

/// Tracks whether we parsed TOML or YAML.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigFormat {
    #[default]
    Toml,
    Yaml,
}

/// Render the default configuration document.
pub fn bootstrap_template() -> String {
    let luks = LuksCfg::default();
    let volume = VolumeCfg::default();
    let paths = PathsCfg::default();
    let tools = ToolsCfg::default();
    format!(
        "# volseal base configuration.\n\
         # Flat overrides (volseal provision --set key=value) take precedence.\n\
         \n\
         [luks]\n\
         cipher_algorithm = \"{cipher}\"\n\
         keysize = {keysize}\n\
         hash_algorithm = \"{hash}\"\n\
         iter_time_ms = {iter}\n\
         \n\
         [volume]\n\
         device = \"{device}\"\n\
         # cryptdev = \"securevol\"  # random 8-letter name when unset\n\
         mountpoint = \"{mountpoint}\"\n\
         filesystem = \"{filesystem}\"\n\
         \n\
         [run]\n\
         paranoid = false\n\
         non_interactive = false\n\
         foreground = false\n\
         # passphrase_file = \"/root/.volseal-passphrase\"\n\
         \n\
         [paths]\n\
         lock_dir = \"{lock_dir}\"\n\
         descriptor_path = \"{descriptor}\"\n\
         success_file = \"{success}\"\n\
         mapper_root = \"{mapper}\"\n\
         mounts_path = \"{mounts}\"\n\
         log_file = \"{log_file}\"\n\
         \n\
         [tools]\n\
         # cryptsetup_path = \"/usr/sbin/cryptsetup\"\n\
         timeout_secs = {timeout}\n",
        cipher = luks.cipher_algorithm,
        keysize = luks.keysize,
        hash = luks.hash_algorithm,
        iter = luks.iter_time_ms,
        device = volume.device,
        mountpoint = volume.mountpoint,
        filesystem = volume.filesystem,
        lock_dir = paths.lock_dir,
        descriptor = paths.descriptor_path,
        success = paths.success_file,
        mapper = paths.mapper_root,
        mounts = paths.mounts_path,
        log_file = paths.log_file,
        timeout = tools.timeout_secs,
    )
}

impl VolsealConfig {
    /// Return the canonical system-wide configuration path.
    pub fn default_path() -> &'static Path {
        Path::new(DEFAULT_CONFIG_PATH)
    }

    /// Resolve the per-user configuration path used for bootstrapping.
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().join(BOOTSTRAP_FILE_NAME))
    }

    /// Load configuration from disk, creating a bootstrap copy when missing.
    ///
    /// When the global default cannot be created (unprivileged caller), the
    /// template is written to the per-user configuration directory instead.
    pub fn load_or_bootstrap<P: AsRef<Path>>(path: P) -> VolsealResult<Self> {
        let target = path.as_ref();
        if target.exists() {
            return Self::load(target);
        }

        match ensure_bootstrap_file(target) {
            Ok(created) => {
                if created {
                    info!("volseal config bootstrap created at {}", target.display());
                }
                Self::load(target)
            }
            Err(err) => {
                if target != Self::default_path() {
                    return Err(VolsealError::InvalidConfig(format!(
                        "failed to initialise configuration at {}: {err}",
                        target.display()
                    )));
                }

                let user_path = Self::user_config_path().ok_or_else(|| {
                    VolsealError::InvalidConfig(format!(
                        "unable to determine user configuration directory; create {} manually",
                        DEFAULT_CONFIG_PATH
                    ))
                })?;

                let created_user = ensure_bootstrap_file(&user_path).map_err(|io_err| {
                    VolsealError::InvalidConfig(format!(
                        "failed to prepare bootstrap configuration at {}: {io_err}",
                        user_path.display()
                    ))
                })?;
                if created_user {
                    info!(
                        "volseal config bootstrap created at {}",
                        user_path.display()
                    );
                }

                warn!(
                    "configuration missing at {}; using per-user bootstrap at {}",
                    target.display(),
                    user_path.display()
                );
                Self::load(&user_path)
            }
        }
    }

    /// Read a config file from disk, detecting the format from its extension.
    pub fn load<P: AsRef<Path>>(path: P) -> VolsealResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml")
        );
        let mut cfg = if is_yaml {
            serde_yaml::from_str::<Self>(&contents)?
        } else {
            toml::from_str::<Self>(&contents)?
        };

        cfg.path = path.to_path_buf();
        cfg.format = if is_yaml {
            ConfigFormat::Yaml
        } else {
            ConfigFormat::Toml
        };
        Ok(cfg)
    }

    /// Apply one flat `key=value` override.
    pub fn apply_override(&mut self, key: &str, value: &str) -> VolsealResult<()> {
        let value = value.trim();
        match key.trim() {
            "cipher_algorithm" => self.luks.cipher_algorithm = value.to_string(),
            "keysize" => self.luks.keysize = parse_number(key, value)?,
            "hash_algorithm" => self.luks.hash_algorithm = value.to_string(),
            "iter_time_ms" => self.luks.iter_time_ms = parse_number(key, value)?,
            "device" => self.volume.device = value.to_string(),
            "cryptdev" => {
                self.volume.cryptdev = (!value.is_empty()).then(|| value.to_string());
            }
            "mountpoint" => self.volume.mountpoint = value.to_string(),
            "filesystem" => self.volume.filesystem = value.to_string(),
            "paranoid" => self.run.paranoid = parse_bool(key, value)?,
            "non_interactive" => self.run.non_interactive = parse_bool(key, value)?,
            "foreground" => self.run.foreground = parse_bool(key, value)?,
            "passphrase_file" => {
                self.run.passphrase_file = (!value.is_empty()).then(|| value.to_string());
            }
            "lock_dir" => self.paths.lock_dir = value.to_string(),
            "descriptor_path" => self.paths.descriptor_path = value.to_string(),
            "success_file" => self.paths.success_file = value.to_string(),
            "mapper_root" => self.paths.mapper_root = value.to_string(),
            "mounts_path" => self.paths.mounts_path = value.to_string(),
            "log_file" => self.paths.log_file = value.to_string(),
            "cryptsetup_path" => {
                self.tools.cryptsetup_path = (!value.is_empty()).then(|| value.to_string());
            }
            "timeout_secs" => self.tools.timeout_secs = parse_number(key, value)?,
            other => {
                return Err(VolsealError::InvalidConfig(format!(
                    "unknown configuration key `{other}` (expected one of: {})",
                    OVERRIDE_KEYS.join(", ")
                )))
            }
        }
        Ok(())
    }

    /// Apply `key=value` assignments in order; later assignments win.
    pub fn apply_assignments<I, S>(&mut self, assignments: I) -> VolsealResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for assignment in assignments {
            let assignment = assignment.as_ref();
            let (key, value) = assignment.split_once('=').ok_or_else(|| {
                VolsealError::InvalidConfig(format!(
                    "override `{assignment}` must look like key=value"
                ))
            })?;
            self.apply_override(key, value)?;
        }
        Ok(())
    }

    /// Perform a validation pass and return human-readable issues.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.luks.cipher_algorithm.trim().is_empty() {
            issues.push("luks.cipher_algorithm must not be empty".to_string());
        }
        if self.luks.hash_algorithm.trim().is_empty() {
            issues.push("luks.hash_algorithm must not be empty".to_string());
        }
        if self.luks.keysize == 0 || self.luks.keysize % 8 != 0 {
            issues.push(format!(
                "luks.keysize must be a positive multiple of 8 (got {})",
                self.luks.keysize
            ));
        }
        if self.luks.iter_time_ms == 0 {
            issues.push("luks.iter_time_ms must be greater than 0".to_string());
        }

        if !Path::new(self.volume.device.trim()).is_absolute() {
            issues.push(format!(
                "volume.device must be an absolute path (got `{}`)",
                self.volume.device
            ));
        }
        if !Path::new(self.volume.mountpoint.trim()).is_absolute() {
            issues.push(format!(
                "volume.mountpoint must be an absolute path (got `{}`)",
                self.volume.mountpoint
            ));
        }
        let fs_type = self.volume.filesystem.trim();
        if fs_type.is_empty()
            || !fs_type
                .chars()
                .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit())
        {
            issues.push(format!(
                "volume.filesystem must be a plain filesystem type such as ext4 (got `{}`)",
                self.volume.filesystem
            ));
        }
        if let Some(name) = self.volume.cryptdev.as_deref() {
            if !looks_like_mapping_name(name) {
                issues.push(format!("volume.cryptdev is not a valid mapping name: `{name}`"));
            }
        }

        if self.run.non_interactive
            && self
                .run
                .passphrase_file
                .as_deref()
                .map(|p| p.trim().is_empty())
                .unwrap_or(true)
        {
            issues.push(
                "run.non_interactive is true but run.passphrase_file is missing".to_string(),
            );
        }

        for (label, value) in [
            ("paths.lock_dir", &self.paths.lock_dir),
            ("paths.descriptor_path", &self.paths.descriptor_path),
            ("paths.success_file", &self.paths.success_file),
            ("paths.mapper_root", &self.paths.mapper_root),
        ] {
            if value.trim().is_empty() {
                issues.push(format!("{label} must not be empty"));
            }
        }

        if self.tools.timeout_secs == 0 {
            issues.push("tools.timeout_secs must be greater than 0".to_string());
        }

        issues
    }

    /// Fail with every validation issue joined into one message.
    pub fn ensure_valid(&self) -> VolsealResult<()> {
        let issues = self.validate();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(VolsealError::InvalidConfig(issues.join("; ")))
        }
    }

    pub fn device_path(&self) -> PathBuf {
        PathBuf::from(self.volume.device.trim())
    }

    pub fn mountpoint_path(&self) -> PathBuf {
        PathBuf::from(self.volume.mountpoint.trim())
    }

    pub fn lock_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.lock_dir)
    }

    pub fn descriptor_path(&self) -> PathBuf {
        PathBuf::from(&self.paths.descriptor_path)
    }

    pub fn success_file(&self) -> PathBuf {
        PathBuf::from(&self.paths.success_file)
    }

    pub fn mapper_root(&self) -> PathBuf {
        PathBuf::from(&self.paths.mapper_root)
    }

    pub fn mounts_path(&self) -> PathBuf {
        PathBuf::from(&self.paths.mounts_path)
    }

    pub fn log_file(&self) -> PathBuf {
        PathBuf::from(&self.paths.log_file)
    }

    pub fn passphrase_file(&self) -> Option<PathBuf> {
        self.run
            .passphrase_file
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }

    /// Translate the stored timeout into a `Duration`.
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tools.timeout_secs)
    }

    /// Optional override for the `cryptsetup` binary.
    pub fn cryptsetup_path(&self) -> Option<PathBuf> {
        self.tools
            .cryptsetup_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }
}

fn parse_bool(key: &str, value: &str) -> VolsealResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(VolsealError::InvalidConfig(format!(
            "`{key}` expects a boolean (true/false), got `{value}`"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> VolsealResult<T> {
    value.parse::<T>().map_err(|_| {
        VolsealError::InvalidConfig(format!("`{key}` expects a number, got `{value}`"))
    })
}

fn ensure_bootstrap_file(path: &Path) -> io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    match OpenOptions::new().create_new(true).write(true).open(path) {
        Ok(mut file) => {
            file.write_all(bootstrap_template().as_bytes())?;
            file.flush()?;
            #[cfg(unix)]
            {
                let mode = if path.starts_with("/etc/") {
                    0o640
                } else {
                    0o600
                };
                fs::set_permissions(path, PermissionsExt::from_mode(mode))?;
            }
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn bootstrap_template_parses_to_defaults() {
        let cfg: VolsealConfig = toml::from_str(&bootstrap_template()).unwrap();
        assert_eq!(cfg.luks.cipher_algorithm, "aes-xts-plain64");
        assert_eq!(cfg.luks.keysize, 256);
        assert_eq!(cfg.luks.hash_algorithm, "sha256");
        assert_eq!(cfg.volume.device, "/dev/vdb");
        assert_eq!(cfg.volume.mountpoint, "/export");
        assert_eq!(cfg.volume.filesystem, "ext4");
        assert!(cfg.volume.cryptdev.is_none());
        assert_eq!(cfg.paths.lock_dir, "/var/run/fast_luks");
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn load_detects_yaml_by_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("volseal.yaml");
        fs::write(
            &path,
            "volume:\n  device: /dev/sdc\n  mountpoint: /data\nrun:\n  paranoid: true\n",
        )
        .unwrap();

        let cfg = VolsealConfig::load(&path).unwrap();
        assert_eq!(cfg.format, ConfigFormat::Yaml);
        assert_eq!(cfg.volume.device, "/dev/sdc");
        assert_eq!(cfg.volume.mountpoint, "/data");
        assert_eq!(cfg.volume.filesystem, "ext4");
        assert!(cfg.run.paranoid);
        assert_eq!(cfg.path, path);
    }

    #[test]
    fn load_rejects_misspelled_keys() {
        let dir = tempdir().unwrap();

        let toml_path = dir.path().join("volseal.toml");
        fs::write(&toml_path, "[volume]\ndevcie = \"/dev/sdz\"\n").unwrap();
        let err = VolsealConfig::load(&toml_path).unwrap_err();
        assert!(matches!(err, VolsealError::TomlDe(_)), "{err:?}");
        assert!(err.to_string().contains("devcie"), "{err}");

        let yaml_path = dir.path().join("volseal.yaml");
        fs::write(&yaml_path, "volume:\n  devcie: /dev/sdz\n").unwrap();
        let err = VolsealConfig::load(&yaml_path).unwrap_err();
        assert!(matches!(err, VolsealError::Yaml(_)), "{err:?}");
        assert!(err.to_string().contains("devcie"), "{err}");

        let section_path = dir.path().join("section.toml");
        fs::write(&section_path, "[volumes]\ndevice = \"/dev/sdz\"\n").unwrap();
        assert!(VolsealConfig::load(&section_path).is_err());
    }

    #[test]
    fn load_or_bootstrap_materialises_template() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("volseal.toml");

        let cfg = VolsealConfig::load_or_bootstrap(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.format, ConfigFormat::Toml);
        assert_eq!(cfg.volume.device, "/dev/vdb");
        assert_eq!(
            fs::metadata(&path).unwrap().permissions().mode() & 0o777,
            0o600
        );
    }

    #[test]
    fn overrides_replace_base_values() {
        let mut cfg = VolsealConfig::default();
        cfg.apply_assignments([
            "device=/dev/sdb",
            "keysize=512",
            "paranoid=yes",
            "cryptdev=vault",
            "foreground=true",
        ])
        .unwrap();

        assert_eq!(cfg.device_path(), PathBuf::from("/dev/sdb"));
        assert_eq!(cfg.luks.keysize, 512);
        assert!(cfg.run.paranoid);
        assert!(cfg.run.foreground);
        assert_eq!(cfg.volume.cryptdev.as_deref(), Some("vault"));
    }

    #[test]
    fn overrides_reject_unknown_keys_and_bad_values() {
        let mut cfg = VolsealConfig::default();
        let err = cfg.apply_override("cipher", "aes").unwrap_err();
        assert!(err.to_string().contains("unknown configuration key `cipher`"));

        let err = cfg.apply_override("paranoid", "maybe").unwrap_err();
        assert!(err.to_string().contains("expects a boolean"));

        let err = cfg.apply_assignments(["keysize"]).unwrap_err();
        assert!(err.to_string().contains("key=value"));

        let err = cfg.apply_override("keysize", "big").unwrap_err();
        assert!(err.to_string().contains("expects a number"));
    }

    #[test]
    fn validate_flags_non_interactive_without_passphrase() {
        let mut cfg = VolsealConfig::default();
        cfg.run.non_interactive = true;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|issue| issue.contains("run.passphrase_file is missing")));
        assert!(cfg.ensure_valid().is_err());

        cfg.run.passphrase_file = Some("/root/pass".into());
        assert!(cfg.ensure_valid().is_ok());
    }

    #[test]
    fn validate_rejects_bad_layout() {
        let mut cfg = VolsealConfig::default();
        cfg.volume.device = "vdb".into();
        cfg.volume.filesystem = "ext4; rm".into();
        cfg.volume.cryptdev = Some("../escape".into());
        cfg.luks.keysize = 250;

        let issues = cfg.validate();
        assert_eq!(issues.len(), 4, "unexpected issues: {issues:?}");
    }

    #[test]
    fn mapping_name_validator() {
        assert!(looks_like_mapping_name("abcdefgh"));
        assert!(looks_like_mapping_name("crypt_export-1"));
        assert!(!looks_like_mapping_name(""));
        assert!(!looks_like_mapping_name("-rf"));
        assert!(!looks_like_mapping_name("a/b"));
        assert!(!looks_like_mapping_name(".."));
    }
}
