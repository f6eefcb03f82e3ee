//! Durable record of a provisioned volume plus the completion marker.
//!
//! The descriptor is a single `[luks]` section of `key = value` lines that
//! other automation reads to find the mapping. Writes replace the whole file
//! through a temp file in the same directory, so readers never see a partial
//! record.

use crate::config::VolsealConfig;
use crate::error::{VolsealError, VolsealResult};
use log::{info, warn};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use volseal_provider::{VolumeCrypto, VolumeHost};

/// Literal content of the completion marker.
pub const COMPLETION_MARKER_TEXT: &str = "LUKS encryption completed.\n";

const SECTION: &str = "luks";
const KEYS: [&str; 9] = [
    "cipher_algorithm",
    "hash_algorithm",
    "keysize",
    "device",
    "uuid",
    "cryptdev",
    "mapper",
    "mountpoint",
    "filesystem",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeDescriptor {
    pub cipher_algorithm: String,
    pub hash_algorithm: String,
    pub keysize: u32,
    pub device: PathBuf,
    pub uuid: String,
    pub cryptdev: String,
    pub mapper: PathBuf,
    pub mountpoint: PathBuf,
    pub filesystem: String,
}

impl VolumeDescriptor {
    pub fn render(&self) -> String {
        let mut out = format!("[{SECTION}]\n");
        for (key, value) in KEYS.iter().zip(self.values()) {
            out.push_str(&format!("{key} = {value}\n"));
        }
        out
    }

    fn values(&self) -> [String; 9] {
        [
            self.cipher_algorithm.clone(),
            self.hash_algorithm.clone(),
            self.keysize.to_string(),
            self.device.display().to_string(),
            self.uuid.clone(),
            self.cryptdev.clone(),
            self.mapper.display().to_string(),
            self.mountpoint.display().to_string(),
            self.filesystem.clone(),
        ]
    }

    /// Parse a descriptor document. `origin` only labels errors.
    pub fn parse(text: &str, origin: &Path) -> VolsealResult<Self> {
        let invalid = |reason: String| VolsealError::InvalidDescriptor {
            path: origin.to_path_buf(),
            reason,
        };

        let mut section: Option<String> = None;
        let mut seen_luks = false;
        let mut fields: BTreeMap<String, String> = BTreeMap::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim().to_string();
                if name == SECTION {
                    if seen_luks {
                        return Err(invalid(format!("line {}: duplicate [{SECTION}] section", idx + 1)));
                    }
                    seen_luks = true;
                }
                section = Some(name);
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| invalid(format!("line {}: expected key = value", idx + 1)))?;
            if section.as_deref() != Some(SECTION) {
                return Err(invalid(format!(
                    "line {}: `{}` outside the [{SECTION}] section",
                    idx + 1,
                    key.trim()
                )));
            }
            let key = key.trim();
            if !KEYS.contains(&key) {
                return Err(invalid(format!("line {}: unknown key `{key}`", idx + 1)));
            }
            if fields.insert(key.to_string(), value.trim().to_string()).is_some() {
                return Err(invalid(format!("line {}: duplicate key `{key}`", idx + 1)));
            }
        }

        if !seen_luks {
            return Err(invalid(format!("missing [{SECTION}] section")));
        }
        let missing: Vec<&str> = KEYS
            .iter()
            .copied()
            .filter(|key| fields.get(*key).map(|v| v.is_empty()).unwrap_or(true))
            .collect();
        if !missing.is_empty() {
            return Err(invalid(format!("missing keys: {}", missing.join(", "))));
        }

        let mut take = |key: &str| fields.remove(key).unwrap_or_default();
        let keysize_raw = take("keysize");
        let keysize = keysize_raw
            .parse::<u32>()
            .map_err(|_| invalid(format!("keysize `{keysize_raw}` is not a number")))?;

        Ok(Self {
            cipher_algorithm: take("cipher_algorithm"),
            hash_algorithm: take("hash_algorithm"),
            keysize,
            device: PathBuf::from(take("device")),
            uuid: take("uuid"),
            cryptdev: take("cryptdev"),
            mapper: PathBuf::from(take("mapper")),
            mountpoint: PathBuf::from(take("mountpoint")),
            filesystem: take("filesystem"),
        })
    }
}

/// Read and validate a descriptor file.
pub fn load<P: AsRef<Path>>(path: P) -> VolsealResult<VolumeDescriptor> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    VolumeDescriptor::parse(&text, path)
}

#[derive(Debug, Clone)]
pub struct DescriptorStore {
    descriptor_path: PathBuf,
    success_file: PathBuf,
}

impl DescriptorStore {
    pub fn new(descriptor_path: impl Into<PathBuf>, success_file: impl Into<PathBuf>) -> Self {
        Self {
            descriptor_path: descriptor_path.into(),
            success_file: success_file.into(),
        }
    }

    pub fn from_config(config: &VolsealConfig) -> Self {
        Self::new(config.descriptor_path(), config.success_file())
    }

    pub fn descriptor_path(&self) -> &Path {
        &self.descriptor_path
    }

    pub fn success_file(&self) -> &Path {
        &self.success_file
    }

    /// Replace the descriptor file with `descriptor`.
    pub fn record(&self, descriptor: &VolumeDescriptor) -> VolsealResult<()> {
        write_atomic(&self.descriptor_path, descriptor.render().as_bytes())?;
        info!("descriptor written to {}", self.descriptor_path.display());
        Ok(())
    }

    pub fn load(&self) -> VolsealResult<VolumeDescriptor> {
        load(&self.descriptor_path)
    }

    /// Write the completion marker. Only called once everything else succeeded.
    pub fn mark_complete(&self) -> VolsealResult<()> {
        write_atomic(&self.success_file, COMPLETION_MARKER_TEXT.as_bytes())?;
        info!("completion marker written to {}", self.success_file.display());
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        fs::read_to_string(&self.success_file)
            .map(|text| text == COMPLETION_MARKER_TEXT)
            .unwrap_or(false)
    }

    /// Send mapping and header details to the operational log. Never fails.
    pub fn capture_diagnostics<C, H>(&self, crypto: &C, host: &H, descriptor: &VolumeDescriptor)
    where
        C: VolumeCrypto,
        H: VolumeHost,
    {
        match host.mapping_info(&descriptor.mapper) {
            Ok(info) => info!("mapping info for {}:\n{}", descriptor.mapper.display(), info.trim_end()),
            Err(err) => warn!("mapping info for {} unavailable: {err}", descriptor.mapper.display()),
        }
        match crypto.header_dump(&descriptor.device) {
            Ok(dump) => info!("header dump for {}:\n{}", descriptor.device.display(), dump.trim_end()),
            Err(err) => warn!("header dump for {} unavailable: {err}", descriptor.device.display()),
        }
    }
}

fn write_atomic(dest: &Path, contents: &[u8]) -> VolsealResult<()> {
    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.as_file_mut().write_all(contents)?;
    temp.as_file_mut().flush()?;
    temp.as_file().sync_all()?;
    temp.persist(dest).map_err(|err| VolsealError::Io(err.error))?;
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> VolumeDescriptor {
        VolumeDescriptor {
            cipher_algorithm: "aes-xts-plain64".into(),
            hash_algorithm: "sha256".into(),
            keysize: 256,
            device: PathBuf::from("/dev/vdb"),
            uuid: "3f1c9a2e-0000-4000-8000-1234567890ab".into(),
            cryptdev: "qwertyui".into(),
            mapper: PathBuf::from("/dev/mapper/qwertyui"),
            mountpoint: PathBuf::from("/export"),
            filesystem: "ext4".into(),
        }
    }

    #[test]
    fn render_uses_fixed_key_order() {
        let text = sample().render();
        let keys: Vec<&str> = text
            .lines()
            .skip(1)
            .map(|line| line.split(" = ").next().unwrap())
            .collect();
        assert!(text.starts_with("[luks]\n"));
        assert_eq!(keys, KEYS.to_vec());
        assert!(text.contains("mapper = /dev/mapper/qwertyui\n"));
    }

    #[test]
    fn record_creates_parents_and_rewrites_fully() {
        let dir = tempdir().unwrap();
        let store = DescriptorStore::new(
            dir.path().join("etc/luks/luks-cryptdev.ini"),
            dir.path().join("run/fast-luks-encryption"),
        );

        fs::create_dir_all(dir.path().join("etc/luks")).unwrap();
        fs::write(store.descriptor_path(), "[luks]\nstale = yes\nmore = lines\n").unwrap();

        store.record(&sample()).unwrap();
        assert_eq!(
            fs::read_to_string(store.descriptor_path()).unwrap(),
            sample().render()
        );
        assert_eq!(store.load().unwrap(), sample());

        let leftovers = fs::read_dir(dir.path().join("etc/luks")).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn marker_contains_literal_text() {
        let dir = tempdir().unwrap();
        let store = DescriptorStore::new(dir.path().join("d.ini"), dir.path().join("marker"));
        assert!(!store.is_complete());
        store.mark_complete().unwrap();
        assert_eq!(
            fs::read_to_string(store.success_file()).unwrap(),
            "LUKS encryption completed.\n"
        );
        assert!(store.is_complete());
    }

    #[test]
    fn parse_accepts_comments_and_spacing() {
        let text = "# written by volseal\n[luks]\ncipher_algorithm=aes-xts-plain64\nhash_algorithm = sha256\nkeysize = 512\ndevice = /dev/vdb\nuuid = u\ncryptdev = c\nmapper = /dev/mapper/c\nmountpoint = /export\nfilesystem = xfs\n";
        let parsed = VolumeDescriptor::parse(text, Path::new("x.ini")).unwrap();
        assert_eq!(parsed.keysize, 512);
        assert_eq!(parsed.filesystem, "xfs");
    }

    #[test]
    fn parse_rejects_schema_violations() {
        let origin = Path::new("bad.ini");
        let full = sample().render();

        let no_section = full.replace("[luks]\n", "");
        let err = VolumeDescriptor::parse(&no_section, origin).unwrap_err();
        assert!(err.to_string().contains("outside the [luks] section"));

        let missing = full.replace("uuid = 3f1c9a2e-0000-4000-8000-1234567890ab\n", "");
        let err = VolumeDescriptor::parse(&missing, origin).unwrap_err();
        assert!(err.to_string().contains("missing keys: uuid"));

        let unknown = format!("{full}owner = root\n");
        let err = VolumeDescriptor::parse(&unknown, origin).unwrap_err();
        assert!(err.to_string().contains("unknown key `owner`"));

        let bad_size = full.replace("keysize = 256", "keysize = large");
        let err = VolumeDescriptor::parse(&bad_size, origin).unwrap_err();
        assert!(err.to_string().contains("not a number"));

        let err = VolumeDescriptor::parse("", origin).unwrap_err();
        assert!(err.to_string().contains("missing [luks] section"));
    }
}
