//! volseal command-line interface: provision encrypted volumes and inspect
//! what a previous run recorded.

use anyhow::{bail, ensure, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use schemars::schema_for;
use serde_json::to_string_pretty;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use volseal_core::{
    config::{bootstrap_template, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH},
    error::EXIT_GENERAL,
    logging,
    workflow::{self, WorkflowLevel, WorkflowReport},
    ProcessLock, SystemHost, VolsealConfig, VolsealError,
};
use volseal_luks::SystemCrypto;

#[derive(Parser, Debug)]
#[command(
    name = "volseal",
    version,
    about = "Encrypt a block device with LUKS, mount it, and record the result."
)]
struct Cli {
    /// Base configuration file (default: $VOLSEAL_CONFIG or /etc/volseal.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt, map, format, mount, and record the configured volume.
    Provision(ProvisionArgs),

    /// Show lock ownership, the recorded descriptor, and the completion marker.
    Status,

    /// Check a configuration file for problems.
    Validate {
        /// File to validate instead of the active configuration.
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Print the JSON schema of the configuration format and exit.
        #[arg(long)]
        schema: bool,
    },

    /// Print (or write) the default configuration template.
    Bootstrap {
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Replace an existing file at --output.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug, Default)]
struct ProvisionArgs {
    /// Block device to encrypt (e.g. /dev/vdb).
    #[arg(long)]
    device: Option<String>,

    /// Mapping name; a random 8-letter name is used when omitted.
    #[arg(long)]
    cryptdev: Option<String>,

    #[arg(long)]
    mountpoint: Option<String>,

    /// Filesystem type passed to mkfs (e.g. ext4, xfs).
    #[arg(long)]
    filesystem: Option<String>,

    #[arg(long)]
    cipher: Option<String>,

    /// Key size in bits.
    #[arg(long)]
    keysize: Option<u32>,

    #[arg(long)]
    hash: Option<String>,

    /// PBKDF iteration time in milliseconds.
    #[arg(long)]
    iter_time: Option<u32>,

    /// Overwrite the whole mapping with zeros before creating the filesystem.
    #[arg(long)]
    paranoid: bool,

    /// Read the passphrase from --passphrase-file instead of prompting.
    #[arg(long)]
    non_interactive: bool,

    /// Log to stderr instead of the log file.
    #[arg(long)]
    foreground: bool,

    #[arg(long)]
    passphrase_file: Option<PathBuf>,

    /// Extra `key=value` overrides applied before the flags above.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,
}

impl ProvisionArgs {
    /// Flatten `--set` and the dedicated flags into ordered assignments.
    fn assignments(&self) -> Vec<String> {
        let mut out = self.set.clone();
        let mut push = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                out.push(format!("{key}={value}"));
            }
        };
        push("device", self.device.clone());
        push("cryptdev", self.cryptdev.clone());
        push("mountpoint", self.mountpoint.clone());
        push("filesystem", self.filesystem.clone());
        push("cipher_algorithm", self.cipher.clone());
        push("keysize", self.keysize.map(|v| v.to_string()));
        push("hash_algorithm", self.hash.clone());
        push("iter_time_ms", self.iter_time.map(|v| v.to_string()));
        push(
            "passphrase_file",
            self.passphrase_file
                .as_ref()
                .map(|p| p.display().to_string()),
        );
        push("paranoid", self.paranoid.then(|| "true".to_string()));
        push(
            "non_interactive",
            self.non_interactive.then(|| "true".to_string()),
        );
        push("foreground", self.foreground.then(|| "true".to_string()));
        out
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(exit_code_for(&err));
    }
}

/// Exit status for `err`, looking through any context layers.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<VolsealError>())
        .map(VolsealError::exit_code)
        .unwrap_or(EXIT_GENERAL)
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config);

    match cli.command {
        Commands::Provision(args) => provision(&config_path, &args),
        Commands::Status => {
            logging::init("warn");
            let config = load_cli_config(&config_path)?;
            print_report(workflow::status(&config));
            Ok(())
        }
        Commands::Validate { file, schema } => {
            logging::init("warn");
            if schema {
                let schema = schema_for!(VolsealConfig);
                println!("{}", to_string_pretty(&schema)?);
                return Ok(());
            }
            let path = file.unwrap_or(config_path);
            let config = VolsealConfig::load(&path)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            let issues = config.validate();
            if issues.is_empty() {
                println!("{} is valid", path.display());
                return Ok(());
            }
            for issue in &issues {
                println!("  [ERR] {issue}");
            }
            bail!("{} has {} issue(s)", path.display(), issues.len());
        }
        Commands::Bootstrap { output, force } => {
            let template = bootstrap_template();
            match output {
                None => print!("{template}"),
                Some(path) => {
                    ensure!(
                        force || !path.exists(),
                        "{} already exists (use --force to replace it)",
                        path.display()
                    );
                    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                        fs::create_dir_all(parent)
                            .with_context(|| format!("create {}", parent.display()))?;
                    }
                    fs::write(&path, template)
                        .with_context(|| format!("write {}", path.display()))?;
                    println!("Wrote default configuration to {}", path.display());
                }
            }
            Ok(())
        }
    }
}

fn provision(config_path: &Path, args: &ProvisionArgs) -> Result<()> {
    let mut config = load_cli_config(config_path)?;
    config.apply_assignments(args.assignments())?;
    config.ensure_valid()?;

    logging::init_for_run("info", config.run.foreground, &config.log_file())
        .with_context(|| format!("open log file {}", config.log_file().display()))?;

    let lock = ProcessLock::acquire(config.lock_dir())?;
    lock.watch_signals()?;
    workflow::ensure_privilege_support()?;

    let crypto = SystemCrypto::from_config(&config)?;
    let host = SystemHost::from_config(&config);
    info!(
        "provisioning {} at {}",
        config.device_path().display(),
        config.mountpoint_path().display()
    );
    let report = workflow::run_locked(&config, &lock, &crypto, &host)?;
    drop(lock);

    print_report(report);
    Ok(())
}

fn resolve_config_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn load_cli_config(path: &Path) -> Result<VolsealConfig> {
    let config = VolsealConfig::load_or_bootstrap(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;

    if config.path != path {
        println!(
            "Using bootstrap configuration at {} (set VOLSEAL_CONFIG to replace).",
            config.path.display()
        );
    }

    Ok(config)
}

fn print_report(report: WorkflowReport) {
    println!("{}", report.title);
    for event in report.events {
        println!("  [{}] {}", level_tag(event.level), event.message);
    }
}

/// Short tag used when printing workflow severity levels.
fn level_tag(level: WorkflowLevel) -> &'static str {
    match level {
        WorkflowLevel::Info => "INFO",
        WorkflowLevel::Success => "OK",
        WorkflowLevel::Warn => "WARN",
        WorkflowLevel::Error => "ERR",
        WorkflowLevel::Security => "SEC",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_set_assignments() {
        let cli = Cli::parse_from([
            "volseal",
            "provision",
            "--set",
            "device=/dev/sdz",
            "--set",
            "filesystem=xfs",
            "--device",
            "/dev/vdc",
            "--keysize",
            "512",
            "--paranoid",
        ]);
        let Commands::Provision(args) = cli.command else {
            panic!("expected provision");
        };

        let mut config = VolsealConfig::default();
        config.apply_assignments(args.assignments()).unwrap();
        assert_eq!(config.volume.device, "/dev/vdc");
        assert_eq!(config.volume.filesystem, "xfs");
        assert_eq!(config.luks.keysize, 512);
        assert!(config.run.paranoid);
        assert!(!config.run.non_interactive);
    }

    #[test]
    fn unset_flags_produce_no_assignments() {
        assert!(ProvisionArgs::default().assignments().is_empty());
    }

    #[test]
    fn lock_failures_exit_with_two() {
        let err = anyhow::Error::new(VolsealError::LockFail {
            lock_dir: PathBuf::from("/var/run/fast_luks"),
            reason: "held by live process 7".into(),
        })
        .context("provisioning failed");
        assert_eq!(exit_code_for(&err), 2);

        let other = anyhow::anyhow!("plain failure");
        assert_eq!(exit_code_for(&other), 1);
    }

    #[test]
    fn held_lock_is_reported_before_tool_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let lock_dir = dir.path().join("run/fast_luks");
        let config_path = dir.path().join("volseal.toml");
        fs::write(
            &config_path,
            format!(
                "[run]\nforeground = true\n\n[paths]\nlock_dir = \"{}\"\n\n[tools]\ncryptsetup_path = \"{}\"\n",
                lock_dir.display(),
                dir.path().join("missing-cryptsetup").display()
            ),
        )
        .unwrap();
        let _held = ProcessLock::acquire(&lock_dir).unwrap();

        let err = provision(&config_path, &ProvisionArgs::default()).unwrap_err();
        assert_eq!(exit_code_for(&err), 2, "{err:#}");
    }

    struct EnvGuard {
        key: &'static str,
        prev: Option<std::ffi::OsString>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prev = env::var_os(key);
            env::set_var(key, value);
            Self { key, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match self.prev.take() {
                Some(value) => env::set_var(self.key, value),
                None => env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn config_path_resolution_order() {
        let _guard = EnvGuard::set(CONFIG_PATH_ENV, "/srv/volseal/site.yaml");
        assert_eq!(
            resolve_config_path(None),
            PathBuf::from("/srv/volseal/site.yaml")
        );
        assert_eq!(
            resolve_config_path(Some(PathBuf::from("/tmp/custom.toml"))),
            PathBuf::from("/tmp/custom.toml")
        );
    }
}
