//! Execution wrapper for invoking `cryptsetup`.
//!
//! Captured calls run under a timeout with reader threads draining both
//! pipes. Passphrase prompts (`luksFormat`/`luksOpen` without a key file) run
//! with the terminal attached and are never timed out.

use log::warn;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use volseal_core::error::{VolsealError, VolsealResult};
use volseal_provider::{InitParams, ToolOutput};

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

/// `cryptsetup status` exit code for an inactive mapping.
const STATUS_INACTIVE: i32 = 4;

#[derive(Debug, Clone)]
pub(crate) struct CryptsetupCommand {
    binary: PathBuf,
    timeout: Duration,
}

impl CryptsetupCommand {
    pub(crate) fn new(binary: PathBuf, timeout: Duration) -> Self {
        Self { binary, timeout }
    }

    pub(crate) fn binary(&self) -> &Path {
        &self.binary
    }

    pub(crate) fn is_luks(&self, device: &Path) -> VolsealResult<bool> {
        let device_arg = device.to_string_lossy();
        let out = self.run(&["isLuks", device_arg.as_ref()])?;
        if out.success() {
            return Ok(true);
        }
        let lower = out.diagnostic().to_ascii_lowercase();
        if out.status == 1 || lower.contains("not a valid luks device") {
            return Ok(false);
        }
        Err(VolsealError::tool(
            "cryptsetup isLuks",
            out.status,
            classify_failure(device, &out.diagnostic()),
        ))
    }

    pub(crate) fn format(&self, device: &Path, params: &InitParams) -> VolsealResult<ToolOutput> {
        let args = format_args(device, params);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = match params.key_file {
            Some(_) => self.run_with_timeout(&arg_refs, self.format_timeout(params))?,
            None => self.run_attached(&arg_refs)?,
        };
        warn_on_failure("luksFormat", device, &out);
        Ok(out)
    }

    pub(crate) fn open(
        &self,
        device: &Path,
        name: &str,
        key_file: Option<&Path>,
    ) -> VolsealResult<ToolOutput> {
        let mut args = vec![
            "luksOpen".to_string(),
            device.to_string_lossy().into_owned(),
            name.to_string(),
        ];
        let out = match key_file {
            Some(key) => {
                args.push("--key-file".into());
                args.push(key.to_string_lossy().into_owned());
                let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
                self.run(&arg_refs)?
            }
            None => {
                let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
                self.run_attached(&arg_refs)?
            }
        };
        warn_on_failure("luksOpen", device, &out);
        Ok(out)
    }

    pub(crate) fn uuid(&self, device: &Path) -> VolsealResult<String> {
        let device_arg = device.to_string_lossy();
        let out = self.run(&["luksUUID", device_arg.as_ref()])?;
        let uuid = out.stdout.trim();
        if !out.success() || uuid.is_empty() {
            return Err(VolsealError::tool(
                "cryptsetup luksUUID",
                out.status,
                classify_failure(device, &out.diagnostic()),
            ));
        }
        Ok(uuid.to_string())
    }

    pub(crate) fn dump(&self, device: &Path) -> VolsealResult<String> {
        let device_arg = device.to_string_lossy();
        let out = self.run(&["luksDump", device_arg.as_ref()])?;
        if out.success() {
            Ok(out.stdout)
        } else {
            Err(VolsealError::tool(
                "cryptsetup luksDump",
                out.status,
                out.diagnostic(),
            ))
        }
    }

    /// Backing device of mapping `name`, or `None` when it is not active.
    pub(crate) fn mapping_source(&self, name: &str) -> VolsealResult<Option<PathBuf>> {
        let out = self.run(&["status", name])?;
        if out.success() {
            return Ok(parse_status_device(&out.stdout));
        }
        if out.status == STATUS_INACTIVE || reports_inactive(&out.diagnostic()) {
            return Ok(None);
        }
        Err(VolsealError::tool(
            "cryptsetup status",
            out.status,
            out.diagnostic(),
        ))
    }

    fn format_timeout(&self, params: &InitParams) -> Duration {
        self.timeout + Duration::from_millis(u64::from(params.iter_time_ms) * 2)
    }

    fn run(&self, args: &[&str]) -> VolsealResult<ToolOutput> {
        self.run_with_timeout(args, self.timeout)
    }

    fn run_with_timeout(&self, args: &[&str], timeout: Duration) -> VolsealResult<ToolOutput> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| spawn_error(&self.binary, err))?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        self.wait_with_timeout(child, stdout_pipe, stderr_pipe, timeout, args)
    }

    fn run_attached(&self, args: &[&str]) -> VolsealResult<ToolOutput> {
        let status = Command::new(&self.binary)
            .args(args)
            .status()
            .map_err(|err| spawn_error(&self.binary, err))?;
        Ok(ToolOutput::from_status(exit_code(status)))
    }

    fn wait_with_timeout(
        &self,
        mut child: Child,
        stdout_pipe: Option<ChildStdout>,
        stderr_pipe: Option<ChildStderr>,
        timeout: Duration,
        args: &[&str],
    ) -> VolsealResult<ToolOutput> {
        let start = Instant::now();
        let stdout_handle = spawn_output_reader(stdout_pipe);
        let stderr_handle = spawn_output_reader(stderr_pipe);
        let mut exit_status = None;

        while start.elapsed() <= timeout {
            if let Some(status) = child.try_wait()? {
                exit_status = Some(status);
                break;
            }
            thread::sleep(Duration::from_millis(25));
        }

        let Some(status) = exit_status else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(VolsealError::Provider(format!(
                "{} {} timed out after {:?}",
                self.binary.display(),
                args.first().copied().unwrap_or_default(),
                timeout
            )));
        };

        let stdout = stdout_handle
            .join()
            .map_err(|_| VolsealError::Provider("stdout reader thread panicked".into()))??;
        let stderr = stderr_handle
            .join()
            .map_err(|_| VolsealError::Provider("stderr reader thread panicked".into()))??;

        Ok(ToolOutput {
            status: exit_code(status),
            stdout,
            stderr,
        })
    }
}

fn format_args(device: &Path, params: &InitParams) -> Vec<String> {
    let mut args = vec![
        "-v".to_string(),
        "--cipher".to_string(),
        params.cipher_algorithm.clone(),
        "--key-size".to_string(),
        params.keysize.to_string(),
        "--hash".to_string(),
        params.hash_algorithm.clone(),
        "--iter-time".to_string(),
        params.iter_time_ms.to_string(),
        "--use-urandom".to_string(),
        "--verify-passphrase".to_string(),
    ];
    if let Some(key) = &params.key_file {
        args.push("--batch-mode".to_string());
        args.push("--key-file".to_string());
        args.push(key.to_string_lossy().into_owned());
    }
    args.push("luksFormat".to_string());
    args.push(device.to_string_lossy().into_owned());
    args
}

fn spawn_error(binary: &Path, err: std::io::Error) -> VolsealError {
    VolsealError::Provider(format!("failed to run {}: {err}", binary.display()))
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        if let Some(signal) = status.signal() {
            return volseal_core::error::EXIT_SIGNAL_BASE + signal;
        }
    }
    -1
}

fn spawn_output_reader<R>(pipe: Option<R>) -> thread::JoinHandle<VolsealResult<String>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || -> VolsealResult<String> {
        if let Some(mut reader) = pipe {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf)?;
            Ok(String::from_utf8_lossy(&buf).to_string())
        } else {
            Ok(String::new())
        }
    })
}

fn warn_on_failure(action: &str, device: &Path, out: &ToolOutput) {
    if !out.success() {
        warn!(
            "cryptsetup {action} exited with {}: {}",
            out.status,
            classify_failure(device, &out.diagnostic())
        );
    }
}

/// Attach an operator hint to common `cryptsetup` failures.
pub(crate) fn classify_failure(device: &Path, diagnostic: &str) -> String {
    let trimmed = diagnostic.trim();
    let lower = trimmed.to_ascii_lowercase();
    let diagnostic = if trimmed.is_empty() {
        "no additional output".to_string()
    } else {
        trimmed.to_string()
    };

    if lower.contains("no key available")
        || lower.contains("passphrases do not match")
        || lower.contains("passphrase is incorrect")
        || lower.contains("invalid passphrase")
    {
        return format!("{diagnostic} (passphrase rejected for {})", device.display());
    }

    if lower.contains("permission denied")
        || lower.contains("operation not permitted")
        || lower.contains("not permitted")
    {
        return format!("{diagnostic} (run volseal as root)");
    }

    if lower.contains("in use") || lower.contains("busy") {
        return format!(
            "{diagnostic} ({} is still in use; check mounts and holders)",
            device.display()
        );
    }

    if lower.contains("no such file")
        || lower.contains("does not exist")
        || lower.contains("cannot open device")
    {
        return format!("{diagnostic} ({} is not accessible)", device.display());
    }

    diagnostic
}

fn reports_inactive(diagnostic: &str) -> bool {
    let lower = diagnostic.to_ascii_lowercase();
    lower.contains("is inactive")
        || lower.contains("not active")
        || lower.contains("does not exist")
        || lower.contains("doesn't exist")
}

/// Pull the `device:` line out of `cryptsetup status` output.
pub(crate) fn parse_status_device(stdout: &str) -> Option<PathBuf> {
    stdout.lines().find_map(|line| {
        let value = line.trim().strip_prefix("device:")?.trim();
        (!value.is_empty()).then(|| PathBuf::from(value))
    })
}
