use crate::error::{VolsealError, VolsealResult, EXIT_SIGNAL_BASE};
use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use volseal_provider::ToolOutput;

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

/// First candidate that exists on disk.
pub(crate) fn resolve_binary<S: AsRef<Path>>(candidates: &[S]) -> Option<&Path> {
    candidates
        .iter()
        .map(|candidate| candidate.as_ref())
        .find(|path| path.exists())
}

/// Run the first available binary in `candidates`, capturing both streams.
pub(crate) fn run_external<S, A>(candidates: &[S], args: &[A]) -> VolsealResult<ToolOutput>
where
    S: AsRef<Path>,
    A: AsRef<OsStr>,
{
    let binary = resolve_binary(candidates).ok_or_else(|| missing_binary(candidates))?;
    let raw = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|err| VolsealError::Provider(format!("{}: {err}", binary.display())))?;
    Ok(ToolOutput {
        status: status_code(raw.status),
        stdout: String::from_utf8_lossy(&raw.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&raw.stderr).into_owned(),
    })
}

/// Run the first available binary with the caller's terminal attached.
pub(crate) fn run_external_attached<S, A>(
    candidates: &[S],
    args: &[A],
) -> VolsealResult<ToolOutput>
where
    S: AsRef<Path>,
    A: AsRef<OsStr>,
{
    let binary = resolve_binary(candidates).ok_or_else(|| missing_binary(candidates))?;
    let status = Command::new(binary)
        .args(args)
        .status()
        .map_err(|err| VolsealError::Provider(format!("{}: {err}", binary.display())))?;
    Ok(ToolOutput::from_status(status_code(status)))
}

/// Exit code, or `128 + signo` when the child died from a signal.
pub(crate) fn status_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        if let Some(signal) = status.signal() {
            return EXIT_SIGNAL_BASE + signal;
        }
    }
    -1
}

/// Provisioning writes headers and device-mapper tables; both need root.
pub fn ensure_privilege_support() -> VolsealResult<()> {
    if running_as_root() {
        Ok(())
    } else {
        Err(VolsealError::Privilege(
            "volseal provision must run as root (cryptsetup, mount, and mkfs need it); re-run with sudo"
                .into(),
        ))
    }
}

#[cfg(unix)]
fn running_as_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    true
}

fn missing_binary<S: AsRef<Path>>(candidates: &[S]) -> VolsealError {
    let names: Vec<String> = candidates
        .iter()
        .map(|c| c.as_ref().display().to_string())
        .collect();
    VolsealError::Provider(format!(
        "none of [{}] are available on this system",
        names.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_skips_missing_candidates() {
        let found = resolve_binary(&["/definitely/missing/tool", "/bin/sh"]);
        assert_eq!(found, Some(Path::new("/bin/sh")));
        assert!(resolve_binary(&["/definitely/missing/tool"]).is_none());
    }

    #[test]
    fn run_external_captures_streams_and_status() {
        let out = run_external(&["/bin/sh"], &["-c", "echo out; echo err >&2; exit 3"]).unwrap();
        assert_eq!(out.status, 3);
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[test]
    fn signal_death_maps_to_shell_convention() {
        let out = run_external(&["/bin/sh"], &["-c", "kill -TERM $$"]).unwrap();
        assert_eq!(out.status, EXIT_SIGNAL_BASE + 15);
    }

    #[test]
    fn missing_binary_is_a_provider_error() {
        let err = run_external(&["/definitely/missing/tool"], &["x"]).unwrap_err();
        assert!(matches!(err, VolsealError::Provider(_)));
        assert!(err.to_string().contains("/definitely/missing/tool"));
    }
}
