//! Child process helpers for tool-backed credential sources.
//!
//! The developer-tool and CLI sources obtain tokens by running a locally
//! installed executable and parsing its JSON output.

use crate::{Result, VaultauthError};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Executes a program and returns stdout as a string.
///
/// The child is killed if the returned future is dropped, so an attempt
/// abandoned by the resolver's timeout does not leave a process behind.
///
/// # Arguments
///
/// - `program`: Executable path or name (e.g., "az")
/// - `args`: Command arguments
///
/// # Errors
///
/// - [`VaultauthError::ToolNotInstalled`]: the executable does not exist
/// - [`VaultauthError::CommandFailed`]: non-zero exit code or non-UTF-8 output
pub async fn run_command(program: &Path, args: &[&str]) -> Result<String> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let output = cmd.output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            VaultauthError::ToolNotInstalled(format!("{} not found", program.display()))
        } else {
            VaultauthError::Io(e)
        }
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VaultauthError::CommandFailed(format!(
            "{} failed with exit code {}: {}",
            program.display(),
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }

    String::from_utf8(output.stdout).map_err(|e| {
        VaultauthError::CommandFailed(format!("invalid UTF-8 in command output: {}", e))
    })
}

/// Locates an executable: the override path if it is a file, otherwise
/// `name` on `PATH`.
///
/// An override that does not exist is not silently replaced by a `PATH`
/// lookup.
///
/// # Example
///
/// ```no_run
/// use vaultauth::process::locate_executable;
///
/// match locate_executable(None, "az") {
///     Some(path) => println!("az found at {}", path.display()),
///     None => println!("az is not installed"),
/// }
/// ```
pub fn locate_executable(override_path: Option<&Path>, name: &str) -> Option<PathBuf> {
    match override_path {
        Some(path) if path.is_file() => Some(path.to_path_buf()),
        Some(_) => None,
        None => which::which(name).ok(),
    }
}

#[cfg(all(test, unix))]
pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_run_command_success() {
        let output = run_command(Path::new("echo"), &["hello"]).await.unwrap();
        assert_eq!(output.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_command_not_found() {
        let result = run_command(Path::new("/nonexistent/command-12345"), &[]).await;
        assert!(matches!(result, Err(VaultauthError::ToolNotInstalled(_))));
    }

    #[tokio::test]
    async fn test_run_command_failure_reports_stderr() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "fail.sh", "echo 'Please run az login' >&2\nexit 1");

        let err = run_command(&script, &[]).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exit code 1"));
        assert!(msg.contains("Please run az login"));
    }

    #[test]
    fn test_locate_executable() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "az", "exit 0");

        assert_eq!(locate_executable(Some(&script), "az"), Some(script.clone()));
        assert_eq!(locate_executable(Some(&dir.path().join("missing")), "sh"), None);
        assert!(locate_executable(None, "sh").is_some());
        assert!(locate_executable(None, "nonexistent-command-12345").is_none());
    }
}
