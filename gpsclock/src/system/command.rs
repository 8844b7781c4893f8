/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Bounded external commands.
//!
//! Every command gpsclock runs goes through [`run_bounded`]: the child is
//! spawned with `kill_on_drop`, so when the timeout fires and the future is
//! dropped the child is killed and reaped by the runtime rather than left
//! running behind the scan.

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::error::ProvisionError;

/// Runs `program args…` and waits at most `limit` for it to exit.
///
/// A non-zero exit status is *not* an error here; callers decide what a
/// failed status means.  Spawn failures and timeouts are.
pub async fn run_bounded(
    program: &str,
    args: &[&str],
    envs: &[(&str, &str)],
    limit: Duration,
) -> Result<Output, ProvisionError> {
    let rendered = render(program, args);
    debug!(command = %rendered, timeout_ms = limit.as_millis() as u64, "running");

    let child = Command::new(program)
        .args(args)
        .envs(envs.iter().copied())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ProvisionError::MissingCommand {
                command: program.to_string(),
            },
            _ => ProvisionError::CommandFailed {
                command: rendered.clone(),
                detail: format!("cannot spawn: {e}"),
            },
        })?;

    match timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(ProvisionError::CommandFailed {
            command: rendered,
            detail: e.to_string(),
        }),
        Err(_) => Err(ProvisionError::CommandTimedOut {
            command: rendered,
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}

/// Like [`run_bounded`] but a non-zero exit status becomes
/// [`ProvisionError::CommandFailed`] carrying the trimmed stderr.
pub async fn run_checked(
    program: &str,
    args: &[&str],
    envs: &[(&str, &str)],
    limit: Duration,
) -> Result<Output, ProvisionError> {
    let output = run_bounded(program, args, envs, limit).await?;
    if output.status.success() {
        return Ok(output);
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(ProvisionError::CommandFailed {
        command: render(program, args),
        detail: if stderr.is_empty() {
            format!("exit code {}", output.status.code().unwrap_or(-1))
        } else {
            stderr
        },
    })
}

/// Fails with [`ProvisionError::MissingCommand`] for the first of `commands`
/// not found on `PATH`.
pub fn require_commands(commands: &[&str]) -> Result<(), ProvisionError> {
    let path = env::var_os("PATH").unwrap_or_default();
    let dirs: Vec<PathBuf> = env::split_paths(&path).collect();
    for command in commands {
        if find_in(&dirs, command).is_none() {
            return Err(ProvisionError::MissingCommand {
                command: command.to_string(),
            });
        }
    }
    Ok(())
}

fn find_in(dirs: &[PathBuf], command: &str) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(command))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn render(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
