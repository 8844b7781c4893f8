/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! gpsd integration: the "already managed" check and `/etc/default/gpsd`.
//!
//! Before touching any serial line, ask gpsd whether it already owns a
//! receiver.  If it does, probing would fight gpsd for the port, so the scan
//! is skipped unless the operator forces it.  A failed, slow or empty answer
//! simply means "nothing managed": that is the normal state on a fresh host.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info};

use crate::chrony::GENERATED_HEADER;
use crate::device::DevicePathPattern;
use crate::probe::ProbeResult;

/// Reports read from gpsd before giving up: VERSION, DEVICES, WATCH and a
/// couple of spares.
const GPSPIPE_REPORTS: &str = "5";

/// Slack on top of the query limit before the check abandons the query.
pub const QUERY_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("gpsd query could not run: {0}")]
    Unavailable(String),

    #[error("gpsd query exited with {0}")]
    Failed(String),

    #[error("gpsd query timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },
}

/// Free-form status text from the GPS daemon.
#[async_trait]
pub trait DaemonQuery: Send + Sync {
    async fn query(&self) -> Result<String, QueryError>;
}

/// `gpspipe -w -n 5`: gpsd's JSON watch stream, which opens with a
/// `DEVICES` report listing every managed path.
///
/// A silent receiver can leave gpspipe waiting for its last reports.  When
/// the window closes the child is killed and whatever it printed so far is
/// the answer.
#[derive(Debug, Clone)]
pub struct GpspipeQuery {
    program: String,
    args: Vec<String>,
    window: Duration,
}

impl GpspipeQuery {
    pub fn new(window: Duration) -> Self {
        Self::command("gpspipe", &["-w", "-n", GPSPIPE_REPORTS], window)
    }

    fn command(program: &str, args: &[&str], window: Duration) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            window,
        }
    }
}

#[async_trait]
impl DaemonQuery for GpspipeQuery {
    async fn query(&self) -> Result<String, QueryError> {
        let deadline = Instant::now() + self.window;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| QueryError::Unavailable(format!("{}: {e}", self.program)))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| QueryError::Unavailable("stdout not captured".into()))?;

        let mut seen = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match timeout_at(deadline, stdout.read(&mut chunk)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => seen.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(QueryError::Unavailable(e.to_string())),
                Err(_) => return Ok(partial(&seen, self.window)),
            }
        }

        let status = match timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(QueryError::Unavailable(e.to_string())),
            Err(_) => return Ok(partial(&seen, self.window)),
        };
        if !status.success() {
            return Err(QueryError::Failed(status.to_string()));
        }
        Ok(String::from_utf8_lossy(&seen).into_owned())
    }
}

fn partial(seen: &[u8], window: Duration) -> String {
    debug!(
        bytes = seen.len(),
        window_ms = window.as_millis() as u64,
        "gpsd query window closed; using partial output"
    );
    String::from_utf8_lossy(seen).into_owned()
}

/// The device gpsd already manages, if any.
///
/// Never fails: query errors, timeouts and output without a recognisable
/// device path all yield `None`.  A query gets `limit` plus
/// [`QUERY_GRACE`], so one that honours `limit` itself can still hand back
/// partial output.
pub async fn already_managed(
    query: &dyn DaemonQuery,
    pattern: &DevicePathPattern,
    limit: Duration,
) -> Option<PathBuf> {
    let bound = limit + QUERY_GRACE;
    let text = match timeout(bound, query.query()).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            debug!(error = %e, "gpsd query failed; assuming no managed device");
            return None;
        }
        Err(_) => {
            debug!(
                timeout_ms = bound.as_millis() as u64,
                "gpsd query timed out; assuming no managed device"
            );
            return None;
        }
    };

    let device = pattern.first_match(&text);
    match &device {
        Some(path) => info!(device = %path.display(), "gpsd already manages a receiver"),
        None => debug!("gpsd reports no managed receiver"),
    }
    device
}

/// Content of `/etc/default/gpsd` for the probed receiver.
///
/// `-n` starts polling without a client so chrony's SHM segment fills from
/// boot; `-s` pins the baud rate the probe confirmed.
pub fn render_gpsd_defaults(probe: &ProbeResult) -> String {
    format!(
        "{GENERATED_HEADER}\n\
         START_DAEMON=\"true\"\n\
         USBAUTO=\"false\"\n\
         DEVICES=\"{}\"\n\
         GPSD_OPTIONS=\"-n -s {}\"\n",
        probe.device.display(),
        probe.baud_rate
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    enum Reply {
        Text(&'static str),
        Error,
        Hang,
    }

    struct FakeQuery {
        reply: Reply,
        calls: AtomicUsize,
    }

    impl FakeQuery {
        fn new(reply: Reply) -> Self {
            Self {
                reply,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DaemonQuery for FakeQuery {
        async fn query(&self) -> Result<String, QueryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Reply::Text(t) => Ok(t.to_string()),
                Reply::Error => Err(QueryError::Unavailable("connection refused".into())),
                Reply::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    fn pattern() -> DevicePathPattern {
        DevicePathPattern::from_globs(&["/dev/ttyACM*", "/dev/ttyUSB*", "/dev/serial*"]).unwrap()
    }

    const LIMIT: Duration = Duration::from_millis(100);

    // ── already_managed ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn extracts_device_from_watch_stream() {
        let q = FakeQuery::new(Reply::Text(concat!(
            r#"{"class":"VERSION","release":"3.22"}"#,
            "\n",
            r#"{"class":"DEVICES","devices":[{"class":"DEVICE","path":"/dev/ttyACM0","driver":"u-blox"}]}"#,
            "\n",
            r#"{"class":"WATCH","enable":true,"json":true}"#,
            "\n"
        )));
        assert_eq!(
            already_managed(&q, &pattern(), LIMIT).await,
            Some(PathBuf::from("/dev/ttyACM0"))
        );
        assert_eq!(q.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn first_of_several_devices_wins() {
        let q = FakeQuery::new(Reply::Text(
            r#"{"devices":[{"path":"/dev/serial0"},{"path":"/dev/ttyUSB3"}]}"#,
        ));
        assert_eq!(
            already_managed(&q, &pattern(), LIMIT).await,
            Some(PathBuf::from("/dev/serial0"))
        );
    }

    #[tokio::test]
    async fn empty_device_list_is_none() {
        let q = FakeQuery::new(Reply::Text(r#"{"class":"DEVICES","devices":[]}"#));
        assert_eq!(already_managed(&q, &pattern(), LIMIT).await, None);
    }

    #[tokio::test]
    async fn unrelated_device_paths_are_ignored() {
        let q = FakeQuery::new(Reply::Text(r#"{"devices":[{"path":"/dev/pts/4"}]}"#));
        assert_eq!(already_managed(&q, &pattern(), LIMIT).await, None);
    }

    #[tokio::test]
    async fn query_error_is_none() {
        let q = FakeQuery::new(Reply::Error);
        assert_eq!(already_managed(&q, &pattern(), LIMIT).await, None);
    }

    #[tokio::test]
    async fn hung_query_is_bounded() {
        let q = FakeQuery::new(Reply::Hang);
        let started = Instant::now();
        assert_eq!(already_managed(&q, &pattern(), LIMIT).await, None);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    // ── GpspipeQuery ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn gpspipe_absent_or_gpsd_down_is_none() {
        // On a build host gpspipe is usually missing and gpsd never runs.
        let q = GpspipeQuery::new(Duration::from_millis(500));
        let found = already_managed(&q, &pattern(), Duration::from_secs(1)).await;
        assert!(found.is_none() || found.unwrap().starts_with("/dev"));
    }

    #[tokio::test]
    async fn stalled_gpspipe_still_reports_the_device() {
        // VERSION and DEVICES arrive, then the receiver goes quiet.
        let script = concat!(
            r#"printf '%s\n' '{"class":"VERSION","release":"3.22"}' "#,
            r#"'{"class":"DEVICES","devices":[{"path":"/dev/ttyACM0"}]}'; "#,
            "exec sleep 30"
        );
        let window = Duration::from_millis(300);
        let q = GpspipeQuery::command("sh", &["-c", script], window);

        let started = Instant::now();
        let found = already_managed(&q, &pattern(), window).await;

        assert_eq!(found, Some(PathBuf::from("/dev/ttyACM0")));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn failing_gpspipe_is_none() {
        let q = GpspipeQuery::command("sh", &["-c", "exit 2"], Duration::from_secs(1));
        assert!(matches!(q.query().await, Err(QueryError::Failed(_))));
        assert_eq!(already_managed(&q, &pattern(), Duration::from_secs(1)).await, None);
    }

    // ── render_gpsd_defaults ──────────────────────────────────────────────────

    #[test]
    fn renders_defaults_file() {
        let text = render_gpsd_defaults(&ProbeResult::confirmed("/dev/ttyUSB0", 4_800));
        assert_eq!(
            text,
            "# Generated by gpsclock. Manual edits will be overwritten.\n\
             START_DAEMON=\"true\"\n\
             USBAUTO=\"false\"\n\
             DEVICES=\"/dev/ttyUSB0\"\n\
             GPSD_OPTIONS=\"-n -s 4800\"\n"
        );
    }
}
