/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! [`SerialLine`] backed by a real tty.
//!
//! Devices are always opened `O_NONBLOCK | O_NOCTTY`: opening never waits for
//! carrier, and reads go through tokio's [`AsyncFd`] so dropping the read
//! future (the probe's outer timeout) closes the descriptor instead of leaving
//! a thread blocked in `read(2)`.
//!
//! `configure` runs its syscalls on tokio's blocking pool, so the probe's
//! configure timeout still fires if a driver stalls in `open` or `tcsetattr`.
//!
//! termios settings outlive the descriptor, so the baud rate of the last
//! trial stays on the line.  For the accepted device that is the point.

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use nix::fcntl::OFlag;
use nix::sys::termios::{self, BaudRate, ControlFlags, SetArg};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::task;
use tokio::time::{timeout_at, Instant};

use super::{ProbeError, SerialLine};

/// Bytes requested per `read(2)`; NMEA sentences are at most 82 bytes.
const READ_CHUNK: usize = 256;

#[derive(Debug, Default, Clone, Copy)]
pub struct TtyLine;

#[async_trait]
impl SerialLine for TtyLine {
    async fn configure(&self, device: &Path, baud: u32) -> Result<(), ProbeError> {
        let speed = baud_rate(baud)?;
        let path = device.to_path_buf();
        task::spawn_blocking(move || set_raw(&path, baud, speed))
            .await
            .map_err(|e| ProbeError::Open {
                device: device.to_path_buf(),
                source: io::Error::other(e),
            })?
    }

    async fn read_lines(
        &self,
        device: &Path,
        max_lines: usize,
        window: Duration,
    ) -> Result<Vec<String>, ProbeError> {
        let read_err = |source| ProbeError::Read {
            device: device.to_path_buf(),
            source,
        };
        let file = open_nonblocking(device).map_err(|source| ProbeError::Open {
            device: device.to_path_buf(),
            source,
        })?;
        collect_lines(file, max_lines, window).await.map_err(read_err)
    }
}

/// termios constant for `baud`.
pub fn baud_rate(baud: u32) -> Result<BaudRate, ProbeError> {
    let rate = match baud {
        4_800 => BaudRate::B4800,
        9_600 => BaudRate::B9600,
        19_200 => BaudRate::B19200,
        38_400 => BaudRate::B38400,
        57_600 => BaudRate::B57600,
        115_200 => BaudRate::B115200,
        230_400 => BaudRate::B230400,
        other => return Err(ProbeError::UnsupportedBaud(other)),
    };
    Ok(rate)
}

/// Raw mode at `speed`, applied immediately.
fn set_raw(device: &Path, baud: u32, speed: BaudRate) -> Result<(), ProbeError> {
    let file = open_nonblocking(device).map_err(|source| ProbeError::Open {
        device: device.to_path_buf(),
        source,
    })?;
    let configure_err = |source| ProbeError::Configure {
        device: device.to_path_buf(),
        baud,
        source,
    };

    let mut tio = termios::tcgetattr(&file).map_err(configure_err)?;
    termios::cfmakeraw(&mut tio);
    termios::cfsetspeed(&mut tio, speed).map_err(configure_err)?;
    // Ignore modem control lines; most receivers never raise DCD.
    tio.control_flags |= ControlFlags::CLOCAL | ControlFlags::CREAD;
    termios::tcsetattr(&file, SetArg::TCSANOW, &tio).map_err(configure_err)
}

fn open_nonblocking(device: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags((OFlag::O_NONBLOCK | OFlag::O_NOCTTY).bits())
        .open(device)
}

/// Reads from a non-blocking `file` until `max_lines` complete lines arrived,
/// the writer closed, or `window` elapsed, whichever comes first.
///
/// `file` must already be in non-blocking mode and must support readiness
/// polling (ttys, pipes, FIFOs; not regular files).
pub async fn collect_lines(file: File, max_lines: usize, window: Duration) -> io::Result<Vec<String>> {
    let deadline = Instant::now() + window;
    // SAFETY: `file` is owned by the AsyncFd and closed only when it drops.
    let fd = unsafe { AsyncFd::register_with_interest(file, Interest::READABLE) }?;
    let mut lines = LineBuffer::new(max_lines);
    let mut chunk = [0u8; READ_CHUNK];

    while !lines.is_full() {
        let mut guard = match timeout_at(deadline, fd.readable()).await {
            Ok(ready) => ready?,
            Err(_) => break,
        };
        match guard.try_io(|inner| inner.get_ref().read(&mut chunk)) {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => lines.push(&chunk[..n]),
            Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
            Ok(Err(e)) => return Err(e),
            Err(_would_block) => continue,
        }
    }

    Ok(lines.finish())
}

// ── LineBuffer ────────────────────────────────────────────────────────────────

/// Splits a byte stream into at most `max` lines.
///
/// `\r\n` and `\n` both terminate a line.  Invalid UTF-8 is replaced rather
/// than rejected: the classifier only cares about an ASCII prefix.
#[derive(Debug)]
struct LineBuffer {
    max: usize,
    lines: Vec<String>,
    pending: Vec<u8>,
}

impl LineBuffer {
    fn new(max: usize) -> Self {
        Self {
            max,
            lines: Vec::with_capacity(max),
            pending: Vec::new(),
        }
    }

    fn is_full(&self) -> bool {
        self.lines.len() >= self.max
    }

    fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.is_full() {
                return;
            }
            if b == b'\n' {
                let raw = std::mem::take(&mut self.pending);
                self.lines.push(decode(&raw));
            } else {
                self.pending.push(b);
            }
        }
    }

    /// Complete lines, plus the unterminated tail if there is room for it.
    fn finish(mut self) -> Vec<String> {
        if !self.pending.is_empty() && !self.is_full() {
            self.lines.push(decode(&self.pending));
        }
        self.lines
    }
}

fn decode(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Instant as StdInstant;

    use std::os::fd::{AsRawFd, OwnedFd};
    use std::path::PathBuf;

    use nix::pty::openpty;
    use nix::sys::stat::Mode;
    use nix::sys::termios::LocalFlags;
    use nix::unistd::mkfifo;
    use tempfile::TempDir;

    use crate::config::ProbeSettings;
    use crate::device::SysDevices;
    use crate::probe::{ProbeResult, SerialProbe};

    const GGA: &[u8] = b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";

    /// A FIFO opened read-write never reports EOF, so with no data it blocks
    /// forever: the stand-in for a dead serial device.
    fn silent_fifo(dir: &TempDir) -> (std::path::PathBuf, File) {
        let path = dir.path().join("gps");
        mkfifo(path.as_path(), Mode::S_IRUSR | Mode::S_IWUSR).unwrap();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(&path)
            .unwrap();
        (path, file)
    }

    /// A pseudo-terminal standing in for a USB receiver: the leader end is
    /// the receiver's output, the follower end is the `/dev/pts/N` node.
    /// Both descriptors must stay alive for the node to keep working.
    struct FakeReceiver {
        leader: File,
        follower: OwnedFd,
        path: PathBuf,
    }

    impl FakeReceiver {
        fn open() -> Self {
            let pty = openpty(None, None).unwrap();
            let path =
                std::fs::read_link(format!("/proc/self/fd/{}", pty.slave.as_raw_fd())).unwrap();
            Self {
                leader: File::from(pty.master),
                follower: pty.slave,
                path,
            }
        }

        /// Raw mode on the follower so nothing written is echoed or rewritten.
        fn make_raw(&self) {
            let mut tio = termios::tcgetattr(&self.follower).unwrap();
            termios::cfmakeraw(&mut tio);
            termios::tcsetattr(&self.follower, SetArg::TCSANOW, &tio).unwrap();
        }

        fn emit(&mut self, sentence: &[u8], times: usize) {
            for _ in 0..times {
                self.leader.write_all(sentence).unwrap();
            }
            self.leader.flush().unwrap();
        }
    }

    // ── LineBuffer ────────────────────────────────────────────────────────────

    #[test]
    fn splits_crlf_and_lf() {
        let mut b = LineBuffer::new(5);
        b.push(b"$GPGGA,1\r\n$GPRMC,2\n");
        assert_eq!(b.finish(), vec!["$GPGGA,1", "$GPRMC,2"]);
    }

    #[test]
    fn lines_may_span_chunks() {
        let mut b = LineBuffer::new(5);
        b.push(b"$GPG");
        b.push(b"GA,1\r");
        b.push(b"\n");
        assert_eq!(b.finish(), vec!["$GPGGA,1"]);
    }

    #[test]
    fn stops_at_max_lines() {
        let mut b = LineBuffer::new(2);
        b.push(b"a\nb\nc\nd\n");
        assert!(b.is_full());
        assert_eq!(b.finish(), vec!["a", "b"]);
    }

    #[test]
    fn unterminated_tail_counts_when_room() {
        let mut b = LineBuffer::new(3);
        b.push(b"a\n$GPGGA,partial");
        assert_eq!(b.finish(), vec!["a", "$GPGGA,partial"]);
    }

    #[test]
    fn binary_noise_is_decoded_lossily() {
        let mut b = LineBuffer::new(1);
        b.push(&[0xff, 0xfe, b'\n']);
        assert_eq!(b.finish(), vec!["\u{fffd}\u{fffd}"]);
    }

    // ── baud_rate ─────────────────────────────────────────────────────────────

    #[test]
    fn every_supported_rate_maps_to_termios() {
        for &rate in super::super::SUPPORTED_BAUD_RATES {
            assert!(baud_rate(rate).is_ok(), "{rate}");
        }
        assert!(matches!(baud_rate(12_345), Err(ProbeError::UnsupportedBaud(12_345))));
    }

    // ── TtyLine / collect_lines ───────────────────────────────────────────────

    #[tokio::test]
    async fn silent_device_returns_within_window() {
        let dir = TempDir::new().unwrap();
        let (_path, file) = silent_fifo(&dir);

        let started = StdInstant::now();
        let lines = collect_lines(file, 5, Duration::from_millis(100)).await.unwrap();

        assert!(lines.is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn returns_as_soon_as_enough_lines_arrive() {
        let dir = TempDir::new().unwrap();
        let (path, file) = silent_fifo(&dir);
        let mut writer = OpenOptions::new().write(true).open(&path).unwrap();
        writer.write_all(b"$GPGGA,1\r\n$GPRMC,2\r\n").unwrap();

        let started = StdInstant::now();
        let lines = collect_lines(file, 2, Duration::from_secs(5)).await.unwrap();

        assert_eq!(lines, vec!["$GPGGA,1", "$GPRMC,2"]);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn partial_output_is_kept_when_window_closes() {
        let dir = TempDir::new().unwrap();
        let (path, file) = silent_fifo(&dir);
        let mut writer = OpenOptions::new().write(true).open(&path).unwrap();
        writer.write_all(b"$GNGGA,1\r\n$GNR").unwrap();

        let lines = collect_lines(file, 5, Duration::from_millis(100)).await.unwrap();

        assert_eq!(lines, vec!["$GNGGA,1", "$GNR"]);
    }

    #[tokio::test]
    async fn configure_puts_a_real_tty_into_raw_mode() {
        let receiver = FakeReceiver::open();

        TtyLine.configure(&receiver.path, 9_600).await.unwrap();

        let tio = termios::tcgetattr(&receiver.follower).unwrap();
        assert_eq!(termios::cfgetispeed(&tio), BaudRate::B9600);
        assert!(!tio.local_flags.contains(LocalFlags::ICANON));
        assert!(!tio.local_flags.contains(LocalFlags::ECHO));
        assert!(tio.control_flags.contains(ControlFlags::CLOCAL | ControlFlags::CREAD));
    }

    #[tokio::test]
    async fn configured_tty_yields_receiver_lines() {
        let mut receiver = FakeReceiver::open();
        TtyLine.configure(&receiver.path, 9_600).await.unwrap();

        let path = receiver.path.clone();
        let writer = std::thread::spawn(move || {
            receiver.emit(GGA, 5);
            receiver
        });
        let lines = TtyLine
            .read_lines(&path, 5, Duration::from_secs(2))
            .await
            .unwrap();
        let _receiver = writer.join().unwrap();

        assert_eq!(lines.len(), 5);
        assert!(lines
            .iter()
            .all(|l| l == "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47"));
    }

    #[tokio::test]
    async fn full_scan_finds_receiver_on_a_pty() {
        let mut receiver = FakeReceiver::open();
        receiver.make_raw();
        receiver.emit(GGA, 5);

        let settings = ProbeSettings {
            patterns: vec![receiver.path.display().to_string()],
            baud_rates: vec![9_600],
            ..ProbeSettings::default()
        };
        let found = SerialProbe::new(&SysDevices, &TtyLine, &settings).probe().await;

        assert_eq!(found, Some(ProbeResult::confirmed(receiver.path.clone(), 9_600)));
    }

    #[tokio::test]
    async fn configure_rejects_non_tty() {
        let err = TtyLine
            .configure(Path::new("/dev/null"), 9_600)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Configure { baud: 9_600, .. }));
    }

    #[tokio::test]
    async fn configure_reports_missing_device() {
        let err = TtyLine
            .configure(Path::new("/nonexistent/ttyUSB9"), 9_600)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Open { .. }));
    }

    #[tokio::test]
    async fn unsupported_rate_fails_before_open() {
        let err = TtyLine
            .configure(Path::new("/nonexistent/ttyUSB9"), 1_000)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::UnsupportedBaud(1_000)));
    }
}
