/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Serial GPS receiver simulator.
//!
//! Opens a pseudo-terminal, prints the follower path on stdout and writes one
//! GGA + RMC pair per interval to it.  Point gpsclock's probe pattern at the
//! printed path (or symlink it to `/dev/ttyUSB9`) to exercise a full scan
//! without hardware.
//!
//! Baud rate is irrelevant on a pty, so every trial the probe makes succeeds
//! as long as the talker prefix matches its sentence pattern.

use std::fs::{self, File};
use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Timelike, Utc};
use clap::Parser;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::openpty;
use nix::sys::termios::{self, SetArg};
use tracing::{debug, info};

// ── CLI argument definition ───────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "nmea-sim", about = "Simulated NMEA 0183 receiver on a pseudo-terminal")]
struct Cli {
    /// Milliseconds between sentence pairs.
    #[arg(short = 'i', long = "interval-ms", default_value_t = 1_000)]
    interval_ms: u64,

    /// Two-letter talker id (GP, GN, GL, ...).
    #[arg(short = 't', long, default_value = "GP")]
    talker: String,

    /// Stop after this many pairs instead of running until Ctrl-C.
    #[arg(short = 'n', long)]
    count: Option<u64>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let pty = openpty(None, None).context("openpty failed")?;

    // Raw follower: no CR/LF translation, no echo back into our stream.
    let mut tio = termios::tcgetattr(&pty.slave).context("tcgetattr on follower")?;
    termios::cfmakeraw(&mut tio);
    termios::tcsetattr(&pty.slave, SetArg::TCSANOW, &tio).context("tcsetattr on follower")?;

    let follower = follower_path(pty.slave.as_raw_fd())?;

    // Nobody may be reading; drop sentences instead of blocking on a full buffer.
    let flags = fcntl(pty.master.as_raw_fd(), FcntlArg::F_GETFL).context("F_GETFL")?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(pty.master.as_raw_fd(), FcntlArg::F_SETFL(flags)).context("F_SETFL")?;
    let mut leader = File::from(pty.master);

    // The follower fd stays open so the line exists between readers.
    let _follower_fd = pty.slave;

    println!("{}", follower.display());
    info!(
        follower = %follower.display(),
        talker = %cli.talker,
        interval_ms = cli.interval_ms,
        "nmea-sim ready"
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(cli.interval_ms));
    let mut sent = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!(sent, "Interrupted");
                break;
            }
        }

        let fix = Fix::at(Utc::now());
        let burst = format!("{}{}", fix.gga(&cli.talker), fix.rmc(&cli.talker));

        match leader.write_all(burst.as_bytes()) {
            Ok(()) => debug!(time = %fix.hhmmss(), "sentences written"),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!("follower buffer full; dropping sentences")
            }
            Err(e) => return Err(e).context("write to pty leader"),
        }

        sent += 1;
        if cli.count.is_some_and(|n| sent >= n) {
            info!(sent, "Done");
            break;
        }
    }
    Ok(())
}

fn follower_path(fd: i32) -> Result<PathBuf> {
    fs::read_link(format!("/proc/self/fd/{fd}")).context("cannot resolve pty follower path")
}

// ── Sentence generation ───────────────────────────────────────────────────────

/// UTC time of a fix.  Position is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fix {
    time: DateTime<Utc>,
}

impl Fix {
    fn at(time: DateTime<Utc>) -> Self {
        Self { time }
    }

    /// `hhmmss.ss`; NMEA carries hundredths of a second.
    fn hhmmss(&self) -> String {
        let hundredths = self.time.nanosecond() % 1_000_000_000 / 10_000_000;
        format!("{}.{hundredths:02}", self.time.format("%H%M%S"))
    }

    fn ddmmyy(&self) -> String {
        self.time.format("%d%m%y").to_string()
    }

    fn gga(&self, talker: &str) -> String {
        sentence(&format!(
            "{talker}GGA,{},4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,",
            self.hhmmss()
        ))
    }

    fn rmc(&self, talker: &str) -> String {
        sentence(&format!(
            "{talker}RMC,{},A,4807.038,N,01131.000,E,0.0,0.0,{},,,A",
            self.hhmmss(),
            self.ddmmyy()
        ))
    }
}

/// `$<body>*<checksum>\r\n`; the checksum is the XOR of the body bytes.
fn sentence(body: &str) -> String {
    let checksum = body.bytes().fold(0u8, |acc, b| acc ^ b);
    format!("${body}*{checksum:02X}\r\n")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn checksum_matches_reference_sentence() {
        // Widely published example sentence.
        assert_eq!(
            sentence("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,"),
            "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n"
        );
    }

    #[test]
    fn fix_fields() {
        let fix = Fix::at(Utc.with_ymd_and_hms(2009, 2, 13, 23, 31, 30).unwrap());
        assert_eq!(fix.hhmmss(), "233130.00");
        assert_eq!(fix.ddmmyy(), "130209");
        assert!(fix.gga("GN").starts_with("$GNGGA,233130.00,"));
        assert!(fix.rmc("GP").contains(",130209,"));
    }

    #[test]
    fn fractional_seconds_are_hundredths() {
        let time = Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 5).unwrap()
            + chrono::Duration::milliseconds(470);
        let fix = Fix::at(time);
        assert_eq!(fix.hhmmss(), "000005.47");
        assert_eq!(fix.ddmmyy(), "290224");
    }
}
