/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Serial probe: find the first device that talks NMEA.
//!
//! [`SerialProbe`] walks a single flattened sequence of `(device, baud)`
//! trials:
//!
//! ```text
//! pattern[0] ──expand──► dev_a ──► baud[0], baud[1], … baud[n]
//!                        dev_b ──► baud[0], …
//! pattern[1] ──expand──► …
//! ```
//!
//! and returns on the first trial whose read window contains a line accepted
//! by the [`SentenceMatcher`].  Nothing after that trial is touched, not even
//! the glob expansion of later patterns.
//!
//! # Trial
//! 1. [`SerialLine::configure`] – raw mode at the trial's baud rate, bounded
//!    by `configure_timeout`.  Failure skips to the next rate.
//! 2. [`SerialLine::read_lines`] – up to `max_lines` lines within
//!    `read_timeout`.  The probe adds its own outer bound of
//!    `read_timeout + READ_GRACE` so an implementation that ignores the window
//!    still cannot stall the scan.
//!
//! Worst case per scan: `devices × baud_rates × (configure + read + grace)`.
//!
//! # Classification
//! A syntactic prefix match only: `$`, a talker id, a sentence type.  No
//! checksum, no field validation.  A false positive is cheap because gpsd
//! re-validates the stream; a false negative leaves the host without time.

pub mod error;
pub mod tty;

pub use error::{ProbeError, TrialStage};
pub use tty::TtyLine;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::ProbeSettings;
use crate::device::DeviceTree;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Baud rates the serial layer can program.
pub const SUPPORTED_BAUD_RATES: &[u32] = &[4_800, 9_600, 19_200, 38_400, 57_600, 115_200, 230_400];

/// GPS, GLONASS, Galileo, BeiDou (two spellings), QZSS and multi-constellation
/// talkers, followed by the position / velocity / status / time sentences.
pub const DEFAULT_SENTENCE_PATTERN: &str =
    r"^\$(GP|GL|GA|GB|BD|GQ|GN)(GGA|GLL|GNS|RMC|VTG|GSA|GSV|ZDA)";

/// Slack on top of `read_timeout` before the probe abandons a read itself.
pub const READ_GRACE: Duration = Duration::from_millis(250);

// ── Data types ────────────────────────────────────────────────────────────────

/// A device confirmed to emit NMEA at `baud_rate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub device: PathBuf,
    pub baud_rate: u32,
    pub confirmed: bool,
}

impl ProbeResult {
    pub fn confirmed(device: impl Into<PathBuf>, baud_rate: u32) -> Self {
        Self {
            device: device.into(),
            baud_rate,
            confirmed: true,
        }
    }
}

/// Line classifier for NMEA output.
#[derive(Debug, Clone)]
pub struct SentenceMatcher {
    regex: Regex,
}

impl SentenceMatcher {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl Default for SentenceMatcher {
    fn default() -> Self {
        // Constant pattern; covered by `default_pattern_compiles`.
        Self::new(DEFAULT_SENTENCE_PATTERN).expect("default NMEA sentence pattern is valid")
    }
}

// ── SerialLine ────────────────────────────────────────────────────────────────

/// Access to one serial line, one trial at a time.
#[async_trait]
pub trait SerialLine: Send + Sync {
    /// Put `device` into raw mode at `baud`.  The setting is meant to persist
    /// after the call returns.
    async fn configure(&self, device: &Path, baud: u32) -> Result<(), ProbeError>;

    /// Read up to `max_lines` lines from `device`, giving up after `window`.
    /// Returning fewer lines (or none) when the window closes is not an error.
    async fn read_lines(
        &self,
        device: &Path,
        max_lines: usize,
        window: Duration,
    ) -> Result<Vec<String>, ProbeError>;
}

// ── SerialProbe ───────────────────────────────────────────────────────────────

/// First-match GPS receiver search over the candidate devices.
pub struct SerialProbe<'a> {
    devices: &'a dyn DeviceTree,
    line: &'a dyn SerialLine,
    settings: &'a ProbeSettings,
}

impl<'a> SerialProbe<'a> {
    pub fn new(
        devices: &'a dyn DeviceTree,
        line: &'a dyn SerialLine,
        settings: &'a ProbeSettings,
    ) -> Self {
        Self {
            devices,
            line,
            settings,
        }
    }

    /// Returns the first `(device, baud)` pair that emits a recognised
    /// sentence, or `None` when every trial fails.  `None` is a normal
    /// outcome.
    pub async fn probe(&self) -> Option<ProbeResult> {
        let rates = &self.settings.baud_rates;
        info!(
            patterns = ?self.settings.patterns,
            baud_rates = ?rates,
            "Scanning for a GPS receiver"
        );

        // Lazy: a pattern is only expanded once every trial before it failed.
        let trials = self
            .settings
            .patterns
            .iter()
            .flat_map(|pattern| {
                let found = self.devices.expand(pattern);
                debug!(pattern = %pattern, count = found.len(), "expanded device pattern");
                found
            })
            .flat_map(move |device| rates.iter().map(move |&baud| (device.clone(), baud)));

        for (device, baud) in trials {
            match self.trial(&device, baud).await {
                Ok(true) => {
                    info!(device = %device.display(), baud, "✓ NMEA sentences detected");
                    return Some(ProbeResult::confirmed(device, baud));
                }
                Ok(false) => {
                    debug!(device = %device.display(), baud, "no recognised sentence");
                }
                Err(e) => {
                    debug!(device = %device.display(), baud, error = %e, "trial skipped");
                }
            }
        }

        info!("No GPS receiver found on any candidate device");
        None
    }

    /// One `(device, baud)` trial.  `Ok(false)` means the line was read but
    /// nothing matched.
    async fn trial(&self, device: &Path, baud: u32) -> Result<bool, ProbeError> {
        let s = self.settings;

        timeout(s.configure_timeout, self.line.configure(device, baud))
            .await
            .map_err(|_| timed_out(device, baud, TrialStage::Configure, s.configure_timeout))??;

        let bound = s.read_timeout + READ_GRACE;
        let lines = timeout(bound, self.line.read_lines(device, s.max_lines, s.read_timeout))
            .await
            .map_err(|_| timed_out(device, baud, TrialStage::Read, bound))??;

        for line in &lines {
            debug!(device = %device.display(), baud, line = %line, "read");
        }
        Ok(lines.iter().any(|l| s.sentence_matcher.is_match(l)))
    }
}

fn timed_out(device: &Path, baud: u32, stage: TrialStage, after: Duration) -> ProbeError {
    ProbeError::TimedOut {
        device: device.to_path_buf(),
        baud,
        stage,
        timeout_ms: after.as_millis() as u64,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
