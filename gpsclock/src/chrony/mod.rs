/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Clock source configurator: the chrony `refclock` stanza.
//!
//! # Precedence
//!
//! | Pulse found | Directives, in order |
//! |---|---|
//! | none | `SHM 0 … prefer trust` |
//! | PPS  | `PPS <dev> lock GPS … prefer`, then `SHM 0 … noselect` |
//! | PHC  | `PHC <dev>:extpps lock GPS … prefer`, then `SHM 0 … noselect` |
//!
//! The shared-memory segment is always present: gpsd writes the coarse NMEA
//! time there, and a pulse source needs it (`lock GPS`) to number its
//! seconds.  With a pulse present the coarse source only anchors the pulse
//! and is never selected itself.
//!
//! # Determinism
//! [`ClockConfiguration::render`] is a pure function of its inputs.  The
//! provisioning run compares the rendered text with the file on disk to decide
//! whether chrony needs a restart, so any nondeterminism here would restart
//! chrony on every run.

pub mod tuning;

pub use tuning::{client_log_limit, render_tuning, total_memory_bytes, MemoryTiers};

use std::fmt;
use std::path::PathBuf;

use crate::probe::ProbeResult;
use crate::pulse::PulseReference;

/// First line of every file gpsclock owns.
pub const GENERATED_HEADER: &str = "# Generated by gpsclock. Manual edits will be overwritten.";

/// Correlation id of the coarse (NMEA via gpsd SHM) source.
pub const COARSE_REFID: &str = "GPS";

/// gpsd publishes its coarse time in SHM segment 0.
const GPSD_SHM_SEGMENT: u8 = 0;

// ── Directives ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefclockDriver {
    Shm { segment: u8 },
    Pps { path: PathBuf },
    Phc { path: PathBuf },
}

/// Selection marker appended to a directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// The only source: preferred and trusted.
    PreferTrust,
    Prefer,
    /// Correlation anchor only.
    NoSelect,
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::PreferTrust => write!(f, "prefer trust"),
            Selection::Prefer => write!(f, "prefer"),
            Selection::NoSelect => write!(f, "noselect"),
        }
    }
}

/// One `refclock` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefclockDirective {
    pub driver: RefclockDriver,
    pub refid: &'static str,
    /// Refid of the source this one takes its seconds from.
    pub lock: Option<&'static str>,
    pub selection: Selection,
}

impl RefclockDirective {
    pub fn is_coarse(&self) -> bool {
        matches!(self.driver, RefclockDriver::Shm { .. })
    }
}

impl fmt::Display for RefclockDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.driver {
            RefclockDriver::Shm { segment } => write!(f, "refclock SHM {segment}")?,
            RefclockDriver::Pps { path } => write!(f, "refclock PPS {}", path.display())?,
            RefclockDriver::Phc { path } => write!(f, "refclock PHC {}:extpps", path.display())?,
        }
        if let Some(lock) = self.lock {
            write!(f, " lock {lock}")?;
        }
        write!(f, " refid {}", self.refid)?;
        match self.driver {
            // NMEA timing is good to ~100ms; the fixed delay absorbs serial latency.
            RefclockDriver::Shm { .. } => write!(f, " precision 1e-1 offset 0.0 delay 0.2")?,
            _ => write!(f, " precision 1e-7")?,
        }
        write!(f, " {}", self.selection)
    }
}

// ── ClockConfiguration ────────────────────────────────────────────────────────

/// Ordered reference clocks for one receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockConfiguration {
    source: ProbeResult,
    directives: Vec<RefclockDirective>,
}

impl ClockConfiguration {
    pub fn directives(&self) -> &[RefclockDirective] {
        &self.directives
    }

    /// The shared-memory entry (always exactly one).
    pub fn coarse(&self) -> Option<&RefclockDirective> {
        self.directives.iter().find(|d| d.is_coarse())
    }

    pub fn pulse(&self) -> Option<&RefclockDirective> {
        self.directives.iter().find(|d| !d.is_coarse())
    }

    /// File content for the refclock drop-in.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(GENERATED_HEADER);
        out.push('\n');
        out.push_str(&format!(
            "# GPS receiver: {} @ {} baud\n",
            self.source.device.display(),
            self.source.baud_rate
        ));
        for directive in &self.directives {
            out.push_str(&directive.to_string());
            out.push('\n');
        }
        out
    }
}

/// Builds the refclock set for a confirmed receiver and its pulse reference.
pub fn build_configuration(probe: &ProbeResult, pulse: &PulseReference) -> ClockConfiguration {
    let pulse_directive = match pulse {
        PulseReference::None => None,
        PulseReference::Pps { path } => Some(RefclockDriver::Pps { path: path.clone() }),
        PulseReference::Phc { path } => Some(RefclockDriver::Phc { path: path.clone() }),
    }
    .map(|driver| {
        let refid = match driver {
            RefclockDriver::Phc { .. } => "PHC",
            _ => "PPS",
        };
        RefclockDirective {
            driver,
            refid,
            lock: Some(COARSE_REFID),
            selection: Selection::Prefer,
        }
    });

    let coarse = RefclockDirective {
        driver: RefclockDriver::Shm {
            segment: GPSD_SHM_SEGMENT,
        },
        refid: COARSE_REFID,
        lock: None,
        selection: if pulse_directive.is_some() {
            Selection::NoSelect
        } else {
            Selection::PreferTrust
        },
    };

    let directives = pulse_directive.into_iter().chain(Some(coarse)).collect();

    ClockConfiguration {
        source: probe.clone(),
        directives,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
