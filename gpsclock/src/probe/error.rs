/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-trial failures of the serial probe.
//!
//! A [`ProbeError`] describes why one `(device, baud)` combination could not
//! be evaluated.  The probe logs it at `debug` and moves on to the next
//! combination; it never leaves [`SerialProbe::probe`](super::SerialProbe::probe).

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which half of a trial ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialStage {
    Configure,
    Read,
}

impl fmt::Display for TrialStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrialStage::Configure => write!(f, "line configuration"),
            TrialStage::Read => write!(f, "sentence read"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    /// The device node could not be opened.
    #[error("cannot open {device}: {source}")]
    Open {
        device: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// termios refused the raw-mode / speed settings.
    #[error("cannot configure {device} at {baud} baud: {source}")]
    Configure {
        device: PathBuf,
        baud: u32,
        #[source]
        source: nix::Error,
    },

    /// The serial layer has no termios constant for this rate.
    #[error("unsupported baud rate {0}")]
    UnsupportedBaud(u32),

    /// Reading from an opened device failed.
    #[error("read from {device} failed: {source}")]
    Read {
        device: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A trial stage exceeded its bound.
    #[error("{stage} on {device} at {baud} baud timed out after {timeout_ms}ms")]
    TimedOut {
        device: PathBuf,
        baud: u32,
        stage: TrialStage,
        timeout_ms: u64,
    },
}
