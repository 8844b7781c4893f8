/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Pulse reference locator.
//!
//! After a receiver is confirmed, look for a hardware pulse that can
//! discipline the sub-second phase.  Two strategies run in fixed order and
//! the first validated device wins:
//!
//! 1. **PPS** – `/dev/pps{N}` whose `assert` status shows a sequence counter
//!    above zero (at least one edge seen).
//! 2. **PHC** – `/dev/ptp{N}` whose event `fifo` leads with a number above
//!    zero.  Only consulted when no PPS device validated.
//!
//! A device that exists but has never ticked is ignored: chrony would lock
//! onto a dead source.  Finding nothing is the common case and returns
//! [`PulseReference::None`].

pub mod sysfs;

pub use sysfs::SysfsStatusReader;

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::PulseSettings;

// ── Data types ────────────────────────────────────────────────────────────────

/// Highest-priority auxiliary timing signal found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PulseReference {
    None,
    Pps { path: PathBuf },
    Phc { path: PathBuf },
}

impl fmt::Display for PulseReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PulseReference::None => write!(f, "none"),
            PulseReference::Pps { path } => write!(f, "PPS {}", path.display()),
            PulseReference::Phc { path } => write!(f, "PHC {}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseKind {
    Pps,
    Phc,
}

/// One device slot to check: the character device and its status file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulseCandidate {
    pub kind: PulseKind,
    pub device: PathBuf,
    pub status_file: PathBuf,
}

impl PulseCandidate {
    /// Slot `index` of `kind` under the configured device and sysfs roots.
    pub fn slot(kind: PulseKind, index: u32, settings: &PulseSettings) -> Self {
        // The sysfs class shares the device name prefix.
        let (class, status) = match kind {
            PulseKind::Pps => ("pps", "assert"),
            PulseKind::Phc => ("ptp", "fifo"),
        };
        let name = format!("{class}{index}");
        Self {
            kind,
            device: settings.dev_dir.join(&name),
            status_file: settings.sysfs_dir.join(class).join(&name).join(status),
        }
    }
}

/// Numeric fields parsed from a status file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulseStatus {
    /// The raw timestamp field, when the format has one.
    pub timestamp: Option<String>,
    /// Edge sequence (PPS) or leading event field (PHC).
    pub counter: i64,
}

impl PulseStatus {
    pub fn has_ticked(&self) -> bool {
        self.counter > 0
    }
}

/// Reads and parses the status of one pulse candidate.
///
/// `None` covers every reason a candidate cannot be validated: missing
/// device node, missing or unreadable status file, unparsable content.
pub trait PulseStatusReader {
    fn read_status(&self, candidate: &PulseCandidate) -> Option<PulseStatus>;
}

// ── Locator ───────────────────────────────────────────────────────────────────

/// Finds the pulse reference to pair with the receiver on `after_device`.
///
/// Read-only: nothing is opened for writing and no device state changes.
pub fn locate_pulse(
    after_device: &Path,
    reader: &dyn PulseStatusReader,
    settings: &PulseSettings,
) -> PulseReference {
    debug!(device = %after_device.display(), "Looking for a pulse reference");

    for kind in [PulseKind::Pps, PulseKind::Phc] {
        if let Some(device) = first_ticking(kind, reader, settings) {
            let found = match kind {
                PulseKind::Pps => PulseReference::Pps { path: device },
                PulseKind::Phc => PulseReference::Phc { path: device },
            };
            info!(pulse = %found, "✓ pulse reference validated");
            return found;
        }
    }

    info!("No active PPS or PHC pulse found; using the serial time source alone");
    PulseReference::None
}

fn first_ticking(
    kind: PulseKind,
    reader: &dyn PulseStatusReader,
    settings: &PulseSettings,
) -> Option<PathBuf> {
    (0..settings.slots)
        .map(|index| PulseCandidate::slot(kind, index, settings))
        .find(|candidate| match reader.read_status(candidate) {
            Some(status) if status.has_ticked() => true,
            Some(status) => {
                debug!(
                    device = %candidate.device.display(),
                    counter = status.counter,
                    "pulse device present but idle"
                );
                false
            }
            None => false,
        })
        .map(|candidate| candidate.device)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Status by device path, recording every lookup.
    #[derive(Default)]
    struct FakeReader {
        status: HashMap<PathBuf, i64>,
        asked: RefCell<Vec<PathBuf>>,
    }

    impl FakeReader {
        fn with(mut self, device: &str, counter: i64) -> Self {
            self.status.insert(PathBuf::from(device), counter);
            self
        }
    }

    impl PulseStatusReader for FakeReader {
        fn read_status(&self, candidate: &PulseCandidate) -> Option<PulseStatus> {
            self.asked.borrow_mut().push(candidate.device.clone());
            self.status.get(&candidate.device).map(|&counter| PulseStatus {
                timestamp: None,
                counter,
            })
        }
    }

    fn settings() -> PulseSettings {
        PulseSettings {
            slots: 4,
            ..PulseSettings::default()
        }
    }

    const GPS: &str = "/dev/ttyACM0";

    // ── PulseCandidate ────────────────────────────────────────────────────────

    #[test]
    fn slots_follow_kernel_naming() {
        let s = PulseSettings::default();
        let pps = PulseCandidate::slot(PulseKind::Pps, 1, &s);
        assert_eq!(pps.device, PathBuf::from("/dev/pps1"));
        assert_eq!(pps.status_file, PathBuf::from("/sys/class/pps/pps1/assert"));

        let phc = PulseCandidate::slot(PulseKind::Phc, 0, &s);
        assert_eq!(phc.device, PathBuf::from("/dev/ptp0"));
        assert_eq!(phc.status_file, PathBuf::from("/sys/class/ptp/ptp0/fifo"));
    }

    // ── locate_pulse ──────────────────────────────────────────────────────────

    #[test]
    fn nothing_present_is_none() {
        let reader = FakeReader::default();
        let found = locate_pulse(Path::new(GPS), &reader, &settings());
        assert_eq!(found, PulseReference::None);
        // every PPS slot, then every PHC slot
        assert_eq!(reader.asked.borrow().len(), 8);
    }

    #[test]
    fn first_ticking_pps_wins() {
        let reader = FakeReader::default()
            .with("/dev/pps0", 0)
            .with("/dev/pps1", 17)
            .with("/dev/pps2", 99);
        let found = locate_pulse(Path::new(GPS), &reader, &settings());
        assert_eq!(
            found,
            PulseReference::Pps {
                path: PathBuf::from("/dev/pps1")
            }
        );
        assert_eq!(reader.asked.borrow().len(), 2, "stops at the first accepted slot");
    }

    #[test]
    fn pps_takes_precedence_over_phc() {
        let reader = FakeReader::default()
            .with("/dev/ptp0", 5)
            .with("/dev/pps3", 1);
        let found = locate_pulse(Path::new(GPS), &reader, &settings());
        assert_eq!(
            found,
            PulseReference::Pps {
                path: PathBuf::from("/dev/pps3")
            }
        );
        assert!(!reader
            .asked
            .borrow()
            .iter()
            .any(|p| p.starts_with("/dev/ptp0")));
    }

    #[test]
    fn phc_used_when_no_pps_ticks() {
        let reader = FakeReader::default()
            .with("/dev/pps0", 0)
            .with("/dev/ptp0", 0)
            .with("/dev/ptp1", 3);
        let found = locate_pulse(Path::new(GPS), &reader, &settings());
        assert_eq!(
            found,
            PulseReference::Phc {
                path: PathBuf::from("/dev/ptp1")
            }
        );
    }

    #[test]
    fn negative_counters_are_idle() {
        let reader = FakeReader::default().with("/dev/pps0", -1);
        assert_eq!(
            locate_pulse(Path::new(GPS), &reader, &settings()),
            PulseReference::None
        );
    }

    #[test]
    fn zero_slots_finds_nothing() {
        let reader = FakeReader::default().with("/dev/pps0", 10);
        let s = PulseSettings {
            slots: 0,
            ..PulseSettings::default()
        };
        assert_eq!(locate_pulse(Path::new(GPS), &reader, &s), PulseReference::None);
    }

    #[test]
    fn display_names_the_device() {
        let r = PulseReference::Phc {
            path: PathBuf::from("/dev/ptp0"),
        };
        assert_eq!(r.to_string(), "PHC /dev/ptp0");
        assert_eq!(PulseReference::None.to_string(), "none");
    }
}
