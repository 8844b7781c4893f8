/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! [`PulseStatusReader`] over the kernel's sysfs attributes.
//!
//! | Kind | Status file | Format |
//! |---|---|---|
//! | PPS | `/sys/class/pps/ppsN/assert` | `<sec>.<nsec>#<sequence>` |
//! | PHC | `/sys/class/ptp/ptpN/fifo` | `<field> <field> …`, leading field numeric |

use std::fs;

use tracing::debug;

use super::{PulseCandidate, PulseKind, PulseStatus, PulseStatusReader};
use crate::device::is_char_device;

/// Separates the timestamp from the sequence counter in a PPS `assert` file.
const PPS_ASSERT_DELIMITER: char = '#';

#[derive(Debug, Default, Clone, Copy)]
pub struct SysfsStatusReader;

impl PulseStatusReader for SysfsStatusReader {
    fn read_status(&self, candidate: &PulseCandidate) -> Option<PulseStatus> {
        if !is_char_device(&candidate.device) {
            return None;
        }
        let text = match fs::read_to_string(&candidate.status_file) {
            Ok(text) => text,
            Err(e) => {
                debug!(
                    status_file = %candidate.status_file.display(),
                    error = %e,
                    "pulse status unreadable"
                );
                return None;
            }
        };
        match candidate.kind {
            PulseKind::Pps => parse_pps_assert(&text),
            PulseKind::Phc => parse_phc_fifo(&text),
        }
    }
}

/// Parses `1700000000.123456789#42` into timestamp and sequence.
///
/// Exactly two fields are required; the sequence must be an integer.
pub fn parse_pps_assert(text: &str) -> Option<PulseStatus> {
    let (timestamp, sequence) = text.trim().split_once(PPS_ASSERT_DELIMITER)?;
    if sequence.contains(PPS_ASSERT_DELIMITER) {
        return None;
    }
    let counter = sequence.trim().parse::<i64>().ok()?;
    Some(PulseStatus {
        timestamp: Some(timestamp.trim().to_string()),
        counter,
    })
}

/// Parses the leading whitespace-separated field of a PHC event fifo.
pub fn parse_phc_fifo(text: &str) -> Option<PulseStatus> {
    let counter = text.split_whitespace().next()?.parse::<i64>().ok()?;
    Some(PulseStatus {
        timestamp: None,
        counter,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
