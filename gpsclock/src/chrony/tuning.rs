/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Memory-proportional `clientloglimit`.
//!
//! chrony keeps per-client statistics for NTP/NTS clients.  On a busy public
//! server the default table is too small; on a small board a big one starves
//! everything else.  Three tiers:
//!
//! | Total memory | `clientloglimit` |
//! |---|---|
//! | `< low` | omitted (chrony default) |
//! | `low ≤ m < high` | `m / 2` |
//! | `≥ high` | `cap` |

use sysinfo::System;

use super::GENERATED_HEADER;

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryTiers {
    pub low_bytes: u64,
    pub high_bytes: u64,
    pub cap_bytes: u64,
}

impl Default for MemoryTiers {
    fn default() -> Self {
        // cap == high / 2, so the limit never drops when memory grows.
        Self {
            low_bytes: GIB,
            high_bytes: 4 * GIB,
            cap_bytes: 2 * GIB,
        }
    }
}

/// `clientloglimit` for a host with `total_bytes` of memory, or `None` to
/// leave chrony's default in place.
pub fn client_log_limit(total_bytes: u64, tiers: &MemoryTiers) -> Option<u64> {
    if total_bytes < tiers.low_bytes {
        None
    } else if total_bytes < tiers.high_bytes {
        Some(total_bytes / 2)
    } else {
        Some(tiers.cap_bytes)
    }
}

/// File content for the tuning drop-in.  Without a limit only the header is
/// written, which clears a limit left by an earlier run on bigger hardware.
pub fn render_tuning(limit: Option<u64>) -> String {
    match limit {
        Some(limit) => format!("{GENERATED_HEADER}\nclientloglimit {limit}\n"),
        None => format!("{GENERATED_HEADER}\n"),
    }
}

/// Total physical memory of this host, in bytes.
pub fn total_memory_bytes() -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    system.total_memory()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
