/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! gpsclock – GPS receiver discovery and chrony reference-clock provisioning
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── config/     – built-in defaults + optional YAML settings file
//! ├── device      – candidate device path expansion
//! ├── probe/      – serial probe: (path, baud) trials, NMEA classification
//! ├── pulse/      – PPS / PHC pulse reference locator
//! ├── chrony/     – refclock stanza + memory-proportional tuning
//! ├── gpsd        – "already managed" check, /etc/default/gpsd rendering
//! ├── nts         – NTS stanza, certificate request, deploy hook
//! ├── system/     – packages, services, commands, configuration file store
//! ├── provision   – one scan-and-configure run, end to end
//! └── error       – fatal error taxonomy
//! ```
//!
//! Control flow of a run:
//!
//! ```text
//! gpsd query ──(nothing managed)──► probe ──(found)──► pulse ──► chrony stanza
//!      │                               │
//!      └──(managed, no --force)──► skip └──(not found)──► skip GPS sections
//! ```

pub mod chrony;
pub mod config;
pub mod device;
pub mod error;
pub mod gpsd;
pub mod nts;
pub mod probe;
pub mod provision;
pub mod pulse;
pub mod system;
