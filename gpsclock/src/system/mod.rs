/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Thin adapters over the host: commands, packages, services, files.
//!
//! Each collaborator is a trait so the provisioning run can be driven end to
//! end with in-memory fakes; the real implementations shell out through
//! [`command::run_bounded`] and never block past their timeout.

pub mod command;
pub mod packages;
pub mod services;
pub mod store;

pub use command::{require_commands, run_bounded, run_checked};
pub use packages::{Apt, PackageManager};
pub use services::{ServiceManager, Systemd};
pub use store::{sync_file, ConfigStore, FileOwner, FsStore, ManagedFile};
