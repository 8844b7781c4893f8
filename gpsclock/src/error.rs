/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Fatal failures of a provisioning run.
//!
//! Expected-absence outcomes (no receiver, no pulse signal, nothing managed
//! by gpsd) are plain `Option`s and never appear here.  Per-trial failures
//! live in [`ProbeError`](crate::probe::ProbeError) and
//! [`QueryError`](crate::gpsd::QueryError) and are absorbed at the component
//! that produced them.  Everything in [`ProvisionError`] aborts the run and
//! maps to exit status `1`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A command family the run depends on is not on `PATH`.
    #[error("required command '{command}' not found on PATH")]
    MissingCommand { command: String },

    /// A companion service is not running after installation.
    #[error("required service '{service}' is not active")]
    ServiceInactive { service: String },

    /// An explicitly requested feature lacks one of its parameters.
    #[error("{feature} requested but {parameter} is missing")]
    MissingParameter {
        feature: &'static str,
        parameter: &'static str,
    },

    /// An external command ran but reported failure.
    #[error("'{command}' failed: {detail}")]
    CommandFailed { command: String, detail: String },

    /// An external command did not finish within its bound.
    #[error("'{command}' timed out after {timeout_ms}ms")]
    CommandTimedOut { command: String, timeout_ms: u64 },

    /// Reading, writing or chmod/chown of a managed file failed.
    #[error("cannot update {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The owner named for a managed file does not exist on this host.
    #[error("unknown {kind} '{name}'")]
    UnknownOwner { kind: &'static str, name: String },
}

impl ProvisionError {
    pub(crate) fn store(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProvisionError::Store {
            path: path.into(),
            source,
        }
    }
}
