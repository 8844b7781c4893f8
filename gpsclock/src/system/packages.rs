/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Package installation collaborator.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::command::{run_bounded, run_checked};
use crate::error::ProvisionError;

const APT_ENV: &[(&str, &str)] = &[("DEBIAN_FRONTEND", "noninteractive")];

/// Idempotent package installation.
#[async_trait]
pub trait PackageManager: Send {
    /// Installs whichever of `names` are missing; a no-op when all are present.
    async fn ensure_installed(&mut self, names: &[&str]) -> Result<(), ProvisionError>;
}

/// apt/dpkg on Debian-family systems.
#[derive(Debug)]
pub struct Apt {
    timeout: Duration,
    /// `apt-get update` has run during this invocation.
    index_refreshed: bool,
}

impl Apt {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            index_refreshed: false,
        }
    }

    async fn is_installed(&self, name: &str) -> Result<bool, ProvisionError> {
        let output = run_bounded(
            "dpkg-query",
            &["-W", "-f=${Status}", name],
            &[],
            self.timeout,
        )
        .await?;
        Ok(output.status.success() && is_installed_status(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn refresh_index(&mut self) -> Result<(), ProvisionError> {
        if self.index_refreshed {
            return Ok(());
        }
        info!("Refreshing package index");
        run_checked("apt-get", &["update"], APT_ENV, self.timeout).await?;
        self.index_refreshed = true;
        Ok(())
    }
}

#[async_trait]
impl PackageManager for Apt {
    async fn ensure_installed(&mut self, names: &[&str]) -> Result<(), ProvisionError> {
        let mut missing = Vec::new();
        for name in names {
            if self.is_installed(name).await? {
                debug!(package = %name, "already installed");
            } else {
                missing.push(*name);
            }
        }
        if missing.is_empty() {
            return Ok(());
        }

        self.refresh_index().await?;
        info!(packages = ?missing, "Installing packages");
        let mut args = vec!["install", "-y", "--no-install-recommends"];
        args.extend(missing.iter().copied());
        run_checked("apt-get", &args, APT_ENV, self.timeout).await?;
        Ok(())
    }
}

/// `dpkg-query -f='${Status}'` output for a fully installed package.
fn is_installed_status(status: &str) -> bool {
    status.trim() == "install ok installed"
}
