/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Service lifecycle collaborator.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::command::{run_bounded, run_checked};
use crate::error::ProvisionError;

#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn is_active(&self, service: &str) -> Result<bool, ProvisionError>;
    async fn restart(&self, service: &str) -> Result<(), ProvisionError>;
}

/// systemd via `systemctl`.
#[derive(Debug, Clone)]
pub struct Systemd {
    timeout: Duration,
}

impl Systemd {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ServiceManager for Systemd {
    async fn is_active(&self, service: &str) -> Result<bool, ProvisionError> {
        let output =
            run_bounded("systemctl", &["is-active", "--quiet", service], &[], self.timeout).await?;
        Ok(output.status.success())
    }

    async fn restart(&self, service: &str) -> Result<(), ProvisionError> {
        info!(service, "Restarting service");
        run_checked("systemctl", &["restart", service], &[], self.timeout).await?;
        Ok(())
    }
}
