/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! One scan-and-configure run, end to end.
//!
//! Steps, strictly in order:
//!
//! 1. install the base packages (plus certbot for NTS) and require chrony
//!    to be active,
//! 2. ask gpsd whether it already manages a receiver,
//! 3. otherwise (or with `force`) probe for one and locate a pulse reference,
//! 4. sync the gpsd defaults file and the chrony refclock drop-in,
//! 5. sync the memory tuning drop-in,
//! 6. for NTS: sync hook and credentials, request the certificate, sync the
//!    NTS drop-in,
//! 7. restart gpsd and/or chrony, each only if one of its files changed.
//!
//! Every file goes through [`sync_file`], so a second run on unchanged
//! hardware writes nothing and restarts nothing.

use std::fmt;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::chrony::{build_configuration, client_log_limit, render_tuning};
use crate::config::Settings;
use crate::device::{DevicePathPattern, DeviceTree};
use crate::error::ProvisionError;
use crate::gpsd::{already_managed, render_gpsd_defaults, DaemonQuery};
use crate::nts::{
    render_deploy_hook, render_dns_credentials, render_nts_stanza, CertificateIssuer,
    CertificateRequest, NtsRequest,
};
use crate::probe::{ProbeResult, SerialLine, SerialProbe};
use crate::pulse::{locate_pulse, PulseReference, PulseStatusReader};
use crate::system::{
    require_commands, sync_file, ConfigStore, FileOwner, ManagedFile, PackageManager,
    ServiceManager,
};

/// Packages every run needs.
pub const BASE_PACKAGES: &[&str] = &["chrony", "gpsd", "gpsd-clients", "pps-tools"];

/// Command families the system collaborators shell out to.
pub const REQUIRED_COMMANDS: &[&str] = &["systemctl", "apt-get", "dpkg-query"];

/// Fails when a command the run depends on is missing from `PATH`.
pub fn preflight() -> Result<(), ProvisionError> {
    require_commands(REQUIRED_COMMANDS)
}

// ── Inputs ────────────────────────────────────────────────────────────────────

/// Operator choices for one run.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub nts: Option<NtsRequest>,
    /// Probe even when gpsd manages a device, and rewrite unchanged files.
    pub force: bool,
}

/// Everything the run talks to outside the process.
pub struct Collaborators<'a> {
    pub devices: &'a dyn DeviceTree,
    pub line: &'a dyn SerialLine,
    pub pulse: &'a dyn PulseStatusReader,
    pub gpsd: &'a dyn DaemonQuery,
    pub packages: &'a mut dyn PackageManager,
    pub services: &'a dyn ServiceManager,
    pub store: &'a dyn ConfigStore,
    pub certificates: &'a dyn CertificateIssuer,
}

// ── Report ────────────────────────────────────────────────────────────────────

/// What happened to the GPS part of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverOutcome {
    /// gpsd already owns this device; GPS files were left alone.
    AlreadyManaged(PathBuf),
    Found {
        probe: ProbeResult,
        pulse: PulseReference,
    },
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub receiver: ReceiverOutcome,
    pub client_log_limit: Option<u64>,
    pub nts_domain: Option<String>,
    pub changed_files: Vec<PathBuf>,
    pub restarted: Vec<String>,
}

impl RunReport {
    pub fn is_noop(&self) -> bool {
        self.changed_files.is_empty() && self.restarted.is_empty()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.receiver {
            ReceiverOutcome::AlreadyManaged(device) => {
                writeln!(f, "receiver: {} (managed by gpsd)", device.display())?
            }
            ReceiverOutcome::Found { probe, pulse } => {
                writeln!(f, "receiver: {} @ {} baud", probe.device.display(), probe.baud_rate)?;
                writeln!(f, "pulse:    {pulse}")?;
            }
            ReceiverOutcome::NotFound => writeln!(f, "receiver: none found")?,
        }
        match self.client_log_limit {
            Some(limit) => writeln!(f, "clientloglimit: {limit}")?,
            None => writeln!(f, "clientloglimit: chrony default")?,
        }
        if let Some(domain) = &self.nts_domain {
            writeln!(f, "nts:      {domain}")?;
        }
        if self.is_noop() {
            return writeln!(f, "no changes");
        }
        for path in &self.changed_files {
            writeln!(f, "changed:  {}", path.display())?;
        }
        for service in &self.restarted {
            writeln!(f, "restarted: {service}")?;
        }
        Ok(())
    }
}

// ── Provisioner ───────────────────────────────────────────────────────────────

pub struct Provisioner<'a> {
    settings: &'a Settings,
    options: Options,
    with: Collaborators<'a>,
    total_memory: u64,
    changed_files: Vec<PathBuf>,
    gpsd_changed: bool,
    chrony_changed: bool,
}

impl<'a> Provisioner<'a> {
    /// `total_memory` is the host's physical memory in bytes.
    pub fn new(
        settings: &'a Settings,
        options: Options,
        with: Collaborators<'a>,
        total_memory: u64,
    ) -> Self {
        Self {
            settings,
            options,
            with,
            total_memory,
            changed_files: Vec::new(),
            gpsd_changed: false,
            chrony_changed: false,
        }
    }

    pub async fn run(mut self) -> Result<RunReport, ProvisionError> {
        self.prepare_system().await?;

        let receiver = self.configure_receiver().await?;
        let client_log_limit = self.configure_tuning()?;
        let nts_domain = self.configure_nts().await?;
        let restarted = self.restart_changed().await?;

        Ok(RunReport {
            receiver,
            client_log_limit,
            nts_domain,
            changed_files: self.changed_files,
            restarted,
        })
    }

    async fn prepare_system(&mut self) -> Result<(), ProvisionError> {
        let mut packages = BASE_PACKAGES.to_vec();
        if let Some(nts) = &self.options.nts {
            packages.extend(nts.packages());
        }
        self.with.packages.ensure_installed(&packages).await?;

        let chrony = &self.settings.chrony.service;
        if !self.with.services.is_active(chrony).await? {
            return Err(ProvisionError::ServiceInactive {
                service: chrony.clone(),
            });
        }
        Ok(())
    }

    async fn configure_receiver(&mut self) -> Result<ReceiverOutcome, ProvisionError> {
        if let Some(device) = self.managed_device().await {
            if !self.options.force {
                info!(
                    device = %device.display(),
                    "Receiver already managed by gpsd; leaving GPS configuration untouched"
                );
                return Ok(ReceiverOutcome::AlreadyManaged(device));
            }
            warn!(device = %device.display(), "--force: probing although gpsd manages a receiver");
        }

        let probe = SerialProbe::new(self.with.devices, self.with.line, &self.settings.probe);
        let Some(found) = probe.probe().await else {
            warn!("No GPS receiver found; GPS configuration left unchanged");
            return Ok(ReceiverOutcome::NotFound);
        };

        let pulse = locate_pulse(&found.device, self.with.pulse, &self.settings.pulse);
        let clock = build_configuration(&found, &pulse);

        let gpsd_file = ManagedFile::config(&self.settings.gpsd.defaults_file);
        let changed = self.sync(&gpsd_file, &render_gpsd_defaults(&found))?;
        self.gpsd_changed |= changed;

        let refclock = ManagedFile::config(self.settings.chrony.refclock_file());
        let changed = self.sync(&refclock, &clock.render())?;
        self.chrony_changed |= changed;

        Ok(ReceiverOutcome::Found {
            probe: found,
            pulse,
        })
    }

    async fn managed_device(&self) -> Option<PathBuf> {
        let pattern = match DevicePathPattern::from_globs(&self.settings.probe.patterns) {
            Ok(pattern) => pattern,
            Err(e) => {
                warn!(error = %e, "cannot match gpsd output against device patterns");
                return None;
            }
        };
        already_managed(self.with.gpsd, &pattern, self.settings.gpsd.query_timeout).await
    }

    fn configure_tuning(&mut self) -> Result<Option<u64>, ProvisionError> {
        let limit = client_log_limit(self.total_memory, &self.settings.chrony.memory);
        info!(
            total_memory = self.total_memory,
            client_log_limit = ?limit,
            "chrony client log sizing"
        );
        let tuning = ManagedFile::config(self.settings.chrony.tuning_file());
        let changed = self.sync(&tuning, &render_tuning(limit))?;
        self.chrony_changed |= changed;
        Ok(limit)
    }

    async fn configure_nts(&mut self) -> Result<Option<String>, ProvisionError> {
        let Some(nts) = self.options.nts.clone() else {
            return Ok(None);
        };
        let all = self.settings;
        let settings = &all.nts;

        let credentials = match &nts.dns_token {
            Some(token) => {
                let file = ManagedFile::config(settings.credentials_file()).with_mode(0o600);
                self.sync(&file, &render_dns_credentials(token))?;
                Some(file.path)
            }
            None => None,
        };

        let hook = ManagedFile::config(settings.hook_path()).with_mode(0o755);
        let script = render_deploy_hook(settings, &nts.domain, &all.chrony.service);
        self.sync(&hook, &script)?;

        self.with
            .certificates
            .issue(&CertificateRequest {
                domain: nts.domain.clone(),
                email: nts.email.clone(),
                credentials,
                deploy_hook: hook.path,
            })
            .await?;

        let stanza = ManagedFile {
            owner: Some(FileOwner {
                user: "root".into(),
                group: settings.key_group.clone(),
            }),
            ..ManagedFile::config(all.chrony.nts_file()).with_mode(0o640)
        };
        let changed = self.sync(&stanza, &render_nts_stanza(settings))?;
        self.chrony_changed |= changed;

        info!(domain = %nts.domain, "NTS server configured");
        Ok(Some(nts.domain))
    }

    async fn restart_changed(&self) -> Result<Vec<String>, ProvisionError> {
        let mut restarted = Vec::new();
        for (changed, service) in [
            (self.gpsd_changed, &self.settings.gpsd.service),
            (self.chrony_changed, &self.settings.chrony.service),
        ] {
            if changed {
                self.with.services.restart(service).await?;
                restarted.push(service.clone());
            }
        }
        Ok(restarted)
    }

    fn sync(&mut self, file: &ManagedFile, content: &str) -> Result<bool, ProvisionError> {
        let changed = sync_file(self.with.store, file, content, self.options.force)?;
        if changed {
            self.changed_files.push(file.path.clone());
        }
        Ok(changed)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    // ── RunReport ─────────────────────────────────────────────────────────────

    fn report(receiver: ReceiverOutcome) -> RunReport {
        RunReport {
            receiver,
            client_log_limit: None,
            nts_domain: None,
            changed_files: Vec::new(),
            restarted: Vec::new(),
        }
    }

    #[test]
    fn noop_report_says_so() {
        let text = report(ReceiverOutcome::NotFound).to_string();
        assert!(text.contains("receiver: none found\n"));
        assert!(text.contains("clientloglimit: chrony default\n"));
        assert!(text.ends_with("no changes\n"));
    }

    #[test]
    fn found_report_lists_changes() {
        let mut r = report(ReceiverOutcome::Found {
            probe: ProbeResult::confirmed("/dev/ttyACM0", 9_600),
            pulse: PulseReference::Pps {
                path: PathBuf::from("/dev/pps0"),
            },
        });
        r.client_log_limit = Some(1_024);
        r.changed_files.push(PathBuf::from("/etc/default/gpsd"));
        r.restarted.push("gpsd".into());

        let text = r.to_string();
        assert!(text.starts_with("receiver: /dev/ttyACM0 @ 9600 baud\npulse:    PPS /dev/pps0\n"));
        assert!(text.contains("clientloglimit: 1024\n"));
        assert!(text.contains("changed:  /etc/default/gpsd\n"));
        assert!(text.ends_with("restarted: gpsd\n"));
        assert!(!r.is_noop());
    }

    #[test]
    fn managed_report_names_device() {
        let r = report(ReceiverOutcome::AlreadyManaged(Path::new("/dev/ttyUSB0").into()));
        assert!(r.to_string().starts_with("receiver: /dev/ttyUSB0 (managed by gpsd)\n"));
    }

    // ── Constants ─────────────────────────────────────────────────────────────

    #[test]
    fn base_packages_cover_time_stack() {
        for p in ["chrony", "gpsd", "gpsd-clients", "pps-tools"] {
            assert!(BASE_PACKAGES.contains(&p), "{p}");
        }
    }
}
