/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use gpsclock::chrony::total_memory_bytes;
use gpsclock::config::Settings;
use gpsclock::device::SysDevices;
use gpsclock::gpsd::GpspipeQuery;
use gpsclock::nts::{Certbot, NtsRequest};
use gpsclock::probe::TtyLine;
use gpsclock::provision::{self, Collaborators, Options, Provisioner};
use gpsclock::pulse::SysfsStatusReader;
use gpsclock::system::{Apt, FsStore, Systemd};

// ── CLI argument definition ───────────────────────────────────────────────────

/// Finds an attached GPS receiver and configures chrony to use it.
///
/// Example:
///   gpsclock --domain time.example.org --email ops@example.org
#[derive(Debug, Parser)]
#[command(name = "gpsclock", version, long_about = None)]
struct Cli {
    /// Public hostname for the NTS server certificate.
    #[arg(long, env = "GPSCLOCK_DOMAIN")]
    domain: Option<String>,

    /// ACME account email; required with --domain.
    #[arg(long, env = "GPSCLOCK_EMAIL")]
    email: Option<String>,

    /// Cloudflare API token; switches certificate issuance to DNS-01.
    #[arg(long = "dns-token", env = "GPSCLOCK_DNS_TOKEN", hide_env_values = true)]
    dns_token: Option<String>,

    /// Verbose logging (overridden by RUST_LOG).
    #[arg(long, env = "GPSCLOCK_DEBUG")]
    debug: bool,

    /// Probe even if gpsd already manages a receiver, and rewrite unchanged files.
    #[arg(long, env = "GPSCLOCK_FORCE")]
    force: bool,

    /// YAML settings file overriding built-in defaults.
    #[arg(short = 'c', long, env = "GPSCLOCK_CONFIG")]
    config: Option<PathBuf>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help / --version go to stdout with status 0; usage errors exit 1.
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            process::exit(code);
        }
    };

    init_tracing(cli.debug);

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    info!("gpsclock starting");

    // ── Settings ──────────────────────────────────────────────────────────────
    let settings = match &cli.config {
        Some(path) => Settings::load_from_file(path)?,
        None => {
            debug!("No settings file given, using built-in defaults");
            Settings::default()
        }
    };

    let nts = NtsRequest::from_options(cli.domain, cli.email, cli.dns_token)?;
    if nts.is_none() {
        debug!("No --domain given, NTS server not configured");
    }
    if cli.force {
        warn!("--force: every managed file will be rewritten");
    }

    provision::preflight()?;

    // ── Collaborators ─────────────────────────────────────────────────────────
    let mut apt = Apt::new(settings.timeouts.package);
    let systemd = Systemd::new(settings.timeouts.service);
    let gpspipe = GpspipeQuery::new(settings.gpsd.query_timeout);
    let certbot = Certbot::new(settings.timeouts.certificate);

    let with = Collaborators {
        devices: &SysDevices,
        line: &TtyLine,
        pulse: &SysfsStatusReader,
        gpsd: &gpspipe,
        packages: &mut apt,
        services: &systemd,
        store: &FsStore,
        certificates: &certbot,
    };
    let options = Options {
        nts,
        force: cli.force,
    };

    let report = Provisioner::new(&settings, options, with, total_memory_bytes())
        .run()
        .await?;

    print!("{report}");
    Ok(())
}
