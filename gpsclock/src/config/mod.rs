//! Settings loading and validation.
//!
//! Every tunable has a built-in default ([`Settings::default`]).  An optional
//! YAML file overrides any subset of them; absent keys keep their defaults.
//!
//! The expected YAML structure is:
//! ```yaml
//! probe:
//!   patterns: ["/dev/ttyACM*", "/dev/ttyUSB*"]
//!   baud_rates: [115200, 9600, 4800]
//!   max_lines: 5
//!   configure_timeout_ms: 500
//!   read_timeout_ms: 2000
//!   sentence_pattern: '^\$(GP|GN)(GGA|RMC)'
//! pulse:
//!   slots: 8
//! gpsd:
//!   defaults_file: /etc/default/gpsd
//!   query_timeout_ms: 10000
//! chrony:
//!   conf_dir: /etc/chrony/conf.d
//!   memory:
//!     low_bytes: 1073741824
//!     high_bytes: 4294967296
//!     cap_bytes: 2147483648
//! nts:
//!   key_dir: /etc/chrony/nts
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::chrony::MemoryTiers;
use crate::probe::{SentenceMatcher, SUPPORTED_BAUD_RATES};

// ── Defaults ──────────────────────────────────────────────────────────────────

/// Candidate serial device globs, scanned in this order.
pub const DEFAULT_PATTERNS: &[&str] = &["/dev/ttyACM*", "/dev/ttyUSB*", "/dev/ttyAMA*", "/dev/serial*"];

/// Baud rates tried on each candidate, fastest first.
pub const DEFAULT_BAUD_RATES: &[u32] = &[115_200, 57_600, 38_400, 19_200, 9_600, 4_800];

const DEFAULT_MAX_LINES: usize = 5;
const DEFAULT_CONFIGURE_TIMEOUT_MS: u64 = 500;
const DEFAULT_READ_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_QUERY_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SERVICE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_PACKAGE_TIMEOUT_MS: u64 = 600_000;
const DEFAULT_CERTIFICATE_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_PULSE_SLOTS: u32 = 8;

// ── Private YAML deserialization types ────────────────────────────────────────

/// Top-level wrapper that maps directly onto the YAML file layout.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SettingsFile {
    probe: ProbeSection,
    pulse: PulseSection,
    gpsd: GpsdSection,
    chrony: ChronySection,
    nts: NtsSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProbeSection {
    patterns: Option<Vec<String>>,
    baud_rates: Option<Vec<u32>>,
    max_lines: Option<usize>,
    configure_timeout_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
    sentence_pattern: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PulseSection {
    slots: Option<u32>,
    dev_dir: Option<PathBuf>,
    sysfs_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GpsdSection {
    defaults_file: Option<PathBuf>,
    query_timeout_ms: Option<u64>,
    service: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChronySection {
    conf_dir: Option<PathBuf>,
    service: Option<String>,
    memory: Option<MemorySection>,
}

#[derive(Debug, Deserialize)]
struct MemorySection {
    low_bytes: u64,
    high_bytes: u64,
    cap_bytes: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NtsSection {
    key_dir: Option<PathBuf>,
    letsencrypt_dir: Option<PathBuf>,
    key_group: Option<String>,
    dump_dir: Option<PathBuf>,
}

// ── Public data structures ────────────────────────────────────────────────────

/// Serial probe tunables.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub patterns: Vec<String>,
    pub baud_rates: Vec<u32>,
    /// Lines read per (device, baud) trial.
    pub max_lines: usize,
    pub configure_timeout: Duration,
    pub read_timeout: Duration,
    pub sentence_matcher: SentenceMatcher,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_PATTERNS.iter().map(|p| p.to_string()).collect(),
            baud_rates: DEFAULT_BAUD_RATES.to_vec(),
            max_lines: DEFAULT_MAX_LINES,
            configure_timeout: Duration::from_millis(DEFAULT_CONFIGURE_TIMEOUT_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            sentence_matcher: SentenceMatcher::default(),
        }
    }
}

/// Where pulse devices and their sysfs status files live.
#[derive(Debug, Clone)]
pub struct PulseSettings {
    /// Indices `0..slots` are tried for both `pps` and `ptp` devices.
    pub slots: u32,
    pub dev_dir: PathBuf,
    pub sysfs_dir: PathBuf,
}

impl Default for PulseSettings {
    fn default() -> Self {
        Self {
            slots: DEFAULT_PULSE_SLOTS,
            dev_dir: PathBuf::from("/dev"),
            sysfs_dir: PathBuf::from("/sys/class"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GpsdSettings {
    pub defaults_file: PathBuf,
    pub query_timeout: Duration,
    pub service: String,
}

impl Default for GpsdSettings {
    fn default() -> Self {
        Self {
            defaults_file: PathBuf::from("/etc/default/gpsd"),
            query_timeout: Duration::from_millis(DEFAULT_QUERY_TIMEOUT_MS),
            service: String::from("gpsd"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChronySettings {
    /// Drop-in directory; gpsclock owns three files inside it.
    pub conf_dir: PathBuf,
    pub service: String,
    pub memory: MemoryTiers,
}

impl ChronySettings {
    pub fn refclock_file(&self) -> PathBuf {
        self.conf_dir.join("gpsclock-refclock.conf")
    }

    pub fn tuning_file(&self) -> PathBuf {
        self.conf_dir.join("gpsclock-tuning.conf")
    }

    pub fn nts_file(&self) -> PathBuf {
        self.conf_dir.join("gpsclock-nts.conf")
    }
}

impl Default for ChronySettings {
    fn default() -> Self {
        Self {
            conf_dir: PathBuf::from("/etc/chrony/conf.d"),
            service: String::from("chrony"),
            memory: MemoryTiers::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NtsSettings {
    /// Where chrony reads its NTS certificate and key.
    pub key_dir: PathBuf,
    pub letsencrypt_dir: PathBuf,
    /// Group chrony runs as; granted read access to the key.
    pub key_group: String,
    pub dump_dir: PathBuf,
}

impl NtsSettings {
    pub fn hook_path(&self) -> PathBuf {
        self.letsencrypt_dir
            .join("renewal-hooks/deploy/gpsclock-chrony-nts.sh")
    }

    pub fn credentials_file(&self) -> PathBuf {
        self.letsencrypt_dir.join("gpsclock-cloudflare.ini")
    }

    pub fn live_dir(&self, domain: &str) -> PathBuf {
        self.letsencrypt_dir.join("live").join(domain)
    }
}

impl Default for NtsSettings {
    fn default() -> Self {
        Self {
            key_dir: PathBuf::from("/etc/chrony/nts"),
            letsencrypt_dir: PathBuf::from("/etc/letsencrypt"),
            key_group: String::from("_chrony"),
            dump_dir: PathBuf::from("/var/lib/chrony"),
        }
    }
}

/// Bounds for the thin collaborator commands.
#[derive(Debug, Clone)]
pub struct CommandTimeouts {
    pub service: Duration,
    pub package: Duration,
    pub certificate: Duration,
}

impl Default for CommandTimeouts {
    fn default() -> Self {
        Self {
            service: Duration::from_millis(DEFAULT_SERVICE_TIMEOUT_MS),
            package: Duration::from_millis(DEFAULT_PACKAGE_TIMEOUT_MS),
            certificate: Duration::from_millis(DEFAULT_CERTIFICATE_TIMEOUT_MS),
        }
    }
}

/// Complete runtime settings.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub probe: ProbeSettings,
    pub pulse: PulseSettings,
    pub gpsd: GpsdSettings,
    pub chrony: ChronySettings,
    pub nts: NtsSettings,
    pub timeouts: CommandTimeouts,
}

impl Settings {
    /// Parses `path` and overlays its values on the built-in defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, the YAML is
    /// structurally invalid, or the merged settings fail [`validate`](Self::validate).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading settings from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open settings file: {}", path.display()))?;

        let file: SettingsFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        let settings = Self::default()
            .overlay(file)
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        settings.validate()?;

        debug!(
            patterns = ?settings.probe.patterns,
            baud_rates = ?settings.probe.baud_rates,
            "Settings loaded"
        );
        Ok(settings)
    }

    fn overlay(mut self, file: SettingsFile) -> Result<Self> {
        let p = file.probe;
        if let Some(v) = p.patterns {
            self.probe.patterns = v;
        }
        if let Some(v) = p.baud_rates {
            self.probe.baud_rates = v;
        }
        if let Some(v) = p.max_lines {
            self.probe.max_lines = v;
        }
        if let Some(v) = p.configure_timeout_ms {
            self.probe.configure_timeout = Duration::from_millis(v);
        }
        if let Some(v) = p.read_timeout_ms {
            self.probe.read_timeout = Duration::from_millis(v);
        }
        if let Some(v) = p.sentence_pattern {
            self.probe.sentence_matcher = SentenceMatcher::new(&v)
                .with_context(|| format!("sentence_pattern does not compile: {v}"))?;
        }

        let u = file.pulse;
        if let Some(v) = u.slots {
            self.pulse.slots = v;
        }
        if let Some(v) = u.dev_dir {
            self.pulse.dev_dir = v;
        }
        if let Some(v) = u.sysfs_dir {
            self.pulse.sysfs_dir = v;
        }

        let g = file.gpsd;
        if let Some(v) = g.defaults_file {
            self.gpsd.defaults_file = v;
        }
        if let Some(v) = g.query_timeout_ms {
            self.gpsd.query_timeout = Duration::from_millis(v);
        }
        if let Some(v) = g.service {
            self.gpsd.service = v;
        }

        let c = file.chrony;
        if let Some(v) = c.conf_dir {
            self.chrony.conf_dir = v;
        }
        if let Some(v) = c.service {
            self.chrony.service = v;
        }
        if let Some(m) = c.memory {
            self.chrony.memory = MemoryTiers {
                low_bytes: m.low_bytes,
                high_bytes: m.high_bytes,
                cap_bytes: m.cap_bytes,
            };
        }

        let n = file.nts;
        if let Some(v) = n.key_dir {
            self.nts.key_dir = v;
        }
        if let Some(v) = n.letsencrypt_dir {
            self.nts.letsencrypt_dir = v;
        }
        if let Some(v) = n.key_group {
            self.nts.key_group = v;
        }
        if let Some(v) = n.dump_dir {
            self.nts.dump_dir = v;
        }

        Ok(self)
    }

    /// Rejects settings that would make a scan meaningless or unbounded.
    pub fn validate(&self) -> Result<()> {
        if self.probe.patterns.is_empty() {
            bail!("probe.patterns must list at least one device pattern");
        }
        if self.probe.baud_rates.is_empty() {
            bail!("probe.baud_rates must list at least one baud rate");
        }
        if let Some(rate) = self
            .probe
            .baud_rates
            .iter()
            .find(|r| !SUPPORTED_BAUD_RATES.contains(r))
        {
            bail!("unsupported baud rate {rate} (supported: {SUPPORTED_BAUD_RATES:?})");
        }
        if self.probe.max_lines == 0 {
            bail!("probe.max_lines must be greater than zero");
        }
        if self.probe.configure_timeout.is_zero() || self.probe.read_timeout.is_zero() {
            bail!("probe timeouts must be greater than zero");
        }
        if self.gpsd.query_timeout.is_zero() {
            bail!("gpsd.query_timeout_ms must be greater than zero");
        }
        let m = &self.chrony.memory;
        if m.low_bytes >= m.high_bytes {
            bail!(
                "chrony.memory.low_bytes ({}) must be below high_bytes ({})",
                m.low_bytes,
                m.high_bytes
            );
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
