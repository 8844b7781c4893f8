/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Network Time Security: certificate request, deploy hook, chrony stanza.
//!
//! Certificate issuance itself belongs to certbot.  gpsclock contributes:
//!
//! * the DNS credential file (DNS-01 via Cloudflare, only with a token),
//! * the deploy hook that copies the renewed pair where chrony can read it
//!   and restarts chrony,
//! * the `ntsserver*` stanza, written once a certificate exists.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::chrony::GENERATED_HEADER;
use crate::config::NtsSettings;
use crate::error::ProvisionError;
use crate::system::run_checked;

const FULLCHAIN: &str = "fullchain.pem";
const PRIVKEY: &str = "privkey.pem";

/// What the operator asked for on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtsRequest {
    pub domain: String,
    pub email: String,
    /// DNS provider token; switches issuance from HTTP-01 to DNS-01.
    pub dns_token: Option<String>,
}

impl NtsRequest {
    /// `Ok(None)` when no domain was given (NTS not requested).
    ///
    /// # Errors
    /// [`ProvisionError::MissingParameter`] when a domain is given without an
    /// email address.
    pub fn from_options(
        domain: Option<String>,
        email: Option<String>,
        dns_token: Option<String>,
    ) -> Result<Option<Self>, ProvisionError> {
        let Some(domain) = domain.filter(|d| !d.trim().is_empty()) else {
            return Ok(None);
        };
        let email = email
            .filter(|e| !e.trim().is_empty())
            .ok_or(ProvisionError::MissingParameter {
                feature: "NTS certificate",
                parameter: "--email",
            })?;
        Ok(Some(Self {
            domain,
            email,
            dns_token: dns_token.filter(|t| !t.trim().is_empty()),
        }))
    }

    /// Packages needed on top of the base set.
    pub fn packages(&self) -> Vec<&'static str> {
        let mut packages = vec!["certbot"];
        if self.dns_token.is_some() {
            packages.push("python3-certbot-dns-cloudflare");
        }
        packages
    }
}

/// Arguments for one certbot run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    pub domain: String,
    pub email: String,
    pub credentials: Option<PathBuf>,
    pub deploy_hook: PathBuf,
}

#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    /// Obtains (or keeps, if still valid) a certificate for the request.
    async fn issue(&self, request: &CertificateRequest) -> Result<(), ProvisionError>;
}

/// certbot in non-interactive mode.
#[derive(Debug, Clone)]
pub struct Certbot {
    timeout: Duration,
}

impl Certbot {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CertificateIssuer for Certbot {
    async fn issue(&self, request: &CertificateRequest) -> Result<(), ProvisionError> {
        info!(domain = %request.domain, "Requesting NTS certificate");
        let args = certbot_args(request);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_checked("certbot", &args, &[], self.timeout).await?;
        Ok(())
    }
}

pub fn certbot_args(request: &CertificateRequest) -> Vec<String> {
    let mut args: Vec<String> = [
        "certonly",
        "--non-interactive",
        "--agree-tos",
        "--keep-until-expiring",
        "-m",
        &request.email,
        "-d",
        &request.domain,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push("--deploy-hook".into());
    args.push(request.deploy_hook.display().to_string());
    match &request.credentials {
        Some(path) => {
            args.push("--dns-cloudflare".into());
            args.push("--dns-cloudflare-credentials".into());
            args.push(path.display().to_string());
        }
        None => args.push("--standalone".into()),
    }
    args
}

// ── Rendering ─────────────────────────────────────────────────────────────────

/// certbot's Cloudflare plugin credential file.  Must be written `0600`.
pub fn render_dns_credentials(token: &str) -> String {
    format!("{GENERATED_HEADER}\ndns_cloudflare_api_token = {token}\n")
}

/// Deploy hook: install the live pair for `domain` into chrony's key
/// directory, readable by chrony's group, then restart chrony.
pub fn render_deploy_hook(settings: &NtsSettings, domain: &str, chrony_service: &str) -> String {
    let src = settings.live_dir(domain);
    let dst = &settings.key_dir;
    let group = &settings.key_group;
    format!(
        "#!/bin/sh\n\
         {GENERATED_HEADER}\n\
         set -eu\n\
         src=\"{src}\"\n\
         dst=\"{dst}\"\n\
         install -d -m 0750 -o root -g {group} \"$dst\"\n\
         install -m 0640 -o root -g {group} \"$src/{FULLCHAIN}\" \"$dst/{FULLCHAIN}\"\n\
         install -m 0640 -o root -g {group} \"$src/{PRIVKEY}\" \"$dst/{PRIVKEY}\"\n\
         systemctl restart {chrony_service}\n",
        src = src.display(),
        dst = dst.display(),
    )
}

/// chrony drop-in enabling the NTS server.
pub fn render_nts_stanza(settings: &NtsSettings) -> String {
    format!(
        "{GENERATED_HEADER}\n\
         ntsservercert {}\n\
         ntsserverkey {}\n\
         ntsdumpdir {}\n",
        settings.key_dir.join(FULLCHAIN).display(),
        settings.key_dir.join(PRIVKEY).display(),
        settings.dump_dir.display(),
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn some(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    // ── NtsRequest ────────────────────────────────────────────────────────────

    #[test]
    fn no_domain_means_not_requested() {
        assert_eq!(NtsRequest::from_options(None, some("a@b.c"), None).unwrap(), None);
        assert_eq!(NtsRequest::from_options(some("  "), None, None).unwrap(), None);
    }

    #[test]
    fn domain_without_email_is_fatal() {
        let err = NtsRequest::from_options(some("time.example.org"), None, None).unwrap_err();
        assert_eq!(err.to_string(), "NTS certificate requested but --email is missing");
    }

    #[test]
    fn dns_token_adds_plugin_package() {
        let plain = NtsRequest::from_options(some("t.example.org"), some("a@b.c"), None)
            .unwrap()
            .unwrap();
        assert_eq!(plain.packages(), vec!["certbot"]);

        let dns = NtsRequest::from_options(some("t.example.org"), some("a@b.c"), some("tok"))
            .unwrap()
            .unwrap();
        assert_eq!(dns.packages(), vec!["certbot", "python3-certbot-dns-cloudflare"]);
    }

    #[test]
    fn blank_token_is_ignored() {
        let r = NtsRequest::from_options(some("t.example.org"), some("a@b.c"), some(""))
            .unwrap()
            .unwrap();
        assert_eq!(r.dns_token, None);
    }

    // ── certbot_args ──────────────────────────────────────────────────────────

    fn request(credentials: Option<&str>) -> CertificateRequest {
        CertificateRequest {
            domain: "time.example.org".into(),
            email: "ops@example.org".into(),
            credentials: credentials.map(PathBuf::from),
            deploy_hook: PathBuf::from("/etc/letsencrypt/renewal-hooks/deploy/h.sh"),
        }
    }

    #[test]
    fn standalone_without_credentials() {
        let args = certbot_args(&request(None));
        assert_eq!(args[0], "certonly");
        assert!(args.contains(&"--standalone".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--dns")));
        let hook = args.iter().position(|a| a == "--deploy-hook").unwrap();
        assert_eq!(args[hook + 1], "/etc/letsencrypt/renewal-hooks/deploy/h.sh");
    }

    #[test]
    fn dns_challenge_with_credentials() {
        let args = certbot_args(&request(Some("/etc/letsencrypt/cf.ini")));
        let i = args
            .iter()
            .position(|a| a == "--dns-cloudflare-credentials")
            .unwrap();
        assert_eq!(args[i + 1], "/etc/letsencrypt/cf.ini");
        assert!(!args.contains(&"--standalone".to_string()));
    }

    // ── Rendering ─────────────────────────────────────────────────────────────

    #[test]
    fn deploy_hook_installs_pair_and_restarts_chrony() {
        let hook = render_deploy_hook(&NtsSettings::default(), "time.example.org", "chrony");
        assert!(hook.starts_with("#!/bin/sh\n# Generated by gpsclock."));
        assert!(hook.contains("src=\"/etc/letsencrypt/live/time.example.org\"\n"));
        assert!(hook.contains("dst=\"/etc/chrony/nts\"\n"));
        assert!(hook.contains(
            "install -m 0640 -o root -g _chrony \"$src/privkey.pem\" \"$dst/privkey.pem\"\n"
        ));
        assert!(hook.ends_with("systemctl restart chrony\n"));
    }

    #[test]
    fn nts_stanza_points_at_key_dir() {
        assert_eq!(
            render_nts_stanza(&NtsSettings::default()),
            "# Generated by gpsclock. Manual edits will be overwritten.\n\
             ntsservercert /etc/chrony/nts/fullchain.pem\n\
             ntsserverkey /etc/chrony/nts/privkey.pem\n\
             ntsdumpdir /var/lib/chrony\n"
        );
    }

    #[test]
    fn credentials_carry_token() {
        assert!(render_dns_credentials("s3cret").ends_with("dns_cloudflare_api_token = s3cret\n"));
    }
}
