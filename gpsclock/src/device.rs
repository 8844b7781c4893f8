/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Candidate device enumeration.
//!
//! Two views of the same glob list:
//!
//! * [`DeviceTree::expand`] turns one pattern into the character devices that
//!   currently exist, for the serial probe.
//! * [`DevicePathPattern`] turns the whole list into a regex that finds a
//!   device path inside free-form text, for the gpsd "already managed" check.
//!
//! Keeping both here means a path the probe would scan is exactly a path the
//! gpsd check recognises.

use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

/// Expands a glob pattern into existing character devices.
///
/// Implementations must preserve a stable order (the probe's first-match
/// rule depends on it) and must skip, not report, anything that is missing
/// or not a character device.
pub trait DeviceTree {
    fn expand(&self, pattern: &str) -> Vec<PathBuf>;
}

/// The live `/dev` tree.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysDevices;

impl DeviceTree for SysDevices {
    fn expand(&self, pattern: &str) -> Vec<PathBuf> {
        let entries = match glob::glob(pattern) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(pattern, error = %e, "invalid device pattern, skipping");
                return Vec::new();
            }
        };

        entries
            .flatten()
            .filter(|path| is_char_device(path))
            .collect()
    }
}

/// `true` if `path` (after following symlinks) is a character device.
pub fn is_char_device(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.file_type().is_char_device())
        .unwrap_or(false)
}

// ── Path-shape pattern ────────────────────────────────────────────────────────

/// Regex matching any device path the candidate globs could produce.
///
/// Glob syntax is narrowed to the device naming convention: `*` becomes
/// `[0-9]+` and `?` becomes `[0-9]`, so `/dev/ttyUSB*` recognises
/// `/dev/ttyUSB0` but not the `/dev/ttyUSB` prefix of unrelated text.
/// Bracket classes (`[0-3]`, `[!0]`) keep their glob meaning.
///
/// An empty glob list matches nothing.
#[derive(Debug, Clone)]
pub struct DevicePathPattern {
    regex: Option<Regex>,
}

impl DevicePathPattern {
    pub fn from_globs<S: AsRef<str>>(globs: &[S]) -> Result<Self, regex::Error> {
        let alternatives: Vec<String> = globs
            .iter()
            .map(|g| g.as_ref())
            .filter(|g| !g.is_empty())
            .map(glob_to_regex)
            .collect();
        if alternatives.is_empty() {
            return Ok(Self { regex: None });
        }
        let regex = Regex::new(&format!("(?:{})", alternatives.join("|")))?;
        Ok(Self { regex: Some(regex) })
    }

    /// First device path found in `text`, if any.
    pub fn first_match(&self, text: &str) -> Option<PathBuf> {
        self.regex
            .as_ref()?
            .find(text)
            .map(|m| PathBuf::from(m.as_str()))
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    let mut literal = String::new();
    let mut rest = glob;
    while let Some(c) = rest.chars().next() {
        let wildcard = match c {
            '*' => Some(("[0-9]+".to_string(), 1)),
            '?' => Some(("[0-9]".to_string(), 1)),
            '[' => bracket_class(rest),
            _ => None,
        };
        match wildcard {
            Some((class, len)) => {
                out.push_str(&regex::escape(&literal));
                literal.clear();
                out.push_str(&class);
                rest = &rest[len..];
            }
            None => {
                literal.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }
    out.push_str(&regex::escape(&literal));
    out
}

/// The `[...]` class opening `glob` as a regex class, plus the bytes it
/// spans.  `None` when the bracket is never closed; it is then literal, as
/// for the shell.
fn bracket_class(glob: &str) -> Option<(String, usize)> {
    let body = &glob[1..];
    let (negated, body) = match body.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, body),
    };
    // A `]` right after the opening bracket is a member.
    let skip = usize::from(body.starts_with(']'));
    let close = skip + body[skip..].find(']')?;

    let mut class = String::from(if negated { "[^" } else { "[" });
    for c in body[..close].chars() {
        if matches!(c, '\\' | '[' | ']' | '^' | '&' | '~') {
            class.push('\\');
        }
        class.push(c);
    }
    class.push(']');
    Some((class, 1 + usize::from(negated) + close + 1))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
