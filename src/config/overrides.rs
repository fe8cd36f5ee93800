//! # Tuning Overrides
//!
//! `Config` holds `name.key = value` pairs that override the sizing parameters
//! pools are opened with. The text format is one pair per line:
//!
//! ```text
//! # comment
//! ; also a comment
//! strings.data.shift = 14;
//! strings.index.max-atoms = 1 << 20;
//! nodes.atom-size 0x20
//! ```
//!
//! The `=` and trailing `;` are optional. Integers accept decimal, `0x` hex,
//! leading-zero octal and the shift form `1<<N`. Lines that do not parse are
//! skipped.

use std::collections::HashMap;
use std::path::Path;

use eyre::{Result, WrapErr};

#[derive(Debug, Clone, Default)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Self {
        let mut config = Self::new();

        for line in text.lines() {
            if let Some((name, value)) = parse_line(line) {
                config.values.insert(name.to_string(), value.to_string());
            }
        }

        config
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config file '{}'", path.display()))?;

        let config = Self::parse(&text);
        tracing::debug!(path = %path.display(), entries = config.len(), "loaded config");
        Ok(config)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Builds the `base.ext` name used for sub-tables and lookups.
    pub fn name(base: &str, ext: &str) -> String {
        if base.is_empty() {
            ext.to_string()
        } else {
            format!("{}.{}", base, ext)
        }
    }

    pub fn value(&self, base: &str, key: &str) -> Option<&str> {
        let name = Self::name(base, key);
        let value = self.values.get(&name).map(String::as_str);
        tracing::debug!(name = %name, value = ?value, "config lookup");
        value
    }

    pub fn value32(&self, base: &str, key: &str, default: u32) -> u32 {
        self.value(base, key)
            .and_then(parse_u32)
            .unwrap_or(default)
    }

    /// Like `value32`, but a non-zero default acts as a floor.
    pub fn value32_min(&self, base: &str, key: &str, default: u32) -> u32 {
        match self.value(base, key).and_then(parse_u32) {
            Some(val) if default == 0 || val > default => val,
            _ => default,
        }
    }
}

fn parse_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
        return None;
    }

    let name_end = line
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(line.len());
    let name = &line[..name_end];
    if name.is_empty() {
        return None;
    }

    let rest = line[name_end..].trim_start();
    let rest = rest.strip_prefix('=').unwrap_or(rest);
    let value = match rest.find(';') {
        Some(end) => &rest[..end],
        None => rest,
    }
    .trim();

    if value.is_empty() {
        return None;
    }

    Some((name, value))
}

pub(crate) fn parse_u32(text: &str) -> Option<u32> {
    let text = text.trim();

    if let Some(shift) = text.strip_prefix('1') {
        let shift = shift.trim_start();
        if let Some(n) = shift.strip_prefix("<<") {
            let n: u32 = n.trim().parse().ok()?;
            return if n < 32 { Some(1u32 << n) } else { None };
        }
    }

    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok();
    }

    if text.len() > 1 && text.starts_with('0') {
        return u32::from_str_radix(&text[1..], 8).ok();
    }

    text.parse().ok()
}
