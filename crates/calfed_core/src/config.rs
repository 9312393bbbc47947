/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{bail, Context, Result};
use std::{path::{Path, PathBuf}, time::Duration};

use crate::keys::default_data_dir;

pub const DEFAULT_USER_AGENT: &str = concat!("calfed/", env!("CARGO_PKG_VERSION"));

#[derive(Clone, Debug, serde::Deserialize)]
pub struct FederationConfig {
    /// Host part of every local actor URI and `acct:` subject.
    pub domain: String,
    /// Defaults to `https://{domain}` when empty.
    #[serde(default, alias = "base_url")]
    pub public_base_url: String,
    pub bind: String,
    #[serde(default)]
    pub data_dir: Option<String>,
    /// Bound for every outbound request (seconds).
    #[serde(default)]
    pub http_timeout_secs: Option<u64>,
    /// Remote object cache TTL (seconds).
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub max_date_skew_secs: Option<u64>,
    /// Max inbound request body size (bytes).
    #[serde(default)]
    pub max_body_bytes: Option<usize>,
    /// Calendars served by the bundled in-memory calendar store.
    #[serde(default)]
    pub calendars: Vec<CalendarSeed>,
    #[serde(default)]
    pub accounts: Vec<AccountSeed>,
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct CalendarSeed {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    /// Account ids allowed to edit this calendar.
    #[serde(default)]
    pub editors: Vec<String>,
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct AccountSeed {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            domain: "calendar.example.invalid".to_string(),
            public_base_url: String::new(),
            bind: "127.0.0.1:8790".to_string(),
            data_dir: None,
            http_timeout_secs: Some(10),
            cache_ttl_secs: Some(3600),
            user_agent: None,
            max_date_skew_secs: Some(3600),
            max_body_bytes: Some(1024 * 1024),
            calendars: Vec::new(),
            accounts: Vec::new(),
        }
    }
}

impl FederationConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        let mut cfg: FederationConfig = serde_json::from_str(&text)
            .with_context(|| format!("parse config json from {}", path.display()))?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CALFED_DATA_DIR") {
            if !v.trim().is_empty() {
                self.data_dir = Some(v);
            }
        }
        if let Ok(v) = std::env::var("CALFED_BIND") {
            if !v.trim().is_empty() {
                self.bind = v;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.domain.trim().is_empty() {
            bail!("domain must not be empty");
        }
        if self.domain.contains('/') || self.domain.contains('@') {
            bail!("domain must be a bare host name: {}", self.domain);
        }
        Ok(())
    }

    pub fn base_url(&self) -> String {
        let base = self.public_base_url.trim();
        if base.is_empty() {
            format!("https://{}", self.domain.trim())
        } else {
            base.trim_end_matches('/').to_string()
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.unwrap_or(10).clamp(1, 120))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs.unwrap_or(3600))
    }

    pub fn max_date_skew(&self) -> Duration {
        Duration::from_secs(self.max_date_skew_secs.unwrap_or(3600))
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes.unwrap_or(1024 * 1024).clamp(1024, 16 * 1024 * 1024)
    }

    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("{DEFAULT_USER_AGENT} (+{})", self.base_url()))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => default_data_dir(),
        }
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    if let Ok(v) = std::env::var("CALFED_CONFIG") {
        return Ok(PathBuf::from(v));
    }
    let proj = directories::ProjectDirs::from("org", "calfed", "Calfed")
        .context("unable to determine platform config dir")?;
    Ok(proj.config_dir().join("config.json"))
}
