/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Context;
use calfed_core::config::{default_config_path, FederationConfig};
use calfed_core::runtime::{init_tracing, serve};
use std::path::PathBuf;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let path = match std::env::args().nth(1) {
        Some(p) => PathBuf::from(p),
        None => default_config_path()?,
    };
    let cfg = if path.exists() {
        info!("config: {}", path.display());
        FederationConfig::load(&path)?
    } else {
        info!("no config at {}, using defaults", path.display());
        let mut cfg = FederationConfig::default();
        cfg.apply_env_overrides();
        cfg.validate()?;
        cfg
    };

    serve(cfg).await.context("calendar federation service")
}
