/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use directories::ProjectDirs;
use rand::rngs::OsRng;
use rsa::{
    pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding},
    RsaPrivateKey, RsaPublicKey,
};
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(Clone)]
pub struct Identity {
    pub public_key_pem: String,
    pub private_key_pem: String,
}

pub fn default_data_dir() -> Result<PathBuf> {
    if let Ok(v) = std::env::var("CALFED_DATA_DIR") {
        return Ok(PathBuf::from(v));
    }
    let proj = ProjectDirs::from("org", "calfed", "Calfed")
        .context("unable to determine platform data dir")?;
    Ok(proj.data_local_dir().to_path_buf())
}

pub fn main_key_id(actor_url: &str) -> String {
    format!("{actor_url}#main-key")
}

pub fn generate_identity() -> Result<Identity> {
    let mut rng = OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, 2048).context("generate rsa key")?;
    identity_from_private_key(&private_key)
}

/// One key per local actor, kept as `keys/{file_stem}.pem` under `dir`.
pub fn load_or_generate_identity(dir: impl AsRef<Path>, file_stem: &str) -> Result<Identity> {
    let dir = dir.as_ref().join("keys");
    fs::create_dir_all(&dir).with_context(|| format!("create key dir: {}", dir.display()))?;

    let priv_path = dir.join(format!("{}.pem", sanitize_stem(file_stem)));
    if priv_path.exists() {
        let pem = fs::read_to_string(&priv_path)
            .with_context(|| format!("read {}", priv_path.display()))?;
        let private_key = RsaPrivateKey::from_pkcs8_pem(&pem).context("parse private key pem")?;
        return identity_from_private_key(&private_key);
    }

    let identity = generate_identity()?;
    fs::write(&priv_path, &identity.private_key_pem)
        .with_context(|| format!("write {}", priv_path.display()))?;
    Ok(identity)
}

fn identity_from_private_key(private_key: &RsaPrivateKey) -> Result<Identity> {
    let private_key_pem = private_key.to_pkcs8_pem(LineEnding::LF)?.to_string();
    let public_key_pem = RsaPublicKey::from(private_key)
        .to_public_key_pem(LineEnding::LF)?
        .to_string();
    Ok(Identity {
        public_key_pem,
        private_key_pem,
    })
}

/// Percent-encoded, so distinct stems never share a file.
fn sanitize_stem(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}
