/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use axum::{routing::any, Router};
use std::{net::SocketAddr, path::Path, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use crate::actor::{actor_url, ActorKind};
use crate::ap::{handle_request, ApState};
use crate::calendar_store::InMemoryCalendarStore;
use crate::config::FederationConfig;
use crate::federation::{Federation, FederationDeps};
use crate::keys::load_or_generate_identity;
use crate::membership::MembershipStore;
use crate::ssrf::{HostResolver, SystemResolver};
use crate::transport::ReqwestTransport;

/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .try_init()
        .ok();
}

/// In-memory calendar store filled from the config seeds. Every seeded
/// calendar and account gets a persisted signing key under `data_dir`.
pub fn seed_store(cfg: &FederationConfig, data_dir: &Path) -> Result<InMemoryCalendarStore> {
    let store = InMemoryCalendarStore::default();
    let base = cfg.base_url();
    for seed in &cfg.accounts {
        let identity = load_or_generate_identity(data_dir, &format!("user-{}", seed.username))
            .with_context(|| format!("key for account {}", seed.username))?;
        let mut account = store.add_account(&seed.id, &seed.username, Some(&identity));
        account.display_name = seed.display_name.clone();
        store.put_account(account);
    }
    for seed in &cfg.calendars {
        let identity = load_or_generate_identity(data_dir, &format!("calendar-{}", seed.name))
            .with_context(|| format!("key for calendar {}", seed.name))?;
        let id = actor_url(&base, ActorKind::Calendar, &seed.name);
        let mut calendar = store.add_calendar(&id, &seed.name, Some(&identity));
        calendar.display_name = seed.display_name.clone();
        calendar.summary = seed.summary.clone();
        store.put_calendar(calendar);
        for editor in &seed.editors {
            store.allow_editor(editor, &id);
        }
    }
    info!(calendars = cfg.calendars.len(), accounts = cfg.accounts.len(), "calendar store seeded");
    Ok(store)
}

pub fn build_state(cfg: &FederationConfig) -> Result<ApState> {
    let data_dir = cfg.data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("create data dir: {}", data_dir.display()))?;
    let store = Arc::new(seed_store(cfg, &data_dir)?);
    let membership = MembershipStore::open(data_dir.join("membership.db"))
        .context("open membership db")?;
    let dns: Arc<dyn HostResolver> = Arc::new(SystemResolver);
    let transport = Arc::new(ReqwestTransport::new(&cfg.user_agent(), dns.clone())?);
    let fed = Federation::new(
        cfg,
        FederationDeps {
            store,
            membership,
            transport,
            dns,
            delivery: None,
        },
    );
    Ok(ApState {
        fed,
        max_body_bytes: cfg.max_body_bytes(),
    })
}

pub fn router(state: ApState) -> Router {
    let max_body_bytes = state.max_body_bytes;
    Router::new()
        .fallback(any(move |req| {
            let st = state.clone();
            async move { handle_request(&st, req).await }
        }))
        .layer(axum::extract::DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

/// Runs until ctrl-c.
pub async fn serve(cfg: FederationConfig) -> Result<()> {
    let state = build_state(&cfg)?;
    let addr: SocketAddr = cfg.bind.parse().context("parse bind")?;
    let listener = tokio::net::TcpListener::bind(addr).await.context("bind")?;
    info!(domain = %cfg.domain, base_url = %cfg.base_url(), "calendar federation listening on http://{addr}");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
    };
    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
        .context("serve")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar_store::CalendarStore;
    use crate::config::{AccountSeed, CalendarSeed};
    use axum::body::Body;
    use http::{Request, StatusCode};
    use tower::ServiceExt;

    fn cfg(dir: &Path) -> FederationConfig {
        FederationConfig {
            domain: "example.org".to_string(),
            data_dir: Some(dir.display().to_string()),
            calendars: vec![CalendarSeed {
                name: "acme".to_string(),
                display_name: Some("Acme".to_string()),
                summary: None,
                editors: vec!["acct-1".to_string()],
            }],
            accounts: vec![AccountSeed {
                id: "acct-1".to_string(),
                username: "alice".to_string(),
                display_name: None,
            }],
            ..FederationConfig::default()
        }
    }

    #[tokio::test]
    async fn seeded_store_has_keys_and_editors() {
        let dir = tempfile::tempdir().unwrap();
        let store = seed_store(&cfg(dir.path()), dir.path()).unwrap();
        let cal = store.get_calendar_by_name("acme").await.unwrap().unwrap();
        assert_eq!(cal.id, "https://example.org/calendars/acme");
        assert!(cal.private_key_pem.is_some());
        let alice = store.get_account_by_username("alice").await.unwrap().unwrap();
        assert!(store.user_can_modify_calendar(&alice, &cal).await.unwrap());

        // Keys survive a restart.
        let again = seed_store(&cfg(dir.path()), dir.path()).unwrap();
        let cal2 = again.get_calendar_by_name("acme").await.unwrap().unwrap();
        assert_eq!(cal.public_key_pem, cal2.public_key_pem);
    }

    #[tokio::test]
    async fn router_serves_profiles() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let app = router(build_state(&cfg(dir.path())).unwrap());
        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(Request::builder().uri("/calendars/acme").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("x-content-type-options").unwrap(), "nosniff");
    }
}
