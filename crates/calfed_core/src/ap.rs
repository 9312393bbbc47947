/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use axum::{
    body::Body,
    http::{header, HeaderValue, Request, Response, StatusCode},
};
use calfed_protocol::OrderedCollection;
use futures_util::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use tracing::{error, warn};

use crate::actor::ActorKind;
use crate::error::FederationError;
use crate::federation::Federation;

#[derive(Clone)]
pub struct ApState {
    pub fed: Federation,
    pub max_body_bytes: usize,
}

pub async fn handle_request(state: &ApState, req: Request<Body>) -> Response<Body> {
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let resp = match (req.method().as_str(), segments.as_slice()) {
        ("GET", ["healthz"]) => simple(StatusCode::OK, "ok"),
        ("GET", [".well-known", "webfinger"]) => webfinger(state, req).await,
        ("GET", [seg, name]) => match actor_kind(seg, name) {
            Some(kind) => actor_get(state, kind, name).await,
            None => not_found(),
        },
        ("GET", [seg, name, "outbox"]) => match actor_kind(seg, name) {
            Some(kind) => outbox_get(state, kind, name).await,
            None => not_found(),
        },
        ("GET", [seg, name, "inbox"]) if actor_kind(seg, name).is_some() => {
            simple(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
        }
        ("POST", [seg, name, "inbox"]) => match actor_kind(seg, name) {
            Some(kind) => {
                let name = name.to_string();
                inbox(state, kind, &name, req).await
            }
            None => not_found(),
        },
        _ => not_found(),
    };
    add_security_headers(resp)
}

fn actor_kind(segment: &str, name: &str) -> Option<ActorKind> {
    if name.is_empty() {
        return None;
    }
    ActorKind::from_path_segment(segment)
}

fn add_security_headers(mut resp: Response<Body>) -> Response<Body> {
    let headers = resp.headers_mut();
    headers.entry("X-Content-Type-Options").or_insert(HeaderValue::from_static("nosniff"));
    headers.entry("Referrer-Policy").or_insert(HeaderValue::from_static("no-referrer"));
    resp
}

async fn webfinger(state: &ApState, req: Request<Body>) -> Response<Body> {
    let resource = req
        .uri()
        .query()
        .and_then(|q| q.split('&').find(|p| p.starts_with("resource=")))
        .and_then(|p| p.split_once('='))
        .map(|(_, v)| {
            let v = v.replace('+', " ");
            urlencoding::decode(&v).map(|s| s.into_owned()).unwrap_or(v)
        })
        .unwrap_or_default();
    if resource.is_empty() {
        return simple(StatusCode::BAD_REQUEST, "missing resource");
    }
    match state.fed.resolver().webfinger_for_resource(&resource).await {
        Ok(Some(record)) => jrd(StatusCode::OK, &record),
        Ok(None) => not_found(),
        Err(e) => internal(FederationError::Internal(e)),
    }
}

async fn actor_get(state: &ApState, kind: ActorKind, name: &str) -> Response<Body> {
    match state.fed.resolver().lookup_profile(kind, name).await {
        Ok(Some(doc)) => json_activity(StatusCode::OK, &doc),
        Ok(None) => not_found(),
        Err(e) => internal(FederationError::Internal(e)),
    }
}

async fn outbox_get(state: &ApState, kind: ActorKind, name: &str) -> Response<Body> {
    let exists = match kind {
        ActorKind::Calendar => state.fed.store().get_calendar_by_name(name).await.map(|c| c.is_some()),
        ActorKind::User => state.fed.store().get_account_by_username(name).await.map(|a| a.is_some()),
    };
    match exists {
        Ok(true) => {
            let id = format!("{}/outbox", state.fed.resolver().local_actor_url(kind, name));
            json_activity(StatusCode::OK, &OrderedCollection::empty(id))
        }
        Ok(false) => not_found(),
        Err(e) => internal(FederationError::Internal(e)),
    }
}

async fn inbox(state: &ApState, kind: ActorKind, name: &str, req: Request<Body>) -> Response<Body> {
    let (parts, body) = req.into_parts();
    let body_bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(b) => b,
        Err(_) => return simple(StatusCode::BAD_REQUEST, "invalid body"),
    };

    let fut = state
        .fed
        .receive_activity(kind, name, &parts.method, &parts.uri, &parts.headers, &body_bytes);
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(_)) => simple(StatusCode::OK, "ok"),
        Ok(Err(e @ FederationError::Internal(_))) => internal(e),
        Ok(Err(e)) => {
            warn!(inbox = %parts.uri.path(), status = e.status().as_u16(), "inbox rejected: {e}");
            simple(e.status(), &e.public_message())
        }
        Err(_) => {
            error!(inbox = %parts.uri.path(), "inbox handler panicked");
            simple(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

fn internal(e: FederationError) -> Response<Body> {
    error!("{e}");
    simple(e.status(), &e.public_message())
}

fn json_activity<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    let body = serde_json::to_vec(value).unwrap_or_default();
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = status;
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/activity+json; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    resp
}

fn jrd<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    let body = serde_json::to_vec(value).unwrap_or_default();
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = status;
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/jrd+json; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    resp
}

fn not_found() -> Response<Body> {
    simple(StatusCode::NOT_FOUND, "not found")
}

fn simple(status: StatusCode, msg: &str) -> Response<Body> {
    let mut resp = Response::new(Body::from(msg.to_string()));
    *resp.status_mut() = status;
    resp
}
