/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Test doubles shared across module tests.

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use serde_json::Value;
use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{Arc, Mutex, OnceLock},
    time::Duration,
};

use crate::keys::{generate_identity, Identity};
use crate::object_cache::RemoteObjectCache;
use crate::remote_fetch::RemoteFetcher;
use crate::ssrf::{HostResolver, SsrfGuard};
use crate::transport::{HttpTransport, TransportError, TransportResponse};

#[derive(Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn with(mut self, host: &str, ip: &str) -> Self {
        self.hosts
            .entry(host.to_string())
            .or_default()
            .push(ip.parse().expect("test ip"));
        self
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve(&self, host: &str, _port: u16) -> std::io::Result<Vec<IpAddr>> {
        self.hosts
            .get(host)
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "unknown host"))
    }
}

#[derive(Clone)]
enum Scripted {
    Response(StatusCode, Vec<u8>),
    Timeout,
}

#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, Scripted>>,
    gets: Mutex<Vec<(String, HeaderMap)>>,
    posts: Mutex<Vec<(String, HeaderMap, Vec<u8>)>>,
}

impl ScriptedTransport {
    pub fn json(self, uri: &str, v: Value) -> Self {
        self.set_json(uri, v);
        self
    }

    pub fn status(self, uri: &str, status: StatusCode) -> Self {
        self.raw(uri, status, Vec::new())
    }

    pub fn raw(self, uri: &str, status: StatusCode, body: Vec<u8>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(uri.to_string(), Scripted::Response(status, body));
        self
    }

    pub fn timeout(self, uri: &str) -> Self {
        self.routes.lock().unwrap().insert(uri.to_string(), Scripted::Timeout);
        self
    }

    pub fn set_json(&self, uri: &str, v: Value) {
        self.routes.lock().unwrap().insert(
            uri.to_string(),
            Scripted::Response(StatusCode::OK, serde_json::to_vec(&v).unwrap()),
        );
    }

    pub fn hits(&self, uri: &str) -> usize {
        self.gets.lock().unwrap().iter().filter(|(u, _)| u == uri).count()
    }

    pub fn total_hits(&self) -> usize {
        self.gets.lock().unwrap().len()
    }

    pub fn last_headers(&self, uri: &str) -> Option<HeaderMap> {
        self.gets
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(u, _)| u == uri)
            .map(|(_, h)| h.clone())
    }

    pub fn posts(&self) -> Vec<(String, HeaderMap, Vec<u8>)> {
        self.posts.lock().unwrap().clone()
    }

    fn answer(&self, uri: &str) -> Result<TransportResponse, TransportError> {
        let route = self.routes.lock().unwrap().get(uri).cloned();
        match route {
            Some(Scripted::Response(status, body)) => Ok(TransportResponse {
                status,
                headers: HeaderMap::new(),
                body,
            }),
            Some(Scripted::Timeout) => Err(TransportError::Timeout),
            None => Ok(TransportResponse {
                status: StatusCode::NOT_FOUND,
                headers: HeaderMap::new(),
                body: Vec::new(),
            }),
        }
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn fetch(
        &self,
        uri: &str,
        headers: &HeaderMap,
        _timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        self.gets.lock().unwrap().push((uri.to_string(), headers.clone()));
        self.answer(uri)
    }

    async fn post(
        &self,
        uri: &str,
        headers: &HeaderMap,
        body: Vec<u8>,
        _timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        self.posts
            .lock()
            .unwrap()
            .push((uri.to_string(), headers.clone(), body));
        Ok(TransportResponse {
            status: StatusCode::ACCEPTED,
            headers: HeaderMap::new(),
            body: Vec::new(),
        })
    }
}

pub fn fetcher_with(transport: Arc<ScriptedTransport>, resolver: StaticResolver) -> RemoteFetcher {
    RemoteFetcher::new(
        SsrfGuard::new(Arc::new(resolver)),
        Arc::new(RemoteObjectCache::default()),
        transport,
        Duration::from_secs(2),
        "calfed-test/0",
    )
}

/// RSA keygen is slow in debug builds; share two identities per test binary.
pub fn identity_a() -> &'static Identity {
    static KEY: OnceLock<Identity> = OnceLock::new();
    KEY.get_or_init(|| generate_identity().expect("keygen"))
}

pub fn identity_b() -> &'static Identity {
    static KEY: OnceLock<Identity> = OnceLock::new();
    KEY.get_or_init(|| generate_identity().expect("keygen"))
}
