/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use http::{HeaderMap, Method, StatusCode, Uri};
use httpdate::parse_http_date;
use rsa::{
    pkcs1v15::{SigningKey, VerifyingKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey},
    signature::{RandomizedSigner, SignatureEncoding, Verifier},
    RsaPrivateKey, RsaPublicKey,
};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::{collections::HashMap, time::Duration};
use tracing::{debug, warn};

use crate::actor::{ActorResolver, RemoteActorKey};

#[derive(Debug)]
pub struct SignatureParams {
    pub key_id: String,
    pub algorithm: Option<String>,
    pub headers: Vec<String>,
    pub signature: Vec<u8>,
}

pub fn parse_signature_header(value: &str) -> Result<SignatureParams> {
    // Signature: keyId="...",headers="(request-target) host date",signature="base64..."
    let mut map = HashMap::<String, String>::new();
    for part in value.split(',') {
        let part = part.trim();
        let Some((k, v)) = part.split_once('=') else { continue };
        let v = v.trim().trim_matches('"');
        map.insert(k.trim().to_string(), v.to_string());
    }

    let key_id = map
        .get("keyId")
        .cloned()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| anyhow!("Signature missing keyId"))?;
    let headers = map
        .get("headers")
        .cloned()
        .unwrap_or_else(|| "date".to_string());
    let signature_b64 = map
        .get("signature")
        .cloned()
        .ok_or_else(|| anyhow!("Signature missing signature"))?;

    let signature = B64
        .decode(signature_b64.as_bytes())
        .context("decode signature")?;

    Ok(SignatureParams {
        key_id,
        algorithm: map.get("algorithm").cloned(),
        headers: headers
            .split_whitespace()
            .map(|s| s.to_ascii_lowercase())
            .collect(),
        signature,
    })
}

pub fn build_signing_string(method: &Method, uri: &Uri, headers: &HeaderMap, signed_headers: &[String]) -> Result<String> {
    let mut out = String::new();
    for (i, name) in signed_headers.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if name == "(request-target)" {
            let path = uri.path();
            let query = uri.query().map(|q| format!("?{q}")).unwrap_or_default();
            out.push_str("(request-target): ");
            out.push_str(&method.as_str().to_ascii_lowercase());
            out.push(' ');
            out.push_str(path);
            out.push_str(&query);
            continue;
        }

        let header_name = http::header::HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("bad signed header name: {name}"))?;
        let value = headers
            .get(&header_name)
            .ok_or_else(|| anyhow!("missing signed header: {name}"))?
            .to_str()
            .with_context(|| format!("invalid header value for {name}"))?;
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value.trim());
    }
    Ok(out)
}

pub fn verify_digest_if_present(headers: &HeaderMap, body: &[u8]) -> Result<()> {
    let Some(digest) = headers.get("Digest") else {
        return Ok(());
    };
    let digest = digest.to_str().context("Digest header not utf8")?;
    // Digest: SHA-256=base64
    let Some((alg, value)) = digest.split_once('=') else {
        return Err(anyhow!("invalid Digest header"));
    };
    if alg.trim().eq_ignore_ascii_case("SHA-256") {
        let expected = B64.decode(value.trim().as_bytes()).context("decode digest")?;
        let actual = Sha256::digest(body);
        if expected.as_slice() != actual.as_slice() {
            return Err(anyhow!("digest mismatch"));
        }
        return Ok(());
    }
    Err(anyhow!("unsupported digest alg: {alg}"))
}

pub fn verify_date(headers: &HeaderMap, max_skew: Duration) -> Result<()> {
    let date = headers
        .get("Date")
        .ok_or_else(|| anyhow!("missing Date header"))?
        .to_str()
        .context("Date header not utf8")?;
    let ts = parse_http_date(date).context("parse Date header")?;
    let now = std::time::SystemTime::now();
    let diff = if now > ts {
        now.duration_since(ts).unwrap_or_default()
    } else {
        ts.duration_since(now).unwrap_or_default()
    };
    if diff > max_skew {
        return Err(anyhow!("Date skew too large: {}s", diff.as_secs()));
    }
    Ok(())
}

pub fn verify_signature_rsa_sha256(public_key_pem: &str, signing_string: &str, signature: &[u8]) -> Result<()> {
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .context("parse public key pem")?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    let sig = rsa::pkcs1v15::Signature::try_from(signature)
        .context("invalid rsa signature bytes")?;
    verifying_key
        .verify(signing_string.as_bytes(), &sig)
        .context("signature verify failed")?;
    Ok(())
}

pub fn sign_request_rsa_sha256(
    private_key_pem: &str,
    key_id: &str,
    method: &Method,
    uri: &Uri,
    headers: &mut HeaderMap,
    body: &[u8],
    signed_headers: &[&str],
) -> Result<()> {
    if !headers.contains_key("Date") {
        let date = httpdate::fmt_http_date(std::time::SystemTime::now());
        headers.insert("Date", date.parse().context("set Date")?);
    }

    let mut signed_headers_lower: Vec<String> = signed_headers.iter().map(|s| s.to_ascii_lowercase()).collect();
    if !body.is_empty() && !signed_headers_lower.iter().any(|h| h == "digest") {
        signed_headers_lower.push("digest".to_string());
    }
    if !headers.contains_key("Digest") && signed_headers_lower.iter().any(|h| h == "digest") {
        let digest_b64 = B64.encode(Sha256::digest(body));
        headers.insert(
            "Digest",
            format!("SHA-256={digest_b64}")
                .parse()
                .context("set Digest")?,
        );
    }

    if !headers.contains_key("Host") {
        if let Some(auth) = uri.authority() {
            headers.insert("Host", auth.as_str().parse().context("set Host")?);
        }
    }

    let signing_string = build_signing_string(method, uri, headers, &signed_headers_lower)?;

    let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .context("parse private key pem")?;
    let signing_key = SigningKey::<Sha256>::new(private_key);
    let mut rng = rand::rngs::OsRng;
    let signature = signing_key.sign_with_rng(&mut rng, signing_string.as_bytes());
    let sig_b64 = B64.encode(signature.to_bytes());

    let headers_list = signed_headers_lower.join(" ");
    let sig_header = format!(
        "keyId=\"{key_id}\",algorithm=\"rsa-sha256\",headers=\"{headers_list}\",signature=\"{sig_b64}\""
    );
    headers.insert("Signature", sig_header.parse().context("set Signature")?);
    Ok(())
}

/// Where an inbound request stopped (or finished) in verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStage {
    Received,
    Parsed,
    KeyFetched,
    Verified,
    PermissionChecked,
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Last stage passed before the request was turned away.
    pub stage: VerifyStage,
    pub status: StatusCode,
    pub reason: &'static str,
}

impl Rejection {
    fn new(stage: VerifyStage, status: StatusCode, reason: &'static str) -> Self {
        Self { stage, status, reason }
    }
}

#[derive(Debug, Clone)]
pub struct VerifiedRequest {
    pub signer: RemoteActorKey,
    /// Parsed request body; its `actor` is the signer.
    pub body: Value,
    pub stage: VerifyStage,
}

/// The activity's `actor` must name exactly the actor that owns the signing
/// key. A trailing `/` is the only tolerated difference.
pub fn actor_matches_signer(claimed: &str, signer_actor_url: &str) -> bool {
    let claimed = claimed.trim();
    !claimed.is_empty() && claimed.trim_end_matches('/') == signer_actor_url.trim_end_matches('/')
}

pub fn claimed_actor(body: &Value) -> Option<&str> {
    match body.get("actor")? {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("id").and_then(|v| v.as_str()),
        _ => None,
    }
}

#[derive(Clone)]
pub struct SignatureVerifier {
    resolver: ActorResolver,
    max_date_skew: Duration,
}

impl SignatureVerifier {
    pub fn new(resolver: ActorResolver, max_date_skew: Duration) -> Self {
        Self {
            resolver,
            max_date_skew,
        }
    }

    pub async fn verify(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<VerifiedRequest, Rejection> {
        use VerifyStage::*;
        let unauthorized = |stage, reason| Rejection::new(stage, StatusCode::UNAUTHORIZED, reason);

        // Received
        let Some(sig_header) = signature_header(headers) else {
            return Err(unauthorized(Received, "signature required"));
        };

        // Parsed
        let sig = parse_signature_header(sig_header).map_err(|e| {
            debug!("bad Signature header: {e:#}");
            unauthorized(Received, "invalid signature format")
        })?;
        let signing_string = build_signing_string(method, uri, headers, &sig.headers).map_err(|e| {
            debug!(key_id = %sig.key_id, "bad signed headers: {e:#}");
            unauthorized(Parsed, "invalid signature format")
        })?;
        if !body.is_empty() {
            let digest_signed = sig.headers.iter().any(|h| h == "digest");
            if !digest_signed || verify_digest_if_present(headers, body).is_err() {
                return Err(unauthorized(Parsed, "invalid signature"));
            }
        }
        // Date must be signed and fresh.
        if !sig.headers.iter().any(|h| h == "date") {
            debug!(key_id = %sig.key_id, "Date not among signed headers");
            return Err(unauthorized(Parsed, "invalid signature"));
        }
        if let Err(e) = verify_date(headers, self.max_date_skew) {
            debug!(key_id = %sig.key_id, "date rejected: {e:#}");
            return Err(unauthorized(Parsed, "invalid signature"));
        }

        // KeyFetched
        let Some(mut signer) = self.resolver.resolve_remote_key(&sig.key_id).await else {
            warn!(key_id = %sig.key_id, "signer key unavailable");
            return Err(unauthorized(Parsed, "could not retrieve public key"));
        };

        // Verified, with one uncached refetch in case the key was rotated.
        if let Err(e) = verify_signature_rsa_sha256(&signer.public_key_pem, &signing_string, &sig.signature) {
            let refreshed = self
                .resolver
                .refresh_remote_key(&sig.key_id)
                .await
                .filter(|k| k.public_key_pem != signer.public_key_pem);
            let Some(fresh) = refreshed else {
                warn!(actor = %signer.actor_url, "signature rejected: {e:#}");
                return Err(unauthorized(KeyFetched, "invalid signature"));
            };
            if let Err(e) = verify_signature_rsa_sha256(&fresh.public_key_pem, &signing_string, &sig.signature) {
                warn!(actor = %fresh.actor_url, "signature rejected after key refresh: {e:#}");
                return Err(unauthorized(KeyFetched, "invalid signature"));
            }
            debug!(actor = %fresh.actor_url, "signer key refreshed");
            signer = fresh;
        }

        // PermissionChecked
        let parsed: Value = serde_json::from_slice(body)
            .map_err(|_| Rejection::new(Verified, StatusCode::BAD_REQUEST, "invalid message"))?;
        let Some(claimed) = claimed_actor(&parsed) else {
            return Err(Rejection::new(Verified, StatusCode::BAD_REQUEST, "invalid message"));
        };
        if !actor_matches_signer(claimed, &signer.actor_url) {
            warn!(actor = %signer.actor_url, %claimed, "activity actor does not match signer");
            return Err(Rejection::new(
                Verified,
                StatusCode::FORBIDDEN,
                "actor does not have permission for this operation",
            ));
        }

        Ok(VerifiedRequest {
            signer,
            body: parsed,
            stage: Accepted,
        })
    }
}

fn signature_header(headers: &HeaderMap) -> Option<&str> {
    if let Some(v) = headers.get("Signature").and_then(|v| v.to_str().ok()) {
        return Some(v);
    }
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Signature "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar_store::InMemoryCalendarStore;
    use crate::keys::Identity;
    use crate::test_support::{fetcher_with, identity_a, identity_b, ScriptedTransport, StaticResolver};
    use serde_json::json;
    use std::sync::Arc;

    const BOB: &str = "https://remote.example/users/bob";
    const KEY_ID: &str = "https://remote.example/users/bob#main-key";

    fn actor_doc(id: &str, pem: &str) -> Value {
        json!({
            "id": id,
            "type": "Person",
            "inbox": format!("{id}/inbox"),
            "publicKey": {"id": format!("{id}#main-key"), "owner": id, "publicKeyPem": pem}
        })
    }

    fn verifier(bob_pem: &str) -> SignatureVerifier {
        verifier_over(Arc::new(ScriptedTransport::default().json(BOB, actor_doc(BOB, bob_pem))))
    }

    fn verifier_over(transport: Arc<ScriptedTransport>) -> SignatureVerifier {
        let fetcher = fetcher_with(transport, StaticResolver::default().with("remote.example", "93.184.216.34"));
        let resolver = ActorResolver::new(
            "https://example.org",
            "example.org",
            Arc::new(InMemoryCalendarStore::default()),
            fetcher,
        );
        SignatureVerifier::new(resolver, Duration::from_secs(300))
    }

    fn signed(key_id: &str, body: &Value) -> (Method, Uri, HeaderMap, Vec<u8>) {
        signed_with(identity_a(), key_id, body, None, &["(request-target)", "host", "date", "digest"])
    }

    fn signed_with(
        identity: &Identity,
        key_id: &str,
        body: &Value,
        date: Option<&str>,
        covered: &[&str],
    ) -> (Method, Uri, HeaderMap, Vec<u8>) {
        let body = serde_json::to_vec(body).unwrap();
        let uri: Uri = "https://example.org/calendars/acme/inbox".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", "application/activity+json".parse().unwrap());
        if let Some(date) = date {
            headers.insert("Date", date.parse().unwrap());
        }
        sign_request_rsa_sha256(
            &identity.private_key_pem,
            key_id,
            &Method::POST,
            &uri,
            &mut headers,
            &body,
            covered,
        )
        .unwrap();
        (Method::POST, uri, headers, body)
    }

    fn create_by(actor: &str) -> Value {
        json!({
            "id": "https://remote.example/events/42/create",
            "type": "Create",
            "actor": actor,
            "object": {"id": "https://remote.example/events/42", "type": "Event"}
        })
    }

    #[test]
    fn signature_header_parsing() {
        let p = parse_signature_header(
            r#"keyId="https://remote.example/users/bob#main-key",algorithm="rsa-sha256",headers="(request-target) Host date",signature="AAEC""#,
        )
        .unwrap();
        assert_eq!(p.key_id, KEY_ID);
        assert_eq!(p.algorithm.as_deref(), Some("rsa-sha256"));
        assert_eq!(p.headers, vec!["(request-target)", "host", "date"]);
        assert_eq!(p.signature, vec![0, 1, 2]);

        assert!(parse_signature_header(r#"algorithm="rsa-sha256",signature="AAEC""#).is_err());
        assert!(parse_signature_header(r#"keyId="",signature="AAEC""#).is_err());
    }

    #[tokio::test]
    async fn accepts_valid_signed_request() {
        let v = verifier(&identity_a().public_key_pem);
        let (m, u, h, b) = signed(KEY_ID, &create_by(BOB));
        let ok = v.verify(&m, &u, &h, &b).await.unwrap();
        assert_eq!(ok.stage, VerifyStage::Accepted);
        assert_eq!(ok.signer.actor_url, BOB);
        assert_eq!(ok.body["type"], "Create");
    }

    #[tokio::test]
    async fn embedded_actor_object_is_accepted() {
        let v = verifier(&identity_a().public_key_pem);
        let mut body = create_by(BOB);
        body["actor"] = json!({"id": BOB, "type": "Person"});
        let (m, u, h, b) = signed(KEY_ID, &body);
        assert!(v.verify(&m, &u, &h, &b).await.is_ok());
    }

    #[tokio::test]
    async fn missing_signature_is_401() {
        let v = verifier(&identity_a().public_key_pem);
        let (m, u, mut h, b) = signed(KEY_ID, &create_by(BOB));
        h.remove("Signature");
        let err = v.verify(&m, &u, &h, &b).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.reason, "signature required");
        assert_eq!(err.stage, VerifyStage::Received);
    }

    #[tokio::test]
    async fn missing_key_id_is_401() {
        let v = verifier(&identity_a().public_key_pem);
        let (m, u, mut h, b) = signed(KEY_ID, &create_by(BOB));
        h.insert("Signature", r#"headers="date",signature="AAEC""#.parse().unwrap());
        let err = v.verify(&m, &u, &h, &b).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.reason, "invalid signature format");
    }

    #[tokio::test]
    async fn wrong_key_is_401() {
        let v = verifier(&identity_b().public_key_pem);
        let (m, u, h, b) = signed(KEY_ID, &create_by(BOB));
        let err = v.verify(&m, &u, &h, &b).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.reason, "invalid signature");
        assert_eq!(err.stage, VerifyStage::KeyFetched);
    }

    #[tokio::test]
    async fn rotated_key_is_refetched_once() {
        let transport = Arc::new(ScriptedTransport::default().json(BOB, actor_doc(BOB, &identity_b().public_key_pem)));
        let v = verifier_over(transport.clone());
        let covered = ["(request-target)", "host", "date", "digest"];
        let (m, u, h, b) = signed_with(identity_b(), KEY_ID, &create_by(BOB), None, &covered);
        assert!(v.verify(&m, &u, &h, &b).await.is_ok());
        assert_eq!(transport.hits(BOB), 1);

        transport.set_json(BOB, actor_doc(BOB, &identity_a().public_key_pem));
        let (m, u, h, b) = signed_with(identity_a(), KEY_ID, &create_by(BOB), None, &covered);
        let ok = v.verify(&m, &u, &h, &b).await.unwrap();
        assert_eq!(ok.signer.public_key_pem, identity_a().public_key_pem);
        assert_eq!(transport.hits(BOB), 2);

        // Still a bad signature after the refetch: rejected, no further fetches.
        let (m, u, h, b) = signed_with(identity_b(), KEY_ID, &create_by(BOB), None, &covered);
        let err = v.verify(&m, &u, &h, &b).await.unwrap_err();
        assert_eq!(err.reason, "invalid signature");
        assert_eq!(transport.hits(BOB), 3);
    }

    #[tokio::test]
    async fn unreachable_key_is_401() {
        let v = verifier(&identity_a().public_key_pem);
        let (m, u, h, b) = signed("https://remote.example/users/carol#main-key", &create_by(BOB));
        let err = v.verify(&m, &u, &h, &b).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.reason, "could not retrieve public key");
    }

    #[tokio::test]
    async fn actor_mismatch_is_403() {
        let v = verifier(&identity_a().public_key_pem);
        for claimed in ["https://remote.example/users/alice", "https://remote.example/users/bobby", "https://remote.example/users"] {
            let (m, u, h, b) = signed(KEY_ID, &create_by(claimed));
            let err = v.verify(&m, &u, &h, &b).await.unwrap_err();
            assert_eq!(err.status, StatusCode::FORBIDDEN, "{claimed}");
            assert_eq!(err.reason, "actor does not have permission for this operation");
        }
    }

    #[tokio::test]
    async fn tampered_body_is_401() {
        let v = verifier(&identity_a().public_key_pem);
        let (m, u, h, _) = signed(KEY_ID, &create_by(BOB));
        let other = serde_json::to_vec(&create_by("https://remote.example/users/bob/")).unwrap();
        let err = v.verify(&m, &u, &h, &other).await.unwrap_err();
        assert_eq!(err.reason, "invalid signature");
    }

    #[tokio::test]
    async fn unsigned_digest_is_401() {
        let v = verifier(&identity_a().public_key_pem);
        let body = serde_json::to_vec(&create_by(BOB)).unwrap();
        let uri: Uri = "https://example.org/calendars/acme/inbox".parse().unwrap();
        let mut headers = HeaderMap::new();
        sign_request_rsa_sha256(
            &identity_a().private_key_pem,
            KEY_ID,
            &Method::POST,
            &uri,
            &mut headers,
            &[],
            &["(request-target)", "host", "date"],
        )
        .unwrap();
        let err = v.verify(&Method::POST, &uri, &headers, &body).await.unwrap_err();
        assert_eq!(err.reason, "invalid signature");
    }

    #[tokio::test]
    async fn stale_date_is_401() {
        let v = verifier(&identity_a().public_key_pem);
        let (m, u, h, b) = signed_with(
            identity_a(),
            KEY_ID,
            &create_by(BOB),
            Some("Sun, 06 Nov 1994 08:49:37 GMT"),
            &["(request-target)", "host", "date", "digest"],
        );
        let err = v.verify(&m, &u, &h, &b).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.reason, "invalid signature");
        assert_eq!(err.stage, VerifyStage::Parsed);
    }

    #[tokio::test]
    async fn date_outside_signed_headers_is_401() {
        let v = verifier(&identity_a().public_key_pem);
        for date in [None, Some("Sun, 06 Nov 1994 08:49:37 GMT")] {
            let (m, u, h, b) = signed_with(identity_a(), KEY_ID, &create_by(BOB), date, &["(request-target)", "host", "digest"]);
            let err = v.verify(&m, &u, &h, &b).await.unwrap_err();
            assert_eq!(err.status, StatusCode::UNAUTHORIZED, "{date:?}");
            assert_eq!(err.reason, "invalid signature");
        }
    }

    #[tokio::test]
    async fn missing_date_header_is_401() {
        let v = verifier(&identity_a().public_key_pem);
        let (m, u, mut h, b) = signed(KEY_ID, &create_by(BOB));
        h.remove("Date");
        let err = v.verify(&m, &u, &h, &b).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn actor_match_is_exact() {
        assert!(actor_matches_signer(BOB, BOB));
        assert!(actor_matches_signer("https://remote.example/users/bob/", BOB));
        assert!(!actor_matches_signer("https://remote.example/users/bobby", BOB));
        assert!(!actor_matches_signer("https://remote.example/users/bob/extra", BOB));
        assert!(!actor_matches_signer("", BOB));
    }
}
