//! The signed-envelope authentication used by every mutating HTTP
//! request: a kind-27235 event in `Authorization: Nostr <base64>`, fresh
//! within a configured window, whose `u`/`method` tags match the request
//! and whose `payload` tag commits to the body when one is present.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use nectar_primitives::{Event, Kind, Pubkey};

const SCHEME: &str = "Nostr ";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("restricted: missing authorization header")]
    Missing,

    #[error("restricted: malformed authorization envelope: {0}")]
    Malformed(String),

    #[error("restricted: envelope is not a kind 27235 event")]
    WrongKind,

    #[error("restricted: envelope signature does not verify")]
    BadSignature,

    #[error("restricted: envelope timestamp outside the freshness window")]
    Stale,

    #[error("restricted: envelope url does not match the request")]
    UrlMismatch,

    #[error("restricted: envelope method does not match the request")]
    MethodMismatch,

    #[error("restricted: payload hash missing or mismatched")]
    PayloadMismatch,
}

/// Verify an envelope against the request it arrived on; returns the
/// authenticated public key.
pub fn verify_envelope(
    header: Option<&str>,
    method: &str,
    path: &str,
    body: &[u8],
    now: u64,
    window_secs: u64,
) -> Result<Pubkey, AuthError> {
    let header = header.ok_or(AuthError::Missing)?;

    let encoded = header
        .strip_prefix(SCHEME)
        .ok_or_else(|| AuthError::Malformed("expected the Nostr scheme".to_owned()))?;

    let decoded = BASE64
        .decode(encoded.trim())
        .map_err(|e| AuthError::Malformed(e.to_string()))?;

    let event: Event =
        serde_json::from_slice(&decoded).map_err(|e| AuthError::Malformed(e.to_string()))?;

    if event.kind != Kind::HTTP_AUTH {
        return Err(AuthError::WrongKind);
    }

    nectar_crypto::verify_event(&event).map_err(|_| AuthError::BadSignature)?;

    if event.created_at.abs_diff(now) > window_secs {
        return Err(AuthError::Stale);
    }

    let url_tag = event.tag_value("u").ok_or(AuthError::UrlMismatch)?;
    let url_path = Url::parse(url_tag)
        .map(|url| url.path().to_owned())
        .map_err(|_| AuthError::UrlMismatch)?;

    if url_path != path {
        return Err(AuthError::UrlMismatch);
    }

    let method_tag = event.tag_value("method").ok_or(AuthError::MethodMismatch)?;
    if !method_tag.eq_ignore_ascii_case(method) {
        return Err(AuthError::MethodMismatch);
    }

    if !body.is_empty() {
        let digest = hex::encode(Sha256::digest(body));
        let payload_tag = event.tag_value("payload").ok_or(AuthError::PayloadMismatch)?;

        if !payload_tag.eq_ignore_ascii_case(&digest) {
            return Err(AuthError::PayloadMismatch);
        }
    }

    Ok(event.pubkey)
}

#[cfg(test)]
mod tests {
    use nectar_crypto::{sign_event, SecretKey};
    use nectar_primitives::Tag;

    use super::*;

    const NOW: u64 = 1_700_000_000;
    const WINDOW: u64 = 60;

    fn envelope(secret: &SecretKey, created_at: u64, mut tags: Vec<Tag>) -> String {
        if tags.is_empty() {
            tags = vec![
                Tag::new(["u", "https://relay.example/blossom/upload"]),
                Tag::new(["method", "PUT"]),
            ];
        }

        let event = sign_event(secret, created_at, Kind::HTTP_AUTH, tags, "").expect("sign");
        format!(
            "Nostr {}",
            BASE64.encode(serde_json::to_vec(&event).expect("json"))
        )
    }

    fn payload_tags(body: &[u8]) -> Vec<Tag> {
        vec![
            Tag::new(["u", "https://relay.example/blossom/upload"]),
            Tag::new(["method", "PUT"]),
            Tag::new(["payload", &hex::encode(Sha256::digest(body))]),
        ]
    }

    #[test]
    fn valid_envelope_authenticates_the_signer() {
        let secret = SecretKey::generate();
        let body = b"blob bytes";
        let header = envelope(&secret, NOW, payload_tags(body));

        let pubkey = verify_envelope(
            Some(&header),
            "PUT",
            "/blossom/upload",
            body,
            NOW + 10,
            WINDOW,
        )
        .expect("authenticates");

        assert_eq!(pubkey, secret.public_key());
    }

    #[test]
    fn empty_body_needs_no_payload_tag() {
        let secret = SecretKey::generate();
        let header = envelope(&secret, NOW, vec![]);

        verify_envelope(Some(&header), "put", "/blossom/upload", &[], NOW, WINDOW)
            .expect("authenticates");
    }

    #[test]
    fn each_check_fails_with_its_own_reason() {
        let secret = SecretKey::generate();
        let body = b"blob bytes";

        assert!(matches!(
            verify_envelope(None, "PUT", "/blossom/upload", &[], NOW, WINDOW),
            Err(AuthError::Missing)
        ));

        let stale = envelope(&secret, NOW - WINDOW - 1, payload_tags(body));
        assert!(matches!(
            verify_envelope(Some(&stale), "PUT", "/blossom/upload", body, NOW, WINDOW),
            Err(AuthError::Stale)
        ));

        let header = envelope(&secret, NOW, payload_tags(body));
        assert!(matches!(
            verify_envelope(Some(&header), "PUT", "/other/path", body, NOW, WINDOW),
            Err(AuthError::UrlMismatch)
        ));
        assert!(matches!(
            verify_envelope(Some(&header), "DELETE", "/blossom/upload", body, NOW, WINDOW),
            Err(AuthError::MethodMismatch)
        ));
        assert!(matches!(
            verify_envelope(
                Some(&header),
                "PUT",
                "/blossom/upload",
                b"different body",
                NOW,
                WINDOW
            ),
            Err(AuthError::PayloadMismatch)
        ));

        let wrong_kind = {
            let event =
                sign_event(&secret, NOW, Kind(1), payload_tags(body), "").expect("sign");
            format!(
                "Nostr {}",
                BASE64.encode(serde_json::to_vec(&event).expect("json"))
            )
        };
        assert!(matches!(
            verify_envelope(Some(&wrong_kind), "PUT", "/blossom/upload", body, NOW, WINDOW),
            Err(AuthError::WrongKind)
        ));
    }
}
