//! Schnorr signatures (BIP-340 over secp256k1) and the hex/bech32 key
//! encodings used across the relay.

use bech32::{FromBase32, ToBase32, Variant};
use k256::schnorr::{Signature, SigningKey, VerifyingKey};
use nectar_primitives::{Event, Pubkey, Sig};
use rand::rngs::OsRng;
use thiserror::Error;

const NPUB_HRP: &str = "npub";
const NSEC_HRP: &str = "nsec";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid secret key")]
    InvalidSecretKey,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid signature encoding")]
    InvalidSignature,
    #[error("signature does not verify")]
    VerificationFailed,
    #[error("event id does not match its canonical hash")]
    IdMismatch,
    #[error("invalid bech32 string: {0}")]
    InvalidBech32(String),
    #[error("unexpected bech32 prefix `{got}`, expected `{expected}`")]
    WrongPrefix { expected: &'static str, got: String },
}

/// A Schnorr signing key. Holds the secret scalar; the relay itself only
/// signs in tests and tooling, verification is the hot path.
#[derive(Clone)]
pub struct SecretKey {
    inner: SigningKey,
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

impl SecretKey {
    #[must_use]
    pub fn generate() -> Self {
        Self {
            inner: SigningKey::random(&mut OsRng),
        }
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        SigningKey::from_bytes(bytes)
            .map(|inner| Self { inner })
            .map_err(|_| CryptoError::InvalidSecretKey)
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let mut bytes = [0_u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| CryptoError::InvalidSecretKey)?;
        Self::from_bytes(&bytes)
    }

    #[must_use]
    pub fn public_key(&self) -> Pubkey {
        let bytes: [u8; 32] = self.inner.verifying_key().to_bytes().into();
        Pubkey::from_bytes(bytes)
    }

    /// Sign an arbitrary message (BIP-340, deterministic auxiliary data).
    pub fn sign(&self, message: &[u8]) -> Result<Sig, CryptoError> {
        let signature = self
            .inner
            .sign_raw(message, &[0_u8; 32])
            .map_err(|_| CryptoError::VerificationFailed)?;

        let bytes: [u8; 64] = signature.to_bytes().into();
        Ok(Sig::from_bytes(bytes))
    }
}

/// Verify `sig` over `message` under the x-only `pubkey`.
pub fn verify(pubkey: &Pubkey, message: &[u8], sig: &Sig) -> Result<(), CryptoError> {
    let key = VerifyingKey::from_bytes(pubkey.as_bytes())
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let signature =
        Signature::try_from(&sig.as_bytes()[..]).map_err(|_| CryptoError::InvalidSignature)?;

    key.verify_raw(message, &signature)
        .map_err(|_| CryptoError::VerificationFailed)
}

/// Full event check: canonical id plus signature over the id bytes.
pub fn verify_event(event: &Event) -> Result<(), CryptoError> {
    if !event.id_matches() {
        return Err(CryptoError::IdMismatch);
    }

    verify(&event.pubkey, event.id.as_bytes(), &event.sig)
}

/// Build and sign an event, filling in `id` and `sig`.
pub fn sign_event(
    secret: &SecretKey,
    created_at: u64,
    kind: nectar_primitives::Kind,
    tags: Vec<nectar_primitives::Tag>,
    content: impl Into<String>,
) -> Result<Event, CryptoError> {
    let mut event = Event {
        id: nectar_primitives::EventId::from_bytes([0; 32]),
        pubkey: secret.public_key(),
        created_at,
        kind,
        tags,
        content: content.into(),
        sig: Sig::from_bytes([0; 64]),
    };

    event.id = event.compute_id();
    event.sig = secret.sign(event.id.as_bytes())?;

    Ok(event)
}

/// Render a public key as `npub1…`.
pub fn encode_npub(pubkey: &Pubkey) -> Result<String, CryptoError> {
    bech32::encode(NPUB_HRP, pubkey.as_bytes().to_base32(), Variant::Bech32)
        .map_err(|e| CryptoError::InvalidBech32(e.to_string()))
}

/// Parse an `npub1…` string back into a public key.
pub fn decode_npub(s: &str) -> Result<Pubkey, CryptoError> {
    let bytes = decode_hrp(s, NPUB_HRP)?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    Ok(Pubkey::from_bytes(bytes))
}

/// Render a secret key as `nsec1…`.
pub fn encode_nsec(secret: &SecretKey) -> Result<String, CryptoError> {
    let bytes = secret.inner.to_bytes();
    bech32::encode(NSEC_HRP, bytes.as_slice().to_base32(), Variant::Bech32)
        .map_err(|e| CryptoError::InvalidBech32(e.to_string()))
}

/// Parse an `nsec1…` string back into a secret key.
pub fn decode_nsec(s: &str) -> Result<SecretKey, CryptoError> {
    let bytes = decode_hrp(s, NSEC_HRP)?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidSecretKey)?;
    SecretKey::from_bytes(&bytes)
}

fn decode_hrp(s: &str, expected: &'static str) -> Result<Vec<u8>, CryptoError> {
    let (hrp, data, _variant) =
        bech32::decode(s).map_err(|e| CryptoError::InvalidBech32(e.to_string()))?;

    if hrp != expected {
        return Err(CryptoError::WrongPrefix { expected, got: hrp });
    }

    Vec::<u8>::from_base32(&data).map_err(|e| CryptoError::InvalidBech32(e.to_string()))
}

#[cfg(test)]
mod tests {
    use nectar_primitives::{Kind, Tag};
    use sha2::Digest;

    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let secret = SecretKey::generate();
        let digest: [u8; 32] = sha2::Sha256::digest(b"nectar relay").into();

        let sig = secret.sign(&digest).expect("sign");

        verify(&secret.public_key(), &digest, &sig).expect("verifies");

        let other = SecretKey::generate();
        assert!(verify(&other.public_key(), &digest, &sig).is_err());
    }

    #[test]
    fn signed_event_verifies() {
        let secret = SecretKey::generate();
        let event = sign_event(
            &secret,
            1_700_000_000,
            Kind(1),
            vec![Tag::new(["t", "test"])],
            "hello",
        )
        .expect("sign event");

        verify_event(&event).expect("event verifies");

        let mut tampered = event;
        tampered.content.push('!');
        assert!(matches!(
            verify_event(&tampered),
            Err(CryptoError::IdMismatch)
        ));
    }

    #[test]
    fn npub_roundtrip() {
        let secret = SecretKey::generate();
        let pubkey = secret.public_key();

        let npub = encode_npub(&pubkey).expect("encode");
        assert!(npub.starts_with("npub1"));

        let back = decode_npub(&npub).expect("decode");
        assert_eq!(back, pubkey);

        assert!(matches!(
            decode_npub("nsec1qqqqqq"),
            Err(CryptoError::InvalidBech32(_) | CryptoError::WrongPrefix { .. })
        ));
    }

    #[test]
    fn nsec_roundtrip() {
        let secret = SecretKey::generate();
        let nsec = encode_nsec(&secret).expect("encode");
        assert!(nsec.starts_with("nsec1"));

        let back = decode_nsec(&nsec).expect("decode");
        assert_eq!(back.public_key(), secret.public_key());
    }
}
