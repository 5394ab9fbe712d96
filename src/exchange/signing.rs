//! Per-venue request signing, kept as a strictly scoped utility next to the
//! REST wrappers and fill monitor that use it — no global process state.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::pss::SigningKey;
use rsa::sha2::Sha256;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::RsaPrivateKey;

use crate::error::SigningError;

/// RSA-PSS signature over `timestamp + method + path`, base64-encoded, for
/// Kalshi's REST and WebSocket auth headers.
pub fn kalshi_sign(
    private_key_pem: &str,
    timestamp_ms: i64,
    method: &str,
    path: &str,
) -> Result<String, SigningError> {
    let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_key_pem))
        .map_err(|e| SigningError::KeyParse(e.to_string()))?;

    let message = format!("{timestamp_ms}{method}{path}");
    let signing_key = SigningKey::<Sha256>::new(private_key);
    let mut rng = rand::rngs::OsRng;
    let signature = signing_key.sign_with_rng(&mut rng, message.as_bytes());
    Ok(BASE64.encode(signature.to_bytes()))
}

/// Ed25519 signature over `timestamp + method + path`, base64-encoded, for
/// the second venue's REST and WebSocket auth headers.
pub fn venue_b_sign(
    secret_key_b64: &str,
    timestamp_ms: i64,
    method: &str,
    path: &str,
) -> Result<String, SigningError> {
    use ed25519_dalek::{Signer, SigningKey as Ed25519SigningKey};

    let secret_bytes = BASE64
        .decode(secret_key_b64)
        .map_err(|e| SigningError::KeyParse(e.to_string()))?;
    if secret_bytes.len() < 32 {
        return Err(SigningError::KeyParse("secret key too short".into()));
    }
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&secret_bytes[..32]);
    let signing_key = Ed25519SigningKey::from_bytes(&seed);

    let message = format!("{timestamp_ms}{method}{path}");
    let signature = signing_key.sign(message.as_bytes());
    Ok(BASE64.encode(signature.to_bytes()))
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::EncodePrivateKey;

    fn test_rsa_pem() -> String {
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        key.to_pkcs8_pem(Default::default()).unwrap().to_string()
    }

    #[test]
    fn kalshi_sign_produces_base64() {
        let pem = test_rsa_pem();
        let sig = kalshi_sign(&pem, 1_700_000_000_000, "GET", "/trade-api/v2/markets").unwrap();
        assert!(BASE64.decode(&sig).is_ok());
    }

    #[test]
    fn kalshi_sign_rejects_garbage_key() {
        let err = kalshi_sign("not a pem", 0, "GET", "/x").unwrap_err();
        assert!(matches!(err, SigningError::KeyParse(_)));
    }

    #[test]
    fn venue_b_sign_rejects_short_key() {
        let short = BASE64.encode([0u8; 8]);
        let err = venue_b_sign(&short, 0, "GET", "/x").unwrap_err();
        assert!(matches!(err, SigningError::KeyParse(_)));
    }

    #[test]
    fn venue_b_sign_is_deterministic_for_same_input() {
        use ed25519_dalek::SigningKey as Ed25519SigningKey;
        let mut rng = rand::rngs::OsRng;
        let signing_key = Ed25519SigningKey::generate(&mut rng);
        let secret_b64 = BASE64.encode(signing_key.to_bytes());

        let a = venue_b_sign(&secret_b64, 42, "GET", "/v1/ws/private").unwrap();
        let b = venue_b_sign(&secret_b64, 42, "GET", "/v1/ws/private").unwrap();
        assert_eq!(a, b);
    }
}
