//! PKCE (RFC 7636) challenge/verifier handling for the authorization-code
//! flow (spec §4.8). Only the `S256` method is supported; `plain` is
//! rejected outright, matching current SMART App Launch guidance.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::SmartError;

const VERIFIER_MIN_LEN: usize = 43;
const VERIFIER_MAX_LEN: usize = 128;
const VERIFIER_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// Generates a random code verifier of the maximum allowed length.
#[must_use]
pub fn generate_verifier() -> String {
    let mut rng = rand::thread_rng();
    (0..VERIFIER_MAX_LEN).map(|_| VERIFIER_ALPHABET[rng.gen_range(0..VERIFIER_ALPHABET.len())] as char).collect()
}

fn validate_verifier_shape(verifier: &str) -> Result<(), SmartError> {
    if verifier.len() < VERIFIER_MIN_LEN || verifier.len() > VERIFIER_MAX_LEN {
        return Err(SmartError::PkceVerificationFailed);
    }
    if !verifier.bytes().all(|b| VERIFIER_ALPHABET.contains(&b)) {
        return Err(SmartError::PkceVerificationFailed);
    }
    Ok(())
}

/// Derives the `S256` code challenge for a verifier: `BASE64URL(SHA256(verifier))`.
#[must_use]
pub fn challenge_from_verifier(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Verifies a presented `code_verifier` against the challenge recorded at
/// the start of the authorization flow. Only `method == "S256"` is
/// accepted; any other method (including `plain`) fails closed.
pub fn verify(stored_challenge: &str, method: &str, presented_verifier: &str) -> Result<(), SmartError> {
    if method != "S256" {
        return Err(SmartError::PkceVerificationFailed);
    }
    validate_verifier_shape(presented_verifier)?;
    let derived = challenge_from_verifier(presented_verifier);
    if derived == stored_challenge {
        Ok(())
    } else {
        Err(SmartError::PkceVerificationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// RFC 7636 Appendix B test vector.
    #[test]
    fn rfc7636_appendix_b_vector() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = challenge_from_verifier(verifier);
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn verify_accepts_matching_pair() {
        let verifier = generate_verifier();
        let challenge = challenge_from_verifier(&verifier);
        assert!(verify(&challenge, "S256", &verifier).is_ok());
    }

    #[test]
    fn verify_rejects_wrong_verifier() {
        let verifier = generate_verifier();
        let challenge = challenge_from_verifier(&verifier);
        let other = generate_verifier();
        assert!(verify(&challenge, "S256", &other).is_err());
    }

    #[test]
    fn verify_rejects_plain_method() {
        let verifier = generate_verifier();
        let challenge = challenge_from_verifier(&verifier);
        assert!(verify(&challenge, "plain", &verifier).is_err());
    }

    #[test]
    fn verify_rejects_short_verifier() {
        let challenge = challenge_from_verifier("too-short");
        assert!(verify(&challenge, "S256", "too-short").is_err());
    }
}
