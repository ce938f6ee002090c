//! `idToken` issuance (spec §4.8): a JWT carrying `{sub, profile, fhirUser}`,
//! signed with a fixed symmetric key. This server is a conformance
//! simulator — the key is not a secret, and no relying party should trust
//! the signature for access control.

use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};

/// Not a secret: fixed so that id-token signatures are reproducible across
/// server restarts for conformance testing.
const SIGNING_KEY: &[u8] = b"fhirkit-smart-fixed-conformance-key";

#[derive(Debug, Serialize, Deserialize)]
struct IdTokenClaims {
    sub: String,
    profile: String,
    #[serde(rename = "fhirUser")]
    fhir_user: String,
    iat: i64,
    exp: i64,
}

/// Builds and signs the `idToken` for a successful token exchange.
///
/// `audience` becomes `sub` (the token audience, per spec §4.8); `user_id`
/// is mirrored into both `profile` and `fhirUser`.
pub fn build_id_token(audience: &str, user_id: &str, issued_at: i64, expires_at: i64) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = IdTokenClaims {
        sub: audience.to_string(),
        profile: user_id.to_string(),
        fhir_user: user_id.to_string(),
        iat: issued_at,
        exp: expires_at,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SIGNING_KEY))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    #[test]
    fn id_token_round_trips_claims() {
        let token = build_id_token("https://fhir.example.org/demo", "Practitioner/42", 1_000, 4_600).unwrap();
        let mut validation = Validation::default();
        validation.validate_exp = false;
        let decoded = decode::<IdTokenClaims>(&token, &DecodingKey::from_secret(SIGNING_KEY), &validation).unwrap();
        assert_eq!(decoded.claims.sub, "https://fhir.example.org/demo");
        assert_eq!(decoded.claims.profile, "Practitioner/42");
        assert_eq!(decoded.claims.fhir_user, "Practitioner/42");
    }
}
