use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use log::warn;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub exp: Option<u64>,
    #[serde(default)]
    pub iat: Option<u64>,
}

/// Read-only view of the payload. The signature is NOT verified, so the
/// claims are for display only.
pub fn decode_jwt(token: &str) -> Option<Claims> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        warn!("Failed to decode JWT: invalid token format");
        return None;
    }

    let payload = match URL_SAFE_NO_PAD.decode(parts[1].trim_end_matches('=')) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to decode JWT payload: {}", e);
            return None;
        }
    };
    match serde_json::from_slice(&payload) {
        Ok(claims) => Some(claims),
        Err(e) => {
            warn!("Failed to parse JWT claims: {}", e);
            None
        }
    }
}

pub fn email_from_token(id_token: &str) -> Option<String> {
    decode_jwt(id_token).and_then(|c| c.email)
}

pub fn user_sub_from_token(token: &str) -> Option<String> {
    decode_jwt(token).map(|c| c.sub)
}

/// A token without a readable `exp` counts as expired
pub fn is_token_expired(token: &str, now_millis: u64) -> bool {
    match decode_jwt(token).and_then(|c| c.exp) {
        Some(exp) => now_millis >= exp.saturating_mul(1000),
        None => true,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn make_token(payload: &str) -> String {
        format!(
            "{}.{}.signature",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","kid":"k"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    #[test]
    fn test_decode_claims() {
        let token = make_token(
            r#"{"sub":"abc-123","email":"user@example.com","email_verified":true,"exp":1700003600,"iat":1700000000,"token_use":"id"}"#,
        );
        let claims = decode_jwt(&token).unwrap();
        assert_eq!(claims.sub, "abc-123");
        assert_eq!(claims.email_verified, Some(true));
        assert_eq!(email_from_token(&token).as_deref(), Some("user@example.com"));
        assert_eq!(user_sub_from_token(&token).as_deref(), Some("abc-123"));
    }

    #[test]
    fn test_padded_payload_is_accepted() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"sub":"s1"}"#);
        let token = format!("h.{}.s", payload);
        assert_eq!(user_sub_from_token(&token).as_deref(), Some("s1"));
    }

    #[test]
    fn test_malformed_tokens() {
        assert!(decode_jwt("not-a-jwt").is_none());
        assert!(decode_jwt("a.!!!.c").is_none());
        assert!(decode_jwt(&make_token("[1,2,3]")).is_none());
    }

    #[test]
    fn test_token_expiry() {
        let token = make_token(r#"{"sub":"s","exp":1700000000}"#);
        assert!(!is_token_expired(&token, 1_699_999_999_000));
        assert!(is_token_expired(&token, 1_700_000_000_000));
        assert!(is_token_expired(&make_token(r#"{"sub":"s"}"#), 0));

        let far = make_token(&format!(r#"{{"sub":"s","exp":{}}}"#, u64::MAX));
        assert!(!is_token_expired(&far, 1_700_000_000_000));
    }
}
