use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;

/// Bytes of entropy in an authorization code
pub const CODE_BYTES: usize = 32;

/// Fresh authorization code: 32 random bytes, base64url without padding (43 chars)
pub fn generate_code() -> String {
    let mut buf = [0u8; CODE_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn is_code_shaped(code: &str) -> bool {
        code.len() == 43
            && code
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    #[test]
    fn test_code_format() {
        for _ in 0..32 {
            let code = generate_code();
            assert!(is_code_shaped(&code), "unexpected code {}", code);
            assert_eq!(URL_SAFE_NO_PAD.decode(&code).unwrap().len(), CODE_BYTES);
        }
    }

    #[test]
    fn test_codes_differ() {
        assert_ne!(generate_code(), generate_code());
    }
}
