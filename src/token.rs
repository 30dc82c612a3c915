use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::header::{HeaderMap, SET_COOKIE};
use serde::{Deserialize, Serialize};

/// Cookie the target uses to carry the session token.
pub const COOKIE_NAME: &str = "jwt_token";

/// Response header carrying a verbatim replacement token.
pub const ROTATION_HEADER: &str = "x-jwt-token";

/// One line item as embedded in the token's cart claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartEntry {
    pub item_id: u32,
    pub quantity: u32,
}

/// Claims the target encodes its cart state into. The driver only mints
/// the initial shape; every later revision is server-issued.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub cart: Vec<CartEntry>,
    pub exp: u64,
}

/// Mints plausible initial credentials with the shared secret. The driver
/// never verifies tokens; that is the server's job.
pub struct TokenMinter {
    key: EncodingKey,
    ttl_seconds: u64,
}

impl TokenMinter {
    pub fn new(secret: &str, ttl_seconds: u64) -> Self {
        Self {
            key: EncodingKey::from_secret(secret.as_bytes()),
            ttl_seconds,
        }
    }

    pub fn mint(
        &self,
        subject: &str,
        cart: &[CartEntry],
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            user_id: subject.to_string(),
            cart: cart.to_vec(),
            exp: unix_now() + self.ttl_seconds,
        };
        encode(&Header::default(), &claims, &self.key)
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Pulls a replacement credential out of a response, if the server sent
/// one. The cookie carrier wins over the bare header carrier; neither
/// present means the caller keeps its current token.
pub fn extract_rotated(headers: &HeaderMap) -> Option<String> {
    for value in headers.get_all(SET_COOKIE) {
        if let Some(token) = value.to_str().ok().and_then(cookie_token) {
            return Some(token.to_string());
        }
    }
    headers
        .get(ROTATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn cookie_token(raw: &str) -> Option<&str> {
    let rest = raw.split_once(COOKIE_NAME)?.1.strip_prefix('=')?;
    let value = rest.split(';').next()?;
    (!value.is_empty()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};
    use reqwest::header::HeaderValue;

    const SECRET: &str = "your-super-secret-key-12345";

    #[test]
    fn minted_token_has_three_unpadded_parts() {
        let minter = TokenMinter::new(SECRET, 3600);
        let token = minter.mint("user_1", &[]).unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 3);
        for part in parts {
            assert!(!part.is_empty());
            assert!(!part.contains('='));
        }
    }

    #[test]
    fn minted_token_verifies_and_round_trips_claims() {
        let minter = TokenMinter::new(SECRET, 3600);
        let cart = vec![CartEntry {
            item_id: 3,
            quantity: 2,
        }];
        let token = minter.mint("user_42_1700000000", &cart).unwrap();

        let decoded = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(SECRET.as_bytes()),
            &Validation::default(),
        )
        .unwrap();
        assert_eq!(decoded.claims.user_id, "user_42_1700000000");
        assert_eq!(decoded.claims.cart, cart);
        assert!(decoded.claims.exp > unix_now());
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let minter = TokenMinter::new(SECRET, 3600);
        let token = minter.mint("user_1", &[]).unwrap();
        assert!(decode::<Claims>(
            &token,
            &DecodingKey::from_secret(b"other-secret"),
            &Validation::default(),
        )
        .is_err());
    }

    #[test]
    fn extracts_cookie_value_up_to_semicolon() {
        let mut headers = HeaderMap::new();
        headers.insert(
            SET_COOKIE,
            HeaderValue::from_static("jwt_token=abc.def.ghi; Path=/; HttpOnly"),
        );
        assert_eq!(extract_rotated(&headers).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn extracts_cookie_without_attributes() {
        let mut headers = HeaderMap::new();
        headers.insert(SET_COOKIE, HeaderValue::from_static("jwt_token=tok-7"));
        assert_eq!(extract_rotated(&headers).as_deref(), Some("tok-7"));
    }

    #[test]
    fn scans_past_unrelated_cookies() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("theme=dark; Path=/"));
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("jwt_token=tok-9; Secure"),
        );
        assert_eq!(extract_rotated(&headers).as_deref(), Some("tok-9"));
    }

    #[test]
    fn cookie_wins_over_rotation_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            SET_COOKIE,
            HeaderValue::from_static("jwt_token=from-cookie"),
        );
        headers.insert(ROTATION_HEADER, HeaderValue::from_static("from-header"));
        assert_eq!(extract_rotated(&headers).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn falls_back_to_rotation_header() {
        let mut headers = HeaderMap::new();
        headers.insert(ROTATION_HEADER, HeaderValue::from_static("tok-3"));
        assert_eq!(extract_rotated(&headers).as_deref(), Some("tok-3"));
    }

    #[test]
    fn empty_values_do_not_rotate() {
        let mut headers = HeaderMap::new();
        headers.insert(SET_COOKIE, HeaderValue::from_static("jwt_token=; Path=/"));
        assert_eq!(extract_rotated(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(ROTATION_HEADER, HeaderValue::from_static(""));
        assert_eq!(extract_rotated(&headers), None);
    }

    #[test]
    fn no_carrier_means_no_rotation() {
        assert_eq!(extract_rotated(&HeaderMap::new()), None);
    }
}
