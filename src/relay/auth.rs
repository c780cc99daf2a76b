//! The relay's authentication gate: HTTP Basic credentials compared against a configured pair.

use axum::http::{HeaderMap, HeaderValue, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// The realm advertised in the 401 challenge.
pub const REALM: &str = "relaychat";

/// The expected Basic credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    username: String,
    password: String,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl BasicAuth {
    /// Create a gate expecting `username` and `password`.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read `AUTH_USERNAME` and `AUTH_PASSWORD`; `None` unless both are set.
    pub fn from_env() -> Option<Self> {
        let username = std::env::var("AUTH_USERNAME").ok()?;
        let password = std::env::var("AUTH_PASSWORD").ok()?;
        Some(Self::new(username, password))
    }

    /// Is this request authorized?
    pub fn is_authorized(&self, headers: &HeaderMap) -> bool {
        let Some(value) = headers.get(header::AUTHORIZATION) else {
            return false;
        };
        let Ok(value) = value.to_str() else {
            return false;
        };
        let Some((scheme, encoded)) = value.trim().split_once(' ') else {
            return false;
        };
        if !scheme.eq_ignore_ascii_case("basic") {
            return false;
        }
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        match decoded.split_once(':') {
            Some((username, password)) => {
                let username_ok = constant_time_eq(username.as_bytes(), self.username.as_bytes());
                let password_ok = constant_time_eq(password.as_bytes(), self.password.as_bytes());
                username_ok & password_ok
            }
            None => false,
        }
    }

    /// The `Authorization` header value a client would send.
    pub fn header_value(&self) -> String {
        let encoded = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {encoded}")
    }
}

/// Compare two byte strings in time that depends only on their lengths.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y));
    std::hint::black_box(diff) == 0
}

/// The `WWW-Authenticate` challenge sent with 401 responses.
pub fn challenge() -> HeaderValue {
    HeaderValue::from_static("Basic realm=\"relaychat\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn accepts_matching_credentials() {
        let auth = BasicAuth::new("alice", "s3cret:with:colons");
        assert!(auth.is_authorized(&headers(&auth.header_value())));
    }

    #[test]
    fn rejects_everything_else() {
        let auth = BasicAuth::new("alice", "s3cret");
        assert!(!auth.is_authorized(&HeaderMap::new()));
        assert!(!auth.is_authorized(&headers("Bearer abc")));
        assert!(!auth.is_authorized(&headers("Basic !!!not-base64")));
        assert!(!auth.is_authorized(&headers(
            &BasicAuth::new("alice", "wrong").header_value()
        )));
        assert!(!auth.is_authorized(&headers(&format!(
            "Basic {}",
            STANDARD.encode("no-colon")
        ))));
    }

    #[test]
    fn credential_comparison() {
        assert!(constant_time_eq(b"s3cret", b"s3cret"));
        assert!(constant_time_eq(b"", b""));
        assert!(!constant_time_eq(b"s3cret", b"s3creT"));
        assert!(!constant_time_eq(b"s3cret", b"t3cret"));
        assert!(!constant_time_eq(b"s3cret", b"s3cre"));
        assert!(!constant_time_eq(b"s3cre", b"s3cret"));
    }

    #[test]
    fn rejects_near_miss_credentials() {
        let auth = BasicAuth::new("alice", "s3cret");
        for (username, password) in [
            ("alice", "s3cre"),
            ("alice", "s3cret!"),
            ("alicE", "s3cret"),
            ("", ""),
            ("alice", ""),
        ] {
            let value = BasicAuth::new(username, password).header_value();
            assert!(!auth.is_authorized(&headers(&value)), "{username}:{password}");
        }
    }

    #[test]
    fn debug_redacts_password() {
        let auth = BasicAuth::new("alice", "s3cret");
        assert!(!format!("{auth:?}").contains("s3cret"));
    }

    #[test]
    fn challenge_names_realm() {
        assert!(challenge().to_str().unwrap().contains(REALM));
    }
}
