//! Signed pagination cursor.
//!
//! Token layout: `base64url(json{seed, offset, exp?}) "." base64url(blake3_keyed(payload))`.
//! The server keeps no pagination state; everything needed to resume lives in the token.
//! A token that fails verification for any reason decodes to a fresh page.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::now_unix;

const KEY_CONTEXT: &str = "lexiquiz 2024 pagination cursor v1";

/// Decoded sampling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorState {
    pub seed: i64,
    pub offset: u64,
}

/// Where fresh seeds come from when a page starts over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedSource {
    /// Wall clock in nanoseconds.
    Clock,
    Fixed(i64),
}

impl SeedSource {
    fn next_seed(&self) -> i64 {
        match self {
            SeedSource::Clock => std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as i64,
            SeedSource::Fixed(seed) => *seed,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    seed: i64,
    offset: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
#[error("cursor encoding failed: {0}")]
pub struct CursorEncodeError(#[from] serde_json::Error);

/// Why a presented token was not honoured. Only ever logged.
#[derive(Debug, thiserror::Error)]
enum Rejection {
    #[error("token is not payload.signature")]
    Malformed,
    #[error("token is not valid base64url")]
    Encoding(#[from] base64::DecodeError),
    #[error("signature mismatch")]
    BadSignature,
    #[error("payload is not valid json: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("token expired at {0}")]
    Expired(i64),
}

pub struct CursorCodec {
    key: [u8; 32],
    ttl: Option<Duration>,
    seeds: SeedSource,
}

impl CursorCodec {
    /// Derive the MAC key from `secret`.
    pub fn new(secret: &str) -> Self {
        Self {
            key: blake3::derive_key(KEY_CONTEXT, secret.as_bytes()),
            ttl: None,
            seeds: SeedSource::Clock,
        }
    }

    /// Stamp encoded tokens with an expiry `ttl` from now.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_seed_source(mut self, seeds: SeedSource) -> Self {
        self.seeds = seeds;
        self
    }

    /// State for a page that starts a new cycle.
    pub fn fresh(&self) -> CursorState {
        CursorState {
            seed: self.seeds.next_seed(),
            offset: 0,
        }
    }

    pub fn encode(&self, state: CursorState) -> Result<String, CursorEncodeError> {
        let claims = Claims {
            seed: state.seed,
            offset: state.offset,
            exp: self.ttl.map(|ttl| now_unix() + ttl.as_secs() as i64),
        };
        let payload = serde_json::to_vec(&claims)?;
        let mac = blake3::keyed_hash(&self.key, &payload);
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(mac.as_bytes())
        ))
    }

    /// Decode a client-supplied cursor. Missing, tampered, malformed, or expired tokens all
    /// fall back to [`CursorCodec::fresh`].
    pub fn decode(&self, token: Option<&str>) -> CursorState {
        let token = match token.map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => return self.fresh(),
        };
        match self.verify(token) {
            Ok(state) => state,
            Err(reason) => {
                debug!(%reason, "cursor rejected, starting fresh page");
                self.fresh()
            }
        }
    }

    fn verify(&self, token: &str) -> Result<CursorState, Rejection> {
        let (payload_b64, mac_b64) = token.split_once('.').ok_or(Rejection::Malformed)?;
        let payload = URL_SAFE_NO_PAD.decode(payload_b64)?;
        let mac: [u8; 32] = URL_SAFE_NO_PAD
            .decode(mac_b64)?
            .try_into()
            .map_err(|_| Rejection::BadSignature)?;

        // blake3::Hash equality is constant-time.
        if blake3::keyed_hash(&self.key, &payload) != blake3::Hash::from(mac) {
            return Err(Rejection::BadSignature);
        }

        let claims: Claims = serde_json::from_slice(&payload)?;
        if let Some(exp) = claims.exp {
            if now_unix() >= exp {
                return Err(Rejection::Expired(exp));
            }
        }
        Ok(CursorState {
            seed: claims.seed,
            offset: claims.offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> CursorCodec {
        CursorCodec::new("test-secret").with_seed_source(SeedSource::Fixed(777))
    }

    #[test]
    fn round_trip() {
        let codec = codec();
        for state in [
            CursorState { seed: 0, offset: 0 },
            CursorState { seed: -12345, offset: 3 },
            CursorState { seed: i64::MAX, offset: u64::MAX },
        ] {
            let token = codec.encode(state).unwrap();
            assert_eq!(codec.decode(Some(&token)), state);
        }
    }

    #[test]
    fn missing_or_empty_is_fresh() {
        let codec = codec();
        let fresh = CursorState { seed: 777, offset: 0 };
        assert_eq!(codec.decode(None), fresh);
        assert_eq!(codec.decode(Some("")), fresh);
        assert_eq!(codec.decode(Some("   ")), fresh);
    }

    #[test]
    fn corrupted_token_is_fresh() {
        let codec = codec();
        let token = codec.encode(CursorState { seed: 5, offset: 9 }).unwrap();
        let fresh = CursorState { seed: 777, offset: 0 };

        let mut flipped = token.clone().into_bytes();
        flipped[2] = if flipped[2] == b'A' { b'B' } else { b'A' };
        let flipped = String::from_utf8(flipped).unwrap();

        assert_eq!(codec.decode(Some(&flipped)), fresh);
        assert_eq!(codec.decode(Some("no-dot-here")), fresh);
        assert_eq!(codec.decode(Some("!!!.???")), fresh);
        assert_eq!(codec.decode(Some(&token[..token.len() - 4])), fresh);
    }

    #[test]
    fn foreign_secret_is_fresh() {
        let other = CursorCodec::new("another-secret");
        let token = other.encode(CursorState { seed: 5, offset: 9 }).unwrap();
        assert_eq!(codec().decode(Some(&token)), CursorState { seed: 777, offset: 0 });
    }

    #[test]
    fn forged_payload_is_rejected() {
        let codec = codec();
        let token = codec.encode(CursorState { seed: 5, offset: 9 }).unwrap();
        let (_, mac) = token.split_once('.').unwrap();
        let forged_payload = URL_SAFE_NO_PAD.encode(br#"{"seed":5,"offset":1000}"#);
        let forged = format!("{forged_payload}.{mac}");
        assert_eq!(codec.decode(Some(&forged)).offset, 0);
    }

    #[test]
    fn expired_token_is_fresh() {
        let codec = codec();
        let claims = Claims {
            seed: 1,
            offset: 2,
            exp: Some(now_unix() - 10),
        };
        let payload = serde_json::to_vec(&claims).unwrap();
        let mac = blake3::keyed_hash(&codec.key, &payload);
        let token = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(mac.as_bytes())
        );
        assert_eq!(codec.decode(Some(&token)), CursorState { seed: 777, offset: 0 });
    }

    #[test]
    fn ttl_token_decodes_while_valid() {
        let codec = codec().with_ttl(Duration::from_secs(300));
        let state = CursorState { seed: 8, offset: 4 };
        let token = codec.encode(state).unwrap();
        assert_eq!(codec.decode(Some(&token)), state);
    }
}
