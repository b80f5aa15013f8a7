// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Guest authentication hook.
//!
//! Challenge/response over the handshake:
//!
//! ```text
//! Host                                 Guest
//!  |  DotsMsgHello{nonce}  ------------->  |
//!  |  <------ DotsMsgConnect{cnonce, digest}
//!  |  verify(digest)                       |
//! ```
//!
//! The digest is `hex(SHA-256("{nonce}:{cnonce}:{client_name}:{secret}"))`.

use ring::digest::{digest, SHA256};
use ring::rand::{SecureRandom, SystemRandom};

/// Decides whether a guest must authenticate and checks its response.
pub trait AuthManager: Send {
    /// Whether a guest connecting from `peer` must authenticate.
    fn requires_authentication(&self, peer: &str) -> bool;

    fn verify_authentication(&self, client_name: &str, nonce: u64, cnonce: u64, digest: &str) -> bool;
}

/// Accepts every guest without a challenge.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuthentication;

impl AuthManager for NoAuthentication {
    fn requires_authentication(&self, _peer: &str) -> bool {
        false
    }

    fn verify_authentication(&self, _: &str, _: u64, _: u64, _: &str) -> bool {
        true
    }
}

/// Shared-secret authentication for every guest.
#[derive(Clone)]
pub struct SecretAuthManager {
    secret: String,
}

impl SecretAuthManager {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for SecretAuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretAuthManager").finish_non_exhaustive()
    }
}

impl AuthManager for SecretAuthManager {
    fn requires_authentication(&self, _peer: &str) -> bool {
        true
    }

    fn verify_authentication(&self, client_name: &str, nonce: u64, cnonce: u64, digest: &str) -> bool {
        let expected = auth_digest(nonce, cnonce, client_name, &self.secret);
        constant_time_eq(expected.as_bytes(), digest.as_bytes())
    }
}

/// Response digest a guest sends for `nonce`.
pub fn auth_digest(nonce: u64, cnonce: u64, client_name: &str, secret: &str) -> String {
    let input = format!("{}:{}:{}:{}", nonce, cnonce, client_name, secret);
    hex::encode(digest(&SHA256, input.as_bytes()))
}

/// Random 64-bit nonce from the system RNG.
pub fn generate_nonce() -> Option<u64> {
    let mut bytes = [0u8; 8];
    SystemRandom::new().fill(&mut bytes).ok()?;
    Some(u64::from_le_bytes(bytes))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_roundtrip() {
        let auth = SecretAuthManager::new("s3cret");
        let d = auth_digest(42, 7, "guest", "s3cret");

        assert_eq!(d.len(), 64);
        assert!(auth.requires_authentication("127.0.0.1:5000"));
        assert!(auth.verify_authentication("guest", 42, 7, &d));
        assert!(!auth.verify_authentication("guest", 43, 7, &d));
        assert!(!auth.verify_authentication("other", 42, 7, &d));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let auth = SecretAuthManager::new("right");
        let d = auth_digest(1, 2, "guest", "wrong");
        assert!(!auth.verify_authentication("guest", 1, 2, &d));
    }

    #[test]
    fn test_no_authentication() {
        let auth = NoAuthentication;
        assert!(!auth.requires_authentication("x"));
        assert!(auth.verify_authentication("x", 0, 0, ""));
    }

    #[test]
    fn test_nonce_varies() {
        let a = generate_nonce().unwrap();
        let b = generate_nonce().unwrap();
        assert_ne!(a, b);
    }
}
