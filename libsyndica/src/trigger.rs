//! Bearer-token gate for the dispatch and retry triggers
//!
//! The sweeps are invoked by an external scheduler or an operator, not by a
//! trusted in-process caller, so every entry point verifies a shared secret
//! first. Tokens are compared as SHA-256 digests in constant time.

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::error::{Result, SyndicaError};

pub struct TriggerAuth {
    secret_digest: [u8; 32],
}

impl TriggerAuth {
    pub fn new(shared_secret: SecretString) -> Self {
        Self {
            secret_digest: digest(shared_secret.expose_secret()),
        }
    }

    /// Verify a presented bearer token. Returns `Unauthorized` on any
    /// mismatch, including the empty token.
    pub fn verify(&self, token: &str) -> Result<()> {
        if constant_time_eq(&digest(token), &self.secret_digest) {
            Ok(())
        } else {
            Err(SyndicaError::Unauthorized)
        }
    }
}

fn digest(input: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher.finalize().into()
}

/// Fixed-length comparison that does not short-circuit on the first
/// differing byte.
fn constant_time_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
