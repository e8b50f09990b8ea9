//! Manager authorization for enrollment and export.
//!
//! Credential is an opaque shared secret sent as `Authorization: Bearer <pin>`.

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("no credential provided")]
    Missing,
    #[error("invalid credential")]
    Invalid,
}

pub struct ManagerAuth {
    pin_digest: [u8; 32],
}

impl ManagerAuth {
    pub fn new(pin: &str) -> Self {
        Self {
            pin_digest: digest(pin),
        }
    }

    /// Check the raw `Authorization` header value.
    pub fn check(&self, header: Option<&str>) -> Result<(), AuthError> {
        let header = header.ok_or(AuthError::Missing)?;
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .ok_or(AuthError::Invalid)?;

        // Compare fixed-size digests, touching every byte.
        let presented = digest(token);
        let diff = presented
            .iter()
            .zip(self.pin_digest.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        if diff == 0 {
            Ok(())
        } else {
            Err(AuthError::Invalid)
        }
    }
}

fn digest(secret: &str) -> [u8; 32] {
    Sha256::digest(secret.as_bytes()).into()
}
