//! Credentials presented with a mutation, and where they came from.

use serde::{Deserialize, Serialize};

use syncher_core::Secret;

/// Proof of authority attached to every mutating request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Credential {
    /// The record's secret.
    Secret(Secret),
    /// Trusted in-process caller; bypasses the secret check.
    Private,
}

impl Credential {
    pub fn is_private(&self) -> bool {
        matches!(self, Credential::Private)
    }
}

impl From<Secret> for Credential {
    fn from(secret: Secret) -> Self {
        Credential::Secret(secret)
    }
}

/// Where a request entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Same process as the sequencer.
    Local,
    /// Crossed a wire boundary.
    Remote,
}

/// BLAKE3 digest of a secret.
///
/// Equality on [`blake3::Hash`] is constant-time, so comparing digests does
/// not leak how much of a guessed secret matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretDigest(blake3::Hash);

impl SecretDigest {
    pub fn of(secret: &Secret) -> Self {
        Self(blake3::hash(secret.as_str().as_bytes()))
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }
}
