//! The authorization gate consulted by the sequencer.
//!
//! A request is accepted iff its secret equals the record's secret, or the
//! credential is `Private` and the request originated in-process.

use syncher_core::Record;

use crate::credential::{Credential, Origin, SecretDigest};
use crate::error::{AuthError, Result};

/// Stateless authorization check.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gate;

impl Gate {
    pub fn new() -> Self {
        Self
    }

    /// Authorize a mutation or destroy of `record`.
    pub fn authorize(&self, record: &Record, credential: &Credential, origin: Origin) -> Result<()> {
        match (credential, origin) {
            (Credential::Private, Origin::Local) => Ok(()),
            (Credential::Private, Origin::Remote) => {
                tracing::warn!(record_id = %record.id, "private credential from remote origin");
                Err(AuthError::RemotePrivate(record.id.clone()))
            }
            (Credential::Secret(secret), _) => {
                if SecretDigest::of(secret) == SecretDigest::of(&record.secret) {
                    Ok(())
                } else {
                    tracing::warn!(record_id = %record.id, "secret mismatch");
                    Err(AuthError::BadSecret(record.id.clone()))
                }
            }
        }
    }
}
