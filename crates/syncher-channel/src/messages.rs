//! Requests, replies, and broadcasts exchanged with a sequencer.

use serde::{Deserialize, Serialize};

use syncher_auth::Credential;
use syncher_core::{Diff, LiveId, OpKind, Operation, Record, RecordId, Snapshot};

/// A request addressed to the sequencer of one record id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Persist a brand-new record.
    Create { record: Record },
    /// Fetch the authoritative copy.
    Load { record_id: RecordId },
    /// Apply a mutation.
    Mutate {
        record_id: RecordId,
        live_id: LiveId,
        /// Per-instance counter, echoed in the resulting broadcast.
        op_id: u64,
        credential: Credential,
        op: Operation,
    },
    /// Destroy the record.
    Destroy {
        record_id: RecordId,
        live_id: LiveId,
        credential: Credential,
    },
}

impl Request {
    pub fn record_id(&self) -> &RecordId {
        match self {
            Request::Create { record } => &record.id,
            Request::Load { record_id }
            | Request::Mutate { record_id, .. }
            | Request::Destroy { record_id, .. } => record_id,
        }
    }

    pub fn credential(&self) -> Option<&Credential> {
        match self {
            Request::Mutate { credential, .. } | Request::Destroy { credential, .. } => {
                Some(credential)
            }
            Request::Create { .. } | Request::Load { .. } => None,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Create { .. } => "create",
            Request::Load { .. } => "load",
            Request::Mutate { .. } => "mutate",
            Request::Destroy { .. } => "destroy",
        }
    }
}

/// The sequencer's answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    Created { version: u64 },
    Loaded { snapshot: Snapshot },
    /// The mutation was accepted. `None` when it changed nothing, in which
    /// case no broadcast was sent.
    Applied { broadcast: Option<Broadcast> },
    Destroyed { broadcast: Broadcast },
    Rejected { code: RejectCode, message: String },
}

impl Reply {
    pub fn rejected(code: RejectCode, message: impl Into<String>) -> Self {
        Reply::Rejected {
            code,
            message: message.into(),
        }
    }
}

/// Why the sequencer refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectCode {
    NotFound,
    AlreadyExists,
    Unauthorized,
    AlreadyDestroyed,
    InvalidOperation,
    Internal,
}

/// A canonical change fanned out to every subscriber of a record id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Broadcast {
    pub record_id: RecordId,
    /// The instance whose request produced this broadcast.
    pub live_id: LiveId,
    /// The record version after the change; strictly increasing per id.
    pub seq: u64,
    pub event: BroadcastEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BroadcastEvent {
    Update { op: OpKind, op_id: u64, diff: Diff },
    Destroy,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use syncher_core::Secret;

    #[test]
    fn test_request_accessors() {
        let req = Request::Mutate {
            record_id: RecordId::new("r1"),
            live_id: LiveId(7),
            op_id: 3,
            credential: Credential::Secret(Secret::new("s")),
            op: Operation::update(json!({ "a": 1 })).unwrap(),
        };
        assert_eq!(req.record_id(), &RecordId::new("r1"));
        assert!(req.credential().is_some());
        assert_eq!(req.name(), "mutate");

        let load = Request::Load {
            record_id: RecordId::new("r2"),
        };
        assert!(load.credential().is_none());
    }
}
