//! Records and their externally visible projections.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};
use crate::types::{RecordId, Secret};

/// Field data of a record: an ordered mapping from field name to JSON value.
pub type Data = Map<String, Value>;

/// Field-level change produced by an operation.
///
/// Each entry is the final state of a top-level field; `null` means the field
/// was deleted.
pub type Diff = Map<String, Value>;

/// Field names that live on the record itself and never inside `data`.
pub const RESERVED_KEYS: [&str; 2] = ["id", "secret"];

/// The durable, authoritative unit of synchronized state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub secret: Secret,
    pub data: Data,
    /// Number of accepted mutations; doubles as the broadcast sequence number.
    pub version: u64,
    pub destroyed: bool,
}

impl Record {
    /// A brand-new record at version 0.
    pub fn new(id: RecordId, secret: Secret, data: Data) -> Self {
        Self {
            id,
            secret,
            data,
            version: 0,
            destroyed: false,
        }
    }

    /// The secret-free view handed to instances.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            id: self.id.clone(),
            data: self.data.clone(),
            version: self.version,
        }
    }

    /// Turn this record into a tombstone: data is dropped, the id stays taken.
    pub fn tombstone(&mut self) {
        self.destroyed = true;
        self.data.clear();
        self.version += 1;
    }

    /// JSON projection without the secret.
    pub fn json(&self) -> Value {
        project(&self.id, &self.data)
    }
}

/// A record as observed by an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: RecordId,
    pub data: Data,
    pub version: u64,
}

impl Snapshot {
    pub fn json(&self) -> Value {
        project(&self.id, &self.data)
    }
}

/// Build the `json()` projection: every data field plus `id`, never `secret`.
pub fn project(id: &RecordId, data: &Data) -> Value {
    let mut out: Data = data
        .iter()
        .filter(|(key, _)| key.as_str() != "secret")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    out.insert("id".into(), Value::String(id.to_string()));
    Value::Object(out)
}

/// Lift the reserved `id` and `secret` fields out of initial data.
pub fn split_reserved(mut data: Data) -> Result<(Option<RecordId>, Option<Secret>, Data)> {
    let id = match data.remove("id") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(RecordId::new(s)),
        Some(Value::Number(n)) => Some(RecordId::new(n.to_string())),
        Some(other) => return Err(CoreError::InvalidId(other.to_string())),
    };
    let secret = match data.remove("secret") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(Secret::new(s)),
        Some(other) => Some(Secret::new(other.to_string())),
    };
    Ok((id, secret, data))
}
