use crate::protocol::{Coordinates, EntityId, FieldKey};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplicaError {
    #[error("Field {0} is not registered")]
    NotRegistered(String),

    #[error("Field {0} is already registered")]
    DuplicateField(FieldKey),

    #[error("Coordinate {coordinate} out of range (bounds {bounds})")]
    IndexOutOfRange { coordinate: Coordinates, bounds: String },

    #[error("Entity {0} has no liveness entry")]
    UnknownEntity(EntityId),

    #[error("Remote field {0} has no local counterpart")]
    UnknownRemoteField(FieldKey),

    #[error("Entity {sender} attempted to write host-owned field {field}")]
    UnauthorizedWrite { sender: EntityId, field: FieldKey },

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Shared collection passed to {0}; copied into an owned buffer")]
    FixedCapacityCollection(&'static str),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MessagePack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Connection closed")]
    ConnectionClosed,
}

impl ReplicaError {
    pub(crate) fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        ReplicaError::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// True for anomalies caused by a peer's snapshot rather than by local code.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ReplicaError::UnknownRemoteField(_)
                | ReplicaError::UnauthorizedWrite { .. }
                | ReplicaError::TypeMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ReplicaError>;
