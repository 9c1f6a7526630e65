pub mod protocol;
pub mod error;
pub mod drift;
pub mod value;
pub mod list;
pub mod grid;
pub mod liveness;
pub mod registry;
pub mod reconcile;
pub mod serialization;
pub mod transport;
pub mod sync;
pub mod debug;

pub use protocol::{
    EntityId, FieldName, FieldKey,
    Precedence, Operation, Coordinates,
    FieldValue, WireValue, Replicable,
};

pub use error::{
    ReplicaError, Result,
};

pub use drift::{
    DriftCounter, DriftVerdict, ConsistencyRepair, Reconcilable,
    DEFAULT_TOLERANCE,
};

pub use value::{
    ApplyCallback, FieldMeta, ReplicatedField, ReplicatedValue,
};

pub use list::{
    ListEdit, ReplicatedList,
};

pub use grid::{
    Grid, GridEdit, ReplicatedGrid,
};

pub use liveness::LivenessTable;

pub use registry::{
    Registry, RegistryConfig, FieldHandle,
};

pub use reconcile::{
    MergeReport, Role,
};

pub use serialization::{
    Snapshot, FieldMap, SnapshotCodec, WireFormat,
};

pub use transport::{
    Transport, MemoryTransport,
};

#[cfg(feature = "async")]
pub use transport::{
    AsyncTransport, channel::ChannelTransport,
};

pub use sync::{
    ReplicaSession, SessionConfig, SessionStats,
};

pub use debug::{
    init_debug_mode, is_debug_enabled, is_trace_enabled,
    log_snapshot, trace_merge,
    trace_serialization, trace_deserialization,
    trace_transport_send, trace_transport_receive,
    format_bytes, snapshot_summary,
};
