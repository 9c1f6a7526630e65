use crate::debug;
use crate::error::Result;
use crate::protocol::*;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

pub type FieldMap = HashMap<EntityId, HashMap<FieldName, WireValue>>;

/// Immutable deep copy of a registry's fields and change set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    sender: EntityId,
    sequence: u64,
    fields: FieldMap,
    change_set: Vec<FieldKey>,
}

impl Snapshot {
    pub fn from_parts(
        sender: EntityId,
        sequence: u64,
        fields: FieldMap,
        change_set: Vec<FieldKey>,
    ) -> Self {
        Self {
            sender,
            sequence,
            fields,
            change_set,
        }
    }

    pub fn sender(&self) -> EntityId {
        self.sender
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn change_set(&self) -> &[FieldKey] {
        &self.change_set
    }

    pub fn field(&self, key: &FieldKey) -> Option<&WireValue> {
        self.fields.get(&key.entity)?.get(&key.name)
    }

    pub fn field_count(&self) -> usize {
        self.fields.values().map(HashMap::len).sum()
    }

    pub fn iter_fields(&self) -> impl Iterator<Item = (FieldKey, &WireValue)> + '_ {
        self.fields.iter().flat_map(|(entity, fields)| {
            fields
                .iter()
                .map(move |(name, value)| (FieldKey::new(*entity, name.clone()), value))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Json,
    MessagePack,
    Bincode,
}

impl WireFormat {
    pub fn name(&self) -> &'static str {
        match self {
            WireFormat::Json => "JSON",
            WireFormat::MessagePack => "MessagePack",
            WireFormat::Bincode => "Bincode",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SnapshotCodec {
    format: WireFormat,
}

impl SnapshotCodec {
    pub fn new(format: WireFormat) -> Self {
        Self { format }
    }

    pub fn json() -> Self {
        Self::new(WireFormat::Json)
    }

    pub fn messagepack() -> Self {
        Self::new(WireFormat::MessagePack)
    }

    pub fn bincode() -> Self {
        Self::new(WireFormat::Bincode)
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub fn encode(&self, snapshot: &Snapshot) -> Result<Bytes> {
        let started = Instant::now();
        let data = self.encode_value(snapshot)?;
        debug::trace_serialization(self.format.name(), data.len(), started.elapsed().as_micros());
        Ok(data)
    }

    pub fn decode(&self, data: &[u8]) -> Result<Snapshot> {
        let started = Instant::now();
        let snapshot = self.decode_value(data)?;
        debug::trace_deserialization(self.format.name(), data.len(), started.elapsed().as_micros());
        Ok(snapshot)
    }

    fn encode_value<S: Serialize>(&self, value: &S) -> Result<Bytes> {
        match self.format {
            WireFormat::Json => {
                let json = serde_json::to_vec(value)?;
                Ok(Bytes::from(json))
            }
            WireFormat::MessagePack => {
                let msgpack = rmp_serde::to_vec(value)?;
                Ok(Bytes::from(msgpack))
            }
            WireFormat::Bincode => {
                let bincode_data = bincode::serialize(value)?;
                Ok(Bytes::from(bincode_data))
            }
        }
    }

    fn decode_value<D: DeserializeOwned>(&self, data: &[u8]) -> Result<D> {
        match self.format {
            WireFormat::Json => Ok(serde_json::from_slice(data)?),
            WireFormat::MessagePack => Ok(rmp_serde::from_slice(data)?),
            WireFormat::Bincode => Ok(bincode::deserialize(data)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> Snapshot {
        let mut player = HashMap::new();
        player.insert("score".to_string(), WireValue::Scalar(FieldValue::I64(10)));
        player.insert(
            "hand".to_string(),
            WireValue::List(vec![
                FieldValue::String("red".to_string()),
                FieldValue::String("blue".to_string()),
            ]),
        );

        let mut session = HashMap::new();
        session.insert(
            "board".to_string(),
            WireValue::Grid {
                rows: 1,
                cols: 2,
                cells: vec![FieldValue::U8(0), FieldValue::U8(3)],
            },
        );

        let mut fields = HashMap::new();
        fields.insert(7, player);
        fields.insert(0, session);

        Snapshot::from_parts(7, 42, fields, vec![FieldKey::new(7, "score")])
    }

    #[test]
    fn test_snapshot_round_trip_all_formats() {
        let snapshot = sample_snapshot();

        for codec in [SnapshotCodec::json(), SnapshotCodec::messagepack(), SnapshotCodec::bincode()] {
            let encoded = codec.encode(&snapshot).unwrap();
            let decoded = codec.decode(&encoded).unwrap();
            assert_eq!(decoded, snapshot, "format {}", codec.format().name());
        }
    }

    #[test]
    fn test_snapshot_lookup() {
        let snapshot = sample_snapshot();

        assert_eq!(snapshot.field_count(), 3);
        assert_eq!(
            snapshot.field(&FieldKey::new(7, "score")),
            Some(&WireValue::Scalar(FieldValue::I64(10)))
        );
        assert!(snapshot.field(&FieldKey::new(7, "missing")).is_none());
        assert_eq!(snapshot.iter_fields().count(), 3);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let codec = SnapshotCodec::json();
        assert!(codec.decode(b"not a snapshot").is_err());
    }
}
