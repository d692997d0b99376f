use crate::debug;
use crate::error::Result;
use crate::protocol::*;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFormat {
    Json,
    MessagePack,
}

impl BinaryFormat {
    pub fn name(&self) -> &'static str {
        match self {
            BinaryFormat::Json => "json",
            BinaryFormat::MessagePack => "messagepack",
        }
    }
}

/// Turns updates into bytes for a transport. JSON output is exactly the
/// compact wire text; MessagePack carries the same structure.
#[derive(Debug, Clone, Copy)]
pub struct BinarySerializer {
    format: BinaryFormat,
}

impl BinarySerializer {
    pub fn new(format: BinaryFormat) -> Self {
        Self { format }
    }

    pub fn json() -> Self {
        Self::new(BinaryFormat::Json)
    }

    pub fn messagepack() -> Self {
        Self::new(BinaryFormat::MessagePack)
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes> {
        let start = Instant::now();
        let data = match self.format {
            BinaryFormat::Json => serde_json::to_vec(value)?,
            // Named so DebugUpdate keeps its keys when `call` is skipped.
            BinaryFormat::MessagePack => rmp_serde::to_vec_named(value)?,
        };
        debug::trace_serialization(self.format.name(), data.len(), start.elapsed().as_micros());
        Ok(Bytes::from(data))
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        let start = Instant::now();
        let value = match self.format {
            BinaryFormat::Json => serde_json::from_slice(data)?,
            BinaryFormat::MessagePack => rmp_serde::from_slice(data)?,
        };
        debug::trace_deserialization(self.format.name(), data.len(), start.elapsed().as_micros());
        Ok(value)
    }

    pub fn serialize_update(&self, update: &UpdateOfShared) -> Result<Bytes> {
        self.encode(update)
    }

    pub fn deserialize_update(&self, data: &[u8]) -> Result<UpdateOfShared> {
        self.decode(data)
    }

    pub fn serialize_debug(&self, update: &DebugUpdate) -> Result<Bytes> {
        self.encode(update)
    }

    pub fn deserialize_debug(&self, data: &[u8]) -> Result<DebugUpdate> {
        self.decode(data)
    }

    pub fn get_format(&self) -> BinaryFormat {
        self.format
    }
}
