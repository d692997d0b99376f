pub mod protocol;
pub mod error;
pub mod schema;
pub mod registry;
pub mod instance;
pub mod share;
pub mod observer;
pub mod scheduler;
pub mod encoder;
pub mod replica;
pub mod serialization;
pub mod transport;
pub mod debug;

pub use protocol::{
    Identity, FieldIndex, UpdateOfShared,
    Op, OpCode, WireValue, CreateEntry, SetEntry, CallOp,
    DebugUpdate, DebugEntry, DebugFields, DebugCall, UpdateStats,
};

pub use error::{
    ShareError, Result,
};

pub use schema::{
    Schema, FieldSchema, FieldKind, PrimitiveType, Accessor, AccessorTable,
};

pub use registry::{
    SchemaRegistry, RegistryConfig, Manifest,
    Definition, DefinitionKind, DefineValue, NativeFn, SharedClass,
};

pub use instance::{
    SharedInstance, Value, plain,
};

pub use share::{
    share, unshare,
};

pub use observer::{
    Observer, PendingChangeSet,
};

pub use scheduler::CommitScheduler;

pub use encoder::{
    UpdateBuilder, encode_changes, encode_create, encode_destroy, encode_call,
};

pub use replica::{
    Replica, ReplicaObject,
};

pub use serialization::{
    BinarySerializer, BinaryFormat,
};

pub use transport::{
    Transport, MemoryTransport, forward_to,
};

#[cfg(feature = "async")]
pub use transport::{
    AsyncTransport, ChannelTransport,
};

pub use debug::{
    init_debug_mode, set_debug_mode, is_debug_enabled, is_trace_enabled,
    log_update, trace_flush, trace_serialization, trace_deserialization,
    format_bytes, update_summary,
};
