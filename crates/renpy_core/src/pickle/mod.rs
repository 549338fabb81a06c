//! Pickle opcode handling: reading a payload into records, replaying them
//! into a safe object graph, and encoding replacement scalars.

mod builder;
mod cursor;
mod encode;
pub mod literal;
mod opcode;
mod stream;
mod value;

pub use builder::{BuildOutput, build_graph};
pub use cursor::Cursor;
pub use encode::{encode_scalar, verify_single_literal};
pub use opcode::{ArgLayout, Opcode, StringClass};
pub use stream::{Argument, FrameInfo, MAX_PROTOCOL, OpcodeRecord, OpcodeStream, read_stream};
pub use value::{
    MappingEntry, MemoTable, ObjectGraph, OpaqueProxy, SafeValue, SequenceKind, ValueId,
};
