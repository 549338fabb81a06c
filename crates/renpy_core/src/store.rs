//! Variable index: finds the game's variable store in the object graph and
//! lists which of its entries can be edited in place.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::EditorConfig;
use crate::core_api::CoreError;
use crate::layout::ByteRange;
use crate::pickle::{
    Argument, BuildOutput, MappingEntry, ObjectGraph, Opcode, OpcodeStream, SafeValue,
    StringClass, ValueId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    Integer,
    Float,
    Boolean,
    Text,
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Integer => "int",
            Self::Float => "float",
            Self::Boolean => "bool",
            Self::Text => "str",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Text(String),
}

impl ScalarValue {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Self::Integer(_) => ScalarKind::Integer,
            Self::Float(_) => ScalarKind::Float,
            Self::Boolean(_) => ScalarKind::Boolean,
            Self::Text(_) => ScalarKind::Text,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Boolean(v) => write!(f, "{}", if *v { "True" } else { "False" }),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// How a scalar is written in the stream. Replacements keep the family so
/// the runtime reads back the same Python type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarEncoding {
    Bool,
    Int,
    Long,
    Float,
    Unicode,
    ByteString,
    Bytes,
}

impl ScalarEncoding {
    pub fn of(opcode: Opcode, argument: &Argument) -> Option<Self> {
        let encoding = match opcode {
            Opcode::NewTrue | Opcode::NewFalse => Self::Bool,
            Opcode::Int if matches!(argument, Argument::Bool(_)) => Self::Bool,
            Opcode::Int | Opcode::BinInt | Opcode::BinInt1 | Opcode::BinInt2 => Self::Int,
            Opcode::Long | Opcode::Long1 | Opcode::Long4 => Self::Long,
            Opcode::Float | Opcode::BinFloat => Self::Float,
            other => match other.string_class()? {
                StringClass::Unicode => Self::Unicode,
                StringClass::ByteString => Self::ByteString,
                StringClass::Bytes => Self::Bytes,
            },
        };
        Some(encoding)
    }

    pub fn string_class(self) -> Option<StringClass> {
        match self {
            Self::Unicode => Some(StringClass::Unicode),
            Self::ByteString => Some(StringClass::ByteString),
            Self::Bytes => Some(StringClass::Bytes),
            _ => None,
        }
    }
}

/// One editable store variable, valid for a single index generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableEntry {
    /// Display name, store prefix stripped.
    pub name: String,
    /// Key exactly as it appears in the stream.
    pub key: String,
    pub value: ScalarValue,
    /// Bytes of the literal opcode holding the value.
    pub range: ByteRange,
    pub source_opcode: Opcode,
    pub encoding: ScalarEncoding,
    /// Index of the literal's record in the opcode stream.
    pub record: usize,
    pub generation: u64,
    pub memo_ordinal: Option<u32>,
    /// The memo slot is backreferenced elsewhere in the stream.
    pub shared: bool,
}

impl VariableEntry {
    pub fn kind(&self) -> ScalarKind {
        self.value.kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadOnlyReason {
    Reserved,
    Container,
    Opaque,
    NoneValue,
    /// Integer wider than 64 bits.
    BigInteger,
    /// Value reached the store through a backreference or a constructor call.
    NonLiteral,
}

impl fmt::Display for ReadOnlyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Reserved => "reserved name",
            Self::Container => "container",
            Self::Opaque => "opaque object",
            Self::NoneValue => "None",
            Self::BigInteger => "integer wider than 64 bits",
            Self::NonLiteral => "not a literal",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadOnlyEntry {
    pub name: String,
    pub key: String,
    pub summary: String,
    pub reason: ReadOnlyReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreIndex {
    pub variables: Vec<VariableEntry>,
    pub read_only: Vec<ReadOnlyEntry>,
}

impl StoreIndex {
    pub fn variable(&self, name: &str) -> Option<&VariableEntry> {
        self.variables.iter().find(|v| v.name == name)
    }
}

const SUMMARY_DEPTH: usize = 2;

/// Build the variable index for one scan.
pub fn build_index(
    stream: &OpcodeStream,
    built: &BuildOutput,
    config: &EditorConfig,
    generation: u64,
) -> Result<StoreIndex, CoreError> {
    let graph = &built.graph;
    let roots = locate_roots(graph)?;
    let mut index = StoreIndex::default();

    let nested = graph
        .lookup(roots, &config.store_key)
        .map(|e| e.value)
        .filter(|&v| matches!(graph.get(v), SafeValue::Mapping(_)));

    let (store, prefix) = match nested {
        Some(store) => (store, ""),
        None => (roots, config.namespace_prefix.as_str()),
    };
    let SafeValue::Mapping(entries) = graph.get(store) else {
        return Ok(index);
    };

    for entry in entries {
        let Some(key) = graph.get(entry.key).as_text() else {
            continue;
        };
        let Some(name) = key.strip_prefix(prefix) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        classify_entry(stream, built, config, generation, name, key, entry, &mut index);
    }

    log::debug!(
        "indexed {} editable and {} read-only variables (generation {generation})",
        index.variables.len(),
        index.read_only.len()
    );
    Ok(index)
}

/// The roots mapping: the root itself, or the first item of a root sequence.
fn locate_roots(graph: &ObjectGraph) -> Result<ValueId, CoreError> {
    let root = graph.root();
    let candidate = match graph.get(root) {
        SafeValue::Sequence { items, .. } => items.first().copied(),
        _ => Some(root),
    };
    candidate
        .filter(|&id| matches!(graph.get(id), SafeValue::Mapping(_)))
        .ok_or_else(|| {
            CoreError::format(format!(
                "no variable store: payload root is a {}",
                graph.get(root).type_name()
            ))
        })
}

#[allow(clippy::too_many_arguments)]
fn classify_entry(
    stream: &OpcodeStream,
    built: &BuildOutput,
    config: &EditorConfig,
    generation: u64,
    name: &str,
    key: &str,
    entry: &MappingEntry,
    index: &mut StoreIndex,
) {
    let graph = &built.graph;
    let value = graph.get(entry.value);
    let read_only = |reason| ReadOnlyEntry {
        name: name.to_string(),
        key: key.to_string(),
        summary: graph.summarize(entry.value, SUMMARY_DEPTH),
        reason,
    };

    if config.is_reserved(name) {
        index.read_only.push(read_only(ReadOnlyReason::Reserved));
        return;
    }

    let scalar = match value {
        SafeValue::Integer(v) => ScalarValue::Integer(*v),
        SafeValue::Float(v) => ScalarValue::Float(*v),
        SafeValue::Boolean(v) => ScalarValue::Boolean(*v),
        SafeValue::Text(s) => ScalarValue::Text(s.clone()),
        SafeValue::None => {
            index.read_only.push(read_only(ReadOnlyReason::NoneValue));
            return;
        }
        SafeValue::BigInteger(_) => {
            index.read_only.push(read_only(ReadOnlyReason::BigInteger));
            return;
        }
        SafeValue::Mapping(_) | SafeValue::Sequence { .. } => {
            index.read_only.push(read_only(ReadOnlyReason::Container));
            return;
        }
        SafeValue::OpaqueProxy(_) => {
            index.read_only.push(read_only(ReadOnlyReason::Opaque));
            return;
        }
    };

    let literal = entry
        .value_record
        .and_then(|r| stream.record(r).map(|rec| (r, rec)))
        .filter(|(_, rec)| rec.opcode.is_scalar_literal())
        .and_then(|(r, rec)| {
            ScalarEncoding::of(rec.opcode, &rec.argument).map(|enc| (r, rec, enc))
        });
    let Some((record, rec, encoding)) = literal else {
        index.read_only.push(read_only(ReadOnlyReason::NonLiteral));
        return;
    };

    let memo_ordinal = built.memo_ordinal_of(record);
    index.variables.push(VariableEntry {
        name: name.to_string(),
        key: key.to_string(),
        value: scalar,
        range: rec.range,
        source_opcode: rec.opcode,
        encoding,
        record,
        generation,
        memo_ordinal,
        shared: memo_ordinal.is_some_and(|o| built.is_shared(o)),
    });
}
