use std::collections::BTreeMap;
use std::fmt;

use crate::core_api::CoreError;

/// Index of a value in an [`ObjectGraph`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceKind {
    List,
    Tuple,
    Set,
}

/// One key/value pair of a mapping. `value_record` is the index of the opcode
/// record that pushed the value when that value was written as a literal; a
/// value that came from a memo fetch or from a nested build has none.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingEntry {
    pub key: ValueId,
    pub value: ValueId,
    pub value_record: Option<usize>,
}

/// Inert stand-in for a class reference or an object the builder refused to
/// construct. Whatever the stream tried to feed it is kept for read-only
/// inspection, never interpreted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OpaqueProxy {
    /// `module.name` of the class or callable named in the stream.
    pub type_tag: String,
    /// `false` for the bare `GLOBAL` reference, `true` once it was "called".
    pub instance: bool,
    pub args: Option<ValueId>,
    pub state: Option<ValueId>,
    pub items: Vec<ValueId>,
    pub entries: Vec<MappingEntry>,
}

/// Safe shadow of a pickled value. Containers refer to their children by
/// arena index so shared and self-referencing structures need no pointers.
#[derive(Debug, Clone, PartialEq)]
pub enum SafeValue {
    None,
    Boolean(bool),
    Integer(i64),
    /// Little-endian two's complement bytes of an integer wider than `i64`.
    BigInteger(Vec<u8>),
    Float(f64),
    Text(String),
    Mapping(Vec<MappingEntry>),
    Sequence {
        kind: SequenceKind,
        items: Vec<ValueId>,
    },
    OpaqueProxy(OpaqueProxy),
}

impl SafeValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Boolean(_) => "bool",
            Self::Integer(_) | Self::BigInteger(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "str",
            Self::Mapping(_) => "dict",
            Self::Sequence {
                kind: SequenceKind::List,
                ..
            } => "list",
            Self::Sequence {
                kind: SequenceKind::Tuple,
                ..
            } => "tuple",
            Self::Sequence {
                kind: SequenceKind::Set,
                ..
            } => "set",
            Self::OpaqueProxy(_) => "object",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Arena holding every value the builder produced. `root` is what `STOP`
/// returned.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectGraph {
    values: Vec<SafeValue>,
    root: ValueId,
}

impl ObjectGraph {
    pub(crate) fn from_parts(values: Vec<SafeValue>, root: ValueId) -> Self {
        Self { values, root }
    }

    pub fn root(&self) -> ValueId {
        self.root
    }

    pub fn get(&self, id: ValueId) -> &SafeValue {
        &self.values[id.0]
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Find a Text-keyed entry in a mapping.
    pub fn lookup(&self, mapping: ValueId, key: &str) -> Option<&MappingEntry> {
        match self.get(mapping) {
            SafeValue::Mapping(entries) => entries
                .iter()
                .find(|e| self.get(e.key).as_text() == Some(key)),
            _ => None,
        }
    }

    /// One-line, depth-limited rendering for read-only display.
    pub fn summarize(&self, id: ValueId, max_depth: usize) -> String {
        let mut out = String::new();
        self.summarize_into(id, max_depth, &mut out);
        out
    }

    fn summarize_into(&self, id: ValueId, depth: usize, out: &mut String) {
        use fmt::Write as _;
        match self.get(id) {
            SafeValue::None => out.push_str("None"),
            SafeValue::Boolean(b) => out.push_str(if *b { "True" } else { "False" }),
            SafeValue::Integer(v) => {
                let _ = write!(out, "{v}");
            }
            SafeValue::BigInteger(bytes) => {
                let _ = write!(out, "<int of {} bytes>", bytes.len());
            }
            SafeValue::Float(v) => {
                let _ = write!(out, "{v:?}");
            }
            SafeValue::Text(s) => {
                let _ = write!(out, "{s:?}");
            }
            SafeValue::Mapping(entries) => {
                if depth == 0 {
                    let _ = write!(out, "{{...{} entries}}", entries.len());
                    return;
                }
                out.push('{');
                for (i, entry) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.summarize_into(entry.key, depth - 1, out);
                    out.push_str(": ");
                    self.summarize_into(entry.value, depth - 1, out);
                }
                out.push('}');
            }
            SafeValue::Sequence { kind, items } => {
                let (open, close) = match kind {
                    SequenceKind::List => ('[', ']'),
                    SequenceKind::Tuple => ('(', ')'),
                    SequenceKind::Set => ('{', '}'),
                };
                if depth == 0 {
                    let _ = write!(out, "{open}...{} items{close}", items.len());
                    return;
                }
                out.push(open);
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.summarize_into(*item, depth - 1, out);
                }
                out.push(close);
            }
            SafeValue::OpaqueProxy(proxy) => {
                let _ = write!(out, "<{}>", proxy.type_tag);
            }
        }
    }
}

/// Ordinal -> value table filled strictly in stream order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoTable {
    slots: BTreeMap<u32, ValueId>,
}

impl MemoTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Ordinal `MEMOIZE` would assign next.
    pub fn next_ordinal(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn assign(&mut self, ordinal: u32, value: ValueId) -> Result<(), CoreError> {
        if self.slots.contains_key(&ordinal) {
            return Err(CoreError::format(format!(
                "memo ordinal {ordinal} assigned twice"
            )));
        }
        self.slots.insert(ordinal, value);
        Ok(())
    }

    pub fn fetch(&self, ordinal: u32) -> Result<ValueId, CoreError> {
        self.slots.get(&ordinal).copied().ok_or_else(|| {
            CoreError::format(format!(
                "backreference to unassigned memo ordinal {ordinal}"
            ))
        })
    }
}
