//! Restricted object builder. Replays opcode records against an operand stack
//! and the memo table, turning known container classes into plain mappings
//! and sequences and everything else into inert proxies. No constructor named
//! by the payload is ever looked up or run.

use std::collections::BTreeMap;

use super::opcode::Opcode;
use super::stream::{Argument, OpcodeStream};
use super::value::{
    MappingEntry, MemoTable, ObjectGraph, OpaqueProxy, SafeValue, SequenceKind, ValueId,
};
use crate::core_api::CoreError;

/// Everything a scan needs besides the graph itself.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOutput {
    pub graph: ObjectGraph,
    pub memo_len: usize,
    /// Record index of a memoized literal -> the ordinal it was stored under.
    pub memo_slots: BTreeMap<usize, u32>,
    /// Ordinal -> number of backreferences to it.
    pub fetch_counts: BTreeMap<u32, usize>,
}

impl BuildOutput {
    pub fn memo_ordinal_of(&self, record: usize) -> Option<u32> {
        self.memo_slots.get(&record).copied()
    }

    pub fn is_shared(&self, ordinal: u32) -> bool {
        self.fetch_counts.get(&ordinal).copied().unwrap_or(0) > 0
    }
}

/// What a class reference turns into when it is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SafeKind {
    Mapping,
    Sequence(SequenceKind),
    Text,
    Reconstructor,
    Opaque,
}

fn classify(module: &str, name: &str) -> SafeKind {
    let renpy = module == "renpy" || module.starts_with("renpy.");
    match (module, name) {
        (_, "RevertableDict") if renpy => SafeKind::Mapping,
        (_, "RevertableList") if renpy => SafeKind::Sequence(SequenceKind::List),
        (_, "RevertableSet") if renpy => SafeKind::Sequence(SequenceKind::Set),
        ("collections", "OrderedDict" | "defaultdict") => SafeKind::Mapping,
        ("builtins" | "__builtin__", "dict") => SafeKind::Mapping,
        ("builtins" | "__builtin__", "list") => SafeKind::Sequence(SequenceKind::List),
        ("builtins" | "__builtin__", "tuple") => SafeKind::Sequence(SequenceKind::Tuple),
        ("builtins" | "__builtin__", "set" | "frozenset") => SafeKind::Sequence(SequenceKind::Set),
        ("_codecs", "encode") => SafeKind::Text,
        ("copy_reg" | "copyreg", "_reconstructor") => SafeKind::Reconstructor,
        _ => SafeKind::Opaque,
    }
}

#[derive(Debug, Clone, Copy)]
struct StackItem {
    id: ValueId,
    /// Record that pushed this value, when it was a scalar literal.
    origin: Option<usize>,
}

struct Builder {
    values: Vec<SafeValue>,
    stack: Vec<StackItem>,
    marks: Vec<usize>,
    memo: MemoTable,
    memo_slots: BTreeMap<usize, u32>,
    fetch_counts: BTreeMap<u32, usize>,
    record: usize,
}

/// Build the safe object graph for `stream`.
pub fn build_graph(stream: &OpcodeStream) -> Result<BuildOutput, CoreError> {
    let mut builder = Builder {
        values: Vec::new(),
        stack: Vec::new(),
        marks: Vec::new(),
        memo: MemoTable::new(),
        memo_slots: BTreeMap::new(),
        fetch_counts: BTreeMap::new(),
        record: 0,
    };

    for (index, record) in stream.records.iter().enumerate() {
        builder.record = index;
        if let Some(root) = builder.step(record.opcode, &record.argument)? {
            return Ok(BuildOutput {
                graph: ObjectGraph::from_parts(builder.values, root),
                memo_len: builder.memo.len(),
                memo_slots: builder.memo_slots,
                fetch_counts: builder.fetch_counts,
            });
        }
    }

    Err(CoreError::format("opcode stream ends without STOP"))
}

impl Builder {
    fn step(&mut self, opcode: Opcode, argument: &Argument) -> Result<Option<ValueId>, CoreError> {
        match opcode {
            Opcode::Proto | Opcode::Frame => {}
            Opcode::Stop => {
                if self.stack.len() != 1 || !self.marks.is_empty() {
                    return Err(self.error(format!(
                        "STOP with stack depth {} and {} open marks",
                        self.stack.len(),
                        self.marks.len()
                    )));
                }
                return Ok(Some(self.stack[0].id));
            }

            Opcode::Mark => self.marks.push(self.stack.len()),
            Opcode::Pop => {
                if self.marks.last() == Some(&self.stack.len()) {
                    self.pop_mark()?;
                } else {
                    self.pop()?;
                }
            }
            Opcode::PopMark => {
                self.pop_mark()?;
            }
            Opcode::Dup => {
                let top = self.top()?;
                self.stack.push(top);
            }

            Opcode::None => self.push_new(SafeValue::None),
            Opcode::NewTrue | Opcode::NewFalse => {
                self.push_literal(SafeValue::Boolean(opcode == Opcode::NewTrue))
            }
            Opcode::Int
            | Opcode::BinInt
            | Opcode::BinInt1
            | Opcode::BinInt2
            | Opcode::Long
            | Opcode::Long1
            | Opcode::Long4
            | Opcode::Float
            | Opcode::BinFloat
            | Opcode::String
            | Opcode::BinString
            | Opcode::ShortBinString
            | Opcode::Unicode
            | Opcode::BinUnicode
            | Opcode::ShortBinUnicode
            | Opcode::BinUnicode8
            | Opcode::BinBytes
            | Opcode::ShortBinBytes
            | Opcode::BinBytes8 => {
                let value = self.literal_value(argument)?;
                self.push_literal(value);
            }
            Opcode::ByteArray8 => {
                let value = self.literal_value(argument)?;
                self.push_new(value);
            }

            Opcode::EmptyDict => self.push_new(SafeValue::Mapping(Vec::new())),
            Opcode::Dict => {
                let items = self.pop_mark()?;
                let entries = self.pairs(&items)?;
                let id = self.alloc(SafeValue::Mapping(Vec::new()));
                for entry in entries {
                    self.set_item(id, entry)?;
                }
                self.stack.push(StackItem { id, origin: None });
            }
            Opcode::SetItem => {
                let value = self.pop()?;
                let key = self.pop()?;
                let target = self.top()?.id;
                self.set_item(target, entry_of(key, value))?;
            }
            Opcode::SetItems => {
                let items = self.pop_mark()?;
                let target = self.top()?.id;
                for entry in self.pairs(&items)? {
                    self.set_item(target, entry)?;
                }
            }

            Opcode::EmptyList => self.push_sequence(SequenceKind::List, Vec::new()),
            Opcode::List => {
                let items = self.pop_mark()?;
                self.push_sequence(SequenceKind::List, ids(&items));
            }
            Opcode::Append => {
                let value = self.pop()?;
                let target = self.top()?.id;
                self.extend(target, &[value.id])?;
            }
            Opcode::Appends => {
                let items = self.pop_mark()?;
                let target = self.top()?.id;
                self.extend(target, &ids(&items))?;
            }

            Opcode::EmptyTuple => self.push_sequence(SequenceKind::Tuple, Vec::new()),
            Opcode::Tuple => {
                let items = self.pop_mark()?;
                self.push_sequence(SequenceKind::Tuple, ids(&items));
            }
            Opcode::Tuple1 | Opcode::Tuple2 | Opcode::Tuple3 => {
                let n = match opcode {
                    Opcode::Tuple1 => 1,
                    Opcode::Tuple2 => 2,
                    _ => 3,
                };
                let items = self.pop_n(n)?;
                self.push_sequence(SequenceKind::Tuple, ids(&items));
            }

            Opcode::EmptySet => self.push_sequence(SequenceKind::Set, Vec::new()),
            Opcode::AddItems => {
                let items = self.pop_mark()?;
                let target = self.top()?.id;
                self.extend(target, &ids(&items))?;
            }
            Opcode::FrozenSet => {
                let items = self.pop_mark()?;
                self.push_sequence(SequenceKind::Set, ids(&items));
            }

            Opcode::Global => {
                let Argument::Global { module, name } = argument else {
                    return Err(self.error("GLOBAL without a class name".to_string()));
                };
                self.push_reference(module, name);
            }
            Opcode::StackGlobal => {
                let name = self.pop()?;
                let module = self.pop()?;
                let (Some(module), Some(name)) = (
                    self.get(module.id).as_text().map(str::to_string),
                    self.get(name.id).as_text().map(str::to_string),
                ) else {
                    return Err(self.error("STACK_GLOBAL operands are not strings".to_string()));
                };
                self.push_reference(&module, &name);
            }
            Opcode::Reduce | Opcode::NewObj => {
                let args = self.pop()?;
                let callable = self.pop()?;
                let id = self.call(callable.id, Some(args.id))?;
                self.stack.push(StackItem { id, origin: None });
            }
            Opcode::NewObjEx => {
                let _kwargs = self.pop()?;
                let args = self.pop()?;
                let callable = self.pop()?;
                let id = self.call(callable.id, Some(args.id))?;
                self.stack.push(StackItem { id, origin: None });
            }
            Opcode::Inst => {
                let Argument::Global { module, name } = argument else {
                    return Err(self.error("INST without a class name".to_string()));
                };
                let items = self.pop_mark()?;
                let args = self.alloc(SafeValue::Sequence {
                    kind: SequenceKind::Tuple,
                    items: ids(&items),
                });
                let id = self.instantiate(module, name, Some(args))?;
                self.stack.push(StackItem { id, origin: None });
            }
            Opcode::Obj => {
                let items = self.pop_mark()?;
                let Some((class, rest)) = items.split_first() else {
                    return Err(self.error("OBJ without a class".to_string()));
                };
                let args = self.alloc(SafeValue::Sequence {
                    kind: SequenceKind::Tuple,
                    items: ids(rest),
                });
                let id = self.call(class.id, Some(args))?;
                self.stack.push(StackItem { id, origin: None });
            }
            Opcode::Build => {
                let state = self.pop()?;
                let target = self.top()?.id;
                self.build(target, state.id)?;
            }

            Opcode::Put | Opcode::BinPut | Opcode::LongBinPut => {
                let Argument::Memo(ordinal) = argument else {
                    return Err(self.error("memo store without an ordinal".to_string()));
                };
                self.memoize(*ordinal)?;
            }
            Opcode::Memoize => {
                let ordinal = self.memo.next_ordinal();
                self.memoize(ordinal)?;
            }
            Opcode::Get | Opcode::BinGet | Opcode::LongBinGet => {
                let Argument::Memo(ordinal) = argument else {
                    return Err(self.error("memo fetch without an ordinal".to_string()));
                };
                let id = self.memo.fetch(*ordinal)?;
                *self.fetch_counts.entry(*ordinal).or_insert(0) += 1;
                self.stack.push(StackItem { id, origin: None });
            }
        }
        Ok(None)
    }

    fn error(&self, message: String) -> CoreError {
        CoreError::format(format!("record {}: {message}", self.record))
    }

    fn get(&self, id: ValueId) -> &SafeValue {
        &self.values[id.0]
    }

    fn alloc(&mut self, value: SafeValue) -> ValueId {
        self.values.push(value);
        ValueId(self.values.len() - 1)
    }

    fn push_new(&mut self, value: SafeValue) {
        let id = self.alloc(value);
        self.stack.push(StackItem { id, origin: None });
    }

    fn push_literal(&mut self, value: SafeValue) {
        let id = self.alloc(value);
        self.stack.push(StackItem {
            id,
            origin: Some(self.record),
        });
    }

    fn push_sequence(&mut self, kind: SequenceKind, items: Vec<ValueId>) {
        self.push_new(SafeValue::Sequence { kind, items });
    }

    fn push_reference(&mut self, module: &str, name: &str) {
        self.push_new(SafeValue::OpaqueProxy(OpaqueProxy {
            type_tag: format!("{module}.{name}"),
            ..OpaqueProxy::default()
        }));
    }

    fn literal_value(&self, argument: &Argument) -> Result<SafeValue, CoreError> {
        let value = match argument {
            Argument::Int(v) => SafeValue::Integer(*v),
            Argument::BigInt(bytes) => SafeValue::BigInteger(bytes.clone()),
            Argument::Bool(v) => SafeValue::Boolean(*v),
            Argument::Float(v) => SafeValue::Float(*v),
            Argument::Text(s) => SafeValue::Text(s.clone()),
            other => {
                return Err(self.error(format!("unexpected literal argument {other:?}")));
            }
        };
        Ok(value)
    }

    fn pop(&mut self) -> Result<StackItem, CoreError> {
        let floor = self.marks.last().copied().unwrap_or(0);
        if self.stack.len() <= floor {
            return Err(self.error("stack underflow".to_string()));
        }
        self.stack
            .pop()
            .ok_or_else(|| self.error("stack underflow".to_string()))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<StackItem>, CoreError> {
        let floor = self.marks.last().copied().unwrap_or(0);
        if self.stack.len() < floor + n {
            return Err(self.error(format!("stack underflow popping {n} items")));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn top(&self) -> Result<StackItem, CoreError> {
        let floor = self.marks.last().copied().unwrap_or(0);
        if self.stack.len() <= floor {
            return Err(self.error("stack underflow".to_string()));
        }
        self.stack
            .last()
            .copied()
            .ok_or_else(|| self.error("stack underflow".to_string()))
    }

    fn pop_mark(&mut self) -> Result<Vec<StackItem>, CoreError> {
        let Some(mark) = self.marks.pop() else {
            return Err(self.error("no open MARK".to_string()));
        };
        Ok(self.stack.split_off(mark))
    }

    fn pairs(&self, items: &[StackItem]) -> Result<Vec<MappingEntry>, CoreError> {
        if items.len() % 2 != 0 {
            return Err(self.error(format!(
                "odd number of items ({}) for key/value pairs",
                items.len()
            )));
        }
        Ok(items
            .chunks_exact(2)
            .map(|pair| entry_of(pair[0], pair[1]))
            .collect())
    }

    fn memoize(&mut self, ordinal: u32) -> Result<(), CoreError> {
        let top = self.top()?;
        self.memo.assign(ordinal, top.id)?;
        if let Some(record) = top.origin {
            self.memo_slots.insert(record, ordinal);
        }
        Ok(())
    }

    fn keys_equal(&self, a: ValueId, b: ValueId) -> bool {
        if a == b {
            return true;
        }
        let (x, y) = (self.get(a), self.get(b));
        if let (Some(x), Some(y)) = (numeric_key(x), numeric_key(y)) {
            return x.same_key(y);
        }
        match (x, y) {
            (SafeValue::Text(x), SafeValue::Text(y)) => x == y,
            (SafeValue::BigInteger(x), SafeValue::BigInteger(y)) => x == y,
            (SafeValue::None, SafeValue::None) => true,
            _ => false,
        }
    }

    fn set_item(&mut self, target: ValueId, entry: MappingEntry) -> Result<(), CoreError> {
        let existing = match self.get(target) {
            SafeValue::Mapping(entries) => entries
                .iter()
                .position(|e| self.keys_equal(e.key, entry.key)),
            SafeValue::OpaqueProxy(_) => None,
            other => {
                return Err(self.error(format!(
                    "setting items on a non-mapping ({})",
                    other.type_name()
                )));
            }
        };
        match &mut self.values[target.0] {
            SafeValue::Mapping(entries) => match existing {
                Some(pos) => {
                    entries[pos].value = entry.value;
                    entries[pos].value_record = entry.value_record;
                }
                None => entries.push(entry),
            },
            SafeValue::OpaqueProxy(proxy) => proxy.entries.push(entry),
            _ => {}
        }
        Ok(())
    }

    fn extend(&mut self, target: ValueId, new_items: &[ValueId]) -> Result<(), CoreError> {
        match self.get(target) {
            SafeValue::Sequence { kind, .. } if *kind != SequenceKind::Tuple => {}
            SafeValue::OpaqueProxy(_) => {}
            other => {
                return Err(self.error(format!(
                    "appending to a non-sequence ({})",
                    other.type_name()
                )));
            }
        }
        match &mut self.values[target.0] {
            SafeValue::Sequence { items, .. } => items.extend_from_slice(new_items),
            SafeValue::OpaqueProxy(proxy) => proxy.items.extend_from_slice(new_items),
            _ => {}
        }
        Ok(())
    }

    fn call(&mut self, callable: ValueId, args: Option<ValueId>) -> Result<ValueId, CoreError> {
        let tag = match self.get(callable) {
            SafeValue::OpaqueProxy(proxy) if !proxy.instance => proxy.type_tag.clone(),
            other => {
                return Err(self.error(format!(
                    "calling something that is not a class reference ({})",
                    other.type_name()
                )));
            }
        };
        let (module, name) = tag.rsplit_once('.').unwrap_or(("", tag.as_str()));
        self.instantiate(module, name, args)
    }

    fn instantiate(
        &mut self,
        module: &str,
        name: &str,
        args: Option<ValueId>,
    ) -> Result<ValueId, CoreError> {
        let first_arg = args.and_then(|a| self.sequence_items(a).first().copied());
        let value = match classify(module, name) {
            SafeKind::Mapping => {
                let entries = match first_arg.map(|a| self.get(a)) {
                    Some(SafeValue::Mapping(entries)) => entries.clone(),
                    _ => Vec::new(),
                };
                SafeValue::Mapping(entries)
            }
            SafeKind::Sequence(kind) => SafeValue::Sequence {
                kind,
                items: first_arg.map(|a| self.iterable_items(a)).unwrap_or_default(),
            },
            SafeKind::Text => match first_arg.map(|a| self.get(a)) {
                Some(SafeValue::Text(s)) => SafeValue::Text(s.clone()),
                _ => self.proxy(module, name, args),
            },
            SafeKind::Reconstructor => {
                let class_tag = match first_arg.map(|a| self.get(a)) {
                    Some(SafeValue::OpaqueProxy(p)) if !p.instance => Some(p.type_tag.clone()),
                    _ => None,
                };
                match class_tag {
                    Some(tag) => {
                        let (cm, cn) = tag.rsplit_once('.').unwrap_or(("", tag.as_str()));
                        match classify(cm, cn) {
                            SafeKind::Mapping => SafeValue::Mapping(Vec::new()),
                            SafeKind::Sequence(kind) => SafeValue::Sequence {
                                kind,
                                items: Vec::new(),
                            },
                            _ => self.proxy(cm, cn, args),
                        }
                    }
                    None => self.proxy(module, name, args),
                }
            }
            SafeKind::Opaque => self.proxy(module, name, args),
        };
        Ok(self.alloc(value))
    }

    fn proxy(&self, module: &str, name: &str, args: Option<ValueId>) -> SafeValue {
        let type_tag = if module.is_empty() {
            name.to_string()
        } else {
            format!("{module}.{name}")
        };
        SafeValue::OpaqueProxy(OpaqueProxy {
            type_tag,
            instance: true,
            args,
            ..OpaqueProxy::default()
        })
    }

    fn sequence_items(&self, id: ValueId) -> &[ValueId] {
        match self.get(id) {
            SafeValue::Sequence { items, .. } => items,
            _ => &[],
        }
    }

    /// Items of a sequence, or the keys of a mapping.
    fn iterable_items(&self, id: ValueId) -> Vec<ValueId> {
        match self.get(id) {
            SafeValue::Sequence { items, .. } => items.clone(),
            SafeValue::Mapping(entries) => entries.iter().map(|e| e.key).collect(),
            _ => Vec::new(),
        }
    }

    /// Apply `BUILD` state. Safe containers take the first matching container
    /// from the state; proxies just remember it.
    fn build(&mut self, target: ValueId, state: ValueId) -> Result<(), CoreError> {
        let is_mapping = matches!(self.get(target), SafeValue::Mapping(_));
        let is_growable = matches!(
            self.get(target),
            SafeValue::Sequence { kind, .. } if *kind != SequenceKind::Tuple
        );

        if is_mapping {
            let entries = match self.state_mapping(state).map(|id| self.get(id)) {
                Some(SafeValue::Mapping(entries)) => entries.clone(),
                _ => self.state_pairs(state),
            };
            for entry in entries {
                self.set_item(target, entry)?;
            }
        } else if is_growable {
            let items = match self.sequence_items(state).first().copied() {
                Some(first) => self.iterable_items(first),
                None => Vec::new(),
            };
            self.extend(target, &items)?;
        } else if let SafeValue::OpaqueProxy(proxy) = &mut self.values[target.0] {
            proxy.state = Some(state);
        }
        Ok(())
    }

    /// The state itself when it is a mapping, else the first mapping inside a
    /// state tuple.
    fn state_mapping(&self, state: ValueId) -> Option<ValueId> {
        match self.get(state) {
            SafeValue::Mapping(_) => Some(state),
            SafeValue::Sequence { items, .. } => items
                .iter()
                .copied()
                .find(|&i| matches!(self.get(i), SafeValue::Mapping(_))),
            _ => None,
        }
    }

    /// `OrderedDict` pickled by older runtimes passes its state as a list of
    /// `[key, value]` pairs.
    fn state_pairs(&self, state: ValueId) -> Vec<MappingEntry> {
        self.sequence_items(state)
            .iter()
            .filter_map(|&pair| match self.sequence_items(pair) {
                [key, value] => Some(MappingEntry {
                    key: *key,
                    value: *value,
                    value_record: None,
                }),
                _ => None,
            })
            .collect()
    }
}

/// `True`, `1` and `1.0` are the same dict key.
#[derive(Clone, Copy)]
enum NumericKey {
    Int(i64),
    Float(f64),
}

impl NumericKey {
    fn same_key(self, other: Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(i), Self::Float(f)) | (Self::Float(f), Self::Int(i)) => {
                f.fract() == 0.0 && i as f64 == f && f as i64 == i
            }
        }
    }
}

fn numeric_key(value: &SafeValue) -> Option<NumericKey> {
    match value {
        SafeValue::Boolean(b) => Some(NumericKey::Int(i64::from(*b))),
        SafeValue::Integer(i) => Some(NumericKey::Int(*i)),
        SafeValue::Float(f) => Some(NumericKey::Float(*f)),
        _ => None,
    }
}

fn entry_of(key: StackItem, value: StackItem) -> MappingEntry {
    MappingEntry {
        key: key.id,
        value: value.id,
        value_record: value.origin,
    }
}

fn ids(items: &[StackItem]) -> Vec<ValueId> {
    items.iter().map(|i| i.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pickle::stream::read_stream;

    fn build(data: &[u8]) -> Result<BuildOutput, CoreError> {
        build_graph(&read_stream(data)?)
    }

    #[test]
    fn dict_entries_remember_their_literal_record() {
        // {'a': 1, 'b': [2]} at protocol 2
        let data = b"\x80\x02}q\x00(X\x01\x00\x00\x00aK\x01X\x01\x00\x00\x00b]K\x02au.";
        let out = build(data).unwrap();
        let root = out.graph.root();
        let a = out.graph.lookup(root, "a").unwrap();
        assert_eq!(out.graph.get(a.value), &SafeValue::Integer(1));
        assert_eq!(a.value_record, Some(5));
        let b = out.graph.lookup(root, "b").unwrap();
        assert_eq!(b.value_record, None);
        assert_eq!(out.graph.summarize(b.value, 2), "[2]");
    }

    #[test]
    fn unknown_class_becomes_inert_proxy() {
        let data = b"\x80\x02cos\nsystem\nq\x00X\x02\x00\x00\x00ls\x85R.";
        let out = build(data).unwrap();
        match out.graph.get(out.graph.root()) {
            SafeValue::OpaqueProxy(p) => {
                assert_eq!(p.type_tag, "os.system");
                assert!(p.instance);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn revertable_dict_is_a_mapping_with_build_state() {
        // RevertableDict() then SETITEMS, then BUILD with ({'x': 2},)
        let data = b"\x80\x02crenpy.revertable\nRevertableDict\n)\x81(X\x01\x00\x00\x00yK\x01u}X\x01\x00\x00\x00xK\x02s\x85b.";
        let out = build(data).unwrap();
        let root = out.graph.root();
        assert!(matches!(out.graph.get(root), SafeValue::Mapping(e) if e.len() == 2));
        assert!(out.graph.lookup(root, "x").is_some());
    }

    #[test]
    fn shared_memo_is_counted() {
        // [7, 7] where the second element is a backreference
        let data = b"\x80\x02](K\x07q\x00h\x00e.";
        let out = build(data).unwrap();
        assert_eq!(out.memo_ordinal_of(3), Some(0));
        assert!(out.is_shared(0));
    }

    #[test]
    fn structural_errors_are_format_errors() {
        // SETITEMS with an odd item count
        assert!(build(b"\x80\x02}(K\x01u.").is_err());
        // APPEND onto a dict
        assert!(build(b"\x80\x02}K\x01a.").is_err());
        // STOP with two items
        assert!(build(b"\x80\x02K\x01K\x02.").is_err());
        // REDUCE on a non-reference
        assert!(build(b"\x80\x02K\x01)R.").is_err());
    }

    #[test]
    fn equal_numeric_keys_overwrite_each_other() {
        // {1: 'a'}, then d[True] = 'b', then d[1.0] = 'c'
        let data = b"\x80\x02}K\x01X\x01\x00\x00\x00as\x88X\x01\x00\x00\x00bsG?\xf0\x00\x00\x00\x00\x00\x00X\x01\x00\x00\x00cs.";
        let out = build(data).unwrap();
        match out.graph.get(out.graph.root()) {
            SafeValue::Mapping(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(out.graph.get(entries[0].value), &SafeValue::Text("c".into()));
            }
            other => panic!("expected a mapping, got {other:?}"),
        }

        // 1 and 1.5 stay distinct
        let data = b"\x80\x02}K\x01NsG?\xf8\x00\x00\x00\x00\x00\x00Ns.";
        let out = build(data).unwrap();
        match out.graph.get(out.graph.root()) {
            SafeValue::Mapping(entries) => assert_eq!(entries.len(), 2),
            other => panic!("expected a mapping, got {other:?}"),
        }
    }

    #[test]
    fn memo_store_after_mark_is_a_format_error() {
        // N, MARK, BINPUT 0: nothing above the mark to memoize
        let err = build(b"\x80\x02N(q\x00N.").unwrap_err();
        assert_eq!(err.code, crate::core_api::CoreErrorCode::Format);
    }

    #[test]
    fn codecs_encode_yields_text() {
        let data = b"\x80\x03c_codecs\nencode\nX\x02\x00\x00\x00\xc3\xa9X\x06\x00\x00\x00latin1\x86R.";
        let out = build(data).unwrap();
        assert_eq!(out.graph.get(out.graph.root()), &SafeValue::Text("\u{e9}".into()));
    }
}
