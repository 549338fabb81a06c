use serde::{Deserialize, Serialize};

/// Pickle opcodes recognized by the reader (protocols 0-5).
///
/// Persistent IDs, the extension registry and out-of-band buffers are left
/// out on purpose: Ren'Py never writes them, and a payload that uses them is
/// rejected rather than guessed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    // Framing
    Proto = 0x80,
    Frame = 0x95,
    Stop = b'.',

    // Stack manipulation
    Mark = b'(',
    Pop = b'0',
    PopMark = b'1',
    Dup = b'2',

    // Singletons
    None = b'N',
    NewTrue = 0x88,
    NewFalse = 0x89,

    // Integers
    Int = b'I',
    BinInt = b'J',
    BinInt1 = b'K',
    BinInt2 = b'M',
    Long = b'L',
    Long1 = 0x8a,
    Long4 = 0x8b,

    // Floats
    Float = b'F',
    BinFloat = b'G',

    // Strings and bytes
    String = b'S',
    BinString = b'T',
    ShortBinString = b'U',
    Unicode = b'V',
    BinUnicode = b'X',
    ShortBinUnicode = 0x8c,
    BinUnicode8 = 0x8d,
    BinBytes = b'B',
    ShortBinBytes = b'C',
    BinBytes8 = 0x8e,
    ByteArray8 = 0x96,

    // Containers
    EmptyDict = b'}',
    Dict = b'd',
    SetItem = b's',
    SetItems = b'u',
    EmptyList = b']',
    List = b'l',
    Append = b'a',
    Appends = b'e',
    EmptyTuple = b')',
    Tuple = b't',
    Tuple1 = 0x85,
    Tuple2 = 0x86,
    Tuple3 = 0x87,
    EmptySet = 0x8f,
    AddItems = 0x90,
    FrozenSet = 0x91,

    // Construction intent
    Global = b'c',
    StackGlobal = 0x93,
    Reduce = b'R',
    Build = b'b',
    NewObj = 0x81,
    NewObjEx = 0x92,
    Inst = b'i',
    Obj = b'o',

    // Memo
    Put = b'p',
    BinPut = b'q',
    LongBinPut = b'r',
    Memoize = 0x94,
    Get = b'g',
    BinGet = b'h',
    LongBinGet = b'j',
}

/// How an opcode's argument is laid out after the opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgLayout {
    Nothing,
    U8,
    U16,
    I32,
    U32,
    U64,
    F64Be,
    /// One newline-terminated line.
    Line,
    /// Two newline-terminated lines (`GLOBAL`, `INST`).
    TwoLines,
    /// u8 length prefix, then that many bytes.
    Counted1,
    /// 4-byte little-endian length prefix, then that many bytes.
    Counted4,
    /// 8-byte little-endian length prefix, then that many bytes.
    Counted8,
}

/// Which family of Python string type a literal opcode produces. Edits must
/// stay inside the family so the runtime gets back the same type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StringClass {
    /// `str` on Python 3, `unicode` on Python 2.
    Unicode,
    /// Python 2 `str`, decoded as Latin-1.
    ByteString,
    /// Python 3 `bytes`, decoded as Latin-1.
    Bytes,
}

impl Opcode {
    pub fn from_u8(v: u8) -> Option<Self> {
        let op = match v {
            0x80 => Self::Proto,
            0x95 => Self::Frame,
            b'.' => Self::Stop,
            b'(' => Self::Mark,
            b'0' => Self::Pop,
            b'1' => Self::PopMark,
            b'2' => Self::Dup,
            b'N' => Self::None,
            0x88 => Self::NewTrue,
            0x89 => Self::NewFalse,
            b'I' => Self::Int,
            b'J' => Self::BinInt,
            b'K' => Self::BinInt1,
            b'M' => Self::BinInt2,
            b'L' => Self::Long,
            0x8a => Self::Long1,
            0x8b => Self::Long4,
            b'F' => Self::Float,
            b'G' => Self::BinFloat,
            b'S' => Self::String,
            b'T' => Self::BinString,
            b'U' => Self::ShortBinString,
            b'V' => Self::Unicode,
            b'X' => Self::BinUnicode,
            0x8c => Self::ShortBinUnicode,
            0x8d => Self::BinUnicode8,
            b'B' => Self::BinBytes,
            b'C' => Self::ShortBinBytes,
            0x8e => Self::BinBytes8,
            0x96 => Self::ByteArray8,
            b'}' => Self::EmptyDict,
            b'd' => Self::Dict,
            b's' => Self::SetItem,
            b'u' => Self::SetItems,
            b']' => Self::EmptyList,
            b'l' => Self::List,
            b'a' => Self::Append,
            b'e' => Self::Appends,
            b')' => Self::EmptyTuple,
            b't' => Self::Tuple,
            0x85 => Self::Tuple1,
            0x86 => Self::Tuple2,
            0x87 => Self::Tuple3,
            0x8f => Self::EmptySet,
            0x90 => Self::AddItems,
            0x91 => Self::FrozenSet,
            b'c' => Self::Global,
            0x93 => Self::StackGlobal,
            b'R' => Self::Reduce,
            b'b' => Self::Build,
            0x81 => Self::NewObj,
            0x92 => Self::NewObjEx,
            b'i' => Self::Inst,
            b'o' => Self::Obj,
            b'p' => Self::Put,
            b'q' => Self::BinPut,
            b'r' => Self::LongBinPut,
            0x94 => Self::Memoize,
            b'g' => Self::Get,
            b'h' => Self::BinGet,
            b'j' => Self::LongBinGet,
            _ => return Option::None,
        };
        Some(op)
    }

    pub fn byte(self) -> u8 {
        self as u8
    }

    /// The name `pickletools` uses for this opcode.
    pub fn name(self) -> &'static str {
        match self {
            Self::Proto => "PROTO",
            Self::Frame => "FRAME",
            Self::Stop => "STOP",
            Self::Mark => "MARK",
            Self::Pop => "POP",
            Self::PopMark => "POP_MARK",
            Self::Dup => "DUP",
            Self::None => "NONE",
            Self::NewTrue => "NEWTRUE",
            Self::NewFalse => "NEWFALSE",
            Self::Int => "INT",
            Self::BinInt => "BININT",
            Self::BinInt1 => "BININT1",
            Self::BinInt2 => "BININT2",
            Self::Long => "LONG",
            Self::Long1 => "LONG1",
            Self::Long4 => "LONG4",
            Self::Float => "FLOAT",
            Self::BinFloat => "BINFLOAT",
            Self::String => "STRING",
            Self::BinString => "BINSTRING",
            Self::ShortBinString => "SHORT_BINSTRING",
            Self::Unicode => "UNICODE",
            Self::BinUnicode => "BINUNICODE",
            Self::ShortBinUnicode => "SHORT_BINUNICODE",
            Self::BinUnicode8 => "BINUNICODE8",
            Self::BinBytes => "BINBYTES",
            Self::ShortBinBytes => "SHORT_BINBYTES",
            Self::BinBytes8 => "BINBYTES8",
            Self::ByteArray8 => "BYTEARRAY8",
            Self::EmptyDict => "EMPTY_DICT",
            Self::Dict => "DICT",
            Self::SetItem => "SETITEM",
            Self::SetItems => "SETITEMS",
            Self::EmptyList => "EMPTY_LIST",
            Self::List => "LIST",
            Self::Append => "APPEND",
            Self::Appends => "APPENDS",
            Self::EmptyTuple => "EMPTY_TUPLE",
            Self::Tuple => "TUPLE",
            Self::Tuple1 => "TUPLE1",
            Self::Tuple2 => "TUPLE2",
            Self::Tuple3 => "TUPLE3",
            Self::EmptySet => "EMPTY_SET",
            Self::AddItems => "ADDITEMS",
            Self::FrozenSet => "FROZENSET",
            Self::Global => "GLOBAL",
            Self::StackGlobal => "STACK_GLOBAL",
            Self::Reduce => "REDUCE",
            Self::Build => "BUILD",
            Self::NewObj => "NEWOBJ",
            Self::NewObjEx => "NEWOBJ_EX",
            Self::Inst => "INST",
            Self::Obj => "OBJ",
            Self::Put => "PUT",
            Self::BinPut => "BINPUT",
            Self::LongBinPut => "LONG_BINPUT",
            Self::Memoize => "MEMOIZE",
            Self::Get => "GET",
            Self::BinGet => "BINGET",
            Self::LongBinGet => "LONG_BINGET",
        }
    }

    pub fn arg_layout(self) -> ArgLayout {
        match self {
            Self::Proto | Self::BinInt1 | Self::BinPut | Self::BinGet => ArgLayout::U8,
            Self::BinInt2 => ArgLayout::U16,
            Self::BinInt => ArgLayout::I32,
            Self::LongBinPut | Self::LongBinGet => ArgLayout::U32,
            Self::Frame => ArgLayout::U64,
            Self::BinFloat => ArgLayout::F64Be,
            Self::Int
            | Self::Long
            | Self::Float
            | Self::String
            | Self::Unicode
            | Self::Put
            | Self::Get => ArgLayout::Line,
            Self::Global | Self::Inst => ArgLayout::TwoLines,
            Self::ShortBinString | Self::ShortBinBytes | Self::ShortBinUnicode | Self::Long1 => {
                ArgLayout::Counted1
            }
            Self::BinString | Self::BinUnicode | Self::BinBytes | Self::Long4 => {
                ArgLayout::Counted4
            }
            Self::BinUnicode8 | Self::BinBytes8 | Self::ByteArray8 => ArgLayout::Counted8,
            _ => ArgLayout::Nothing,
        }
    }

    pub fn string_class(self) -> Option<StringClass> {
        match self {
            Self::Unicode | Self::BinUnicode | Self::ShortBinUnicode | Self::BinUnicode8 => {
                Some(StringClass::Unicode)
            }
            Self::String | Self::BinString | Self::ShortBinString => {
                Some(StringClass::ByteString)
            }
            Self::BinBytes | Self::ShortBinBytes | Self::BinBytes8 => Some(StringClass::Bytes),
            _ => Option::None,
        }
    }

    /// Opcodes that push one immutable scalar and touch nothing else: no
    /// memo slot, no mark, no container. Only these may be replaced in place.
    pub fn is_scalar_literal(self) -> bool {
        matches!(
            self,
            Self::NewTrue
                | Self::NewFalse
                | Self::Int
                | Self::BinInt
                | Self::BinInt1
                | Self::BinInt2
                | Self::Long
                | Self::Long1
                | Self::Long4
                | Self::Float
                | Self::BinFloat
        ) || self.string_class().is_some()
    }

    pub fn is_memo_store(self) -> bool {
        matches!(
            self,
            Self::Put | Self::BinPut | Self::LongBinPut | Self::Memoize
        )
    }

    pub fn is_memo_fetch(self) -> bool {
        matches!(self, Self::Get | Self::BinGet | Self::LongBinGet)
    }

    /// Lowest pickle protocol that defines this opcode.
    pub fn min_protocol(self) -> u8 {
        match self {
            Self::BinBytes | Self::ShortBinBytes => 3,
            Self::Frame
            | Self::ShortBinUnicode
            | Self::BinUnicode8
            | Self::BinBytes8
            | Self::EmptySet
            | Self::AddItems
            | Self::FrozenSet
            | Self::NewObjEx
            | Self::StackGlobal
            | Self::Memoize => 4,
            Self::ByteArray8 => 5,
            Self::Proto
            | Self::NewObj
            | Self::Tuple1
            | Self::Tuple2
            | Self::Tuple3
            | Self::NewTrue
            | Self::NewFalse
            | Self::Long1
            | Self::Long4 => 2,
            Self::BinInt
            | Self::BinInt1
            | Self::BinInt2
            | Self::BinFloat
            | Self::BinString
            | Self::ShortBinString
            | Self::BinUnicode
            | Self::EmptyDict
            | Self::SetItems
            | Self::EmptyList
            | Self::Appends
            | Self::EmptyTuple
            | Self::PopMark
            | Self::Obj
            | Self::BinPut
            | Self::LongBinPut
            | Self::BinGet
            | Self::LongBinGet
            | Self::None => 1,
            _ => 0,
        }
    }
}
