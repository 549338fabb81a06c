//! Single-pass reader turning a pickle payload into a flat list of opcode
//! records. Nothing is constructed here; the records only say which opcode
//! sits where and what its decoded argument is.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::cursor::Cursor;
use super::literal::{self, IntLiteral};
use super::opcode::{ArgLayout, Opcode, StringClass};
use crate::core_api::CoreError;
use crate::layout::{ByteRange, validate_tiling};

/// Highest pickle protocol the reader accepts.
pub const MAX_PROTOCOL: u8 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Argument {
    None,
    Protocol(u8),
    Frame(u64),
    Int(i64),
    /// Little-endian two's complement bytes.
    BigInt(Vec<u8>),
    Bool(bool),
    Float(f64),
    /// Decoded text. Byte strings and bytes are decoded as Latin-1.
    Text(String),
    Global {
        module: String,
        name: String,
    },
    Memo(u32),
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Protocol(v) => write!(f, "{v}"),
            Self::Frame(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::BigInt(bytes) => write!(f, "<{} byte int>", bytes.len()),
            Self::Bool(v) => write!(f, "{}", if *v { "True" } else { "False" }),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Global { module, name } => write!(f, "{module} {name}"),
            Self::Memo(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpcodeRecord {
    pub opcode: Opcode,
    pub argument: Argument,
    /// Bytes of the opcode and its argument.
    pub range: ByteRange,
}

impl OpcodeRecord {
    pub fn string_class(&self) -> Option<StringClass> {
        self.opcode.string_class()
    }
}

/// A protocol 4+ `FRAME`: which record declared it and the byte span it
/// covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub record: usize,
    pub body: ByteRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpcodeStream {
    pub records: Vec<OpcodeRecord>,
    /// Effective protocol: the `PROTO` argument or the newest opcode the
    /// stream uses, whichever is higher. Protocol 1 streams carry no `PROTO`.
    pub protocol: u8,
    pub frames: Vec<FrameInfo>,
    /// Number of memo slots the stream assigns.
    pub memo_count: usize,
}

impl OpcodeStream {
    pub fn record(&self, index: usize) -> Option<&OpcodeRecord> {
        self.records.get(index)
    }

    /// Index of the frame whose body contains `range`, if any.
    pub fn enclosing_frame(&self, range: ByteRange) -> Option<usize> {
        self.frames.iter().position(|f| f.body.encloses(range))
    }

    /// Total payload length the records cover.
    pub fn byte_len(&self) -> usize {
        self.records.last().map(|r| r.range.end).unwrap_or(0)
    }
}

/// Parse `data` into opcode records.
pub fn read_stream(data: &[u8]) -> Result<OpcodeStream, CoreError> {
    let mut cursor = Cursor::new(data);
    let mut records = Vec::new();
    let mut frames = Vec::new();
    let mut protocol = 0u8;
    let mut memo = MemoCheck::default();
    let mut stopped = false;

    while !cursor.is_empty() {
        let start = cursor.position();
        let byte = cursor.read_u8()?;
        let opcode = Opcode::from_u8(byte).ok_or_else(|| {
            CoreError::format(format!(
                "unknown opcode byte {byte:#04x} at offset {start:#x}"
            ))
        })?;
        let argument = read_argument(&mut cursor, opcode, start)?;
        let range = ByteRange::new(start, cursor.position());
        protocol = protocol.max(opcode.min_protocol());

        match (&opcode, &argument) {
            (Opcode::Proto, Argument::Protocol(v)) => {
                if *v > MAX_PROTOCOL {
                    return Err(CoreError::format(format!(
                        "unsupported pickle protocol {v} at offset {start:#x}"
                    )));
                }
                protocol = protocol.max(*v);
            }
            (Opcode::Frame, Argument::Frame(len)) => {
                let body_end = usize::try_from(*len)
                    .ok()
                    .and_then(|len| range.end.checked_add(len))
                    .filter(|&end| end <= data.len())
                    .ok_or_else(|| {
                        CoreError::format(format!(
                            "frame at offset {start:#x} declares {len} bytes but only {} remain",
                            data.len() - range.end
                        ))
                    })?;
                frames.push(FrameInfo {
                    record: records.len(),
                    body: ByteRange::new(range.end, body_end),
                });
            }
            (Opcode::Memoize, _) => memo.memoize(start)?,
            (op, Argument::Memo(ordinal)) if op.is_memo_store() => memo.put(*ordinal, start)?,
            (op, Argument::Memo(ordinal)) if op.is_memo_fetch() => memo.get(*ordinal, start)?,
            _ => {}
        }

        records.push(OpcodeRecord {
            opcode,
            argument,
            range,
        });

        if opcode == Opcode::Stop {
            stopped = true;
            break;
        }
    }

    if !stopped {
        return Err(CoreError::format(
            "payload ends without a STOP opcode".to_string(),
        ));
    }
    if !cursor.is_empty() {
        return Err(CoreError::format(format!(
            "{} trailing bytes after STOP at offset {:#x}",
            cursor.remaining(),
            cursor.position()
        )));
    }

    validate_tiling(records.iter().map(|r| r.range), data.len())?;

    Ok(OpcodeStream {
        records,
        protocol,
        frames,
        memo_count: memo.assigned.len(),
    })
}

#[derive(Default)]
struct MemoCheck {
    assigned: BTreeSet<u32>,
}

impl MemoCheck {
    fn memoize(&mut self, at: usize) -> Result<(), CoreError> {
        let ordinal = self.assigned.len() as u32;
        self.put(ordinal, at)
    }

    fn put(&mut self, ordinal: u32, at: usize) -> Result<(), CoreError> {
        if !self.assigned.insert(ordinal) {
            return Err(CoreError::format(format!(
                "memo ordinal {ordinal} re-assigned at offset {at:#x}"
            )));
        }
        Ok(())
    }

    fn get(&self, ordinal: u32, at: usize) -> Result<(), CoreError> {
        if !self.assigned.contains(&ordinal) {
            return Err(CoreError::format(format!(
                "dangling backreference to memo ordinal {ordinal} at offset {at:#x}"
            )));
        }
        Ok(())
    }
}

fn read_argument(cursor: &mut Cursor<'_>, opcode: Opcode, at: usize) -> Result<Argument, CoreError> {
    let bad = |what: String| CoreError::format(format!("{} at offset {at:#x}: {what}", opcode.name()));

    let argument = match opcode.arg_layout() {
        ArgLayout::Nothing => Argument::None,
        ArgLayout::U8 => {
            let v = cursor.read_u8()?;
            match opcode {
                Opcode::Proto => Argument::Protocol(v),
                Opcode::BinInt1 => Argument::Int(i64::from(v)),
                _ => Argument::Memo(u32::from(v)),
            }
        }
        ArgLayout::U16 => Argument::Int(i64::from(cursor.read_u16()?)),
        ArgLayout::I32 => Argument::Int(i64::from(cursor.read_i32()?)),
        ArgLayout::U32 => Argument::Memo(cursor.read_u32()?),
        ArgLayout::U64 => Argument::Frame(cursor.read_u64()?),
        ArgLayout::F64Be => Argument::Float(cursor.read_f64_be()?),
        ArgLayout::Line => {
            let line = cursor.read_line()?;
            decode_line(opcode, line).map_err(bad)?
        }
        ArgLayout::TwoLines => {
            let module = cursor.read_line()?;
            let name = cursor.read_line()?;
            Argument::Global {
                module: ascii_line(module).map_err(&bad)?,
                name: ascii_line(name).map_err(&bad)?,
            }
        }
        ArgLayout::Counted1 => {
            let prefix_at = cursor.position();
            let n = cursor.read_u8()?;
            let payload = cursor.read_counted(u64::from(n), prefix_at)?;
            decode_counted(opcode, payload).map_err(bad)?
        }
        ArgLayout::Counted4 => {
            let prefix_at = cursor.position();
            let n = cursor.read_u32()?;
            let payload = cursor.read_counted(u64::from(n), prefix_at)?;
            decode_counted(opcode, payload).map_err(bad)?
        }
        ArgLayout::Counted8 => {
            let prefix_at = cursor.position();
            let n = cursor.read_u64()?;
            let payload = cursor.read_counted(n, prefix_at)?;
            decode_counted(opcode, payload).map_err(bad)?
        }
    };
    Ok(argument)
}

fn ascii_line(line: &[u8]) -> Result<String, String> {
    std::str::from_utf8(line)
        .map(|s| s.to_string())
        .map_err(|_| "line is not valid UTF-8".to_string())
}

fn int_argument(value: IntLiteral) -> Argument {
    match value {
        IntLiteral::Small(v) => Argument::Int(v),
        IntLiteral::Big(bytes) => Argument::BigInt(bytes),
    }
}

fn decode_line(opcode: Opcode, line: &[u8]) -> Result<Argument, String> {
    match opcode {
        Opcode::Int => match line {
            b"01" => Ok(Argument::Bool(true)),
            b"00" => Ok(Argument::Bool(false)),
            _ => literal::parse_int_line(line).map(int_argument),
        },
        Opcode::Long => literal::parse_long_line(line).map(int_argument),
        Opcode::Float => literal::parse_float_line(line).map(Argument::Float),
        Opcode::String => {
            literal::decode_quoted_string(line).map(|b| Argument::Text(literal::latin1_decode(&b)))
        }
        Opcode::Unicode => literal::decode_raw_unicode_escape(line).map(Argument::Text),
        Opcode::Put | Opcode::Get => {
            let text = ascii_line(line)?;
            text.trim()
                .parse::<u32>()
                .map(Argument::Memo)
                .map_err(|_| format!("invalid memo ordinal '{}'", text.trim()))
        }
        other => Err(format!("{} has no text argument", other.name())),
    }
}

fn decode_counted(opcode: Opcode, payload: &[u8]) -> Result<Argument, String> {
    match opcode {
        Opcode::Long1 | Opcode::Long4 => Ok(int_argument(literal::decode_long_bytes(payload))),
        Opcode::BinUnicode | Opcode::ShortBinUnicode | Opcode::BinUnicode8 => {
            std::str::from_utf8(payload)
                .map(|s| Argument::Text(s.to_string()))
                .map_err(|e| format!("invalid UTF-8 text: {e}"))
        }
        _ => Ok(Argument::Text(literal::latin1_decode(payload))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_api::CoreErrorCode;

    #[test]
    fn reads_protocol_2_dict() {
        // {'a': 1} at protocol 2
        let data = b"\x80\x02}q\x00X\x01\x00\x00\x00aq\x01K\x01s.";
        let stream = read_stream(data).unwrap();
        assert_eq!(stream.protocol, 2);
        assert_eq!(stream.memo_count, 2);
        let ops: Vec<Opcode> = stream.records.iter().map(|r| r.opcode).collect();
        assert_eq!(
            ops,
            vec![
                Opcode::Proto,
                Opcode::EmptyDict,
                Opcode::BinPut,
                Opcode::BinUnicode,
                Opcode::BinPut,
                Opcode::BinInt1,
                Opcode::SetItem,
                Opcode::Stop,
            ]
        );
        assert_eq!(stream.records[3].argument, Argument::Text("a".into()));
        assert_eq!(stream.records[5].range, ByteRange::new(13, 15));
    }

    #[test]
    fn protocol_0_int_01_is_a_boolean() {
        let stream = read_stream(b"I01\n.").unwrap();
        assert_eq!(stream.protocol, 0);
        assert_eq!(stream.records[0].argument, Argument::Bool(true));
        let stream = read_stream(b"I1\n.").unwrap();
        assert_eq!(stream.records[0].argument, Argument::Int(1));
    }

    #[test]
    fn binary_opcodes_without_proto_mean_protocol_1() {
        // {'a': 1} as protocol 1 writes it: no PROTO header
        let stream = read_stream(b"}X\x01\x00\x00\x00aK\x01s.").unwrap();
        assert_eq!(stream.protocol, 1);
        let stream = read_stream(b"\x80\x02N.").unwrap();
        assert_eq!(stream.protocol, 2);
    }

    #[test]
    fn oversized_string_prefix_is_a_format_error() {
        let mut data = vec![0x80, 0x02, b'X', 50, 0, 0, 0];
        data.extend_from_slice(b"0123456789");
        let err = read_stream(&data).unwrap_err();
        assert_eq!(err.code, CoreErrorCode::Format);
        assert!(err.message.contains("50"), "{}", err.message);
    }

    #[test]
    fn rejects_missing_stop_and_trailing_bytes() {
        assert!(read_stream(b"\x80\x02N").is_err());
        assert!(read_stream(b"\x80\x02N.x").is_err());
    }

    #[test]
    fn rejects_dangling_and_reassigned_memo() {
        assert!(read_stream(b"\x80\x02h\x00.").is_err());
        assert!(read_stream(b"\x80\x02Nq\x00Nq\x00N.").is_err());
    }

    #[test]
    fn rejects_unknown_opcode_and_frame_past_end() {
        assert!(read_stream(b"\x80\x02P1\n.").is_err());
        let mut data = vec![0x80, 0x04, 0x95];
        data.extend_from_slice(&100u64.to_le_bytes());
        data.extend_from_slice(b"N.");
        let err = read_stream(&data).unwrap_err();
        assert!(err.message.contains("frame"), "{}", err.message);
    }

    #[test]
    fn records_frame_body() {
        let mut data = vec![0x80, 0x04, 0x95];
        data.extend_from_slice(&2u64.to_le_bytes());
        data.extend_from_slice(b"N.");
        let stream = read_stream(&data).unwrap();
        assert_eq!(stream.frames.len(), 1);
        assert_eq!(stream.frames[0].body, ByteRange::new(11, 13));
        assert_eq!(stream.enclosing_frame(ByteRange::new(11, 12)), Some(0));
    }
}
