//! In-place replacement of one scalar literal inside a pickle payload.
//!
//! Only the literal's own bytes change. Every other byte, including memo
//! stores and backreferences, stays where the original pickler put it; the
//! only bookkeeping is the length field of an enclosing protocol 4 `FRAME`.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core_api::CoreError;
use crate::layout::ByteRange;
use crate::pickle::{Opcode, OpcodeStream, encode_scalar, verify_single_literal};
use crate::store::{ScalarEncoding, ScalarKind, ScalarValue, VariableEntry};

/// A replacement value as supplied by a caller. `Text` is parsed according
/// to the target variable's kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EditValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl FromStr for EditValue {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::Text(s.to_string()))
    }
}

impl From<ScalarValue> for EditValue {
    fn from(value: ScalarValue) -> Self {
        match value {
            ScalarValue::Integer(v) => Self::Integer(v),
            ScalarValue::Float(v) => Self::Float(v),
            ScalarValue::Boolean(v) => Self::Boolean(v),
            ScalarValue::Text(s) => Self::Text(s),
        }
    }
}

/// Undo/replay record for one applied edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditRecord {
    pub variable_name: String,
    pub old_range: ByteRange,
    pub old_bytes: Vec<u8>,
    pub new_bytes: Vec<u8>,
    /// Offset of the 8-byte length of the enclosing `FRAME`, if any.
    pub frame_length_at: Option<usize>,
}

impl EditRecord {
    pub fn length_delta(&self) -> isize {
        self.new_bytes.len() as isize - self.old_bytes.len() as isize
    }

    /// Range the new bytes occupy once applied.
    pub fn new_range(&self) -> ByteRange {
        ByteRange::new(
            self.old_range.start,
            self.old_range.start + self.new_bytes.len(),
        )
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Convert `value` to the kind of the target variable.
pub fn coerce(kind: ScalarKind, value: &EditValue) -> Result<ScalarValue, CoreError> {
    let mismatch = || CoreError::value(format!("cannot assign {value:?} to a {kind} variable"));
    let coerced = match (kind, value) {
        (ScalarKind::Integer, EditValue::Integer(v)) => ScalarValue::Integer(*v),
        (ScalarKind::Integer, EditValue::Text(s)) => {
            let v = s
                .trim()
                .parse::<i64>()
                .map_err(|_| CoreError::value(format!("'{s}' is not an integer")))?;
            ScalarValue::Integer(v)
        }
        (ScalarKind::Float, EditValue::Float(v)) => ScalarValue::Float(*v),
        (ScalarKind::Float, EditValue::Integer(v)) => ScalarValue::Float(*v as f64),
        (ScalarKind::Float, EditValue::Text(s)) => {
            let v = s
                .trim()
                .parse::<f64>()
                .map_err(|_| CoreError::value(format!("'{s}' is not a number")))?;
            ScalarValue::Float(v)
        }
        (ScalarKind::Boolean, EditValue::Boolean(v)) => ScalarValue::Boolean(*v),
        (ScalarKind::Boolean, EditValue::Integer(v @ (0 | 1))) => ScalarValue::Boolean(*v == 1),
        (ScalarKind::Boolean, EditValue::Text(s)) => {
            let v = parse_bool(s)
                .ok_or_else(|| CoreError::value(format!("'{s}' is not a boolean")))?;
            ScalarValue::Boolean(v)
        }
        (ScalarKind::Text, EditValue::Text(s)) => ScalarValue::Text(s.clone()),
        _ => return Err(mismatch()),
    };
    Ok(coerced)
}

/// Compute the replacement for `entry` without touching the buffer.
pub fn plan_edit(
    buffer: &[u8],
    stream: &OpcodeStream,
    entry: &VariableEntry,
    new_value: &EditValue,
) -> Result<EditRecord, CoreError> {
    let record = stream
        .record(entry.record)
        .filter(|r| r.range == entry.range && r.opcode == entry.source_opcode)
        .ok_or_else(|| CoreError::not_found(&entry.name))?;
    let old_bytes = buffer
        .get(record.range.start..record.range.end)
        .ok_or_else(|| CoreError::not_found(&entry.name))?;

    let scalar = coerce(entry.kind(), new_value)?;
    let new_bytes = encode_scalar(&scalar, entry.encoding, stream.protocol)?;
    verify_single_literal(&new_bytes, entry.encoding)?;

    Ok(EditRecord {
        variable_name: entry.name.clone(),
        old_range: record.range,
        old_bytes: old_bytes.to_vec(),
        new_bytes,
        frame_length_at: frame_length_field(stream, record.range),
    })
}

/// Check an edit recorded elsewhere against the current stream: the range
/// must be exactly one scalar literal and the new bytes one literal of the
/// same family. The frame offset is taken from the stream, not the record.
pub fn revalidate(stream: &OpcodeStream, edit: &EditRecord) -> Result<EditRecord, CoreError> {
    let record = stream
        .records
        .binary_search_by_key(&edit.old_range.start, |r| r.range.start)
        .ok()
        .and_then(|i| stream.record(i))
        .filter(|r| r.range == edit.old_range)
        .ok_or_else(|| {
            CoreError::value(format!(
                "edit of '{}' does not cover a whole opcode at {}..{}",
                edit.variable_name, edit.old_range.start, edit.old_range.end
            ))
        })?;
    let encoding = ScalarEncoding::of(record.opcode, &record.argument)
        .filter(|_| record.opcode.is_scalar_literal())
        .ok_or_else(|| {
            CoreError::value(format!(
                "edit of '{}' targets {}, which is not a scalar literal",
                edit.variable_name,
                record.opcode.name()
            ))
        })?;
    verify_single_literal(&edit.new_bytes, encoding)?;

    Ok(EditRecord {
        frame_length_at: frame_length_field(stream, record.range),
        ..edit.clone()
    })
}

/// Offset of the 8-byte length of the `FRAME` enclosing `range`.
fn frame_length_field(stream: &OpcodeStream, range: ByteRange) -> Option<usize> {
    stream
        .enclosing_frame(range)
        .map(|f| stream.frames[f].record)
        .and_then(|r| stream.record(r))
        .map(|r| r.range.start + 1)
}

/// Splice `edit` into `buffer`.
pub fn apply(buffer: &mut Vec<u8>, edit: &EditRecord) -> Result<(), CoreError> {
    splice(
        buffer,
        edit.old_range,
        &edit.old_bytes,
        &edit.new_bytes,
        edit.frame_length_at,
    )
}

/// Reverse a previously applied `edit`.
pub fn revert(buffer: &mut Vec<u8>, edit: &EditRecord) -> Result<(), CoreError> {
    splice(
        buffer,
        edit.new_range(),
        &edit.new_bytes,
        &edit.old_bytes,
        edit.frame_length_at,
    )
}

fn splice(
    buffer: &mut Vec<u8>,
    range: ByteRange,
    expected: &[u8],
    replacement: &[u8],
    frame_length_at: Option<usize>,
) -> Result<(), CoreError> {
    if buffer.get(range.start..range.end) != Some(expected) {
        return Err(CoreError::value(format!(
            "payload bytes at {}..{} do not match the edit",
            range.start, range.end
        )));
    }

    // Fix the frame length first so a failure leaves the buffer untouched.
    if let Some(at) = frame_length_at {
        let field = buffer
            .get(at.wrapping_sub(1)..at + 8)
            .filter(|f| f[0] == Opcode::Frame.byte())
            .ok_or_else(|| CoreError::format(format!("no FRAME length field at {at:#x}")))?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&field[1..]);
        let old_len = u64::from_le_bytes(raw);
        let new_len = u64::try_from(
            i128::from(old_len) + replacement.len() as i128 - expected.len() as i128,
        )
        .map_err(|_| CoreError::format(format!("FRAME length at {at:#x} would underflow")))?;
        buffer[at..at + 8].copy_from_slice(&new_len.to_le_bytes());
    }

    buffer.splice(range.start..range.end, replacement.iter().copied());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booleans_accept_common_spellings() {
        for text in ["true", "YES", "On", "1"] {
            assert_eq!(
                coerce(ScalarKind::Boolean, &EditValue::Text(text.into())).unwrap(),
                ScalarValue::Boolean(true)
            );
        }
        assert_eq!(
            coerce(ScalarKind::Boolean, &EditValue::Integer(0)).unwrap(),
            ScalarValue::Boolean(false)
        );
        assert!(coerce(ScalarKind::Boolean, &EditValue::Integer(2)).is_err());
        assert!(coerce(ScalarKind::Boolean, &EditValue::Text("maybe".into())).is_err());
    }

    #[test]
    fn integer_may_target_float_but_not_text() {
        assert_eq!(
            coerce(ScalarKind::Float, &EditValue::Integer(3)).unwrap(),
            ScalarValue::Float(3.0)
        );
        assert!(coerce(ScalarKind::Text, &EditValue::Integer(3)).is_err());
        assert!(coerce(ScalarKind::Integer, &EditValue::Text("12.5".into())).is_err());
    }

    #[test]
    fn revalidate_rejects_non_literal_targets_and_fixes_frame_offset() {
        use crate::pickle::read_stream;

        // PROTO 4, FRAME 4, EMPTY_LIST, BININT1 5, STOP
        let mut buffer = vec![0x80, 0x04, 0x95];
        buffer.extend_from_slice(&4u64.to_le_bytes());
        buffer.extend_from_slice(&[b']', b'K', 5, b'.']);
        let stream = read_stream(&buffer).unwrap();

        let good = EditRecord {
            variable_name: "x".into(),
            old_range: ByteRange::new(12, 14),
            old_bytes: vec![b'K', 5],
            new_bytes: vec![b'K', 6],
            frame_length_at: Some(99),
        };
        assert_eq!(revalidate(&stream, &good).unwrap().frame_length_at, Some(3));

        let container = EditRecord {
            new_bytes: vec![b']'],
            ..good.clone()
        };
        let err = revalidate(&stream, &container).unwrap_err();
        assert_eq!(err.code, crate::core_api::CoreErrorCode::Value);

        let list_target = EditRecord {
            old_range: ByteRange::new(11, 12),
            old_bytes: vec![b']'],
            ..good.clone()
        };
        assert!(revalidate(&stream, &list_target).is_err());

        let straddling = EditRecord {
            old_range: ByteRange::new(11, 14),
            ..good
        };
        assert!(revalidate(&stream, &straddling).is_err());
    }

    #[test]
    fn splice_adjusts_frame_and_reverts() {
        // PROTO 4, FRAME 3, BININT1 5, STOP
        let mut buffer = vec![0x80, 0x04, 0x95];
        buffer.extend_from_slice(&3u64.to_le_bytes());
        buffer.extend_from_slice(&[b'K', 5, b'.']);
        let original = buffer.clone();
        let edit = EditRecord {
            variable_name: "x".into(),
            old_range: ByteRange::new(11, 13),
            old_bytes: vec![b'K', 5],
            new_bytes: vec![b'M', 0x00, 0x01],
            frame_length_at: Some(3),
        };
        apply(&mut buffer, &edit).unwrap();
        assert_eq!(&buffer[3..11], &4u64.to_le_bytes());
        assert_eq!(&buffer[11..14], &[b'M', 0x00, 0x01]);
        revert(&mut buffer, &edit).unwrap();
        assert_eq!(buffer, original);
        assert!(revert(&mut buffer, &edit).is_err());
    }
}
