//! Scalar encoder: writes one value with the narrowest literal opcode the
//! stream's protocol allows.

use super::literal;
use super::opcode::{Opcode, StringClass};
use super::stream::read_stream;
use crate::core_api::CoreError;
use crate::store::{ScalarEncoding, ScalarValue};

/// Encode `value` as a single literal opcode. `encoding` is the family of
/// the literal being replaced; text stays in its string class.
pub fn encode_scalar(
    value: &ScalarValue,
    encoding: ScalarEncoding,
    protocol: u8,
) -> Result<Vec<u8>, CoreError> {
    match value {
        ScalarValue::Boolean(v) => Ok(encode_bool(*v, protocol)),
        ScalarValue::Integer(v) => Ok(encode_int(*v, protocol)),
        ScalarValue::Float(v) => Ok(encode_float(*v, protocol)),
        ScalarValue::Text(s) => {
            let class = encoding.string_class().ok_or_else(|| {
                CoreError::value(format!("text cannot replace a {encoding:?} value"))
            })?;
            encode_text(s, class, protocol)
        }
    }
}

fn encode_bool(value: bool, protocol: u8) -> Vec<u8> {
    if protocol >= 2 {
        let op = if value { Opcode::NewTrue } else { Opcode::NewFalse };
        return vec![op.byte()];
    }
    let mut out = vec![Opcode::Int.byte()];
    out.extend_from_slice(if value { b"01\n" } else { b"00\n" });
    out
}

fn encode_int(value: i64, protocol: u8) -> Vec<u8> {
    if protocol >= 1 {
        if let Ok(v) = u8::try_from(value) {
            return vec![Opcode::BinInt1.byte(), v];
        }
        if let Ok(v) = u16::try_from(value) {
            let mut out = vec![Opcode::BinInt2.byte()];
            out.extend_from_slice(&v.to_le_bytes());
            return out;
        }
        if let Ok(v) = i32::try_from(value) {
            let mut out = vec![Opcode::BinInt.byte()];
            out.extend_from_slice(&v.to_le_bytes());
            return out;
        }
        if protocol >= 2 {
            let bytes = literal::int_to_le_bytes(i128::from(value));
            let mut out = vec![Opcode::Long1.byte(), bytes.len() as u8];
            out.extend_from_slice(&bytes);
            return out;
        }
    } else if i32::try_from(value).is_ok() {
        return format!("I{value}\n").into_bytes();
    }
    format!("L{value}L\n").into_bytes()
}

fn encode_float(value: f64, protocol: u8) -> Vec<u8> {
    if protocol >= 1 {
        let mut out = vec![Opcode::BinFloat.byte()];
        out.extend_from_slice(&value.to_be_bytes());
        return out;
    }
    format!("F{}\n", literal::format_float(value)).into_bytes()
}

fn counted(opcode: Opcode, width: usize, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + width + payload.len());
    out.push(opcode.byte());
    let len = payload.len() as u64;
    out.extend_from_slice(&len.to_le_bytes()[..width]);
    out.extend_from_slice(payload);
    out
}

fn encode_text(text: &str, class: StringClass, protocol: u8) -> Result<Vec<u8>, CoreError> {
    let encoded = match class {
        StringClass::Unicode => {
            if protocol == 0 {
                let mut out = vec![Opcode::Unicode.byte()];
                out.extend_from_slice(&literal::encode_raw_unicode_escape(text));
                out.push(b'\n');
                return Ok(out);
            }
            let bytes = text.as_bytes();
            if protocol >= 4 && bytes.len() <= 0xff {
                counted(Opcode::ShortBinUnicode, 1, bytes)
            } else if u32::try_from(bytes.len()).is_ok() {
                counted(Opcode::BinUnicode, 4, bytes)
            } else if protocol >= 4 {
                counted(Opcode::BinUnicode8, 8, bytes)
            } else {
                return Err(too_long(bytes.len(), protocol));
            }
        }
        StringClass::ByteString => {
            let bytes = literal::latin1_encode(text).ok_or_else(|| {
                CoreError::value("byte string values must be Latin-1 text".to_string())
            })?;
            if protocol == 0 {
                let mut out = vec![Opcode::String.byte()];
                out.extend_from_slice(&literal::encode_quoted_string(&bytes));
                out.push(b'\n');
                out
            } else if bytes.len() <= 0xff {
                counted(Opcode::ShortBinString, 1, &bytes)
            } else if i32::try_from(bytes.len()).is_ok() {
                counted(Opcode::BinString, 4, &bytes)
            } else {
                return Err(too_long(bytes.len(), protocol));
            }
        }
        StringClass::Bytes => {
            let bytes = literal::latin1_encode(text).ok_or_else(|| {
                CoreError::value("bytes values must be Latin-1 text".to_string())
            })?;
            if bytes.len() <= 0xff {
                counted(Opcode::ShortBinBytes, 1, &bytes)
            } else if u32::try_from(bytes.len()).is_ok() {
                counted(Opcode::BinBytes, 4, &bytes)
            } else if protocol >= 4 {
                counted(Opcode::BinBytes8, 8, &bytes)
            } else {
                return Err(too_long(bytes.len(), protocol));
            }
        }
    };
    Ok(encoded)
}

fn too_long(len: usize, protocol: u8) -> CoreError {
    CoreError::value(format!(
        "a {len} byte string does not fit any opcode of protocol {protocol}"
    ))
}

/// Re-read `encoded` and check it is exactly one scalar literal of the
/// expected family.
pub fn verify_single_literal(encoded: &[u8], expected: ScalarEncoding) -> Result<(), CoreError> {
    let mut framed = Vec::with_capacity(encoded.len() + 1);
    framed.extend_from_slice(encoded);
    framed.push(Opcode::Stop.byte());

    let stream = read_stream(&framed)
        .map_err(|e| CoreError::value(format!("replacement does not re-read: {}", e.message)))?;
    let [literal, _stop] = stream.records.as_slice() else {
        return Err(CoreError::value(format!(
            "replacement decodes to {} opcodes instead of one",
            stream.records.len().saturating_sub(1)
        )));
    };
    if !literal.opcode.is_scalar_literal() {
        return Err(CoreError::value(format!(
            "replacement opcode {} is not a scalar literal",
            literal.opcode.name()
        )));
    }
    let found = ScalarEncoding::of(literal.opcode, &literal.argument);
    let compatible = match (found, expected) {
        (Some(a), b) if a == b => true,
        // Widening an int to LONG1 or narrowing a long keeps the Python type.
        (Some(ScalarEncoding::Int | ScalarEncoding::Long), ScalarEncoding::Int | ScalarEncoding::Long) => true,
        _ => false,
    };
    if !compatible {
        return Err(CoreError::value(format!(
            "replacement opcode {} does not match the original {expected:?} encoding",
            literal.opcode.name()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_use_the_narrowest_opcode() {
        assert_eq!(encode_int(255, 2), vec![b'K', 0xff]);
        assert_eq!(encode_int(256, 2), vec![b'M', 0x00, 0x01]);
        assert_eq!(encode_int(-1, 2), vec![b'J', 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(&encode_int(1 << 40, 2)[..2], &[0x8a_u8, 6][..]);
        assert_eq!(encode_int(1 << 40, 1), b"L1099511627776L\n".to_vec());
        assert_eq!(encode_int(7, 0), b"I7\n".to_vec());
    }

    #[test]
    fn booleans_follow_protocol() {
        assert_eq!(encode_bool(true, 2), vec![0x88]);
        assert_eq!(encode_bool(false, 1), b"I00\n".to_vec());
    }

    #[test]
    fn unicode_switches_to_wide_opcode_past_255_bytes() {
        let short = encode_text(&"a".repeat(255), StringClass::Unicode, 4).unwrap();
        assert_eq!(short[0], 0x8c);
        let long = encode_text(&"a".repeat(256), StringClass::Unicode, 4).unwrap();
        assert_eq!(long[0], b'X');
        let p2 = encode_text("hi", StringClass::Unicode, 2).unwrap();
        assert_eq!(p2, b"X\x02\x00\x00\x00hi".to_vec());
    }

    #[test]
    fn byte_strings_reject_non_latin1() {
        let err = encode_text("\u{263a}", StringClass::ByteString, 2).unwrap_err();
        assert_eq!(err.code, crate::core_api::CoreErrorCode::Value);
        assert_eq!(
            encode_text("\u{e9}", StringClass::ByteString, 2).unwrap(),
            vec![b'U', 1, 0xe9]
        );
    }

    #[test]
    fn verification_rejects_wrong_family_and_extra_opcodes() {
        assert!(verify_single_literal(&[b'K', 1], ScalarEncoding::Int).is_ok());
        assert!(verify_single_literal(&[b'K', 1], ScalarEncoding::Float).is_err());
        assert!(verify_single_literal(&[b'K', 1, b'K', 2], ScalarEncoding::Int).is_err());
        assert!(verify_single_literal(&[b'N'], ScalarEncoding::Int).is_err());
    }
}
