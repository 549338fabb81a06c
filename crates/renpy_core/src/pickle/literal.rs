//! Decoding and encoding of pickle literal arguments: the text forms used by
//! protocol 0 (`INT`, `LONG`, `FLOAT`, `STRING`, `UNICODE`) and the two's
//! complement payload of `LONG1`/`LONG4`.

use std::fmt::Write as _;

/// An integer literal: fits `i64`, or kept as raw little-endian two's
/// complement bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntLiteral {
    Small(i64),
    Big(Vec<u8>),
}

pub fn latin1_decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

pub fn latin1_encode(text: &str) -> Option<Vec<u8>> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).ok())
        .collect()
}

/// Parse the argument of `INT`. `01` and `00` are the protocol 0/1 spelling
/// of `True` and `False`, which the caller handles before calling this.
pub fn parse_int_line(line: &[u8]) -> Result<IntLiteral, String> {
    let text = std::str::from_utf8(line).map_err(|_| "integer literal is not ASCII".to_string())?;
    parse_decimal(text.trim())
}

/// Parse the argument of `LONG`; Python 2 writes a trailing `L`.
pub fn parse_long_line(line: &[u8]) -> Result<IntLiteral, String> {
    let text = std::str::from_utf8(line).map_err(|_| "long literal is not ASCII".to_string())?;
    let text = text.trim();
    parse_decimal(text.strip_suffix('L').unwrap_or(text))
}

fn parse_decimal(text: &str) -> Result<IntLiteral, String> {
    if let Ok(v) = text.parse::<i64>() {
        return Ok(IntLiteral::Small(v));
    }
    text.parse::<i128>()
        .map(|v| IntLiteral::Big(int_to_le_bytes(v)))
        .map_err(|_| format!("invalid integer literal '{text}'"))
}

pub fn parse_float_line(line: &[u8]) -> Result<f64, String> {
    let text = std::str::from_utf8(line).map_err(|_| "float literal is not ASCII".to_string())?;
    text.trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid float literal '{}'", text.trim()))
}

/// Decode the payload of `LONG1`/`LONG4`.
pub fn decode_long_bytes(bytes: &[u8]) -> IntLiteral {
    if bytes.is_empty() {
        return IntLiteral::Small(0);
    }
    if bytes.len() > 8 {
        return IntLiteral::Big(bytes.to_vec());
    }
    let fill = if bytes[bytes.len() - 1] & 0x80 != 0 {
        0xff
    } else {
        0x00
    };
    let mut buf = [fill; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    IntLiteral::Small(i64::from_le_bytes(buf))
}

/// Minimal little-endian two's complement encoding, matching
/// `pickle.encode_long` (zero encodes as no bytes).
pub fn int_to_le_bytes(value: i128) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let mut bytes = value.to_le_bytes().to_vec();
    while bytes.len() > 1 {
        let last = bytes[bytes.len() - 1];
        let prev_high = bytes[bytes.len() - 2] & 0x80 != 0;
        let redundant = (last == 0x00 && !prev_high) || (last == 0xff && prev_high);
        if !redundant {
            break;
        }
        bytes.pop();
    }
    bytes
}

/// Decode the quoted argument of `STRING` (Python `repr` of a byte string).
pub fn decode_quoted_string(line: &[u8]) -> Result<Vec<u8>, String> {
    let quoted = line.len() >= 2
        && line[0] == line[line.len() - 1]
        && (line[0] == b'\'' || line[0] == b'"');
    if !quoted {
        return Err("the STRING opcode argument must be quoted".to_string());
    }
    let body = &line[1..line.len() - 1];
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        let b = body[i];
        if b != b'\\' || i + 1 == body.len() {
            out.push(b);
            i += 1;
            continue;
        }
        let esc = body[i + 1];
        i += 2;
        match esc {
            b'\\' => out.push(b'\\'),
            b'\'' => out.push(b'\''),
            b'"' => out.push(b'"'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'\n' => {}
            b'x' => {
                let hex = body
                    .get(i..i + 2)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| format!("invalid \\x escape at byte {}", i - 2))?;
                out.push(hex);
                i += 2;
            }
            b'0'..=b'7' => {
                let mut value = u32::from(esc - b'0');
                let mut taken = 0;
                while taken < 2 && i < body.len() && (b'0'..=b'7').contains(&body[i]) {
                    value = value * 8 + u32::from(body[i] - b'0');
                    i += 1;
                    taken += 1;
                }
                out.push((value & 0xff) as u8);
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

/// Encode a byte string the way Python 2 `repr` does, always single-quoted.
pub fn encode_quoted_string(bytes: &[u8]) -> Vec<u8> {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('\'');
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\x{b:02x}");
            }
        }
    }
    out.push('\'');
    out.into_bytes()
}

/// Decode the argument of `UNICODE` (`raw-unicode-escape`).
pub fn decode_raw_unicode_escape(bytes: &[u8]) -> Result<String, String> {
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i] as char);
            i += 1;
            continue;
        }
        let run_start = i;
        while i < bytes.len() && bytes[i] == b'\\' {
            i += 1;
        }
        let run = i - run_start;
        let escape_width = match bytes.get(i) {
            Some(b'u') => Some(4),
            Some(b'U') => Some(8),
            _ => None,
        };
        match escape_width {
            Some(width) if run % 2 == 1 => {
                out.extend(std::iter::repeat_n('\\', run - 1));
                let hex = bytes
                    .get(i + 1..i + 1 + width)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u32::from_str_radix(h, 16).ok())
                    .ok_or_else(|| format!("truncated \\u escape at byte {}", i - 1))?;
                let ch = char::from_u32(hex)
                    .ok_or_else(|| format!("escape \\u{hex:x} is not a valid code point"))?;
                out.push(ch);
                i += 1 + width;
            }
            _ => out.extend(std::iter::repeat_n('\\', run)),
        }
    }
    Ok(out)
}

/// Encode text for `UNICODE`, escaping the characters the pickler escapes so
/// the result stays on one line.
pub fn encode_raw_unicode_escape(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for ch in text.chars() {
        let cp = u32::from(ch);
        match ch {
            '\\' | '\0' | '\n' | '\r' | '\x1a' => {
                out.extend_from_slice(format!("\\u{cp:04x}").as_bytes());
            }
            _ if cp < 0x100 => out.push(cp as u8),
            _ if cp < 0x10000 => out.extend_from_slice(format!("\\u{cp:04x}").as_bytes()),
            _ => out.extend_from_slice(format!("\\U{cp:08x}").as_bytes()),
        }
    }
    out
}

/// Text form of a float for `FLOAT`; Python's `float()` reads Rust's `Debug`
/// output (`1.5`, `1e100`, `inf`, `NaN`).
pub fn format_float(value: f64) -> String {
    format!("{value:?}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_bytes_sign_extend() {
        assert_eq!(decode_long_bytes(&[0xff]), IntLiteral::Small(-1));
        assert_eq!(decode_long_bytes(&[0x80, 0x00]), IntLiteral::Small(128));
        assert_eq!(decode_long_bytes(&[]), IntLiteral::Small(0));
        assert!(matches!(decode_long_bytes(&[1; 9]), IntLiteral::Big(_)));
    }

    #[test]
    fn int_bytes_are_minimal() {
        assert_eq!(int_to_le_bytes(255), vec![0xff, 0x00]);
        assert_eq!(int_to_le_bytes(127), vec![0x7f]);
        assert_eq!(int_to_le_bytes(-128), vec![0x80]);
        assert_eq!(int_to_le_bytes(-129), vec![0x7f, 0xff]);
        assert!(int_to_le_bytes(0).is_empty());
    }

    #[test]
    fn quoted_string_handles_escapes() {
        let decoded = decode_quoted_string(br"'it\'s\n\x41\101'").unwrap();
        assert_eq!(decoded, b"it's\nAA");
        assert!(decode_quoted_string(b"unquoted").is_err());
        let bytes = b"a'b\\\xe9";
        assert_eq!(decode_quoted_string(&encode_quoted_string(bytes)).unwrap(), bytes);
    }

    #[test]
    fn raw_unicode_escape_respects_backslash_parity() {
        assert_eq!(decode_raw_unicode_escape(b"\xe9").unwrap(), "\u{e9}");
        assert_eq!(decode_raw_unicode_escape(br"\\u00e9").unwrap(), "\\\\u00e9");
        let text = "line\nbreak \\ \u{263a} \u{1f600}";
        let encoded = encode_raw_unicode_escape(text);
        assert!(!encoded.contains(&b'\n'));
        assert_eq!(decode_raw_unicode_escape(&encoded).unwrap(), text);
    }

    #[test]
    fn int_lines_accept_python2_long_suffix() {
        assert_eq!(parse_long_line(b"12L").unwrap(), IntLiteral::Small(12));
        assert_eq!(parse_int_line(b"-7").unwrap(), IntLiteral::Small(-7));
        assert!(matches!(
            parse_int_line(b"100000000000000000000").unwrap(),
            IntLiteral::Big(_)
        ));
        assert!(parse_int_line(b"12x").is_err());
    }
}
