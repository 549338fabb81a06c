use std::fmt::Write as _;

use renpy_core::core_api::{ScanSummary, Session};
use renpy_core::patch::EditRecord;
use renpy_core::pickle::{Argument, OpcodeRecord};
use renpy_core::store::{ReadOnlyEntry, ScalarValue, VariableEntry};
use serde_json::{Map as JsonMap, Value as JsonValue};

const VALUE_COL_MAX: usize = 40;
const SUMMARY_COL_MAX: usize = 48;
const ARGUMENT_COL_MAX: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonStyle {
    #[default]
    CanonicalV1,
}

/// Which entries a listing shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Case-insensitive substring the variable name must contain.
    pub filter: Option<String>,
    pub include_read_only: bool,
}

impl ListOptions {
    pub fn matches(&self, name: &str) -> bool {
        match &self.filter {
            Some(filter) => name.to_lowercase().contains(&filter.to_lowercase()),
            None => true,
        }
    }
}

pub fn render_json_variables(session: &Session, options: &ListOptions, style: JsonStyle) -> JsonValue {
    match style {
        JsonStyle::CanonicalV1 => JsonValue::Object(variables_json(session, options)),
    }
}

pub fn render_json_opcodes(session: &Session, style: JsonStyle) -> JsonValue {
    match style {
        JsonStyle::CanonicalV1 => JsonValue::Array(
            session
                .records()
                .iter()
                .enumerate()
                .map(|(index, record)| opcode_to_json(index, record))
                .collect(),
        ),
    }
}

pub fn render_json_summary(summary: &ScanSummary) -> JsonValue {
    let mut m = JsonMap::new();
    m.insert("protocol".to_string(), JsonValue::from(summary.protocol));
    m.insert("payload_len".to_string(), JsonValue::from(summary.payload_len));
    m.insert("records".to_string(), JsonValue::from(summary.record_count));
    m.insert("memo_slots".to_string(), JsonValue::from(summary.memo_count));
    m.insert("frames".to_string(), JsonValue::from(summary.frame_count));
    m.insert("variables".to_string(), JsonValue::from(summary.variable_count));
    m.insert("read_only".to_string(), JsonValue::from(summary.read_only_count));
    m.insert("generation".to_string(), JsonValue::from(summary.generation));
    m.insert("edits".to_string(), JsonValue::from(summary.edit_count));
    JsonValue::Object(m)
}

pub fn render_json_edits(edits: &[EditRecord]) -> JsonValue {
    JsonValue::Array(
        edits
            .iter()
            .map(|edit| {
                let mut m = JsonMap::new();
                m.insert(
                    "name".to_string(),
                    JsonValue::String(edit.variable_name.clone()),
                );
                m.insert("offset".to_string(), JsonValue::from(edit.old_range.start));
                m.insert("old_len".to_string(), JsonValue::from(edit.old_bytes.len()));
                m.insert("new_len".to_string(), JsonValue::from(edit.new_bytes.len()));
                m.insert("delta".to_string(), JsonValue::from(edit.length_delta()));
                JsonValue::Object(m)
            })
            .collect(),
    )
}

fn variables_json(session: &Session, options: &ListOptions) -> JsonMap<String, JsonValue> {
    let mut out = JsonMap::new();
    out.insert("protocol".to_string(), JsonValue::from(session.protocol()));
    out.insert("generation".to_string(), JsonValue::from(session.generation()));
    out.insert(
        "variables".to_string(),
        JsonValue::Array(
            session
                .variables()
                .iter()
                .filter(|v| options.matches(&v.name))
                .map(variable_to_json)
                .collect(),
        ),
    );
    if options.include_read_only {
        out.insert(
            "read_only".to_string(),
            JsonValue::Array(
                session
                    .read_only()
                    .iter()
                    .filter(|r| options.matches(&r.name))
                    .map(read_only_to_json)
                    .collect(),
            ),
        );
    }
    out
}

fn variable_to_json(v: &VariableEntry) -> JsonValue {
    let mut m = JsonMap::new();
    m.insert("name".to_string(), JsonValue::String(v.name.clone()));
    m.insert("type".to_string(), JsonValue::String(v.kind().to_string()));
    m.insert("value".to_string(), scalar_to_json(&v.value));
    m.insert(
        "opcode".to_string(),
        JsonValue::String(v.source_opcode.name().to_string()),
    );
    m.insert("offset".to_string(), JsonValue::from(v.range.start));
    m.insert("length".to_string(), JsonValue::from(v.range.len()));
    m.insert("shared".to_string(), JsonValue::Bool(v.shared));
    JsonValue::Object(m)
}

fn read_only_to_json(r: &ReadOnlyEntry) -> JsonValue {
    let mut m = JsonMap::new();
    m.insert("name".to_string(), JsonValue::String(r.name.clone()));
    m.insert("reason".to_string(), JsonValue::String(r.reason.to_string()));
    m.insert("summary".to_string(), JsonValue::String(r.summary.clone()));
    JsonValue::Object(m)
}

fn scalar_to_json(value: &ScalarValue) -> JsonValue {
    match value {
        ScalarValue::Integer(v) => JsonValue::from(*v),
        // Non-finite floats have no JSON form and become null.
        ScalarValue::Float(v) => JsonValue::from(*v),
        ScalarValue::Boolean(v) => JsonValue::Bool(*v),
        ScalarValue::Text(s) => JsonValue::String(s.clone()),
    }
}

fn opcode_to_json(index: usize, record: &OpcodeRecord) -> JsonValue {
    let mut m = JsonMap::new();
    m.insert("index".to_string(), JsonValue::from(index));
    m.insert("offset".to_string(), JsonValue::from(record.range.start));
    m.insert("length".to_string(), JsonValue::from(record.range.len()));
    m.insert(
        "opcode".to_string(),
        JsonValue::String(record.opcode.name().to_string()),
    );
    let argument = match &record.argument {
        Argument::None => JsonValue::Null,
        other => JsonValue::String(other.to_string()),
    };
    m.insert("argument".to_string(), argument);
    JsonValue::Object(m)
}

/// Aligned table of editable variables, followed by the read-only ones when
/// asked for.
pub fn render_variable_table(session: &Session, options: &ListOptions) -> String {
    let mut out = String::new();
    let rows: Vec<[String; 4]> = session
        .variables()
        .iter()
        .filter(|v| options.matches(&v.name))
        .map(|v| {
            let mut name = v.name.clone();
            if v.shared {
                name.push('*');
            }
            [
                name,
                v.kind().to_string(),
                fit_column(&display_value(&v.value), VALUE_COL_MAX),
                v.source_opcode.name().to_string(),
            ]
        })
        .collect();

    if rows.is_empty() {
        writeln!(out, "no editable variables").expect("writing to String cannot fail");
    } else {
        write_table(&mut out, ["NAME", "TYPE", "VALUE", "OPCODE"], &rows);
        if session.variables().iter().any(|v| v.shared) {
            writeln!(out, "* shared with other references in the save")
                .expect("writing to String cannot fail");
        }
    }

    if options.include_read_only {
        let rows: Vec<[String; 3]> = session
            .read_only()
            .iter()
            .filter(|r| options.matches(&r.name))
            .map(|r| {
                [
                    r.name.clone(),
                    r.reason.to_string(),
                    fit_column(&r.summary, SUMMARY_COL_MAX),
                ]
            })
            .collect();
        writeln!(out).expect("writing to String cannot fail");
        writeln!(out, "read-only ({}):", rows.len()).expect("writing to String cannot fail");
        if !rows.is_empty() {
            write_table(&mut out, ["NAME", "REASON", "VALUE"], &rows);
        }
    }
    out
}

/// A `pickletools`-style disassembly: offset, opcode and argument per line.
pub fn render_opcode_listing(session: &Session) -> String {
    let mut out = String::new();
    let width = session
        .records()
        .last()
        .map(|r| r.range.start.to_string().len())
        .unwrap_or(1);
    for record in session.records() {
        let line = format!(
            "{:>width$}: {:<18} {}",
            record.range.start,
            record.opcode.name(),
            fit_column(&record.argument.to_string(), ARGUMENT_COL_MAX),
        );
        writeln!(out, "{}", line.trim_end()).expect("writing to String cannot fail");
    }
    out
}

pub fn render_summary_text(summary: &ScanSummary) -> String {
    let mut out = String::new();
    writeln!(
        out,
        "protocol {}, {} bytes, {} opcodes, {} memo slots, {} frames",
        summary.protocol,
        summary.payload_len,
        summary.record_count,
        summary.memo_count,
        summary.frame_count
    )
    .expect("writing to String cannot fail");
    writeln!(
        out,
        "{} editable, {} read-only",
        summary.variable_count, summary.read_only_count
    )
    .expect("writing to String cannot fail");
    if summary.edit_count > 0 {
        writeln!(
            out,
            "{} edits applied (generation {})",
            summary.edit_count, summary.generation
        )
        .expect("writing to String cannot fail");
    }
    out
}

pub fn render_edit_lines(edits: &[EditRecord]) -> String {
    let mut out = String::new();
    for edit in edits {
        writeln!(
            out,
            "set {} at offset {:#x} ({} -> {} bytes)",
            edit.variable_name,
            edit.old_range.start,
            edit.old_bytes.len(),
            edit.new_bytes.len()
        )
        .expect("writing to String cannot fail");
    }
    out
}

fn display_value(value: &ScalarValue) -> String {
    match value {
        ScalarValue::Text(s) => format!("{s:?}"),
        other => other.to_string(),
    }
}

fn write_table<const N: usize>(out: &mut String, header: [&str; N], rows: &[[String; N]]) {
    let mut widths = header.map(|h| h.chars().count());
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }
    write_row(out, &widths, header.iter().copied());
    for row in rows {
        write_row(out, &widths, row.iter().map(String::as_str));
    }
}

fn write_row<'a>(out: &mut String, widths: &[usize], cells: impl Iterator<Item = &'a str>) {
    let mut line = String::new();
    for (cell, width) in cells.zip(widths) {
        let _ = write!(line, "{cell:<width$}  ");
    }
    writeln!(out, "{}", line.trim_end()).expect("writing to String cannot fail");
}

fn fit_column(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    if width <= 3 {
        return value.chars().take(width).collect();
    }

    let mut out = String::with_capacity(width);
    for ch in value.chars().take(width - 3) {
        out.push(ch);
    }
    out.push_str("...");
    out
}
