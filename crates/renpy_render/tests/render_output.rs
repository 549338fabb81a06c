use renpy_core::core_api::{Engine, Session};
use renpy_core::patch::EditValue;
use renpy_render::{
    JsonStyle, ListOptions, render_json_edits, render_json_opcodes, render_json_summary,
    render_json_variables, render_opcode_listing, render_summary_text, render_variable_table,
};
use serde_json::Value;

fn push_text(out: &mut Vec<u8>, s: &str) {
    out.push(b'X');
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// Protocol 2 payload: `{"store.money": 100, "store._flag": True,
/// "store.player_name": "Eileen", "store.party": []}`.
fn sample_payload() -> Vec<u8> {
    let mut out = vec![0x80, 0x02, b'}', b'('];
    push_text(&mut out, "store.money");
    out.extend_from_slice(&[b'K', 100]);
    push_text(&mut out, "store._flag");
    out.push(0x88);
    push_text(&mut out, "store.player_name");
    push_text(&mut out, "Eileen");
    push_text(&mut out, "store.party");
    out.push(b']');
    out.extend_from_slice(b"u.");
    out
}

fn session() -> Session {
    Engine::new()
        .open_payload(sample_payload())
        .expect("sample should parse")
}

#[test]
fn variables_json_uses_canonical_order() {
    let session = session();
    let options = ListOptions {
        include_read_only: true,
        ..ListOptions::default()
    };
    let value = render_json_variables(&session, &options, JsonStyle::CanonicalV1);
    let keys: Vec<&str> = value
        .as_object()
        .expect("json should be an object")
        .keys()
        .map(String::as_str)
        .collect();
    assert_eq!(keys, vec!["protocol", "generation", "variables", "read_only"]);

    let first = &value["variables"][0];
    let keys: Vec<&str> = first
        .as_object()
        .expect("entry should be an object")
        .keys()
        .map(String::as_str)
        .collect();
    assert_eq!(
        keys,
        vec!["name", "type", "value", "opcode", "offset", "length", "shared"]
    );
    assert_eq!(first["name"], "money");
    assert_eq!(first["type"], "int");
    assert_eq!(first["value"], 100);
    assert_eq!(first["opcode"], "BININT1");
    assert_eq!(value["variables"][1]["value"], "Eileen");

    let read_only = value["read_only"].as_array().expect("array");
    assert_eq!(read_only.len(), 2);
    assert_eq!(read_only[0]["name"], "_flag");
    assert_eq!(read_only[0]["reason"], "reserved name");
    assert_eq!(read_only[1]["summary"], "[]");
}

#[test]
fn filter_and_read_only_flag_narrow_the_listing() {
    let session = session();
    let options = ListOptions {
        filter: Some("NAME".to_string()),
        include_read_only: false,
    };
    let value = render_json_variables(&session, &options, JsonStyle::CanonicalV1);
    assert!(value.get("read_only").is_none());
    let names: Vec<&str> = value["variables"]
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|v| v["name"].as_str())
        .collect();
    assert_eq!(names, vec!["player_name"]);

    let table = render_variable_table(&session, &options);
    assert!(table.contains("player_name"));
    assert!(!table.contains("money"));
}

#[test]
fn variable_table_is_aligned() {
    let session = session();
    let table = render_variable_table(
        &session,
        &ListOptions {
            include_read_only: true,
            ..ListOptions::default()
        },
    );
    let lines: Vec<&str> = table.lines().collect();
    assert!(lines[0].starts_with("NAME"));
    let value_col = lines[0].find("VALUE").expect("header has VALUE");
    assert_eq!(&lines[1][..5], "money");
    assert_eq!(&lines[1][value_col..value_col + 3], "100");
    assert_eq!(&lines[2][value_col..value_col + 8], "\"Eileen\"");
    assert!(table.contains("read-only (2):"));
    assert!(table.contains("reserved name"));
}

#[test]
fn opcode_listing_covers_every_record() {
    let session = session();
    let listing = render_opcode_listing(&session);
    assert_eq!(listing.lines().count(), session.records().len());
    assert!(listing.lines().next().expect("first line").contains("PROTO"));
    assert!(listing.contains("BININT1"));
    assert!(listing.lines().last().expect("last line").ends_with("STOP"));

    let json = render_json_opcodes(&session, JsonStyle::CanonicalV1);
    let records = json.as_array().expect("array");
    assert_eq!(records.len(), session.records().len());
    assert_eq!(records[0]["opcode"], "PROTO");
    assert_eq!(records[0]["argument"], "2");
    assert_eq!(records[records.len() - 1]["argument"], Value::Null);
}

#[test]
fn summary_and_edits_reflect_the_session() {
    let mut session = session();
    session
        .apply_edit("money", EditValue::Integer(9999))
        .expect("edit should apply");

    let summary = session.summary();
    let json = render_json_summary(&summary);
    assert_eq!(json["protocol"], 2);
    assert_eq!(json["variables"], 2);
    assert_eq!(json["read_only"], 2);
    assert_eq!(json["edits"], 1);
    assert_eq!(json["generation"], 1);

    let text = render_summary_text(&summary);
    assert!(text.starts_with("protocol 2,"));
    assert!(text.contains("1 edits applied (generation 1)"));

    let edits = render_json_edits(session.history());
    assert_eq!(edits[0]["name"], "money");
    assert_eq!(edits[0]["old_len"], 2);
    assert_eq!(edits[0]["new_len"], 3);
    assert_eq!(edits[0]["delta"], 1);
}
