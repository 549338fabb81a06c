use std::fs;
use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser};
use env_logger::Env;
use renpy_core::config::EditorConfig;
use renpy_core::core_api::{CoreError, Engine, Session};
use renpy_core::patch::EditValue;
use renpy_render::{
    JsonStyle, ListOptions, render_edit_lines, render_json_edits, render_json_opcodes,
    render_json_summary, render_json_variables, render_opcode_listing, render_summary_text,
    render_variable_table,
};
use serde_json::Value as JsonValue;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// A `.save` archive, or a bare pickle payload.
    #[arg(value_name = "SAVE")]
    path: PathBuf,
    #[arg(long)]
    json: bool,
    /// Only list variables whose name contains this text.
    #[arg(long, value_name = "TEXT")]
    filter: Option<String>,
    /// Also list read-only entries and why they cannot be edited.
    #[arg(long)]
    all: bool,
    /// Disassemble the payload instead of listing variables.
    #[arg(long, conflicts_with = "set")]
    opcodes: bool,
    #[arg(long)]
    summary: bool,
    #[arg(
        long,
        value_name = "NAME=VALUE",
        value_parser = parse_assignment,
        action = ArgAction::Append,
        allow_hyphen_values = true
    )]
    set: Vec<(String, String)>,
    #[arg(long)]
    output: Option<PathBuf>,
    /// Sign the written save (default).
    #[arg(long, overrides_with = "no_sign")]
    sign: bool,
    #[arg(long = "no-sign", overrides_with = "sign")]
    no_sign: bool,
    /// Path to `security_keys.txt`; defaults to the Ren'Py token directories.
    #[arg(long, value_name = "PATH")]
    keys: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let has_edits = !cli.set.is_empty();
    if has_edits && cli.output.is_none() {
        eprintln!("--set requires --output <PATH>");
        process::exit(2);
    }
    if !has_edits && cli.output.is_some() {
        eprintln!("--output requires at least one --set flag");
        process::exit(2);
    }

    let mut config = match &cli.config {
        Some(path) => EditorConfig::load(path).unwrap_or_else(|e| {
            eprintln!("Error loading config: {e}");
            process::exit(1);
        }),
        None => EditorConfig::default(),
    };
    if cli.keys.is_some() {
        config.keys_path = cli.keys.clone();
    }

    let bytes = fs::read(&cli.path).unwrap_or_else(|e| {
        eprintln!("Error reading {}: {e}", cli.path.display());
        process::exit(1);
    });

    let engine = Engine::with_config(config);
    let opened = if bytes.starts_with(ZIP_MAGIC) {
        engine.open_archive(&bytes)
    } else {
        log::info!("{} is not a ZIP archive; reading it as a bare payload", cli.path.display());
        engine.open_payload(&bytes)
    };
    let mut session = opened.unwrap_or_else(|e| {
        eprintln!("Error parsing save file: {}", cli.path.display());
        eprintln!("  {e}");
        process::exit(1);
    });

    for (name, value) in &cli.set {
        session
            .apply_edit(name, EditValue::Text(value.clone()))
            .unwrap_or_else(|e| {
                eprintln!("Error setting {name}: {e}");
                process::exit(1);
            });
    }

    if let Some(out_path) = &cli.output {
        let request_signing = cli.sign || !cli.no_sign;
        let edited_bytes = write_bytes(&session, request_signing).unwrap_or_else(|e| {
            eprintln!("Error creating modified save bytes: {e}");
            process::exit(1);
        });
        fs::write(out_path, edited_bytes).unwrap_or_else(|e| {
            eprintln!("Error writing {}: {e}", out_path.display());
            process::exit(1);
        });
    }

    let options = ListOptions {
        filter: cli.filter.clone(),
        include_read_only: cli.all,
    };

    if cli.json {
        let json = json_report(&cli, &session, &options);
        let rendered = serde_json::to_string_pretty(&json).unwrap_or_else(|e| {
            eprintln!("Error rendering JSON output: {e}");
            process::exit(1);
        });
        println!("{rendered}");
        return;
    }

    if cli.summary {
        print!("{}", render_summary_text(&session.summary()));
    }
    if cli.opcodes {
        print!("{}", render_opcode_listing(&session));
        return;
    }
    if let Some(out_path) = &cli.output {
        print!("{}", render_edit_lines(session.history()));
        println!("Wrote edited save to {}", out_path.display());
        return;
    }
    print!("{}", render_variable_table(&session, &options));
}

/// Archives are rewritten whole; a bare payload is written back bare.
fn write_bytes(session: &Session, request_signing: bool) -> Result<Vec<u8>, CoreError> {
    if session.archive().is_some() {
        session.to_archive_bytes(request_signing)
    } else {
        Ok(session.export_patched(false)?.log)
    }
}

fn json_report(cli: &Cli, session: &Session, options: &ListOptions) -> JsonValue {
    let mut report = if cli.opcodes {
        let mut m = serde_json::Map::new();
        m.insert(
            "opcodes".to_string(),
            render_json_opcodes(session, JsonStyle::CanonicalV1),
        );
        JsonValue::Object(m)
    } else {
        render_json_variables(session, options, JsonStyle::CanonicalV1)
    };
    if let JsonValue::Object(m) = &mut report {
        if cli.summary {
            m.insert("summary".to_string(), render_json_summary(&session.summary()));
        }
        if !session.history().is_empty() {
            m.insert("edits".to_string(), render_json_edits(session.history()));
        }
    }
    report
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn parse_assignment(value: &str) -> Result<(String, String), String> {
    let (name, rhs) = value
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{value}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing variable name in '{value}'"));
    }
    Ok((name.to_string(), rhs.to_string()))
}
