mod support;

use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use p256::SecretKey;
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use renpy_core::archive::SaveArchive;
use renpy_core::core_api::{CoreErrorCode, Engine};
use renpy_core::patch::EditValue;
use renpy_core::signing::{KeyFileSigner, NullSigner};
use renpy_core::store::ScalarValue;
use sha1::{Digest, Sha1};
use zip::ZipArchive;

use support::sample_save;

fn temp_output_path(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}_{}_{}.txt", std::process::id(), nanos))
}

fn write_keys_file() -> PathBuf {
    let secret = SecretKey::from_slice(&[9u8; 32]).expect("valid scalar");
    let der = secret.to_sec1_der().expect("encode key");
    let path = temp_output_path("renpy_keys");
    std::fs::write(
        &path,
        format!("signing-key {}\n", STANDARD.encode(der.as_slice())),
    )
    .expect("write keys file");
    path
}

fn read_zip_entry(bytes: &[u8], name: &str) -> Option<Vec<u8>> {
    let mut zip = ZipArchive::new(Cursor::new(bytes)).expect("valid zip");
    let mut file = zip.by_name(name).ok()?;
    let mut out = Vec::new();
    file.read_to_end(&mut out).expect("read entry");
    Some(out)
}

fn save_bytes(signatures: Option<&[u8]>) -> Vec<u8> {
    SaveArchive::from_parts(sample_save(3), signatures.map(<[u8]>::to_vec))
        .with_entry("screenshot.png", vec![0x89, b'P', b'N', b'G'])
        .with_entry("renpy_version", b"7.4.11".to_vec())
        .to_zip_bytes()
        .expect("build archive")
}

#[test]
fn signed_export_verifies_against_the_patched_log() {
    let keys = write_keys_file();
    let engine = Engine::new().with_signer(KeyFileSigner::new(Some(keys.clone())));
    let mut session = engine.open_archive(save_bytes(Some(b"old\n"))).unwrap();
    session.apply_edit("money", EditValue::Integer(5000)).unwrap();

    let archive = session.to_archive_bytes(true).unwrap();
    let _ = std::fs::remove_file(&keys);

    let log = read_zip_entry(&archive, "log").unwrap();
    assert_eq!(log, session.payload());
    let block = String::from_utf8(read_zip_entry(&archive, "signatures").unwrap()).unwrap();
    let line = block.lines().next().unwrap();
    let parts: Vec<&str> = line.split(' ').collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], "signature");

    let public = STANDARD.decode(parts[1]).unwrap();
    let signature = Signature::from_slice(&STANDARD.decode(parts[2]).unwrap()).unwrap();
    VerifyingKey::from_public_key_der(&public)
        .unwrap()
        .verify_prehash(&Sha1::digest(&log), &signature)
        .unwrap();

    assert_eq!(
        read_zip_entry(&archive, "screenshot.png").unwrap(),
        [0x89, b'P', b'N', b'G']
    );
    assert_eq!(read_zip_entry(&archive, "renpy_version").unwrap(), b"7.4.11");
}

#[test]
fn unsigned_export_clears_stale_signatures() {
    let engine = Engine::new().with_signer(NullSigner);
    let mut session = engine.open_archive(save_bytes(Some(b"old\n"))).unwrap();

    let untouched = session.export_patched(false).unwrap();
    assert_eq!(untouched.signatures.as_deref(), Some(&b"old\n"[..]));

    session
        .apply_edit("player_name", EditValue::Text("Lucy".into()))
        .unwrap();
    let exported = session.export_patched(false).unwrap();
    assert_eq!(exported.signatures.as_deref(), Some(&b""[..]));

    let archive = session.to_archive_bytes(false).unwrap();
    assert_eq!(read_zip_entry(&archive, "signatures").unwrap(), b"");
    let reopened = engine.open_archive(&archive).unwrap();
    assert_eq!(
        reopened.variable("player_name").unwrap().value,
        ScalarValue::Text("Lucy".into())
    );
}

#[test]
fn sources_without_signatures_stay_unsigned() {
    let engine = Engine::new().with_signer(NullSigner);
    let mut session = engine.open_archive(save_bytes(None)).unwrap();
    session.apply_edit("ratio", EditValue::Float(1.5)).unwrap();
    let archive = session.to_archive_bytes(false).unwrap();
    assert!(read_zip_entry(&archive, "signatures").is_none());
}

#[test]
fn missing_keys_file_produces_an_empty_block() {
    let missing = temp_output_path("renpy_missing_keys");
    let engine = Engine::new().with_signer(KeyFileSigner::new(Some(missing)));
    let session = engine.open_payload(sample_save(2)).unwrap();
    let exported = session.export_patched(true).unwrap();
    assert_eq!(exported.signatures.as_deref(), Some(&b""[..]));
}

#[test]
fn archive_without_log_is_rejected() {
    let bytes = SaveArchive::from_parts(Vec::new(), None).to_zip_bytes().unwrap();
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("other", zip::write::SimpleFileOptions::default())
        .unwrap();
    let no_log = zip.finish().unwrap().into_inner();

    // An empty log is present but not a pickle.
    let err = Engine::new().open_archive(&bytes).unwrap_err();
    assert_eq!(err.code, CoreErrorCode::Format);
    let err = Engine::new().open_archive(&no_log).unwrap_err();
    assert_eq!(err.code, CoreErrorCode::Archive);
}
