//! Save signatures in the format Ren'Py's token check reads: one line per
//! key, `signature <public key> <signature>`, both base64 DER.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use p256::SecretKey;
use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::{DecodePrivateKey, EncodePublicKey};
use sha1::{Digest, Sha1};

use crate::core_api::{CoreError, CoreErrorCode};

pub const KEYS_FILE_NAME: &str = "security_keys.txt";

pub trait Signer: fmt::Debug + Send + Sync {
    /// Produce the `signatures` entry for `payload`. An empty block means
    /// "unsigned".
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, CoreError>;
}

/// Never signs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSigner;

impl Signer for NullSigner {
    fn sign(&self, _payload: &[u8]) -> Result<Vec<u8>, CoreError> {
        Ok(Vec::new())
    }
}

/// Signs with the keys in `security_keys.txt`, found at an explicit path or
/// in the per-user token directories.
#[derive(Debug, Default, Clone)]
pub struct KeyFileSigner {
    explicit: Option<PathBuf>,
}

impl KeyFileSigner {
    pub fn new(explicit: Option<PathBuf>) -> Self {
        Self { explicit }
    }

    pub fn keys_path(&self) -> Option<PathBuf> {
        find_keys_file(self.explicit.as_deref())
    }
}

impl Signer for KeyFileSigner {
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, CoreError> {
        let Some(path) = self.keys_path() else {
            log::warn!("no {KEYS_FILE_NAME} found; writing an empty signature block");
            return Ok(Vec::new());
        };
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::warn!("{} does not exist; writing an empty signature block", path.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(CoreError::new(
                    CoreErrorCode::Signing,
                    format!("failed to read {}: {e}", path.display()),
                ));
            }
        };
        log::debug!("signing with keys from {}", path.display());
        Ok(signatures_for(&text, payload))
    }
}

/// Candidate token directories, in lookup order.
pub fn token_dirs() -> Vec<PathBuf> {
    let mut dirs_out = Vec::new();
    if let Some(home) = dirs::home_dir() {
        dirs_out.push(home.join(".renpy").join("tokens"));
        dirs_out.push(home.join("Library").join("RenPy").join("tokens"));
    }
    if let Some(config) = dirs::config_dir() {
        dirs_out.push(config.join("RenPy").join("tokens"));
    }
    if let Some(local) = dirs::data_local_dir() {
        dirs_out.push(local.join("RenPy").join("tokens"));
    }
    if let Some(data) = dirs::data_dir() {
        dirs_out.push(data.join("renpy").join("tokens"));
    }
    if let Some(config) = dirs::config_dir() {
        dirs_out.push(config.join("renpy").join("tokens"));
    }
    dirs_out.dedup();
    dirs_out
}

/// Resolve the keys file. An explicit path wins even if it does not exist, so
/// the caller sees it named in the log rather than a silently different file.
pub fn find_keys_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    token_dirs()
        .into_iter()
        .map(|dir| dir.join(KEYS_FILE_NAME))
        .find(|path| path.is_file())
}

/// DER private keys from `signing-key <base64>` lines.
pub fn parse_signing_keys(text: &str) -> Vec<Vec<u8>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("signing-key"), Some(b64)) => match STANDARD.decode(b64) {
                    Ok(der) => Some(der),
                    Err(e) => {
                        log::warn!("skipping signing key with bad base64: {e}");
                        None
                    }
                },
                _ => None,
            }
        })
        .collect()
}

fn decode_secret_key(der: &[u8]) -> Option<SecretKey> {
    SecretKey::from_sec1_der(der)
        .ok()
        .or_else(|| SecretKey::from_pkcs8_der(der).ok())
}

/// One `signature` line for `payload`, or `None` if the key is unusable.
pub fn signature_line(der: &[u8], payload: &[u8]) -> Option<String> {
    let Some(secret) = decode_secret_key(der) else {
        log::warn!("skipping signing key that is not a P-256 private key");
        return None;
    };
    let public_der = match secret.public_key().to_public_key_der() {
        Ok(doc) => doc,
        Err(e) => {
            log::warn!("skipping signing key whose public key cannot be encoded: {e}");
            return None;
        }
    };
    let digest = Sha1::digest(payload);
    let signing_key = SigningKey::from(&secret);
    let signature: Signature = match signing_key.sign_prehash(&digest) {
        Ok(sig) => sig,
        Err(e) => {
            log::warn!("signing failed: {e}");
            return None;
        }
    };
    Some(format!(
        "signature {} {}",
        STANDARD.encode(public_der.as_bytes()),
        STANDARD.encode(signature.to_bytes())
    ))
}

/// Full `signatures` block for the keys listed in `keys_text`.
pub fn signatures_for(keys_text: &str, payload: &[u8]) -> Vec<u8> {
    let keys = parse_signing_keys(keys_text);
    if keys.is_empty() {
        log::warn!("no usable signing keys; writing an empty signature block");
    }
    let mut out = String::new();
    for der in keys {
        if let Some(line) = signature_line(&der, payload) {
            out.push_str(&line);
            out.push('\n');
        }
    }
    out.into_bytes()
}
