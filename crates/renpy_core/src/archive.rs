use std::io::{Cursor, Read, Write};

use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::config::EditorConfig;
use crate::core_api::{CoreError, CoreErrorCode};

/// A save archive: the pickled `log`, its optional `signatures`, and the
/// untouched remainder of the ZIP they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveArchive {
    pub log: Vec<u8>,
    pub signatures: Option<Vec<u8>>,
    log_entry: String,
    signatures_entry: String,
    source: Option<Vec<u8>>,
    extra: Vec<(String, Vec<u8>)>,
}

fn archive_error(context: &str, e: ZipError) -> CoreError {
    CoreError::new(CoreErrorCode::Archive, format!("{context}: {e}"))
}

fn io_error(context: &str, e: std::io::Error) -> CoreError {
    CoreError::new(CoreErrorCode::Io, format!("{context}: {e}"))
}

impl SaveArchive {
    pub fn from_zip_bytes(bytes: &[u8], config: &EditorConfig) -> Result<Self, CoreError> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| archive_error("not a save archive", e))?;
        log::debug!(
            "archive entries: {}",
            zip.file_names().collect::<Vec<_>>().join(", ")
        );

        let log = match read_entry(&mut zip, &config.log_entry)? {
            Some(log) => log,
            None => {
                return Err(CoreError::new(
                    CoreErrorCode::Archive,
                    format!("archive has no '{}' entry", config.log_entry),
                ));
            }
        };
        let signatures = read_entry(&mut zip, &config.signatures_entry)?;

        Ok(Self {
            log,
            signatures,
            log_entry: config.log_entry.clone(),
            signatures_entry: config.signatures_entry.clone(),
            source: Some(bytes.to_vec()),
            extra: Vec::new(),
        })
    }

    /// An archive assembled from loose parts rather than read from disk.
    pub fn from_parts(log: Vec<u8>, signatures: Option<Vec<u8>>) -> Self {
        let config = EditorConfig::default();
        Self {
            log,
            signatures,
            log_entry: config.log_entry,
            signatures_entry: config.signatures_entry,
            source: None,
            extra: Vec::new(),
        }
    }

    /// Add an entry written after `log` and `signatures`.
    pub fn with_entry(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.extra.push((name.into(), bytes));
        self
    }

    pub fn log_entry(&self) -> &str {
        &self.log_entry
    }

    pub fn has_signatures(&self) -> bool {
        self.signatures.is_some()
    }

    /// Serialize with the stored `log` and `signatures`.
    pub fn to_zip_bytes(&self) -> Result<Vec<u8>, CoreError> {
        self.write_with(&self.log, self.signatures.as_deref())
    }

    /// Write a new archive in which `log` and `signatures` replace the stored
    /// entries and every other entry of the source is copied raw, keeping its
    /// compression. `None` drops the signatures entry.
    pub fn write_with(&self, log: &[u8], signatures: Option<&[u8]>) -> Result<Vec<u8>, CoreError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let mut wrote_log = false;
        let mut wrote_signatures = false;

        if let Some(source) = &self.source {
            let mut zip = ZipArchive::new(Cursor::new(source.as_slice()))
                .map_err(|e| archive_error("failed to reopen source archive", e))?;
            for index in 0..zip.len() {
                let file = zip
                    .by_index_raw(index)
                    .map_err(|e| archive_error("failed to read source entry", e))?;
                let name = file.name().to_string();
                if name == self.log_entry {
                    drop(file);
                    write_entry(&mut writer, &name, log)?;
                    wrote_log = true;
                } else if name == self.signatures_entry {
                    drop(file);
                    if let Some(sig) = signatures {
                        write_entry(&mut writer, &name, sig)?;
                    }
                    wrote_signatures = true;
                } else {
                    writer
                        .raw_copy_file(file)
                        .map_err(|e| archive_error(&format!("failed to copy '{name}'"), e))?;
                }
            }
        }

        if !wrote_log {
            write_entry(&mut writer, &self.log_entry, log)?;
        }
        if let (false, Some(sig)) = (wrote_signatures, signatures) {
            write_entry(&mut writer, &self.signatures_entry, sig)?;
        }
        for (name, bytes) in &self.extra {
            write_entry(&mut writer, name, bytes)?;
        }

        let cursor = writer
            .finish()
            .map_err(|e| archive_error("failed to finish archive", e))?;
        Ok(cursor.into_inner())
    }
}

fn read_entry(
    zip: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Option<Vec<u8>>, CoreError> {
    let mut file = match zip.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(archive_error(&format!("failed to open '{name}'"), e)),
    };
    let mut bytes = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut bytes)
        .map_err(|e| io_error(&format!("failed to read '{name}'"), e))?;
    log::debug!("read archive entry '{name}' ({} bytes)", bytes.len());
    Ok(Some(bytes))
}

fn write_entry(
    writer: &mut ZipWriter<Cursor<Vec<u8>>>,
    name: &str,
    bytes: &[u8],
) -> Result<(), CoreError> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    writer
        .start_file(name, options)
        .map_err(|e| archive_error(&format!("failed to start '{name}'"), e))?;
    writer
        .write_all(bytes)
        .map_err(|e| io_error(&format!("failed to write '{name}'"), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_log_is_an_archive_error() {
        let bytes = SaveArchive::from_parts(b"N.".to_vec(), None)
            .to_zip_bytes()
            .unwrap();
        let config = EditorConfig {
            log_entry: "nope".to_string(),
            ..EditorConfig::default()
        };
        let err = SaveArchive::from_zip_bytes(&bytes, &config).unwrap_err();
        assert_eq!(err.code, CoreErrorCode::Archive);
        let garbage = SaveArchive::from_zip_bytes(b"not a zip", &EditorConfig::default());
        assert_eq!(garbage.unwrap_err().code, CoreErrorCode::Archive);
    }

    #[test]
    fn rewrite_replaces_log_and_keeps_other_entries() {
        let bytes = SaveArchive::from_parts(b"N.".to_vec(), Some(b"old".to_vec()))
            .with_entry("renpy_version", b"8.1.3".to_vec())
            .to_zip_bytes()
            .unwrap();
        let archive = SaveArchive::from_zip_bytes(&bytes, &EditorConfig::default()).unwrap();
        assert_eq!(archive.signatures.as_deref(), Some(&b"old"[..]));

        let rewritten = archive.write_with(b"K\x01.", None).unwrap();
        let mut zip = ZipArchive::new(Cursor::new(rewritten.as_slice())).unwrap();
        let names: Vec<String> = zip.file_names().map(str::to_string).collect();
        assert!(names.contains(&"renpy_version".to_string()));
        assert!(!names.contains(&"signatures".to_string()));
        let mut log = Vec::new();
        zip.by_name("log").unwrap().read_to_end(&mut log).unwrap();
        assert_eq!(log, b"K\x01.");
    }
}
