use std::sync::Arc;

use crate::archive::SaveArchive;
use crate::config::EditorConfig;
use crate::patch::{self, EditRecord, EditValue};
use crate::pickle::{BuildOutput, ObjectGraph, OpcodeRecord, OpcodeStream, build_graph, read_stream};
use crate::signing::{KeyFileSigner, Signer};
use crate::store::{ReadOnlyEntry, StoreIndex, VariableEntry, build_index};

use super::error::{CoreError, CoreErrorCode};
use super::types::{ExportedPayload, ScanSummary};

#[derive(Debug, Clone)]
pub struct Engine {
    config: EditorConfig,
    signer: Arc<dyn Signer>,
}

/// One opened save. Owns the payload buffer, the index built from it and the
/// edit history; every edit rebuilds the index and bumps the generation.
#[derive(Debug)]
pub struct Session {
    config: EditorConfig,
    signer: Arc<dyn Signer>,
    archive: Option<SaveArchive>,
    original: Vec<u8>,
    scan: Scan,
    generation: u64,
    history: Vec<EditRecord>,
}

#[derive(Debug)]
struct Scan {
    payload: Vec<u8>,
    stream: OpcodeStream,
    built: BuildOutput,
    index: StoreIndex,
}

impl Scan {
    fn run(payload: Vec<u8>, config: &EditorConfig, generation: u64) -> Result<Self, CoreError> {
        let stream = read_stream(&payload)?;
        let built = build_graph(&stream)?;
        let index = build_index(&stream, &built, config, generation)?;
        log::debug!(
            "scanned payload: protocol {}, {} records, {} memo slots, {} frames",
            stream.protocol,
            stream.records.len(),
            built.memo_len,
            stream.frames.len()
        );
        Ok(Self {
            payload,
            stream,
            built,
            index,
        })
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(EditorConfig::default())
    }

    pub fn with_config(config: EditorConfig) -> Self {
        let signer = Arc::new(KeyFileSigner::new(config.keys_path.clone()));
        Self { config, signer }
    }

    pub fn with_signer<S: Signer + 'static>(mut self, signer: S) -> Self {
        self.signer = Arc::new(signer);
        self
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    /// Open a `.save` archive.
    pub fn open_archive<B: AsRef<[u8]>>(&self, bytes: B) -> Result<Session, CoreError> {
        let archive = SaveArchive::from_zip_bytes(bytes.as_ref(), &self.config)?;
        let payload = archive.log.clone();
        self.open(payload, Some(archive))
    }

    /// Open a bare pickle payload (the contents of a `log` entry).
    pub fn open_payload<B: AsRef<[u8]>>(&self, bytes: B) -> Result<Session, CoreError> {
        self.open(bytes.as_ref().to_vec(), None)
    }

    fn open(&self, payload: Vec<u8>, archive: Option<SaveArchive>) -> Result<Session, CoreError> {
        let original = payload.clone();
        let scan = Scan::run(payload, &self.config, 0)?;
        Ok(Session {
            config: self.config.clone(),
            signer: Arc::clone(&self.signer),
            archive,
            original,
            scan,
            generation: 0,
            history: Vec::new(),
        })
    }
}

impl Session {
    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn archive(&self) -> Option<&SaveArchive> {
        self.archive.as_ref()
    }

    pub fn variables(&self) -> &[VariableEntry] {
        &self.scan.index.variables
    }

    pub fn read_only(&self) -> &[ReadOnlyEntry] {
        &self.scan.index.read_only
    }

    pub fn variable(&self, name: &str) -> Option<&VariableEntry> {
        self.scan.index.variable(name)
    }

    pub fn records(&self) -> &[OpcodeRecord] {
        &self.scan.stream.records
    }

    pub fn stream(&self) -> &OpcodeStream {
        &self.scan.stream
    }

    pub fn graph(&self) -> &ObjectGraph {
        &self.scan.built.graph
    }

    pub fn protocol(&self) -> u8 {
        self.scan.stream.protocol
    }

    pub fn payload(&self) -> &[u8] {
        &self.scan.payload
    }

    pub fn original_payload(&self) -> &[u8] {
        &self.original
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn history(&self) -> &[EditRecord] {
        &self.history
    }

    pub fn is_modified(&self) -> bool {
        self.scan.payload != self.original
    }

    pub fn summary(&self) -> ScanSummary {
        ScanSummary {
            protocol: self.scan.stream.protocol,
            payload_len: self.scan.payload.len(),
            record_count: self.scan.stream.records.len(),
            memo_count: self.scan.built.memo_len,
            frame_count: self.scan.stream.frames.len(),
            variable_count: self.scan.index.variables.len(),
            read_only_count: self.scan.index.read_only.len(),
            generation: self.generation,
            edit_count: self.history.len(),
        }
    }

    /// Replace the value of the variable called `name` in the current index.
    pub fn apply_edit(
        &mut self,
        name: &str,
        value: EditValue,
    ) -> Result<&[VariableEntry], CoreError> {
        let entry = self
            .variable(name)
            .cloned()
            .ok_or_else(|| CoreError::not_found(name))?;
        self.apply_to_entry(&entry, value)
    }

    /// Replace the value behind `entry`, which must come from the current
    /// generation of the index.
    pub fn apply_to_entry(
        &mut self,
        entry: &VariableEntry,
        value: EditValue,
    ) -> Result<&[VariableEntry], CoreError> {
        if entry.generation != self.generation {
            return Err(CoreError::new(
                CoreErrorCode::NotFound,
                format!(
                    "entry for '{}' is from generation {} but the index is at {}; re-scan and retry",
                    entry.name, entry.generation, self.generation
                ),
            ));
        }
        let edit = patch::plan_edit(&self.scan.payload, &self.scan.stream, entry, &value)?;
        if entry.shared {
            log::warn!(
                "'{}' shares memo slot {} with other references; they all see the new value",
                entry.name,
                entry.memo_ordinal.unwrap_or_default()
            );
        }
        self.commit(edit)?;
        log::info!(
            "set {} ({} -> {} bytes)",
            entry.name,
            entry.range.len(),
            self.history.last().map(|e| e.new_bytes.len()).unwrap_or_default()
        );
        Ok(self.variables())
    }

    /// Re-apply an edit recorded against the same payload, e.g. from another
    /// session on the same save. The record is checked against the current
    /// stream before anything is spliced.
    pub fn apply_record(&mut self, edit: &EditRecord) -> Result<&[VariableEntry], CoreError> {
        let checked = patch::revalidate(&self.scan.stream, edit)?;
        self.commit(checked)?;
        log::info!("replayed edit of {}", edit.variable_name);
        Ok(self.variables())
    }

    /// Revert the most recent edit. Returns `None` when there is nothing to
    /// undo.
    pub fn undo(&mut self) -> Result<Option<EditRecord>, CoreError> {
        let Some(edit) = self.history.last().cloned() else {
            return Ok(None);
        };
        let mut payload = self.scan.payload.clone();
        patch::revert(&mut payload, &edit)?;
        self.rescan(payload)?;
        self.history.pop();
        log::info!("undid edit of {}", edit.variable_name);
        Ok(Some(edit))
    }

    fn commit(&mut self, edit: EditRecord) -> Result<(), CoreError> {
        let mut payload = self.scan.payload.clone();
        patch::apply(&mut payload, &edit)?;
        self.rescan(payload)?;
        self.history.push(edit);
        Ok(())
    }

    /// Rebuild everything from `payload`; the session is left untouched if
    /// the new payload does not scan or changes the memo layout.
    fn rescan(&mut self, payload: Vec<u8>) -> Result<(), CoreError> {
        let generation = self.generation + 1;
        let scan = Scan::run(payload, &self.config, generation)?;
        if scan.built.memo_len != self.scan.built.memo_len {
            return Err(CoreError::format(format!(
                "edit changed the memo table from {} to {} slots",
                self.scan.built.memo_len, scan.built.memo_len
            )));
        }
        self.scan = scan;
        self.generation = generation;
        Ok(())
    }

    /// The payload to write back, with a `signatures` block when asked for.
    ///
    /// Without signing, an untouched payload keeps its original signatures;
    /// a modified one gets an empty block if the source had the entry, since
    /// the old signatures no longer match.
    pub fn export_patched(&self, request_signing: bool) -> Result<ExportedPayload, CoreError> {
        let log = self.scan.payload.clone();
        let original_signatures = self.archive.as_ref().and_then(|a| a.signatures.clone());
        let signatures = if request_signing {
            Some(self.signer.sign(&log)?)
        } else if !self.is_modified() {
            original_signatures
        } else {
            original_signatures.map(|_| Vec::new())
        };
        Ok(ExportedPayload { log, signatures })
    }

    /// A complete `.save` archive holding the exported payload.
    pub fn to_archive_bytes(&self, request_signing: bool) -> Result<Vec<u8>, CoreError> {
        let exported = self.export_patched(request_signing)?;
        match &self.archive {
            Some(archive) => archive.write_with(&exported.log, exported.signatures.as_deref()),
            None => SaveArchive::from_parts(exported.log, exported.signatures).to_zip_bytes(),
        }
    }
}
