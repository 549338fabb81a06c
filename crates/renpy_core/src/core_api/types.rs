use serde::{Deserialize, Serialize};

/// Payload bytes ready to be written back into an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedPayload {
    pub log: Vec<u8>,
    /// Contents of the `signatures` entry; `None` drops the entry.
    pub signatures: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanSummary {
    pub protocol: u8,
    pub payload_len: usize,
    pub record_count: usize,
    pub memo_count: usize,
    pub frame_count: usize,
    pub variable_count: usize,
    pub read_only_count: usize,
    pub generation: u64,
    pub edit_count: usize,
}
