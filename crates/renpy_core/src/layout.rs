use serde::{Deserialize, Serialize};

use crate::core_api::{CoreError, CoreErrorCode};

/// Half-open byte range `[start, end)` into a payload buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

impl ByteRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }

    pub fn encloses(&self, other: ByteRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Shift a range that lies at or after `pivot` by a signed length delta.
    pub fn shifted(&self, pivot: usize, delta: isize) -> Option<Self> {
        if self.start < pivot {
            return Some(*self);
        }
        Some(Self {
            start: self.start.checked_add_signed(delta)?,
            end: self.end.checked_add_signed(delta)?,
        })
    }
}

/// Check that `ranges` tile `[0, total_len)` with no gaps, overlaps or empty
/// pieces.
pub fn validate_tiling<I>(ranges: I, total_len: usize) -> Result<(), CoreError>
where
    I: IntoIterator<Item = ByteRange>,
{
    let mut expected = 0usize;
    let mut seen_any = false;
    for (index, range) in ranges.into_iter().enumerate() {
        seen_any = true;
        if range.start != expected {
            return Err(CoreError::new(
                CoreErrorCode::Format,
                format!(
                    "layout gap/overlap around record {index}: expected start {expected}, got {}",
                    range.start
                ),
            ));
        }
        if range.end <= range.start {
            return Err(CoreError::new(
                CoreErrorCode::Format,
                format!(
                    "invalid record range {index}: {}..{}",
                    range.start, range.end
                ),
            ));
        }
        expected = range.end;
    }

    if !seen_any {
        return Err(CoreError::new(
            CoreErrorCode::Format,
            "stream layout must contain at least one record",
        ));
    }

    if expected != total_len {
        return Err(CoreError::new(
            CoreErrorCode::Format,
            format!("layout does not cover payload: ended at {expected}, payload length {total_len}"),
        ));
    }

    Ok(())
}
