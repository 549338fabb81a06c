use crate::core_api::CoreError;

/// Read cursor over a pickle payload. Fixed-width integers are little-endian;
/// `BINFLOAT` is the one big-endian field in the format.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn read_u8(&mut self) -> Result<u8, CoreError> {
        self.ensure(1)?;
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u16(&mut self) -> Result<u16, CoreError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, CoreError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, CoreError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, CoreError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_f64_be(&mut self) -> Result<f64, CoreError> {
        Ok(f64::from_be_bytes(self.read_array()?))
    }

    /// Read `n` bytes without copying.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CoreError> {
        self.ensure(n)?;
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read a length-prefixed payload whose declared length came from the
    /// stream. The length is checked against the remaining bytes before any
    /// allocation so a corrupt prefix cannot trigger a huge read.
    pub fn read_counted(&mut self, declared: u64, prefix_at: usize) -> Result<&'a [u8], CoreError> {
        let have = self.remaining() as u64;
        if declared > have {
            return Err(CoreError::format(format!(
                "length prefix at offset {prefix_at:#x} declares {declared} bytes but only {have} remain"
            )));
        }
        self.read_bytes(declared as usize)
    }

    /// Read up to and including the next `\n`, returning the line without it.
    pub fn read_line(&mut self) -> Result<&'a [u8], CoreError> {
        let start = self.pos;
        let Some(len) = self.data[start..].iter().position(|&b| b == b'\n') else {
            return Err(CoreError::format(format!(
                "unterminated text argument starting at offset {start:#x}"
            )));
        };
        self.pos = start + len + 1;
        Ok(&self.data[start..start + len])
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CoreError> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn ensure(&self, n: usize) -> Result<(), CoreError> {
        if self.pos + n > self.data.len() {
            return Err(CoreError::format(format!(
                "unexpected end of payload at offset {:#x} (need {n} bytes, have {})",
                self.pos,
                self.remaining()
            )));
        }
        Ok(())
    }
}
