//! Cursor based writer shared by the size and populate passes.
//!
//! A record is laid out by one walk function that takes a [`LayoutWriter`]. Run with
//! [`LayoutWriter::measure`] the walk only advances the cursor and yields the record
//! size. Run with [`LayoutWriter::populate`] over a buffer of exactly that size, the
//! same walk also stores every field. [`LayoutWriter::finish`] checks that the cursor
//! ended where the buffer ends.

use crate::record::{self, align_up};
use log::error;
use psys_commons::{PsysError, PsysResult};

/// Alignment of every variable block and of record totals.
pub const BLOCK_ALIGNMENT: usize = 4;

pub struct LayoutWriter<'buf> {
    target: Option<&'buf mut [u8]>,
    cursor: usize,
}

impl LayoutWriter<'static> {
    pub fn measure() -> Self {
        return LayoutWriter {
            target: None,
            cursor: 0,
        };
    }
}

impl<'buf> LayoutWriter<'buf> {
    pub fn populate(buffer: &'buf mut [u8]) -> Self {
        return LayoutWriter {
            target: Some(buffer),
            cursor: 0,
        };
    }

    pub fn position(&self) -> usize {
        return self.cursor;
    }

    pub fn align(&mut self, alignment: usize) {
        self.cursor = align_up(self.cursor, alignment);
    }

    /// Reserve `len` bytes starting at the next multiple of `alignment`, returns the start.
    pub fn reserve(&mut self, len: usize, alignment: usize) -> usize {
        self.align(alignment);
        let start = self.cursor;
        self.cursor += len;
        return start;
    }

    pub fn put_u8(&mut self, offset: usize, value: u8) -> PsysResult<()> {
        return match self.target.as_deref_mut() {
            Some(buffer) => record::write_u8(buffer, offset, value),
            None => Ok(()),
        };
    }

    pub fn put_u16(&mut self, offset: usize, value: u16) -> PsysResult<()> {
        return match self.target.as_deref_mut() {
            Some(buffer) => record::write_u16(buffer, offset, value),
            None => Ok(()),
        };
    }

    pub fn put_i16(&mut self, offset: usize, value: i16) -> PsysResult<()> {
        return match self.target.as_deref_mut() {
            Some(buffer) => record::write_i16(buffer, offset, value),
            None => Ok(()),
        };
    }

    pub fn put_u32(&mut self, offset: usize, value: u32) -> PsysResult<()> {
        return match self.target.as_deref_mut() {
            Some(buffer) => record::write_u32(buffer, offset, value),
            None => Ok(()),
        };
    }

    pub fn put_u64(&mut self, offset: usize, value: u64) -> PsysResult<()> {
        return match self.target.as_deref_mut() {
            Some(buffer) => record::write_u64(buffer, offset, value),
            None => Ok(()),
        };
    }

    pub fn put_u128(&mut self, offset: usize, value: u128) -> PsysResult<()> {
        return match self.target.as_deref_mut() {
            Some(buffer) => record::write_u128(buffer, offset, value),
            None => Ok(()),
        };
    }

    pub fn put_fill(&mut self, offset: usize, len: usize, value: u8) -> PsysResult<()> {
        return match self.target.as_deref_mut() {
            Some(buffer) => record::fill(buffer, offset, len, value),
            None => Ok(()),
        };
    }

    /// Bytes of an already reserved region, `None` while measuring.
    pub fn region_mut(&mut self, start: usize, len: usize) -> PsysResult<Option<&mut [u8]>> {
        let buffer = match self.target.as_deref_mut() {
            Some(buffer) => buffer,
            None => return Ok(None),
        };
        let end = start.checked_add(len).ok_or(PsysError::InvalidWrite)?;
        return buffer
            .get_mut(start..end)
            .map(Some)
            .ok_or(PsysError::InvalidWrite);
    }

    /// Total size laid out. When populating this must match the buffer exactly.
    pub fn finish(self) -> PsysResult<usize> {
        let written = self.cursor;
        if let Some(buffer) = self.target {
            if buffer.len() != written {
                error!(
                    "layout walk wrote {} bytes into a buffer sized {}",
                    written,
                    buffer.len()
                );
                return Err(PsysError::LayoutMismatch {
                    expected: buffer.len(),
                    written,
                });
            }
        }
        return Ok(written);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(writer: &mut LayoutWriter, entries: &[u16]) -> PsysResult<()> {
        let header = writer.reserve(2, 1);
        writer.put_u8(header, entries.len() as u8)?;
        let table = writer.reserve(entries.len() * 2, BLOCK_ALIGNMENT);
        for (index, entry) in entries.iter().enumerate() {
            writer.put_u16(table + 2 * index, *entry)?;
        }
        writer.align(BLOCK_ALIGNMENT);
        return Ok(());
    }

    #[test]
    fn measure_then_populate() {
        let entries = [7u16, 9, 11];
        let mut measure = LayoutWriter::measure();
        walk(&mut measure, &entries).expect("measuring should succeed");
        let size = measure.finish().expect("measure finish should succeed");
        assert_eq!(12, size);

        let mut buffer = vec![0u8; size];
        let mut writer = LayoutWriter::populate(&mut buffer);
        walk(&mut writer, &entries).expect("populating should succeed");
        assert_eq!(Ok(size), writer.finish());
        assert_eq!(3, buffer[0]);
        assert_eq!(Some(11), record::read_u16(&buffer, 8));
    }

    #[test]
    fn mismatch_is_reported() {
        let mut buffer = vec![0u8; 16];
        let mut writer = LayoutWriter::populate(&mut buffer);
        walk(&mut writer, &[1]).expect("populating should succeed");
        assert_eq!(
            Err(PsysError::LayoutMismatch {
                expected: 16,
                written: 8
            }),
            writer.finish()
        );
    }

    #[test]
    fn write_outside_buffer() {
        let mut buffer = vec![0u8; 4];
        let mut writer = LayoutWriter::populate(&mut buffer);
        assert_eq!(Err(PsysError::InvalidWrite), walk(&mut writer, &[1, 2, 3]));
        assert_eq!(
            Err(PsysError::InvalidWrite),
            writer.region_mut(2, 4).map(|region| region.is_some())
        );
    }
}
