//! Terminal records, the connection points of a process group.

use crate::{
    layout::LayoutWriter,
    manifest::{TerminalManifest, TerminalType},
    record,
};
use psys_commons::{PsysError, PsysResult};
use std::fmt;

pub const TERMINAL_SIZE: usize = 16;

mod field {
    pub const PARENT_OFFSET: usize = 0;
    pub const SIZE: usize = 2;
    pub const TERMINAL_TYPE: usize = 4;
    pub const MANIFEST_INDEX: usize = 5;
    pub const TERMINAL_INDEX: usize = 6;
    pub const BUFFER_STATE: usize = 7;
    pub const BUFFER: usize = 8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BufferState {
    Null = 0,
    Undefined = 1,
    Empty = 2,
    Nonempty = 3,
    Full = 4,
}

impl BufferState {
    pub const fn from_raw(raw: u8) -> Option<Self> {
        return match raw {
            0 => Some(BufferState::Null),
            1 => Some(BufferState::Undefined),
            2 => Some(BufferState::Empty),
            3 => Some(BufferState::Nonempty),
            4 => Some(BufferState::Full),
            _ => None,
        };
    }
}

/// Write the terminal record starting at `start`, owned by the group record at `group`.
pub(crate) fn layout_terminal(
    writer: &mut LayoutWriter,
    start: usize,
    group: usize,
    manifest: &TerminalManifest,
    manifest_index: usize,
    terminal_index: usize,
) -> PsysResult<()> {
    let parent_offset =
        i16::try_from(group as isize - start as isize).map_err(|_| PsysError::CapacityExceeded)?;
    let manifest_index = u8::try_from(manifest_index).map_err(|_| PsysError::CapacityExceeded)?;
    let terminal_index = u8::try_from(terminal_index).map_err(|_| PsysError::CapacityExceeded)?;
    writer.put_fill(start, TERMINAL_SIZE, 0)?;
    writer.put_i16(start + field::PARENT_OFFSET, parent_offset)?;
    writer.put_u16(start + field::SIZE, TERMINAL_SIZE as u16)?;
    writer.put_u8(start + field::TERMINAL_TYPE, manifest.terminal_type as u8)?;
    writer.put_u8(start + field::MANIFEST_INDEX, manifest_index)?;
    writer.put_u8(start + field::TERMINAL_INDEX, terminal_index)?;
    writer.put_u8(start + field::BUFFER_STATE, BufferState::Null as u8)?;
    return Ok(());
}

pub(crate) fn set_buffer_at(arena: &mut [u8], at: usize, buffer: u32) -> PsysResult<()> {
    return record::write_u32(arena, at + field::BUFFER, buffer);
}

pub(crate) fn set_buffer_state_at(
    arena: &mut [u8],
    at: usize,
    state: BufferState,
) -> PsysResult<()> {
    return record::write_u8(arena, at + field::BUFFER_STATE, state as u8);
}

/// Read view of a terminal record inside a group arena.
#[derive(Clone, Copy)]
pub struct Terminal<'a> {
    arena: &'a [u8],
    offset: usize,
}

impl<'a> Terminal<'a> {
    pub fn new(arena: &'a [u8], offset: usize) -> Self {
        return Terminal { arena, offset };
    }

    pub fn offset(&self) -> usize {
        return self.offset;
    }

    pub fn size(&self) -> usize {
        return record::read_u16(self.arena, self.offset + field::SIZE).map_or(0, usize::from);
    }

    /// Arena offset of the owning group, `None` while detached.
    pub fn parent(&self) -> Option<usize> {
        let relative = record::read_i16(self.arena, self.offset + field::PARENT_OFFSET)?;
        if relative == 0 {
            return None;
        }
        return self.offset.checked_add_signed(relative as isize);
    }

    pub fn terminal_type(&self) -> Option<TerminalType> {
        return record::read_u8(self.arena, self.offset + field::TERMINAL_TYPE)
            .and_then(TerminalType::from_raw);
    }

    pub fn manifest_index(&self) -> u8 {
        return record::read_u8(self.arena, self.offset + field::MANIFEST_INDEX).unwrap_or(u8::MAX);
    }

    pub fn terminal_index(&self) -> u8 {
        return record::read_u8(self.arena, self.offset + field::TERMINAL_INDEX).unwrap_or(u8::MAX);
    }

    pub fn buffer_state(&self) -> BufferState {
        return record::read_u8(self.arena, self.offset + field::BUFFER_STATE)
            .and_then(BufferState::from_raw)
            .unwrap_or(BufferState::Null);
    }

    /// Buffer address under the legacy protocol, terminal index under the PPG protocol.
    pub fn buffer(&self) -> u32 {
        return record::read_u32(self.arena, self.offset + field::BUFFER).unwrap_or(0);
    }

    pub fn is_data(&self) -> bool {
        return self.terminal_type().map_or(false, TerminalType::is_data);
    }
}

impl fmt::Display for Terminal<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return writeln!(
            f,
            "terminal {:#06x}: index {} (manifest {}), {:?}, {:?}, buffer {:#010x}",
            self.offset,
            self.terminal_index(),
            self.manifest_index(),
            self.terminal_type(),
            self.buffer_state(),
            self.buffer()
        );
    }
}
