//! Buffer sets carry the per frame buffer addresses of a group under the PPG protocol.

use crate::{
    bitmap::KernelBitmap,
    layout::{LayoutWriter, BLOCK_ALIGNMENT},
    record,
    terminal::Terminal,
};
use itertools::Itertools;
use log::{debug, warn};
use psys_commons::{PsysError, PsysResult, VAddress};
use std::fmt;

pub const BUFFER_SET_HEADER_SIZE: usize = 48;

mod field {
    pub const TOKEN: usize = 0;
    pub const KERNEL_ENABLE_BITMAP: usize = 8;
    pub const TERMINAL_ENABLE_BITMAP: usize = 24;
    pub const ROUTING_ENABLE_BITMAP: usize = 28;
    pub const RBM: usize = 32;
    pub const IPU_VIRTUAL_ADDRESS: usize = 36;
    pub const PROCESS_GROUP_HANDLE: usize = 40;
    pub const TERMINAL_COUNT: usize = 44;
    pub const FRAME_COUNTER: usize = 46;
}

fn layout_buffer_set(
    writer: &mut LayoutWriter,
    process_group_handle: VAddress,
    terminal_count: u16,
) -> PsysResult<()> {
    let header = writer.reserve(BUFFER_SET_HEADER_SIZE, BLOCK_ALIGNMENT);
    let slots = writer.reserve(4 * terminal_count as usize, BLOCK_ALIGNMENT);
    writer.align(BLOCK_ALIGNMENT);
    writer.put_fill(header, BUFFER_SET_HEADER_SIZE, 0)?;
    writer.put_fill(slots, 4 * terminal_count as usize, 0)?;
    writer.put_u32(header + field::PROCESS_GROUP_HANDLE, process_group_handle.0)?;
    writer.put_u16(header + field::TERMINAL_COUNT, terminal_count)?;
    return Ok(());
}

pub fn buffer_set_sizeof(terminal_count: u16) -> usize {
    let mut writer = LayoutWriter::measure();
    // measuring never writes, so the walk cannot fail
    let _ = layout_buffer_set(&mut writer, VAddress::NULL, terminal_count);
    return writer.position();
}

#[derive(Clone, PartialEq)]
pub struct BufferSet {
    buffer: Vec<u8>,
}

impl BufferSet {
    pub fn create(process_group_handle: VAddress, terminal_count: u16) -> PsysResult<Self> {
        let size = buffer_set_sizeof(terminal_count);
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(size)
            .map_err(|_| PsysError::OutOfMemory)?;
        buffer.resize(size, 0);
        let mut writer = LayoutWriter::populate(&mut buffer);
        layout_buffer_set(&mut writer, process_group_handle, terminal_count)?;
        writer.finish()?;
        debug!(
            "created buffer set for group {:#010x} with {} terminals",
            process_group_handle.0, terminal_count
        );
        return Ok(BufferSet { buffer });
    }

    pub fn as_bytes(&self) -> &[u8] {
        return &self.buffer;
    }

    pub fn token(&self) -> u64 {
        return record::read_u64(&self.buffer, field::TOKEN).unwrap_or(0);
    }

    pub fn set_token(&mut self, token: u64) -> PsysResult<()> {
        return record::write_u64(&mut self.buffer, field::TOKEN, token);
    }

    pub fn kernel_enable_bitmap(&self) -> KernelBitmap {
        return record::read_u128(&self.buffer, field::KERNEL_ENABLE_BITMAP)
            .map_or(KernelBitmap::EMPTY, KernelBitmap);
    }

    pub fn set_kernel_enable_bitmap(&mut self, bitmap: KernelBitmap) -> PsysResult<()> {
        return record::write_u128(&mut self.buffer, field::KERNEL_ENABLE_BITMAP, bitmap.0);
    }

    pub fn terminal_enable_bitmap(&self) -> u32 {
        return record::read_u32(&self.buffer, field::TERMINAL_ENABLE_BITMAP).unwrap_or(0);
    }

    pub fn set_terminal_enable_bitmap(&mut self, bitmap: u32) -> PsysResult<()> {
        return record::write_u32(&mut self.buffer, field::TERMINAL_ENABLE_BITMAP, bitmap);
    }

    pub fn routing_enable_bitmap(&self) -> u32 {
        return record::read_u32(&self.buffer, field::ROUTING_ENABLE_BITMAP).unwrap_or(0);
    }

    pub fn set_routing_enable_bitmap(&mut self, bitmap: u32) -> PsysResult<()> {
        return record::write_u32(&mut self.buffer, field::ROUTING_ENABLE_BITMAP, bitmap);
    }

    pub fn rbm(&self) -> u32 {
        return record::read_u32(&self.buffer, field::RBM).unwrap_or(0);
    }

    pub fn set_rbm(&mut self, rbm: u32) -> PsysResult<()> {
        return record::write_u32(&mut self.buffer, field::RBM, rbm);
    }

    pub fn ipu_virtual_address(&self) -> VAddress {
        return record::read_u32(&self.buffer, field::IPU_VIRTUAL_ADDRESS)
            .map_or(VAddress::NULL, VAddress);
    }

    pub fn set_ipu_virtual_address(&mut self, address: VAddress) -> PsysResult<()> {
        return record::write_u32(&mut self.buffer, field::IPU_VIRTUAL_ADDRESS, address.0);
    }

    pub fn process_group_handle(&self) -> VAddress {
        return record::read_u32(&self.buffer, field::PROCESS_GROUP_HANDLE)
            .map_or(VAddress::NULL, VAddress);
    }

    pub fn terminal_count(&self) -> u16 {
        return record::read_u16(&self.buffer, field::TERMINAL_COUNT).unwrap_or(0);
    }

    pub fn frame_counter(&self) -> u8 {
        return record::read_u8(&self.buffer, field::FRAME_COUNTER).unwrap_or(0);
    }

    pub fn set_frame_counter(&mut self, frame_counter: u8) -> PsysResult<()> {
        return record::write_u8(&mut self.buffer, field::FRAME_COUNTER, frame_counter);
    }

    /// Store the buffer of the terminal at `terminal_index` (not its manifest index).
    pub fn set_buffer(&mut self, terminal_index: usize, address: VAddress) -> PsysResult<()> {
        let result = if terminal_index >= self.terminal_count() as usize {
            Err(PsysError::InvalidArgument)
        } else {
            record::write_u32(
                &mut self.buffer,
                BUFFER_SET_HEADER_SIZE + 4 * terminal_index,
                address.0,
            )
        };
        match &result {
            Ok(()) => debug!(
                "buffer set {:#x}: terminal {} -> {:#010x}",
                self.token(),
                terminal_index,
                address.0
            ),
            Err(err) => warn!(
                "buffer set {:#x}: set buffer of terminal {} failed: {:?}",
                self.token(),
                terminal_index,
                err
            ),
        }
        return result;
    }

    pub fn buffer_at(&self, terminal_index: usize) -> VAddress {
        if terminal_index >= self.terminal_count() as usize {
            return VAddress::NULL;
        }
        return record::read_u32(&self.buffer, BUFFER_SET_HEADER_SIZE + 4 * terminal_index)
            .map_or(VAddress::NULL, VAddress);
    }

    /// Buffer stored for `terminal`, `VAddress::NULL` if it has none.
    pub fn get_buffer(&self, terminal: &Terminal) -> VAddress {
        return self.buffer_at(terminal.terminal_index() as usize);
    }
}

impl fmt::Display for BufferSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "buffer set {:#x} for group {:#010x} at {:#010x}, frame {}",
            self.token(),
            self.process_group_handle().0,
            self.ipu_virtual_address().0,
            self.frame_counter()
        )?;
        writeln!(
            f,
            "\tkernels {:#034x} terminals {:#010x} routing {:#010x} rbm {:#010x}",
            self.kernel_enable_bitmap().0,
            self.terminal_enable_bitmap(),
            self.routing_enable_bitmap(),
            self.rbm()
        )?;
        let buffers = (0..self.terminal_count() as usize)
            .map(|index| format!("{:#010x}", self.buffer_at(index).0))
            .join(" ");
        return writeln!(f, "\tbuffers [{}]", buffers);
    }
}

impl fmt::Debug for BufferSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return fmt::Display::fmt(self, f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_aligned() {
        assert_eq!(BUFFER_SET_HEADER_SIZE, buffer_set_sizeof(0));
        assert_eq!(BUFFER_SET_HEADER_SIZE + 12, buffer_set_sizeof(3));
    }

    #[test_log::test]
    fn buffers_by_terminal_index() {
        let mut buffer_set =
            BufferSet::create(VAddress(0x0010_0000), 3).expect("buffer set should be created");
        assert_eq!(VAddress(0x0010_0000), buffer_set.process_group_handle());
        assert_eq!(3, buffer_set.terminal_count());
        buffer_set
            .set_buffer(2, VAddress(0xA000))
            .expect("last terminal should accept a buffer");
        assert_eq!(
            Err(PsysError::InvalidArgument),
            buffer_set.set_buffer(3, VAddress(0xB000))
        );
        assert_eq!(VAddress(0xA000), buffer_set.buffer_at(2));
        assert_eq!(VAddress::NULL, buffer_set.buffer_at(0));
        assert_eq!(VAddress::NULL, buffer_set.buffer_at(7));

        buffer_set.set_token(0x55).expect("token should be set");
        buffer_set.set_frame_counter(9).expect("frame counter should be set");
        buffer_set
            .set_kernel_enable_bitmap(KernelBitmap::from_kernels(&[4]))
            .expect("kernel bitmap should be set");
        assert_eq!(0x55, buffer_set.token());
        assert_eq!(9, buffer_set.frame_counter());
        assert!(buffer_set.kernel_enable_bitmap().is_bit_set(4));
        assert!(format!("{}", buffer_set).contains("0x0000a000"));
    }
}
