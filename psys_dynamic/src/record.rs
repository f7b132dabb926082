//! Bounds checked little endian field access on record bytes.
//!
//! Reads return `None` when the field does not lie inside the buffer so accessors can
//! map that to their sentinel, writes fail with `InvalidWrite`.

use byteorder::{ByteOrder, LittleEndian};
use psys_commons::{PsysError, PsysResult};

fn field(buffer: &[u8], offset: usize, len: usize) -> Option<&[u8]> {
    let end = offset.checked_add(len)?;
    return buffer.get(offset..end);
}

fn field_mut(buffer: &mut [u8], offset: usize, len: usize) -> PsysResult<&mut [u8]> {
    let end = offset.checked_add(len).ok_or(PsysError::InvalidWrite)?;
    return buffer.get_mut(offset..end).ok_or(PsysError::InvalidWrite);
}

pub fn read_u8(buffer: &[u8], offset: usize) -> Option<u8> {
    return buffer.get(offset).copied();
}

pub fn read_u16(buffer: &[u8], offset: usize) -> Option<u16> {
    return field(buffer, offset, 2).map(LittleEndian::read_u16);
}

pub fn read_i16(buffer: &[u8], offset: usize) -> Option<i16> {
    return field(buffer, offset, 2).map(LittleEndian::read_i16);
}

pub fn read_u32(buffer: &[u8], offset: usize) -> Option<u32> {
    return field(buffer, offset, 4).map(LittleEndian::read_u32);
}

pub fn read_u64(buffer: &[u8], offset: usize) -> Option<u64> {
    return field(buffer, offset, 8).map(LittleEndian::read_u64);
}

pub fn read_u128(buffer: &[u8], offset: usize) -> Option<u128> {
    return field(buffer, offset, 16).map(LittleEndian::read_u128);
}

pub fn write_u8(buffer: &mut [u8], offset: usize, value: u8) -> PsysResult<()> {
    field_mut(buffer, offset, 1)?[0] = value;
    return Ok(());
}

pub fn write_u16(buffer: &mut [u8], offset: usize, value: u16) -> PsysResult<()> {
    LittleEndian::write_u16(field_mut(buffer, offset, 2)?, value);
    return Ok(());
}

pub fn write_i16(buffer: &mut [u8], offset: usize, value: i16) -> PsysResult<()> {
    LittleEndian::write_i16(field_mut(buffer, offset, 2)?, value);
    return Ok(());
}

pub fn write_u32(buffer: &mut [u8], offset: usize, value: u32) -> PsysResult<()> {
    LittleEndian::write_u32(field_mut(buffer, offset, 4)?, value);
    return Ok(());
}

pub fn write_u64(buffer: &mut [u8], offset: usize, value: u64) -> PsysResult<()> {
    LittleEndian::write_u64(field_mut(buffer, offset, 8)?, value);
    return Ok(());
}

pub fn write_u128(buffer: &mut [u8], offset: usize, value: u128) -> PsysResult<()> {
    LittleEndian::write_u128(field_mut(buffer, offset, 16)?, value);
    return Ok(());
}

/// Fill a byte range, used to stamp sentinel bytes over whole arrays.
pub fn fill(buffer: &mut [u8], offset: usize, len: usize, value: u8) -> PsysResult<()> {
    field_mut(buffer, offset, len)?.fill(value);
    return Ok(());
}

/// Round `value` up to the next multiple of `alignment`, which must be a power of two.
pub const fn align_up(value: usize, alignment: usize) -> usize {
    return (value + alignment - 1) & !(alignment - 1);
}

#[test]
fn field_access() {
    let mut buffer = vec![0u8; 16];
    write_u16(&mut buffer, 2, 0xBEEF).expect("write should succeed");
    assert_eq!(&[0xEFu8, 0xBE], &buffer[2..4]);
    write_i16(&mut buffer, 0, -8).expect("write should succeed");
    assert_eq!(Some(-8), read_i16(&buffer, 0));
    write_u64(&mut buffer, 8, 0x0102_0304_0506_0708).expect("write should succeed");
    assert_eq!(Some(0x0506_0708), read_u32(&buffer, 8));
    assert_eq!(None, read_u32(&buffer, 14));
    assert_eq!(None, read_u128(&buffer, 1));
    assert_eq!(Err(PsysError::InvalidWrite), write_u32(&mut buffer, 13, 1));
    assert_eq!(Err(PsysError::InvalidWrite), write_u8(&mut buffer, usize::MAX, 1));
    assert_eq!(8, align_up(5, 4));
    assert_eq!(8, align_up(8, 8));
}
