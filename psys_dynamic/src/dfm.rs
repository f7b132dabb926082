//! Device flow manager configuration.
//!
//! The register format of the sequencer is owned by a [`DeviceSequencer`]. This module
//! only decides which sections a process needs and where they go in the blob.

use crate::{
    layout::{LayoutWriter, BLOCK_ALIGNMENT},
    process::Process,
};
use log::{debug, warn};
use psys_commons::{DfmPortId, PsysError, PsysResult};

/// One device port of a DFM port type, taken from a process port bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfmSection {
    pub port: DfmPortId,
    pub device_port: u8,
    /// taken from the active port bitmap rather than the port bitmap
    pub active: bool,
}

pub trait DeviceSequencer {
    fn section_size(&self, section: DfmSection) -> usize;
    fn fill_section(&self, section: DfmSection, buffer: &mut [u8]) -> PsysResult<()>;
}

/// Sections in blob order: port bitmaps first, active bitmaps second, ports ascending.
pub fn dfm_sections(process: &Process) -> Vec<DfmSection> {
    let ports = process.model().n_dfm_port() as DfmPortId;
    let mut sections = Vec::new();
    for active in [false, true] {
        for port in 0..ports {
            let bitmap = if active {
                process.dfm_active_port_bitmap(port)
            } else {
                process.dfm_port_bitmap(port)
            };
            sections.extend(bitmap.iter_set().map(|device_port| DfmSection {
                port,
                device_port: device_port as u8,
                active,
            }));
        }
    }
    return sections;
}

fn layout_dfm_config(
    writer: &mut LayoutWriter,
    sections: &[DfmSection],
    sequencer: &dyn DeviceSequencer,
) -> PsysResult<()> {
    let header = writer.reserve(4, BLOCK_ALIGNMENT);
    let count = u16::try_from(sections.len()).map_err(|_| PsysError::CapacityExceeded)?;
    writer.put_u16(header, count)?;
    writer.put_u16(header + 2, 0)?;
    for section in sections {
        let size = sequencer.section_size(*section);
        let start = writer.reserve(size, BLOCK_ALIGNMENT);
        if let Some(region) = writer.region_mut(start, size)? {
            sequencer.fill_section(*section, region)?;
        }
    }
    writer.align(BLOCK_ALIGNMENT);
    return Ok(());
}

/// Build the opaque sequencer configuration for the DFM ports bound to `process`.
pub fn build_dfm_config(process: &Process, sequencer: &dyn DeviceSequencer) -> PsysResult<Vec<u8>> {
    let sections = dfm_sections(process);
    let result = build(&sections, sequencer);
    match &result {
        Ok(config) => debug!(
            "process {:#06x}: dfm config with {} sections ({} bytes)",
            process.offset(),
            sections.len(),
            config.len()
        ),
        Err(err) => warn!(
            "process {:#06x}: dfm config failed: {:?}",
            process.offset(),
            err
        ),
    }
    return result;
}

fn build(sections: &[DfmSection], sequencer: &dyn DeviceSequencer) -> PsysResult<Vec<u8>> {
    let mut writer = LayoutWriter::measure();
    layout_dfm_config(&mut writer, sections, sequencer)?;
    let size = writer.finish()?;
    let mut config = Vec::new();
    config
        .try_reserve_exact(size)
        .map_err(|_| PsysError::OutOfMemory)?;
    config.resize(size, 0);
    let mut writer = LayoutWriter::populate(&mut config);
    layout_dfm_config(&mut writer, sections, sequencer)?;
    writer.finish()?;
    return Ok(config);
}
