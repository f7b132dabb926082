//! Process records and the process state machine.
//!
//! A process is one instance of a program. Its record is carved out of the byte
//! arena of the owning process group and refers back to the group through a signed
//! byte offset, so the group together with its processes can be copied verbatim into
//! another address space.
//!
//! Fixed part, little endian:
//!
//! | offset | field |
//! |---|---|
//! | 0 | parent offset (i16, 0 = detached) |
//! | 2 | size (u8) |
//! | 3 | cell dependency array offset (u8, 0 = absent) |
//! | 4 | terminal dependency array offset (u8, 0 = absent) |
//! | 5 | extension offset (u8, 0 = absent) |
//! | 6 | program index (u8) |
//! | 7 | state (u8) |
//! | 8 | program id (u32) |
//! | 12 | cell (u8, model cell count = none) |
//! | 13 | cell dependency count (u8) |
//! | 14 | terminal dependency count (u8) |

use crate::{
    bitmap::ResourceBitmap,
    layout::{LayoutWriter, BLOCK_ALIGNMENT},
    manifest::{ProgramGroupManifest, ProgramGroupParam, ProgramManifest},
    process_group::{self, ProcessGroupState},
    record::{self, align_up},
    resource_model::{ResourceModel, MAX_CELLS_PER_PROCESS},
};
use itertools::Itertools;
use log::{debug, warn};
use psys_commons::{
    CellId, DevChnId, DfmPortId, MemId, MemTypeId, ProgramId, PsysError, PsysResult,
    ResourceOffset,
};
use std::fmt;

pub const PROCESS_HEADER_SIZE: usize = 16;
/// Largest record a process can have, its size field is a single byte.
pub const PROCESS_MAX_SIZE: usize = u8::MAX as usize;
/// Dependency slot that was not resolved to a process or terminal.
pub const DEPENDENCY_NONE: u8 = u8::MAX;

mod field {
    pub const PARENT_OFFSET: usize = 0;
    pub const SIZE: usize = 2;
    pub const CELL_DEPENDENCIES_OFFSET: usize = 3;
    pub const TERMINAL_DEPENDENCIES_OFFSET: usize = 4;
    pub const EXTENSION_OFFSET: usize = 5;
    pub const PROGRAM_INDEX: usize = 6;
    pub const STATE: usize = 7;
    pub const PROGRAM_ID: usize = 8;
    pub const CELLS: usize = 12;
    pub const CELL_DEPENDENCY_COUNT: usize = 13;
    pub const TERMINAL_DEPENDENCY_COUNT: usize = 14;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessState {
    Created = 0,
    Ready = 1,
    Started = 2,
    Running = 3,
    Stopped = 4,
    Suspended = 5,
    Error = 6,
}

impl ProcessState {
    pub const fn from_raw(raw: u8) -> Option<Self> {
        return match raw {
            0 => Some(ProcessState::Created),
            1 => Some(ProcessState::Ready),
            2 => Some(ProcessState::Started),
            3 => Some(ProcessState::Running),
            4 => Some(ProcessState::Stopped),
            5 => Some(ProcessState::Suspended),
            6 => Some(ProcessState::Error),
            _ => None,
        };
    }

    /// Resources may only be bound or released while the process is at rest.
    pub const fn accepts_resource_changes(self) -> bool {
        return matches!(self, ProcessState::Ready | ProcessState::Stopped);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessCmd {
    Nop = 0,
    Acquire = 1,
    Release = 2,
    Start = 3,
    Load = 4,
    Stop = 5,
    Suspend = 6,
    Resume = 7,
}

impl ProcessCmd {
    /// State after applying the command in `state`, `None` if the command is illegal there.
    pub const fn next_state(self, state: ProcessState) -> Option<ProcessState> {
        use ProcessState::*;
        if matches!(state, Error) {
            return None;
        }
        return match (self, state) {
            (ProcessCmd::Nop, _) => Some(state),
            (ProcessCmd::Acquire, Ready) | (ProcessCmd::Release, Ready) => Some(Ready),
            (ProcessCmd::Start, Ready | Stopped) => Some(Started),
            (ProcessCmd::Load, Started | Ready | Stopped) => Some(Running),
            (ProcessCmd::Stop, Running | Suspended) => Some(Stopped),
            (ProcessCmd::Suspend, Running) => Some(Suspended),
            (ProcessCmd::Resume, Suspended) => Some(Running),
            _ => None,
        };
    }
}

/// Outcome of reading one slot of a dependency array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    /// index of the process or terminal depended on
    Present(u8),
    /// slot exists but was not resolved
    Absent,
    /// index is past the end of the array
    OutOfRange,
}

// parent states in which each kind of resource operation is legal
const CELL_SET_PARENT_STATES: &[ProcessGroupState] = &[
    ProcessGroupState::Blocked,
    ProcessGroupState::Started,
    ProcessGroupState::Created,
    ProcessGroupState::Ready,
];
const LATE_BINDING_PARENT_STATES: &[ProcessGroupState] = &[
    ProcessGroupState::Blocked,
    ProcessGroupState::Started,
    ProcessGroupState::Running,
];
const CLEAR_PARENT_STATES: &[ProcessGroupState] =
    &[ProcessGroupState::Blocked, ProcessGroupState::Started];

/// Placement of the extension arrays, relative to the extension start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionLayout {
    pub dfm_port_bitmap: usize,
    pub dfm_active_port_bitmap: usize,
    pub ext_mem_offset: usize,
    pub dev_chn_offset: usize,
    pub ext_mem_id: usize,
    pub size: usize,
}

impl ExtensionLayout {
    pub fn for_model(model: &ResourceModel) -> Self {
        let n_dfm = model.n_dfm_port();
        let dfm_active_port_bitmap = 4 * n_dfm;
        let ext_mem_offset = dfm_active_port_bitmap + 4 * n_dfm;
        let dev_chn_offset = ext_mem_offset + 2 * model.n_data_mem_type;
        let ext_mem_id = dev_chn_offset + 2 * model.n_dev_chn();
        let end = ext_mem_id + model.n_data_mem_type;
        return ExtensionLayout {
            dfm_port_bitmap: 0,
            dfm_active_port_bitmap,
            ext_mem_offset,
            dev_chn_offset,
            ext_mem_id,
            size: align_up(end, BLOCK_ALIGNMENT),
        };
    }
}

fn offset_field(offset: usize) -> PsysResult<u8> {
    return u8::try_from(offset).map_err(|_| PsysError::CapacityExceeded);
}

/// The one walk over a process record, shared by sizing and population.
fn layout_process(
    writer: &mut LayoutWriter,
    model: &ResourceModel,
    program: &ProgramManifest,
    program_index: usize,
) -> PsysResult<()> {
    let cell_dependency_count = program.cell_dependencies.len();
    let terminal_dependency_count = program.terminal_dependencies.len();
    if cell_dependency_count + terminal_dependency_count == 0 {
        return Err(PsysError::InvalidArgument);
    }
    if !program.program_id.is_valid() {
        return Err(PsysError::InvalidArgument);
    }
    let program_index = u8::try_from(program_index).map_err(|_| PsysError::InvalidArgument)?;
    let header = writer.reserve(PROCESS_HEADER_SIZE, BLOCK_ALIGNMENT);

    let mut extension_offset = 0;
    if program.needs_extension() {
        let layout = ExtensionLayout::for_model(model);
        extension_offset = writer.reserve(layout.size, BLOCK_ALIGNMENT);
        writer.put_fill(extension_offset, layout.size, 0)?;
    }
    let mut cell_dependencies_offset = 0;
    if cell_dependency_count != 0 {
        cell_dependencies_offset = writer.reserve(cell_dependency_count, BLOCK_ALIGNMENT);
        writer.put_fill(cell_dependencies_offset, cell_dependency_count, DEPENDENCY_NONE)?;
    }
    let mut terminal_dependencies_offset = 0;
    if terminal_dependency_count != 0 {
        terminal_dependencies_offset =
            writer.reserve(terminal_dependency_count, BLOCK_ALIGNMENT);
        writer.put_fill(
            terminal_dependencies_offset,
            terminal_dependency_count,
            DEPENDENCY_NONE,
        )?;
    }
    writer.align(BLOCK_ALIGNMENT);
    let size = writer.position() - header;
    if size > PROCESS_MAX_SIZE {
        return Err(PsysError::CapacityExceeded);
    }

    writer.put_i16(header + field::PARENT_OFFSET, 0)?;
    writer.put_u8(header + field::SIZE, size as u8)?;
    // records start at the beginning of their own buffer, so block starts are relative
    writer.put_u8(
        header + field::CELL_DEPENDENCIES_OFFSET,
        offset_field(cell_dependencies_offset)?,
    )?;
    writer.put_u8(
        header + field::TERMINAL_DEPENDENCIES_OFFSET,
        offset_field(terminal_dependencies_offset)?,
    )?;
    writer.put_u8(header + field::EXTENSION_OFFSET, offset_field(extension_offset)?)?;
    writer.put_u8(header + field::PROGRAM_INDEX, program_index)?;
    writer.put_u8(header + field::STATE, ProcessState::Created as u8)?;
    writer.put_u32(header + field::PROGRAM_ID, program.program_id.0)?;
    writer.put_u8(header + field::CELLS, model.encode_cell(CellId::NONE))?;
    writer.put_u8(
        header + field::CELL_DEPENDENCY_COUNT,
        u8::try_from(cell_dependency_count).map_err(|_| PsysError::CapacityExceeded)?,
    )?;
    writer.put_u8(
        header + field::TERMINAL_DEPENDENCY_COUNT,
        u8::try_from(terminal_dependency_count).map_err(|_| PsysError::CapacityExceeded)?,
    )?;
    return Ok(());
}

fn enabled_program<'m>(
    manifest: &'m ProgramGroupManifest,
    param: &ProgramGroupParam,
    program_index: usize,
) -> PsysResult<&'m ProgramManifest> {
    let program = manifest
        .program(program_index)
        .ok_or(PsysError::InvalidArgument)?;
    if !manifest.is_program_enabled(program_index, param.kernel_enable_bitmap) {
        return Err(PsysError::InvalidArgument);
    }
    return Ok(program);
}

/// Bytes needed for the process of program `program_index`.
pub fn process_sizeof(
    model: &ResourceModel,
    manifest: &ProgramGroupManifest,
    param: &ProgramGroupParam,
    program_index: usize,
) -> PsysResult<usize> {
    let program = enabled_program(manifest, param, program_index)?;
    let mut writer = LayoutWriter::measure();
    layout_process(&mut writer, model, program, program_index)?;
    return writer.finish();
}

/// Lay out the process of program `program_index` at the start of `raw`, which must be
/// exactly [`process_sizeof`] bytes. On failure `raw` is wiped.
pub fn create_process<'a>(
    model: &'static ResourceModel,
    raw: &'a mut [u8],
    manifest: &ProgramGroupManifest,
    param: &ProgramGroupParam,
    program_index: usize,
) -> PsysResult<ProcessMut<'a>> {
    let result = populate_process(model, raw, manifest, param, program_index);
    match &result {
        Ok(()) => debug!(
            "created process for program {} ({} bytes)",
            program_index,
            raw.len()
        ),
        Err(err) => {
            warn!(
                "failed to create process for program {}: {:?}",
                program_index, err
            );
            raw.fill(0);
        }
    }
    result?;
    return Ok(ProcessMut::new(model, raw, 0));
}

pub(crate) fn populate_process(
    model: &'static ResourceModel,
    raw: &mut [u8],
    manifest: &ProgramGroupManifest,
    param: &ProgramGroupParam,
    program_index: usize,
) -> PsysResult<()> {
    let program = enabled_program(manifest, param, program_index)?;
    let mut writer = LayoutWriter::populate(raw);
    layout_process(&mut writer, model, program, program_index)?;
    writer.finish()?;
    let mut process = ProcessMut::new(model, raw, 0);
    process.clear_all_unlogged()?;
    process.write_state(ProcessState::Ready)?;
    return Ok(());
}

/// Read view of a process record inside an arena.
#[derive(Clone, Copy)]
pub struct Process<'a> {
    model: &'static ResourceModel,
    arena: &'a [u8],
    offset: usize,
}

impl<'a> Process<'a> {
    pub fn new(model: &'static ResourceModel, arena: &'a [u8], offset: usize) -> Self {
        return Process {
            model,
            arena,
            offset,
        };
    }

    fn u8_at(&self, at: usize) -> Option<u8> {
        return record::read_u8(self.arena, self.offset.checked_add(at)?);
    }

    fn extension_field(&self, at: usize) -> Option<usize> {
        let start = self.u8_at(field::EXTENSION_OFFSET)? as usize;
        if start == 0 {
            return None;
        }
        return Some(self.offset + start + at);
    }

    pub fn offset(&self) -> usize {
        return self.offset;
    }

    pub fn model(&self) -> &'static ResourceModel {
        return self.model;
    }

    pub fn size(&self) -> usize {
        return self.u8_at(field::SIZE).map_or(0, |size| size as usize);
    }

    pub fn program_id(&self) -> ProgramId {
        return record::read_u32(self.arena, self.offset + field::PROGRAM_ID)
            .map_or(ProgramId::INVALID, ProgramId);
    }

    pub fn program_index(&self) -> u8 {
        return self.u8_at(field::PROGRAM_INDEX).unwrap_or(u8::MAX);
    }

    /// A record whose state byte is unreadable or unknown reads as `Error`.
    pub fn state(&self) -> ProcessState {
        return self
            .u8_at(field::STATE)
            .and_then(ProcessState::from_raw)
            .unwrap_or(ProcessState::Error);
    }

    pub fn cell(&self) -> CellId {
        return self
            .u8_at(field::CELLS)
            .map_or(CellId::NONE, |raw| self.model.decode_cell(raw));
    }

    pub fn cells_bitmap(&self) -> ResourceBitmap {
        return (0..MAX_CELLS_PER_PROCESS)
            .filter_map(|slot| self.u8_at(field::CELLS + slot))
            .map(|raw| self.model.cell_bit_mask(self.model.decode_cell(raw)))
            .fold(ResourceBitmap::EMPTY, ResourceBitmap::union);
    }

    pub fn cell_dependency_count(&self) -> u8 {
        return self.u8_at(field::CELL_DEPENDENCY_COUNT).unwrap_or(0);
    }

    pub fn terminal_dependency_count(&self) -> u8 {
        return self.u8_at(field::TERMINAL_DEPENDENCY_COUNT).unwrap_or(0);
    }

    fn dependency(&self, array_field: usize, count: u8, index: usize) -> Dependency {
        if index >= count as usize {
            return Dependency::OutOfRange;
        }
        let start = match self.u8_at(array_field) {
            Some(0) => return Dependency::Absent,
            Some(start) => start as usize,
            None => return Dependency::OutOfRange,
        };
        return match self.u8_at(start + index) {
            Some(DEPENDENCY_NONE) => Dependency::Absent,
            Some(value) => Dependency::Present(value),
            None => Dependency::OutOfRange,
        };
    }

    pub fn cell_dependency(&self, index: usize) -> Dependency {
        return self.dependency(
            field::CELL_DEPENDENCIES_OFFSET,
            self.cell_dependency_count(),
            index,
        );
    }

    pub fn terminal_dependency(&self, index: usize) -> Dependency {
        return self.dependency(
            field::TERMINAL_DEPENDENCIES_OFFSET,
            self.terminal_dependency_count(),
            index,
        );
    }

    pub fn has_extension(&self) -> bool {
        return self.u8_at(field::EXTENSION_OFFSET).map_or(false, |start| start != 0);
    }

    pub fn ext_mem_id(&self, mem_type: MemTypeId) -> MemId {
        if mem_type as usize >= self.model.n_data_mem_type {
            return MemId::NONE;
        }
        let layout = ExtensionLayout::for_model(self.model);
        return self
            .extension_field(layout.ext_mem_id + mem_type as usize)
            .and_then(|at| record::read_u8(self.arena, at))
            .map_or(MemId::NONE, |raw| self.model.decode_mem(raw));
    }

    pub fn ext_mem_offset(&self, mem_type: MemTypeId) -> ResourceOffset {
        if mem_type as usize >= self.model.n_data_mem_type {
            return ResourceOffset::INVALID;
        }
        let layout = ExtensionLayout::for_model(self.model);
        return self
            .extension_field(layout.ext_mem_offset + 2 * mem_type as usize)
            .and_then(|at| record::read_u16(self.arena, at))
            .map_or(ResourceOffset::INVALID, ResourceOffset);
    }

    pub fn dev_chn_offset(&self, chn: DevChnId) -> ResourceOffset {
        if chn as usize >= self.model.n_dev_chn() {
            return ResourceOffset::INVALID;
        }
        let layout = ExtensionLayout::for_model(self.model);
        return self
            .extension_field(layout.dev_chn_offset + 2 * chn as usize)
            .and_then(|at| record::read_u16(self.arena, at))
            .map_or(ResourceOffset::INVALID, ResourceOffset);
    }

    pub fn dfm_port_bitmap(&self, port: DfmPortId) -> ResourceBitmap {
        if port as usize >= self.model.n_dfm_port() {
            return ResourceBitmap::EMPTY;
        }
        let layout = ExtensionLayout::for_model(self.model);
        return self
            .extension_field(layout.dfm_port_bitmap + 4 * port as usize)
            .and_then(|at| record::read_u32(self.arena, at))
            .map_or(ResourceBitmap::EMPTY, ResourceBitmap);
    }

    pub fn dfm_active_port_bitmap(&self, port: DfmPortId) -> ResourceBitmap {
        if port as usize >= self.model.n_dfm_port() {
            return ResourceBitmap::EMPTY;
        }
        let layout = ExtensionLayout::for_model(self.model);
        return self
            .extension_field(layout.dfm_active_port_bitmap + 4 * port as usize)
            .and_then(|at| record::read_u32(self.arena, at))
            .map_or(ResourceBitmap::EMPTY, ResourceBitmap);
    }

    pub fn parent_offset(&self) -> i16 {
        return record::read_i16(self.arena, self.offset + field::PARENT_OFFSET).unwrap_or(0);
    }

    /// Arena offset of the owning group, `None` while detached.
    pub fn parent(&self) -> Option<usize> {
        let relative = self.parent_offset();
        if relative == 0 {
            return None;
        }
        return self.offset.checked_add_signed(relative as isize);
    }

    pub fn parent_state(&self) -> Option<ProcessGroupState> {
        return self
            .parent()
            .and_then(|parent| process_group::state_at(self.arena, parent));
    }

    /// Check the record against the program it claims to instantiate, without touching it.
    pub fn is_valid(&self, program: &ProgramManifest) -> bool {
        let size = self.size();
        if size < PROCESS_HEADER_SIZE || self.offset + size > self.arena.len() {
            return false;
        }
        if self.program_id() != program.program_id {
            return false;
        }
        if self.cell_dependency_count() as usize != program.cell_dependencies.len()
            || self.terminal_dependency_count() as usize != program.terminal_dependencies.len()
        {
            return false;
        }
        let layout = ExtensionLayout::for_model(self.model);
        let arrays = [
            (
                field::EXTENSION_OFFSET,
                if program.needs_extension() { layout.size } else { 0 },
            ),
            (
                field::CELL_DEPENDENCIES_OFFSET,
                program.cell_dependencies.len(),
            ),
            (
                field::TERMINAL_DEPENDENCIES_OFFSET,
                program.terminal_dependencies.len(),
            ),
        ];
        for (offset_field, len) in arrays {
            let start = self.u8_at(offset_field).unwrap_or(0) as usize;
            if (start == 0) != (len == 0) {
                return false;
            }
            if start != 0 && (start < PROCESS_HEADER_SIZE || start + len > size) {
                return false;
            }
        }
        if let Some(cell) = program.fixed_cell() {
            if self.cell() != cell {
                return false;
            }
        }
        return true;
    }
}

impl fmt::Display for Process<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "process {:#06x}: program {} (index {}), {:?}, {} bytes, parent offset {}",
            self.offset,
            self.program_id().0,
            self.program_index(),
            self.state(),
            self.size(),
            self.parent_offset()
        )?;
        writeln!(f, "\tcell {}", self.model.cell_name(self.cell()))?;
        let cell_dependencies = (0..self.cell_dependency_count() as usize)
            .map(|index| format!("{:?}", self.cell_dependency(index)))
            .join(", ");
        let terminal_dependencies = (0..self.terminal_dependency_count() as usize)
            .map(|index| format!("{:?}", self.terminal_dependency(index)))
            .join(", ");
        writeln!(f, "\tcell dependencies [{}]", cell_dependencies)?;
        writeln!(f, "\tterminal dependencies [{}]", terminal_dependencies)?;
        if !self.has_extension() {
            return Ok(());
        }
        for mem_type in 0..self.model.n_data_mem_type as MemTypeId {
            let mem = self.ext_mem_id(mem_type);
            if mem.is_none() {
                continue;
            }
            writeln!(
                f,
                "\t{} -> {} at {:#x}",
                self.model.mem_type_name(mem_type),
                self.model.mem_name(mem),
                self.ext_mem_offset(mem_type).0
            )?;
        }
        for chn in 0..self.model.n_dev_chn() as DevChnId {
            let offset = self.dev_chn_offset(chn);
            if offset.is_valid() {
                writeln!(f, "\t{} at {:#x}", self.model.dev_chn_name(chn), offset.0)?;
            }
        }
        for port in 0..self.model.n_dfm_port() as DfmPortId {
            let bitmap = self.dfm_port_bitmap(port);
            let active = self.dfm_active_port_bitmap(port);
            if !bitmap.is_empty() || !active.is_empty() {
                writeln!(
                    f,
                    "\tdfm {} ports {:#010x} active {:#010x}",
                    self.model.dfm_ports[port as usize], bitmap.0, active.0
                )?;
            }
        }
        return Ok(());
    }
}

/// Mutable view of a process record inside an arena, which may also hold its parent.
pub struct ProcessMut<'a> {
    model: &'static ResourceModel,
    arena: &'a mut [u8],
    offset: usize,
}

fn logged<T>(operation: &str, offset: usize, result: PsysResult<T>) -> PsysResult<T> {
    match &result {
        Ok(_) => debug!("process {:#06x}: {}", offset, operation),
        Err(err) => warn!("process {:#06x}: {} failed: {:?}", offset, operation, err),
    }
    return result;
}

impl<'a> ProcessMut<'a> {
    pub fn new(model: &'static ResourceModel, arena: &'a mut [u8], offset: usize) -> Self {
        return ProcessMut {
            model,
            arena,
            offset,
        };
    }

    pub fn as_process(&self) -> Process<'_> {
        return Process::new(self.model, self.arena, self.offset);
    }

    fn write_u8(&mut self, at: usize, value: u8) -> PsysResult<()> {
        return record::write_u8(self.arena, self.offset + at, value);
    }

    fn write_state(&mut self, state: ProcessState) -> PsysResult<()> {
        return self.write_u8(field::STATE, state as u8);
    }

    fn write_cell(&mut self, cell: CellId) -> PsysResult<()> {
        let raw = self.model.encode_cell(cell);
        return self.write_u8(field::CELLS, raw);
    }

    fn extension_start(&self) -> Option<usize> {
        let start = record::read_u8(self.arena, self.offset + field::EXTENSION_OFFSET)?;
        if start == 0 {
            return None;
        }
        return Some(self.offset + start as usize);
    }

    /// Process state and parent state both allow the operation, returns the parent offset.
    fn check_gates(&self, parent_states: &[ProcessGroupState]) -> PsysResult<usize> {
        let process = self.as_process();
        if !process.state().accepts_resource_changes() {
            return Err(PsysError::InvalidState);
        }
        let parent = process.parent().ok_or(PsysError::InvalidState)?;
        let parent_state =
            process_group::state_at(self.arena, parent).ok_or(PsysError::InvalidState)?;
        if !parent_states.contains(&parent_state) {
            return Err(PsysError::InvalidState);
        }
        return Ok(parent);
    }

    fn parent_bitmap(&self, parent: usize) -> PsysResult<ResourceBitmap> {
        return process_group::resource_bitmap_at(self.arena, parent)
            .ok_or(PsysError::InvalidRead);
    }

    pub fn cmd(&mut self, cmd: ProcessCmd) -> PsysResult<()> {
        let state = self.as_process().state();
        let result = match cmd.next_state(state) {
            Some(next) => self.write_state(next),
            None => Err(PsysError::InvalidState),
        };
        return logged(&format!("{:?} in {:?}", cmd, state), self.offset, result);
    }

    /// Put the process into the absorbing error state.
    pub fn mark_error(&mut self) -> PsysResult<()> {
        let result = self.write_state(ProcessState::Error);
        return logged("mark error", self.offset, result);
    }

    /// Link the process to the group record at arena offset `group`.
    pub fn set_parent(&mut self, group: usize) -> PsysResult<()> {
        let result = self.link_parent(group);
        return logged(&format!("set parent {:#06x}", group), self.offset, result);
    }

    fn link_parent(&mut self, group: usize) -> PsysResult<()> {
        if process_group::state_at(self.arena, group).is_none() {
            return Err(PsysError::InvalidArgument);
        }
        let relative = group as isize - self.offset as isize;
        let relative = i16::try_from(relative).map_err(|_| PsysError::InvalidArgument)?;
        if relative == 0 {
            return Err(PsysError::InvalidArgument);
        }
        return record::write_i16(self.arena, self.offset + field::PARENT_OFFSET, relative);
    }

    pub fn set_cell_dependency(&mut self, index: usize, process_index: u8) -> PsysResult<()> {
        let process = self.as_process();
        let count = process.cell_dependency_count() as usize;
        let start = record::read_u8(self.arena, self.offset + field::CELL_DEPENDENCIES_OFFSET)
            .unwrap_or(0) as usize;
        if index >= count || start == 0 {
            return Err(PsysError::InvalidArgument);
        }
        return self.write_u8(start + index, process_index);
    }

    pub fn set_terminal_dependency(&mut self, index: usize, terminal_index: u8) -> PsysResult<()> {
        let process = self.as_process();
        let count = process.terminal_dependency_count() as usize;
        let start =
            record::read_u8(self.arena, self.offset + field::TERMINAL_DEPENDENCIES_OFFSET)
                .unwrap_or(0) as usize;
        if index >= count || start == 0 {
            return Err(PsysError::InvalidArgument);
        }
        return self.write_u8(start + index, terminal_index);
    }

    /// Claim `cell` for this process in the parent resource bitmap.
    pub fn set_cell(&mut self, cell: CellId) -> PsysResult<()> {
        let result = self.claim_cell(cell);
        return logged(
            &format!("set cell {}", self.model.cell_name(cell)),
            self.offset,
            result,
        );
    }

    fn claim_cell(&mut self, cell: CellId) -> PsysResult<()> {
        let parent = self.check_gates(CELL_SET_PARENT_STATES)?;
        let bit = self.model.cell_bit_mask(cell);
        if bit.is_empty() {
            return Err(PsysError::InvalidArgument);
        }
        let bitmap = self.parent_bitmap(parent)?;
        if !bitmap.is_clear(bit) {
            return Err(PsysError::ResourceConflict);
        }
        if !self.as_process().cell().is_none() {
            return Err(PsysError::InvalidState);
        }
        process_group::set_resource_bitmap_at(self.arena, parent, bitmap.set(bit))?;
        return self.write_cell(cell);
    }

    /// Release the cell of this process from the parent resource bitmap.
    pub fn clear_cell(&mut self) -> PsysResult<()> {
        let result = self.release_cell();
        return logged("clear cell", self.offset, result);
    }

    fn release_cell(&mut self) -> PsysResult<()> {
        let parent = self.check_gates(CLEAR_PARENT_STATES)?;
        let bit = self.model.cell_bit_mask(self.as_process().cell());
        if bit.is_empty() {
            return Err(PsysError::InvalidArgument);
        }
        let bitmap = self.parent_bitmap(parent)?;
        if !bitmap.is_set(bit) {
            return Err(PsysError::InvalidState);
        }
        process_group::set_resource_bitmap_at(self.arena, parent, bitmap.clear(bit))?;
        return self.write_cell(CellId::NONE);
    }

    /// Replace the cells of this process with the cells set in `bitmap`.
    ///
    /// Fails without any effect when more cells are requested than the process has
    /// slots for, or when a requested cell is held by another process.
    pub fn set_cells_bitmap(&mut self, bitmap: ResourceBitmap) -> PsysResult<()> {
        let result = self.claim_cells_bitmap(bitmap);
        return logged(
            &format!("set cells bitmap {:#010x}", bitmap.0),
            self.offset,
            result,
        );
    }

    fn claim_cells_bitmap(&mut self, bitmap: ResourceBitmap) -> PsysResult<()> {
        let parent = self.check_gates(CELL_SET_PARENT_STATES)?;
        let cells: Vec<CellId> = bitmap.iter_set().map(|index| CellId(index as u8)).collect();
        if cells.iter().any(|cell| !self.model.is_valid_cell(*cell)) {
            return Err(PsysError::InvalidArgument);
        }
        if cells.len() > MAX_CELLS_PER_PROCESS {
            return Err(PsysError::CapacityExceeded);
        }
        let held = self.as_process().cells_bitmap();
        let others = self.parent_bitmap(parent)?.clear(held);
        if !others.is_clear(bitmap) {
            return Err(PsysError::ResourceConflict);
        }
        process_group::set_resource_bitmap_at(self.arena, parent, others.set(bitmap))?;
        for slot in 0..MAX_CELLS_PER_PROCESS {
            let cell = cells.get(slot).copied().unwrap_or(CellId::NONE);
            let raw = self.model.encode_cell(cell);
            self.write_u8(field::CELLS + slot, raw)?;
        }
        return Ok(());
    }

    /// Bind external memory `mem` at `offset` under the memory's type.
    pub fn set_ext_mem(&mut self, mem: MemId, offset: ResourceOffset) -> PsysResult<()> {
        let result = self.bind_ext_mem(mem, offset);
        return logged(
            &format!("set ext mem {} at {:#x}", self.model.mem_name(mem), offset.0),
            self.offset,
            result,
        );
    }

    fn bind_ext_mem(&mut self, mem: MemId, offset: ResourceOffset) -> PsysResult<()> {
        let extension = self.extension_start().ok_or(PsysError::InvalidArgument)?;
        self.check_gates(LATE_BINDING_PARENT_STATES)?;
        let mem_type = self.model.mem_type(mem).ok_or(PsysError::InvalidArgument)?;
        if mem_type as usize >= self.model.n_data_mem_type {
            return Err(PsysError::InvalidArgument);
        }
        // memory internal to the own cell is not external memory
        let own = self.model.is_cell_mem(self.as_process().cell(), mem);
        if own && !self.model.is_external_mem_type(mem_type) {
            return Err(PsysError::InvalidArgument);
        }
        let layout = ExtensionLayout::for_model(self.model);
        record::write_u8(
            self.arena,
            extension + layout.ext_mem_id + mem_type as usize,
            self.model.encode_mem(mem),
        )?;
        return record::write_u16(
            self.arena,
            extension + layout.ext_mem_offset + 2 * mem_type as usize,
            offset.0,
        );
    }

    pub fn clear_ext_mem(&mut self, mem_type: MemTypeId) -> PsysResult<()> {
        let result = self.unbind_ext_mem(mem_type);
        return logged(
            &format!("clear ext mem {}", self.model.mem_type_name(mem_type)),
            self.offset,
            result,
        );
    }

    fn unbind_ext_mem(&mut self, mem_type: MemTypeId) -> PsysResult<()> {
        if mem_type as usize >= self.model.n_data_mem_type {
            return Err(PsysError::InvalidArgument);
        }
        let extension = match self.extension_start() {
            Some(extension) => extension,
            None => return Ok(()),
        };
        self.check_gates(CLEAR_PARENT_STATES)?;
        let layout = ExtensionLayout::for_model(self.model);
        record::write_u8(
            self.arena,
            extension + layout.ext_mem_id + mem_type as usize,
            self.model.encode_mem(MemId::NONE),
        )?;
        return record::write_u16(
            self.arena,
            extension + layout.ext_mem_offset + 2 * mem_type as usize,
            ResourceOffset::INVALID.0,
        );
    }

    pub fn set_dev_chn(&mut self, chn: DevChnId, offset: ResourceOffset) -> PsysResult<()> {
        let result = self.bind_dev_chn(chn, offset);
        return logged(
            &format!("set dev chn {} at {:#x}", self.model.dev_chn_name(chn), offset.0),
            self.offset,
            result,
        );
    }

    fn bind_dev_chn(&mut self, chn: DevChnId, offset: ResourceOffset) -> PsysResult<()> {
        let extension = self.extension_start().ok_or(PsysError::InvalidArgument)?;
        self.check_gates(LATE_BINDING_PARENT_STATES)?;
        if chn as usize >= self.model.n_dev_chn() {
            return Err(PsysError::InvalidArgument);
        }
        let layout = ExtensionLayout::for_model(self.model);
        return record::write_u16(
            self.arena,
            extension + layout.dev_chn_offset + 2 * chn as usize,
            offset.0,
        );
    }

    pub fn clear_dev_chn(&mut self, chn: DevChnId) -> PsysResult<()> {
        let result = self.unbind_dev_chn(chn);
        return logged(
            &format!("clear dev chn {}", self.model.dev_chn_name(chn)),
            self.offset,
            result,
        );
    }

    fn unbind_dev_chn(&mut self, chn: DevChnId) -> PsysResult<()> {
        let extension = match self.extension_start() {
            Some(extension) => extension,
            None => return Ok(()),
        };
        self.check_gates(CLEAR_PARENT_STATES)?;
        if chn as usize >= self.model.n_dev_chn() {
            return Err(PsysError::InvalidArgument);
        }
        let layout = ExtensionLayout::for_model(self.model);
        return record::write_u16(
            self.arena,
            extension + layout.dev_chn_offset + 2 * chn as usize,
            ResourceOffset::INVALID.0,
        );
    }

    pub fn set_dfm_port_bitmap(&mut self, port: DfmPortId, bitmap: ResourceBitmap) -> PsysResult<()> {
        let layout = ExtensionLayout::for_model(self.model);
        let result = self.write_dfm_bitmap(layout.dfm_port_bitmap, port, bitmap);
        return logged(
            &format!("set dfm port {} bitmap {:#010x}", port, bitmap.0),
            self.offset,
            result,
        );
    }

    pub fn set_dfm_active_port_bitmap(
        &mut self,
        port: DfmPortId,
        bitmap: ResourceBitmap,
    ) -> PsysResult<()> {
        let layout = ExtensionLayout::for_model(self.model);
        let result = self.write_dfm_bitmap(layout.dfm_active_port_bitmap, port, bitmap);
        return logged(
            &format!("set dfm port {} active bitmap {:#010x}", port, bitmap.0),
            self.offset,
            result,
        );
    }

    fn write_dfm_bitmap(
        &mut self,
        array: usize,
        port: DfmPortId,
        bitmap: ResourceBitmap,
    ) -> PsysResult<()> {
        let extension = match self.extension_start() {
            Some(extension) => extension,
            // nothing to record for a process without DFM needs
            None if bitmap.is_empty() => return Ok(()),
            None => return Err(PsysError::InvalidArgument),
        };
        self.check_gates(LATE_BINDING_PARENT_STATES)?;
        if port as usize >= self.model.n_dfm_port() {
            return Err(PsysError::InvalidArgument);
        }
        return record::write_u32(self.arena, extension + array + 4 * port as usize, bitmap.0);
    }

    /// Reset every binding of the process, releasing its cell from the parent.
    pub fn clear_all(&mut self) -> PsysResult<()> {
        let result = self.clear_all_unlogged();
        return logged("clear all", self.offset, result);
    }

    fn clear_all_unlogged(&mut self) -> PsysResult<()> {
        let process = self.as_process();
        if !matches!(process.state(), ProcessState::Created | ProcessState::Ready) {
            return Err(PsysError::InvalidState);
        }
        let parent = process.parent();
        if let Some(parent) = parent {
            if process_group::state_at(self.arena, parent) == Some(ProcessGroupState::Running) {
                return Err(PsysError::InvalidState);
            }
        }
        let held = process.cells_bitmap();

        if let Some(extension) = self.extension_start() {
            let layout = ExtensionLayout::for_model(self.model);
            let n_dfm = self.model.n_dfm_port();
            let n_data = self.model.n_data_mem_type;
            record::fill(self.arena, extension + layout.dfm_port_bitmap, 8 * n_dfm, 0)?;
            record::fill(self.arena, extension + layout.ext_mem_offset, 2 * n_data, 0xFF)?;
            record::fill(
                self.arena,
                extension + layout.dev_chn_offset,
                2 * self.model.n_dev_chn(),
                0xFF,
            )?;
            let none = self.model.encode_mem(MemId::NONE);
            record::fill(self.arena, extension + layout.ext_mem_id, n_data, none)?;
        }
        if let Some(parent) = parent {
            let bitmap = self.parent_bitmap(parent)?;
            process_group::set_resource_bitmap_at(self.arena, parent, bitmap.clear(held))?;
        }
        for slot in 0..MAX_CELLS_PER_PROCESS {
            let raw = self.model.encode_cell(CellId::NONE);
            self.write_u8(field::CELLS + slot, raw)?;
        }
        return Ok(());
    }
}

#[cfg(test)]
mod process_tests;
