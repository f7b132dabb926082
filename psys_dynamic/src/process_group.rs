//! Process groups: one relocatable arena holding a pipeline instance.
//!
//! The arena starts with the group header, followed by the process offset table, the
//! terminal offset table, the terminal records and the process records. Every record
//! refers to the header through a signed offset and the tables hold unsigned offsets
//! from the start of the arena, so the whole buffer can be handed to firmware as is.

use crate::{
    admission::AdmissionControl,
    bitmap::{KernelBitmap, ResourceBitmap},
    layout::LayoutWriter,
    manifest::{ProgramGroupManifest, ProgramGroupParam, ProtocolVersion},
    process::{self, Process, ProcessMut},
    record,
    resource_model::ResourceModel,
    terminal::{self, BufferState, Terminal, TERMINAL_SIZE},
};
use log::{debug, warn};
use psys_commons::{BarrierId, ProgramGroupId, PsysError, PsysResult, VAddress};
use std::fmt;

pub const PROCESS_GROUP_HEADER_SIZE: usize = 80;
/// Alignment of the offset tables and of every record in the arena.
pub const RECORD_ALIGNMENT: usize = 8;
/// Queues a group can enqueue buffer sets on unless configured otherwise.
pub const DEFAULT_NUM_QUEUES: u8 = 1;

mod field {
    pub const TOKEN: usize = 0;
    pub const PRIVATE_TOKEN: usize = 8;
    pub const ROUTING_BITMAP: usize = 16;
    pub const KERNEL_BITMAP: usize = 32;
    pub const SIZE: usize = 48;
    pub const PROGRAM_GROUP_ID: usize = 52;
    pub const IPU_VIRTUAL_ADDRESS: usize = 56;
    pub const RESOURCE_BITMAP: usize = 60;
    pub const FRAGMENT_COUNT: usize = 64;
    pub const FRAGMENT_STATE: usize = 66;
    pub const FRAGMENT_LIMIT: usize = 68;
    pub const PROCESSES_OFFSET: usize = 70;
    pub const TERMINALS_OFFSET: usize = 72;
    pub const STATE: usize = 74;
    pub const PROCESS_COUNT: usize = 75;
    pub const TERMINAL_COUNT: usize = 76;
    pub const PROTOCOL_VERSION: usize = 77;
    pub const BASE_QUEUE_ID: usize = 78;
    pub const NUM_QUEUES: usize = 79;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessGroupState {
    Created = 0,
    Ready = 1,
    Blocked = 2,
    Started = 3,
    Running = 4,
    Stopped = 5,
    Error = 6,
}

impl ProcessGroupState {
    pub const fn from_raw(raw: u8) -> Option<Self> {
        return match raw {
            0 => Some(ProcessGroupState::Created),
            1 => Some(ProcessGroupState::Ready),
            2 => Some(ProcessGroupState::Blocked),
            3 => Some(ProcessGroupState::Started),
            4 => Some(ProcessGroupState::Running),
            5 => Some(ProcessGroupState::Stopped),
            6 => Some(ProcessGroupState::Error),
            _ => None,
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessGroupCmd {
    Nop = 0,
    Submit = 1,
    Attach = 2,
    Detach = 3,
    Start = 4,
    Disown = 5,
    Run = 6,
    Stop = 7,
    Suspend = 8,
    Resume = 9,
    Abort = 10,
    Reset = 11,
}

impl ProcessGroupCmd {
    /// State after applying the command in `state`, `None` if the command is illegal there.
    /// Admission checks for submit and start come on top of this table.
    pub const fn next_state(self, state: ProcessGroupState) -> Option<ProcessGroupState> {
        use ProcessGroupState::*;
        if matches!(state, Error) {
            return None;
        }
        return match (self, state) {
            (ProcessGroupCmd::Nop, _) | (ProcessGroupCmd::Disown, _) => Some(state),
            (ProcessGroupCmd::Submit, Ready) => Some(Blocked),
            (ProcessGroupCmd::Attach, Ready) | (ProcessGroupCmd::Detach, Ready) => Some(Ready),
            (ProcessGroupCmd::Start, Blocked) => Some(Started),
            (ProcessGroupCmd::Run, Started) => Some(Running),
            (ProcessGroupCmd::Stop, Running) => Some(Stopped),
            (ProcessGroupCmd::Suspend, Running) => Some(Started),
            (ProcessGroupCmd::Resume, Started) => Some(Running),
            (ProcessGroupCmd::Abort, Running | Started) => Some(Stopped),
            (ProcessGroupCmd::Reset, Running | Started | Stopped) => Some(Blocked),
            _ => None,
        };
    }
}

pub(crate) fn state_at(arena: &[u8], group: usize) -> Option<ProcessGroupState> {
    return record::read_u8(arena, group.checked_add(field::STATE)?)
        .and_then(ProcessGroupState::from_raw);
}

pub(crate) fn resource_bitmap_at(arena: &[u8], group: usize) -> Option<ResourceBitmap> {
    return record::read_u32(arena, group.checked_add(field::RESOURCE_BITMAP)?)
        .map(ResourceBitmap);
}

pub(crate) fn set_resource_bitmap_at(
    arena: &mut [u8],
    group: usize,
    bitmap: ResourceBitmap,
) -> PsysResult<()> {
    return record::write_u32(arena, group + field::RESOURCE_BITMAP, bitmap.0);
}

/// Manifest programs and terminals that are instantiated for one parameter set.
struct GroupPlan {
    programs: Vec<usize>,
    terminals: Vec<usize>,
}

impl GroupPlan {
    fn new(
        model: &ResourceModel,
        manifest: &ProgramGroupManifest,
        param: &ProgramGroupParam,
    ) -> PsysResult<Self> {
        manifest.validate(model)?;
        let enable = param.kernel_enable_bitmap;
        if enable.is_empty() || !enable.is_subset_of(manifest.kernel_bitmap) {
            return Err(PsysError::InvalidArgument);
        }
        if param.fragment_count == 0 {
            return Err(PsysError::InvalidArgument);
        }
        let programs: Vec<usize> = manifest.enabled_programs(enable).collect();
        let terminals: Vec<usize> = manifest.enabled_terminals(enable).collect();
        if programs.is_empty() || terminals.is_empty() {
            return Err(PsysError::InvalidArgument);
        }
        if programs.len() > u8::MAX as usize || terminals.len() > u8::MAX as usize {
            return Err(PsysError::CapacityExceeded);
        }
        return Ok(GroupPlan {
            programs,
            terminals,
        });
    }
}

fn table_entry(offset: usize) -> PsysResult<u16> {
    return u16::try_from(offset).map_err(|_| PsysError::CapacityExceeded);
}

/// The one walk over a group arena, shared by sizing and population.
fn layout_group(
    writer: &mut LayoutWriter,
    model: &'static ResourceModel,
    manifest: &ProgramGroupManifest,
    param: &ProgramGroupParam,
    plan: &GroupPlan,
) -> PsysResult<()> {
    let header = writer.reserve(PROCESS_GROUP_HEADER_SIZE, RECORD_ALIGNMENT);
    let processes_table = writer.reserve(2 * plan.programs.len(), RECORD_ALIGNMENT);
    let terminals_table = writer.reserve(2 * plan.terminals.len(), RECORD_ALIGNMENT);

    for (terminal_index, manifest_index) in plan.terminals.iter().enumerate() {
        let terminal_manifest = manifest
            .terminal(*manifest_index)
            .ok_or(PsysError::InvalidArgument)?;
        let start = writer.reserve(TERMINAL_SIZE, RECORD_ALIGNMENT);
        terminal::layout_terminal(
            writer,
            start,
            header,
            terminal_manifest,
            *manifest_index,
            terminal_index,
        )?;
        writer.put_u16(terminals_table + 2 * terminal_index, table_entry(start)?)?;
    }
    for (process_index, program_index) in plan.programs.iter().enumerate() {
        let size = process::process_sizeof(model, manifest, param, *program_index)?;
        let start = writer.reserve(size, RECORD_ALIGNMENT);
        if let Some(region) = writer.region_mut(start, size)? {
            process::populate_process(model, region, manifest, param, *program_index)?;
        }
        writer.put_u16(processes_table + 2 * process_index, table_entry(start)?)?;
    }
    writer.align(RECORD_ALIGNMENT);
    let size = u32::try_from(writer.position() - header).map_err(|_| PsysError::CapacityExceeded)?;

    writer.put_u64(header + field::TOKEN, 0)?;
    writer.put_u64(header + field::PRIVATE_TOKEN, 0)?;
    writer.put_u128(header + field::ROUTING_BITMAP, 0)?;
    writer.put_u128(header + field::KERNEL_BITMAP, param.kernel_enable_bitmap.0)?;
    writer.put_u32(header + field::SIZE, size)?;
    writer.put_u32(header + field::PROGRAM_GROUP_ID, manifest.program_group_id)?;
    writer.put_u32(header + field::IPU_VIRTUAL_ADDRESS, VAddress::NULL.0)?;
    writer.put_u32(header + field::RESOURCE_BITMAP, ResourceBitmap::EMPTY.0)?;
    writer.put_u16(header + field::FRAGMENT_COUNT, param.fragment_count)?;
    writer.put_u16(header + field::FRAGMENT_STATE, 0)?;
    writer.put_u16(header + field::FRAGMENT_LIMIT, param.fragment_count)?;
    writer.put_u16(header + field::PROCESSES_OFFSET, table_entry(processes_table)?)?;
    writer.put_u16(header + field::TERMINALS_OFFSET, table_entry(terminals_table)?)?;
    writer.put_u8(header + field::STATE, ProcessGroupState::Created as u8)?;
    writer.put_u8(header + field::PROCESS_COUNT, plan.programs.len() as u8)?;
    writer.put_u8(header + field::TERMINAL_COUNT, plan.terminals.len() as u8)?;
    writer.put_u8(header + field::PROTOCOL_VERSION, param.protocol_version as u8)?;
    writer.put_u8(header + field::BASE_QUEUE_ID, 0)?;
    writer.put_u8(header + field::NUM_QUEUES, DEFAULT_NUM_QUEUES)?;
    return Ok(());
}

/// Bytes needed for the group arena of `manifest` under `param`.
pub fn process_group_sizeof(
    model: &'static ResourceModel,
    manifest: &ProgramGroupManifest,
    param: &ProgramGroupParam,
) -> PsysResult<usize> {
    let plan = GroupPlan::new(model, manifest, param)?;
    let mut writer = LayoutWriter::measure();
    layout_group(&mut writer, model, manifest, param, &plan)?;
    return writer.finish();
}

fn logged<T>(operation: &str, program_group_id: ProgramGroupId, result: PsysResult<T>) -> PsysResult<T> {
    match &result {
        Ok(_) => debug!("process group {}: {}", program_group_id, operation),
        Err(err) => warn!(
            "process group {}: {} failed: {:?}",
            program_group_id, operation, err
        ),
    }
    return result;
}

pub struct ProcessGroup {
    model: &'static ResourceModel,
    buffer: Vec<u8>,
}

impl ProcessGroup {
    /// Build the group arena for `manifest` under `param` and bring it to `Ready`.
    pub fn create(
        model: &'static ResourceModel,
        manifest: &ProgramGroupManifest,
        param: &ProgramGroupParam,
    ) -> PsysResult<Self> {
        let result = Self::build(model, manifest, param);
        let operation = match &result {
            Ok(group) => format!(
                "created with {} processes and {} terminals ({} bytes)",
                group.process_count(),
                group.terminal_count(),
                group.size()
            ),
            Err(_) => String::from("create"),
        };
        return logged(&operation, manifest.program_group_id, result);
    }

    fn build(
        model: &'static ResourceModel,
        manifest: &ProgramGroupManifest,
        param: &ProgramGroupParam,
    ) -> PsysResult<Self> {
        let plan = GroupPlan::new(model, manifest, param)?;
        let mut writer = LayoutWriter::measure();
        layout_group(&mut writer, model, manifest, param, &plan)?;
        let size = writer.finish()?;

        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(size)
            .map_err(|_| PsysError::OutOfMemory)?;
        buffer.resize(size, 0);
        let mut writer = LayoutWriter::populate(&mut buffer);
        layout_group(&mut writer, model, manifest, param, &plan)?;
        writer.finish()?;

        let mut group = ProcessGroup { model, buffer };
        group.link_processes(manifest, &plan)?;
        group.write_state(ProcessGroupState::Ready)?;
        return Ok(group);
    }

    /// Attach every process, resolve its dependencies to group indices and claim fixed cells.
    fn link_processes(&mut self, manifest: &ProgramGroupManifest, plan: &GroupPlan) -> PsysResult<()> {
        for (process_index, program_index) in plan.programs.iter().enumerate() {
            let program = manifest
                .program(*program_index)
                .ok_or(PsysError::InvalidArgument)?;
            let mut process = self.process_mut(process_index).ok_or(PsysError::InvalidRead)?;
            process.set_parent(0)?;
            for (slot, dependency) in program.cell_dependencies.iter().enumerate() {
                let resolved = plan
                    .programs
                    .iter()
                    .position(|enabled| *enabled == *dependency as usize);
                if let Some(resolved) = resolved {
                    process.set_cell_dependency(slot, resolved as u8)?;
                }
            }
            for (slot, dependency) in program.terminal_dependencies.iter().enumerate() {
                let resolved = plan
                    .terminals
                    .iter()
                    .position(|enabled| *enabled == *dependency as usize);
                if let Some(resolved) = resolved {
                    process.set_terminal_dependency(slot, resolved as u8)?;
                }
            }
            if let Some(cell) = program.fixed_cell() {
                process.set_cell(cell)?;
            }
        }
        return Ok(());
    }

    /// Adopt a serialized group arena after checking it against `manifest`.
    pub fn from_bytes(
        model: &'static ResourceModel,
        bytes: &[u8],
        manifest: &ProgramGroupManifest,
    ) -> PsysResult<Self> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(bytes.len())
            .map_err(|_| PsysError::OutOfMemory)?;
        buffer.extend_from_slice(bytes);
        let group = ProcessGroup { model, buffer };
        if !group.is_valid(manifest) {
            warn!(
                "rejected {} byte arena for program group {}",
                bytes.len(),
                manifest.program_group_id
            );
            return Err(PsysError::InvalidArgument);
        }
        return Ok(group);
    }

    pub fn as_bytes(&self) -> &[u8] {
        return &self.buffer;
    }

    pub fn model(&self) -> &'static ResourceModel {
        return self.model;
    }

    fn log<T>(&self, operation: &str, result: PsysResult<T>) -> PsysResult<T> {
        return logged(operation, self.program_group_id(), result);
    }

    fn write_state(&mut self, state: ProcessGroupState) -> PsysResult<()> {
        return record::write_u8(&mut self.buffer, field::STATE, state as u8);
    }

    pub fn token(&self) -> u64 {
        return record::read_u64(&self.buffer, field::TOKEN).unwrap_or(0);
    }

    pub fn private_token(&self) -> u64 {
        return record::read_u64(&self.buffer, field::PRIVATE_TOKEN).unwrap_or(0);
    }

    pub fn routing_bitmap(&self) -> u128 {
        return record::read_u128(&self.buffer, field::ROUTING_BITMAP).unwrap_or(0);
    }

    /// Kernels enabled for this instance.
    pub fn kernel_bitmap(&self) -> KernelBitmap {
        return record::read_u128(&self.buffer, field::KERNEL_BITMAP)
            .map_or(KernelBitmap::EMPTY, KernelBitmap);
    }

    pub fn size(&self) -> usize {
        return record::read_u32(&self.buffer, field::SIZE).map_or(0, |size| size as usize);
    }

    pub fn program_group_id(&self) -> ProgramGroupId {
        return record::read_u32(&self.buffer, field::PROGRAM_GROUP_ID).unwrap_or(0);
    }

    pub fn ipu_virtual_address(&self) -> VAddress {
        return record::read_u32(&self.buffer, field::IPU_VIRTUAL_ADDRESS)
            .map_or(VAddress::NULL, VAddress);
    }

    pub fn resource_bitmap(&self) -> ResourceBitmap {
        return resource_bitmap_at(&self.buffer, 0).unwrap_or(ResourceBitmap::EMPTY);
    }

    pub fn fragment_count(&self) -> u16 {
        return record::read_u16(&self.buffer, field::FRAGMENT_COUNT).unwrap_or(0);
    }

    pub fn fragment_state(&self) -> u16 {
        return record::read_u16(&self.buffer, field::FRAGMENT_STATE).unwrap_or(0);
    }

    pub fn fragment_limit(&self) -> u16 {
        return record::read_u16(&self.buffer, field::FRAGMENT_LIMIT).unwrap_or(0);
    }

    pub fn state(&self) -> ProcessGroupState {
        return state_at(&self.buffer, 0).unwrap_or(ProcessGroupState::Error);
    }

    pub fn process_count(&self) -> u8 {
        return record::read_u8(&self.buffer, field::PROCESS_COUNT).unwrap_or(0);
    }

    pub fn terminal_count(&self) -> u8 {
        return record::read_u8(&self.buffer, field::TERMINAL_COUNT).unwrap_or(0);
    }

    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        return record::read_u8(&self.buffer, field::PROTOCOL_VERSION)
            .and_then(ProtocolVersion::from_raw);
    }

    pub fn base_queue_id(&self) -> u8 {
        return record::read_u8(&self.buffer, field::BASE_QUEUE_ID).unwrap_or(0);
    }

    pub fn num_queues(&self) -> u8 {
        return record::read_u8(&self.buffer, field::NUM_QUEUES).unwrap_or(0);
    }

    fn table_offset(&self, table_field: usize, count: u8, index: usize) -> Option<usize> {
        if index >= count as usize {
            return None;
        }
        let table = record::read_u16(&self.buffer, table_field)? as usize;
        return record::read_u16(&self.buffer, table + 2 * index).map(usize::from);
    }

    pub fn process(&self, index: usize) -> Option<Process<'_>> {
        let offset = self.table_offset(field::PROCESSES_OFFSET, self.process_count(), index)?;
        return Some(Process::new(self.model, &self.buffer, offset));
    }

    pub fn process_mut(&mut self, index: usize) -> Option<ProcessMut<'_>> {
        let offset = self.table_offset(field::PROCESSES_OFFSET, self.process_count(), index)?;
        return Some(ProcessMut::new(self.model, &mut self.buffer, offset));
    }

    pub fn processes(&self) -> impl Iterator<Item = Process<'_>> {
        return (0..self.process_count() as usize).filter_map(move |index| self.process(index));
    }

    pub fn terminal(&self, index: usize) -> Option<Terminal<'_>> {
        let offset = self.table_offset(field::TERMINALS_OFFSET, self.terminal_count(), index)?;
        return Some(Terminal::new(&self.buffer, offset));
    }

    pub fn terminals(&self) -> impl Iterator<Item = Terminal<'_>> {
        return (0..self.terminal_count() as usize).filter_map(move |index| self.terminal(index));
    }

    pub fn exec_cmd(
        &mut self,
        cmd: ProcessGroupCmd,
        admission: &dyn AdmissionControl,
    ) -> PsysResult<()> {
        let state = self.state();
        let result = self.apply_cmd(cmd, state, admission);
        return self.log(&format!("{:?} in {:?}", cmd, state), result);
    }

    fn apply_cmd(
        &mut self,
        cmd: ProcessGroupCmd,
        state: ProcessGroupState,
        admission: &dyn AdmissionControl,
    ) -> PsysResult<()> {
        let next = cmd.next_state(state).ok_or(PsysError::InvalidState)?;
        let admitted = match cmd {
            ProcessGroupCmd::Submit => admission.can_submit(self),
            ProcessGroupCmd::Start => admission.can_start(self),
            _ => true,
        };
        if !admitted {
            return Err(PsysError::ResourceUnavailable);
        }
        return self.write_state(next);
    }

    pub fn set_token(&mut self, token: u64) -> PsysResult<()> {
        let result = if token == 0 {
            Err(PsysError::InvalidArgument)
        } else {
            record::write_u64(&mut self.buffer, field::TOKEN, token)
        };
        return self.log("set token", result);
    }

    pub fn set_private_token(&mut self, token: u64) -> PsysResult<()> {
        let result = if token == 0 {
            Err(PsysError::InvalidArgument)
        } else {
            record::write_u64(&mut self.buffer, field::PRIVATE_TOKEN, token)
        };
        return self.log("set private token", result);
    }

    pub fn set_routing_bitmap(&mut self, routing_bitmap: u128) -> PsysResult<()> {
        let result = record::write_u128(&mut self.buffer, field::ROUTING_BITMAP, routing_bitmap);
        return self.log("set routing bitmap", result);
    }

    pub fn set_ipu_virtual_address(&mut self, address: VAddress) -> PsysResult<()> {
        let result = record::write_u32(&mut self.buffer, field::IPU_VIRTUAL_ADDRESS, address.0);
        return self.log("set ipu virtual address", result);
    }

    /// Fragments to process before the group stops, above the current state.
    pub fn set_fragment_limit(&mut self, limit: u16) -> PsysResult<()> {
        let result = if limit <= self.fragment_state() || limit > self.fragment_count() {
            Err(PsysError::InvalidArgument)
        } else {
            record::write_u16(&mut self.buffer, field::FRAGMENT_LIMIT, limit)
        };
        return self.log(&format!("set fragment limit {}", limit), result);
    }

    pub fn set_fragment_state(&mut self, fragment_state: u16) -> PsysResult<()> {
        let result = if fragment_state > self.fragment_count() {
            Err(PsysError::InvalidArgument)
        } else {
            record::write_u16(&mut self.buffer, field::FRAGMENT_STATE, fragment_state)
        };
        return self.log(&format!("set fragment state {}", fragment_state), result);
    }

    pub fn set_base_queue_id(&mut self, queue_id: u8) -> PsysResult<()> {
        let result = record::write_u8(&mut self.buffer, field::BASE_QUEUE_ID, queue_id);
        return self.log("set base queue id", result);
    }

    pub fn set_num_queues(&mut self, num_queues: u8) -> PsysResult<()> {
        let result = record::write_u8(&mut self.buffer, field::NUM_QUEUES, num_queues);
        return self.log("set num queues", result);
    }

    pub fn set_barrier(&mut self, barrier: BarrierId) -> PsysResult<()> {
        let bit = self.model.barrier_bit_mask(barrier);
        let bitmap = self.resource_bitmap();
        let result = if bit.is_empty() || !bitmap.is_clear(bit) {
            Err(PsysError::InvalidArgument)
        } else {
            set_resource_bitmap_at(&mut self.buffer, 0, bitmap.set(bit))
        };
        return self.log(&format!("set barrier {}", barrier), result);
    }

    pub fn clear_barrier(&mut self, barrier: BarrierId) -> PsysResult<()> {
        let bit = self.model.barrier_bit_mask(barrier);
        let bitmap = self.resource_bitmap();
        let result = if bit.is_empty() || !bitmap.is_set(bit) {
            Err(PsysError::InvalidArgument)
        } else {
            set_resource_bitmap_at(&mut self.buffer, 0, bitmap.clear(bit))
        };
        return self.log(&format!("clear barrier {}", barrier), result);
    }

    /// Connect a buffer to terminal `terminal_index`.
    ///
    /// Under the legacy protocol the terminal records the buffer address, under the PPG
    /// protocol the terminal index, since buffers then travel in buffer sets.
    pub fn attach_buffer(
        &mut self,
        terminal_index: usize,
        buffer: VAddress,
        buffer_state: BufferState,
    ) -> PsysResult<()> {
        let result = self.store_buffer(terminal_index, buffer, buffer_state);
        return self.log(
            &format!("attach buffer {:#010x} to terminal {}", buffer.0, terminal_index),
            result,
        );
    }

    pub fn detach_buffer(&mut self, terminal_index: usize) -> PsysResult<()> {
        let result = self.store_buffer(terminal_index, VAddress::NULL, BufferState::Null);
        return self.log(&format!("detach buffer from terminal {}", terminal_index), result);
    }

    fn store_buffer(
        &mut self,
        terminal_index: usize,
        buffer: VAddress,
        buffer_state: BufferState,
    ) -> PsysResult<()> {
        if self.state() != ProcessGroupState::Ready {
            return Err(PsysError::InvalidState);
        }
        let terminal = self.terminal(terminal_index).ok_or(PsysError::InvalidArgument)?;
        let (offset, is_data) = (terminal.offset(), terminal.is_data());
        let stored = match self.protocol_version() {
            Some(ProtocolVersion::Legacy) => buffer.0,
            Some(ProtocolVersion::Ppg) if buffer.is_null() => 0,
            Some(ProtocolVersion::Ppg) => terminal_index as u32,
            None => return Err(PsysError::InvalidState),
        };
        terminal::set_buffer_at(&mut self.buffer, offset, stored)?;
        if is_data {
            terminal::set_buffer_state_at(&mut self.buffer, offset, buffer_state)?;
        }
        return Ok(());
    }

    /// Check the arena against `manifest`, using the kernels the group was built with.
    pub fn is_valid(&self, manifest: &ProgramGroupManifest) -> bool {
        if self.buffer.len() < PROCESS_GROUP_HEADER_SIZE || self.size() != self.buffer.len() {
            return false;
        }
        if self.program_group_id() != manifest.program_group_id {
            return false;
        }
        if ProcessGroupState::from_raw(record::read_u8(&self.buffer, field::STATE).unwrap_or(u8::MAX))
            .is_none()
        {
            return false;
        }
        let enable = self.kernel_bitmap();
        if manifest.enabled_programs(enable).count() != self.process_count() as usize
            || manifest.enabled_terminals(enable).count() != self.terminal_count() as usize
        {
            return false;
        }
        let processes_valid = (0..self.process_count() as usize).all(|index| {
            let process = match self.process(index) {
                Some(process) => process,
                None => return false,
            };
            let program = match manifest.program(process.program_index() as usize) {
                Some(program) => program,
                None => return false,
            };
            process.parent() == Some(0) && process.is_valid(program)
        });
        let terminals_valid = (0..self.terminal_count() as usize).all(|index| {
            self.terminal(index).map_or(false, |terminal| {
                terminal.parent() == Some(0)
                    && terminal.size() == TERMINAL_SIZE
                    && terminal.terminal_index() as usize == index
                    && terminal.offset() + TERMINAL_SIZE <= self.buffer.len()
            })
        });
        return processes_valid && terminals_valid;
    }
}

impl fmt::Display for ProcessGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "process group {}: {:?}, {} bytes, token {:#x}",
            self.program_group_id(),
            self.state(),
            self.size(),
            self.token()
        )?;
        writeln!(
            f,
            "\tkernels {:#034x} routing {:#034x} resources {:#010x}",
            self.kernel_bitmap().0,
            self.routing_bitmap(),
            self.resource_bitmap().0
        )?;
        writeln!(
            f,
            "\tfragments {}/{} (limit {}), {:?} protocol, queues {}..+{}",
            self.fragment_state(),
            self.fragment_count(),
            self.fragment_limit(),
            self.protocol_version(),
            self.base_queue_id(),
            self.num_queues()
        )?;
        for terminal in self.terminals() {
            write!(f, "{}", terminal)?;
        }
        for process in self.processes() {
            write!(f, "{}", process)?;
        }
        return Ok(());
    }
}
