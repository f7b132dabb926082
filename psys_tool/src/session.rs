//! Bring a process group up from a manifest, the way a driver would for one stream.

use crate::config::PsysConfig;
use log::{debug, info, warn};
use psys_commons::{
    CellId, DevChnId, DfmPortId, MemId, MemTypeId, PsysError, PsysResult, ResourceOffset,
    VAddress,
};
use psys_dynamic::{
    enqueue::{enqueue_buffer_set, BufferSetQueue},
    manifest::{ProgramManifest, TerminalType},
    resource_model::CellType,
    BufferSet, BufferState, KernelBitmap, ProcessGroup, ProcessGroupCmd, ProcessGroupState,
    ProgramGroupManifest, ProgramGroupParam, ProtocolVersion, ResourceBitmap, ResourceModel,
    TerminalBufferAdmission,
};
use std::path::Path;

/// Group state a session drives to before it stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum Stage {
    Ready,
    Blocked,
    Started,
    Running,
    Stopped,
}

impl Stage {
    pub fn state(self) -> ProcessGroupState {
        return match self {
            Stage::Ready => ProcessGroupState::Ready,
            Stage::Blocked => ProcessGroupState::Blocked,
            Stage::Started => ProcessGroupState::Started,
            Stage::Running => ProcessGroupState::Running,
            Stage::Stopped => ProcessGroupState::Stopped,
        };
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// kernels to enable, all manifest kernels when `None`
    pub kernels: Option<KernelBitmap>,
    pub protocol: ProtocolVersion,
    pub until: Stage,
}

pub fn load_manifest(path: &Path) -> PsysResult<ProgramGroupManifest> {
    let buffer = std::fs::read(path).map_err(|err| {
        warn!("could not read manifest {:?}: {}", path, err);
        PsysError::FileError
    })?;
    return serde_json::from_slice(&buffer).map_err(|err| {
        warn!("manifest {:?} is malformed: {}", path, err);
        PsysError::MalformedConfig
    });
}

pub fn group_param(
    config: &PsysConfig,
    manifest: &ProgramGroupManifest,
    options: &SessionOptions,
) -> ProgramGroupParam {
    let mut param = ProgramGroupParam::new(options.kernels.unwrap_or(manifest.kernel_bitmap));
    param.fragment_count = config.fragment_count;
    param.protocol_version = options.protocol;
    return param;
}

fn buffer_address(config: &PsysConfig, terminal_index: usize) -> PsysResult<VAddress> {
    return (terminal_index as u32)
        .checked_mul(config.buffer_stride)
        .and_then(|offset| config.buffer_base.0.checked_add(offset))
        .map(VAddress)
        .ok_or(PsysError::CapacityExceeded);
}

/// Connect one buffer to every terminal, inputs full and outputs empty.
fn attach_buffers(group: &mut ProcessGroup, config: &PsysConfig) -> PsysResult<()> {
    let terminals: Vec<(usize, Option<TerminalType>)> = group
        .terminals()
        .map(|terminal| (terminal.terminal_index() as usize, terminal.terminal_type()))
        .collect();
    for (terminal_index, terminal_type) in terminals {
        let buffer_state = match terminal_type {
            Some(terminal_type) if terminal_type.is_input() => BufferState::Full,
            Some(_) => BufferState::Empty,
            None => return Err(PsysError::InvalidState),
        };
        group.attach_buffer(
            terminal_index,
            buffer_address(config, terminal_index)?,
            buffer_state,
        )?;
    }
    return Ok(());
}

fn pick_cell(
    model: &ResourceModel,
    taken: ResourceBitmap,
    cell_type: Option<CellType>,
) -> Option<CellId> {
    return (0..model.n_cell())
        .map(|index| CellId(index as u8))
        .filter(|cell| taken.is_clear(model.cell_bit_mask(*cell)))
        .find(|cell| cell_type.map_or(true, |wanted| model.cell_type(*cell) == Some(wanted)));
}

/// A memory of type `mem_type` the process on `cell` may bind with `size` bytes.
fn pick_mem(model: &ResourceModel, cell: CellId, mem_type: MemTypeId, size: u16) -> Option<MemId> {
    return (0..model.n_mem())
        .map(|index| MemId(index as u8))
        .filter(|mem| model.mem_type(*mem) == Some(mem_type) && model.mem_max_size(*mem) >= size)
        .find(|mem| !model.is_cell_mem(cell, *mem) || model.is_external_mem_type(mem_type));
}

fn assign_process(
    group: &mut ProcessGroup,
    process_index: usize,
    program: &ProgramManifest,
) -> PsysResult<()> {
    let model = group.model();
    let taken = group.resource_bitmap();
    let mut process = group
        .process_mut(process_index)
        .ok_or(PsysError::InvalidArgument)?;
    let mut cell = process.as_process().cell();
    if cell.is_none() {
        cell = pick_cell(model, taken, program.cell_type).ok_or(PsysError::ResourceUnavailable)?;
        process.set_cell(cell)?;
    }
    for (mem_type, size) in program.ext_mem_size.iter().enumerate() {
        if *size == 0 {
            continue;
        }
        let mem = pick_mem(model, cell, mem_type as MemTypeId, *size)
            .ok_or(PsysError::ResourceUnavailable)?;
        process.set_ext_mem(mem, ResourceOffset(0))?;
    }
    for (chn, size) in program.dev_chn_size.iter().enumerate() {
        if *size != 0 {
            process.set_dev_chn(chn as DevChnId, ResourceOffset(0))?;
        }
    }
    for (port, bitmap) in program.dfm_port_bitmap.iter().enumerate() {
        process.set_dfm_port_bitmap(port as DfmPortId, ResourceBitmap(*bitmap))?;
    }
    for (port, bitmap) in program.dfm_active_port_bitmap.iter().enumerate() {
        process.set_dfm_active_port_bitmap(port as DfmPortId, ResourceBitmap(*bitmap))?;
    }
    return Ok(());
}

/// Give every process a cell and bind the external resources its program asks for.
pub fn assign_resources(group: &mut ProcessGroup, manifest: &ProgramGroupManifest) -> PsysResult<()> {
    for process_index in 0..group.process_count() as usize {
        let program_index = group
            .process(process_index)
            .ok_or(PsysError::InvalidRead)?
            .program_index() as usize;
        let program = manifest
            .program(program_index)
            .ok_or(PsysError::InvalidArgument)?;
        assign_process(group, process_index, program)?;
    }
    debug!(
        "group {} holds resources {:#010x}",
        group.program_group_id(),
        group.resource_bitmap().0
    );
    return Ok(());
}

/// Submit one frame worth of buffers for a running group.
pub fn enqueue_frame(
    group: &ProcessGroup,
    config: &PsysConfig,
    queue: &mut dyn BufferSetQueue,
) -> PsysResult<()> {
    let mut buffer_set = BufferSet::create(group.ipu_virtual_address(), group.terminal_count() as u16)?;
    buffer_set.set_token(group.token())?;
    buffer_set.set_kernel_enable_bitmap(group.kernel_bitmap())?;
    for terminal_index in 0..group.terminal_count() as usize {
        buffer_set.set_buffer(terminal_index, buffer_address(config, terminal_index)?)?;
    }
    return enqueue_buffer_set(group, &buffer_set, 0, &TerminalBufferAdmission, queue);
}

/// Create the group for `manifest` and drive it to `options.until`.
pub fn run_session(
    config: &PsysConfig,
    manifest: &ProgramGroupManifest,
    options: &SessionOptions,
    queue: &mut dyn BufferSetQueue,
) -> PsysResult<ProcessGroup> {
    let param = group_param(config, manifest, options);
    let mut group = ProcessGroup::create(config.generation.model(), manifest, &param)?;
    group.set_token(u64::from(manifest.program_group_id) + 1)?;
    group.set_ipu_virtual_address(config.buffer_base)?;
    attach_buffers(&mut group, config)?;

    let admission = TerminalBufferAdmission;
    if options.until >= Stage::Blocked {
        group.exec_cmd(ProcessGroupCmd::Submit, &admission)?;
        assign_resources(&mut group, manifest)?;
    }
    if options.until >= Stage::Started {
        group.exec_cmd(ProcessGroupCmd::Start, &admission)?;
    }
    if options.until >= Stage::Running {
        group.exec_cmd(ProcessGroupCmd::Run, &admission)?;
        if group.protocol_version() == Some(ProtocolVersion::Ppg) {
            enqueue_frame(&group, config, queue)?;
        }
    }
    if options.until >= Stage::Stopped {
        group.exec_cmd(ProcessGroupCmd::Stop, &admission)?;
    }
    info!(
        "group {} reached {:?}",
        group.program_group_id(),
        group.state()
    );
    return Ok(group);
}

#[cfg(test)]
mod tests {
    use super::*;
    use psys_dynamic::{enqueue::RecordingQueue, Generation};

    fn isp_pipeline() -> ProgramGroupManifest {
        return serde_json::from_str(include_str!("../../demos/isp_pipeline.json"))
            .expect("demo manifest should parse");
    }

    fn options(protocol: ProtocolVersion, until: Stage) -> SessionOptions {
        return SessionOptions {
            kernels: None,
            protocol,
            until,
        };
    }

    #[test]
    fn pipeline_runs_with_resources_bound() {
        let manifest = isp_pipeline();
        let config = PsysConfig::default();
        let mut queue = RecordingQueue::new();
        let group = run_session(
            &config,
            &manifest,
            &options(ProtocolVersion::Legacy, Stage::Running),
            &mut queue,
        )
        .expect("session should reach running");
        assert_eq!(ProcessGroupState::Running, group.state());
        assert!(queue.entries.is_empty());
        let model = Generation::Ipu6ep.model();
        for process in group.processes() {
            assert!(!process.cell().is_none());
        }
        // scalar processor is fixed, exclusive super takes the first free ISA cell
        assert_eq!(CellId(0), group.process(0).expect("scalar").cell());
        assert_eq!(Some(CellType::AccIsa), model.cell_type(group.process(1).expect("isa").cell()));
        let vector = group.process(2).expect("vector process should exist");
        assert_eq!(CellId(1), vector.cell());
        assert_eq!(MemId(1), vector.ext_mem_id(0));
        // DMEM3 is internal to the vector processor, DMEM0 is the first other DMEM
        assert_eq!(MemId(5), vector.ext_mem_id(3));
        assert_eq!(ResourceOffset(0), vector.dev_chn_offset(1));
        assert_eq!(ResourceBitmap(3), vector.dfm_port_bitmap(2));
        assert!(group.is_valid(&manifest));
    }

    #[test]
    fn ppg_session_enqueues_a_frame() {
        let manifest = isp_pipeline();
        let config = PsysConfig::default();
        let mut queue = RecordingQueue::new();
        let group = run_session(
            &config,
            &manifest,
            &options(ProtocolVersion::Ppg, Stage::Running),
            &mut queue,
        )
        .expect("session should reach running");
        assert_eq!(1, queue.entries.len());
        assert_eq!(group.token(), queue.entries[0].1);
    }

    #[test]
    fn session_stops_at_requested_stage() {
        let manifest = isp_pipeline();
        let mut queue = RecordingQueue::new();
        let group = run_session(
            &PsysConfig::default(),
            &manifest,
            &options(ProtocolVersion::Legacy, Stage::Ready),
            &mut queue,
        )
        .expect("session should reach ready");
        assert_eq!(ProcessGroupState::Ready, group.state());
        // only the fixed cell is claimed before submit
        assert_eq!(ResourceBitmap(1), group.resource_bitmap());
    }

    #[test]
    fn missing_manifest_is_a_file_error() {
        assert_eq!(
            PsysError::FileError,
            load_manifest(Path::new("/nonexistent/manifest.json"))
                .expect_err("missing file should not load")
        );
    }
}
