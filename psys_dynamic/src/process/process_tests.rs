use super::*;
use crate::{
    admission::AdmissionControl,
    bitmap::KernelBitmap,
    buffer_set::BufferSet,
    manifest::{ProgramType, TerminalManifest, TerminalType},
    process_group::{ProcessGroup, ProcessGroupCmd},
    resource_model::Generation,
};
use psys_commons::KernelId;

struct AcceptAll;

impl AdmissionControl for AcceptAll {
    fn can_submit(&self, _group: &ProcessGroup) -> bool {
        return true;
    }
    fn can_start(&self, _group: &ProcessGroup) -> bool {
        return true;
    }
    fn can_enqueue(&self, _group: &ProcessGroup, _buffer_set: &BufferSet) -> bool {
        return true;
    }
}

const TRANSFER_VMEM0: MemId = MemId(1);
const DMEM0: MemId = MemId(5);
const DMEM3: MemId = MemId(8);
const SP0: CellId = CellId(0);
const VP0: CellId = CellId(1);

fn program(program_id: u32, kernels: &[KernelId]) -> ProgramManifest {
    return ProgramManifest {
        program_id: ProgramId(program_id),
        program_type: ProgramType::Singular,
        kernel_bitmap: KernelBitmap::from_kernels(kernels),
        cell: None,
        cell_type: None,
        cell_dependencies: Vec::new(),
        terminal_dependencies: vec![0],
        ext_mem_size: Vec::new(),
        dev_chn_size: Vec::new(),
        dfm_port_bitmap: Vec::new(),
        dfm_active_port_bitmap: Vec::new(),
    };
}

/// Program 0 binds external resources, program 1 does not.
fn pipeline() -> ProgramGroupManifest {
    let mut bound = program(100, &[0]);
    bound.ext_mem_size = vec![0x100];
    bound.dev_chn_size = vec![0, 8];
    let mut plain = program(101, &[1]);
    plain.cell_dependencies = vec![0];
    plain.terminal_dependencies = vec![1];
    let terminal = |terminal_type, kernel| TerminalManifest {
        terminal_type,
        kernel_bitmap: KernelBitmap::from_kernels(&[kernel]),
        kernel_id: None,
        section_kernels: Vec::new(),
    };
    return ProgramGroupManifest {
        program_group_id: 1,
        kernel_bitmap: KernelBitmap::from_kernels(&[0, 1]),
        programs: vec![bound, plain],
        terminals: vec![
            terminal(TerminalType::DataIn, 0),
            terminal(TerminalType::DataOut, 1),
        ],
    };
}

fn param() -> ProgramGroupParam {
    return ProgramGroupParam::new(KernelBitmap::from_kernels(&[0, 1]));
}

fn group() -> ProcessGroup {
    return ProcessGroup::create(Generation::Ipu6ep.model(), &pipeline(), &param())
        .expect("group should be created");
}

fn submitted_group() -> ProcessGroup {
    let mut group = group();
    group
        .exec_cmd(ProcessGroupCmd::Submit, &AcceptAll)
        .expect("submit should be accepted");
    return group;
}

#[test]
fn process_command_table() {
    use ProcessCmd::*;
    use ProcessState::*;
    assert_eq!(Some(Ready), Acquire.next_state(Ready));
    assert_eq!(Some(Ready), Release.next_state(Ready));
    assert_eq!(None, Acquire.next_state(Stopped));
    assert_eq!(Some(Started), Start.next_state(Stopped));
    assert_eq!(Some(Running), Load.next_state(Ready));
    assert_eq!(Some(Running), Load.next_state(Started));
    assert_eq!(None, Load.next_state(Running));
    assert_eq!(Some(Stopped), Stop.next_state(Suspended));
    assert_eq!(Some(Suspended), Suspend.next_state(Running));
    assert_eq!(None, Suspend.next_state(Suspended));
    assert_eq!(Some(Running), Resume.next_state(Suspended));
    assert_eq!(Some(Created), Nop.next_state(Created));
    for cmd in [Nop, Acquire, Release, Start, Load, Stop, Suspend, Resume] {
        assert_eq!(None, cmd.next_state(Error));
    }
    for raw in 0..=6 {
        let state = ProcessState::from_raw(raw).expect("raw state should decode");
        assert_eq!(raw, state as u8);
    }
    assert_eq!(None, ProcessState::from_raw(7));
}

#[test]
fn extension_layout_per_generation() {
    let ipu6ep = ExtensionLayout::for_model(Generation::Ipu6ep.model());
    assert_eq!(24, ipu6ep.dfm_active_port_bitmap);
    assert_eq!(48, ipu6ep.ext_mem_offset);
    assert_eq!(60, ipu6ep.dev_chn_offset);
    assert_eq!(70, ipu6ep.ext_mem_id);
    assert_eq!(76, ipu6ep.size);
    assert_eq!(40, ExtensionLayout::for_model(Generation::Ipu6se.model()).size);
}

#[test_log::test]
fn sizeof_matches_population() {
    let model = Generation::Ipu6ep.model();
    let manifest = pipeline();
    for program_index in 0..2 {
        let size = process_sizeof(model, &manifest, &param(), program_index)
            .expect("process should have a size");
        assert_eq!(0, size % BLOCK_ALIGNMENT);
        let mut raw = vec![0u8; size];
        let process = create_process(model, &mut raw, &manifest, &param(), program_index)
            .expect("process should be created");
        let process = process.as_process();
        assert_eq!(size, process.size());
        assert_eq!(ProcessState::Ready, process.state());
        assert_eq!(program_index as u8, process.program_index());
        assert_eq!(CellId::NONE, process.cell());
        assert_eq!(None, process.parent());
        assert_eq!(program_index == 0, process.has_extension());
        assert!(process.is_valid(&manifest.programs[program_index]));
    }
    // header, extension, one terminal dependency
    assert_eq!(
        Ok(16 + 76 + 4),
        process_sizeof(model, &manifest, &param(), 0)
    );
    // header, one cell dependency, one terminal dependency
    assert_eq!(Ok(24), process_sizeof(model, &manifest, &param(), 1));
}

#[test_log::test]
fn fresh_process_reads_sentinels() {
    let model = Generation::Ipu6ep.model();
    let manifest = pipeline();
    let size = process_sizeof(model, &manifest, &param(), 0).expect("process should have a size");
    let mut raw = vec![0u8; size];
    let process = create_process(model, &mut raw, &manifest, &param(), 0)
        .expect("process should be created");
    let process = process.as_process();
    assert_eq!(MemId::NONE, process.ext_mem_id(0));
    assert_eq!(ResourceOffset::INVALID, process.ext_mem_offset(0));
    assert_eq!(ResourceOffset::INVALID, process.dev_chn_offset(1));
    assert_eq!(ResourceBitmap::EMPTY, process.dfm_port_bitmap(0));
    assert_eq!(MemId::NONE, process.ext_mem_id(200));
    assert_eq!(ResourceOffset::INVALID, process.dev_chn_offset(200));
    assert_eq!(Dependency::Absent, process.terminal_dependency(0));
    assert_eq!(Dependency::OutOfRange, process.terminal_dependency(1));
    assert_eq!(Dependency::OutOfRange, process.cell_dependency(0));

    let empty: [u8; 0] = [];
    let missing = Process::new(model, &empty, 0);
    assert_eq!(0, missing.size());
    assert_eq!(ProgramId::INVALID, missing.program_id());
    assert_eq!(ProcessState::Error, missing.state());
    assert_eq!(CellId::NONE, missing.cell());
    assert_eq!(u8::MAX, missing.program_index());
}

#[test_log::test]
fn zero_dependencies_are_rejected() {
    let model = Generation::Ipu6ep.model();
    let mut manifest = pipeline();
    manifest.programs[0].terminal_dependencies.clear();
    assert_eq!(
        Err(PsysError::InvalidArgument),
        process_sizeof(model, &manifest, &param(), 0)
    );
    let mut raw = vec![0xAAu8; 96];
    assert!(create_process(model, &mut raw, &manifest, &param(), 0).is_err());
    assert!(raw.iter().all(|byte| *byte == 0));
}

#[test_log::test]
fn oversized_process_is_rejected() {
    let model = Generation::Ipu6ep.model();
    let mut manifest = pipeline();
    manifest.terminals = (0..250)
        .map(|_| TerminalManifest {
            terminal_type: TerminalType::DataIn,
            kernel_bitmap: KernelBitmap::from_kernels(&[0]),
            kernel_id: None,
            section_kernels: Vec::new(),
        })
        .collect();
    manifest.programs[1].terminal_dependencies = (0..250).collect();
    assert_eq!(
        Err(PsysError::CapacityExceeded),
        process_sizeof(model, &manifest, &param(), 1)
    );
}

#[test_log::test]
fn invalid_program_and_index_are_rejected() {
    let model = Generation::Ipu6ep.model();
    let mut manifest = pipeline();
    assert_eq!(
        Err(PsysError::InvalidArgument),
        process_sizeof(model, &manifest, &param(), 2)
    );
    let only_first = ProgramGroupParam::new(KernelBitmap::from_kernels(&[0]));
    assert_eq!(
        Err(PsysError::InvalidArgument),
        process_sizeof(model, &manifest, &only_first, 1)
    );
    manifest.programs[0].program_id = ProgramId::INVALID;
    assert_eq!(
        Err(PsysError::InvalidArgument),
        process_sizeof(model, &manifest, &param(), 0)
    );
}

#[test_log::test]
fn commands_follow_the_table() {
    let mut group = group();
    let mut process = group.process_mut(0).expect("process 0 should exist");
    process.cmd(ProcessCmd::Acquire).expect("acquire should pass");
    assert_eq!(
        Err(PsysError::InvalidState),
        process.cmd(ProcessCmd::Resume)
    );
    assert_eq!(ProcessState::Ready, process.as_process().state());
    process.cmd(ProcessCmd::Load).expect("load should pass");
    process.cmd(ProcessCmd::Suspend).expect("suspend should pass");
    process.cmd(ProcessCmd::Stop).expect("stop should pass");
    process.cmd(ProcessCmd::Start).expect("start should pass");
    assert_eq!(ProcessState::Started, process.as_process().state());

    process.mark_error().expect("error should be recorded");
    assert_eq!(Err(PsysError::InvalidState), process.cmd(ProcessCmd::Nop));
    assert_eq!(ProcessState::Error, process.as_process().state());
}

#[test_log::test]
fn detached_process_cannot_claim() {
    let model = Generation::Ipu6ep.model();
    let manifest = pipeline();
    let size = process_sizeof(model, &manifest, &param(), 0).expect("process should have a size");
    let mut raw = vec![0u8; size];
    let mut process = create_process(model, &mut raw, &manifest, &param(), 0)
        .expect("process should be created");
    assert_eq!(Err(PsysError::InvalidState), process.set_cell(VP0));
    assert_eq!(
        Err(PsysError::InvalidState),
        process.set_ext_mem(TRANSFER_VMEM0, ResourceOffset(0))
    );
    process.clear_all().expect("clear all should pass while detached");
    assert_eq!(Err(PsysError::InvalidArgument), process.set_parent(0));
}

#[test_log::test]
fn set_and_clear_cell_round_trip() {
    let mut group = submitted_group();
    let before = group.resource_bitmap();
    let mut process = group.process_mut(1).expect("process 1 should exist");
    process.set_cell(SP0).expect("cell should be claimed");
    assert_eq!(SP0, process.as_process().cell());
    assert_eq!(before.set(ResourceBitmap(1)), group.resource_bitmap());

    let mut process = group.process_mut(1).expect("process 1 should exist");
    process.clear_cell().expect("cell should be released");
    assert_eq!(CellId::NONE, process.as_process().cell());
    assert_eq!(before, group.resource_bitmap());

    let mut process = group.process_mut(1).expect("process 1 should exist");
    assert_eq!(Err(PsysError::InvalidArgument), process.clear_cell());
    assert_eq!(Err(PsysError::InvalidArgument), process.set_cell(CellId(29)));
    assert_eq!(before, group.resource_bitmap());
}

#[test_log::test]
fn cells_are_exclusive() {
    let mut group = submitted_group();
    group
        .process_mut(0)
        .expect("process 0 should exist")
        .set_cell(VP0)
        .expect("first claim should pass");
    let held = group.resource_bitmap();
    let mut other = group.process_mut(1).expect("process 1 should exist");
    assert_eq!(Err(PsysError::ResourceConflict), other.set_cell(VP0));
    assert_eq!(CellId::NONE, other.as_process().cell());
    other.set_cell(SP0).expect("free cell should be claimed");
    assert_eq!(
        Err(PsysError::InvalidState),
        other.set_cell(CellId(5))
    );
    assert_eq!(held.set(ResourceBitmap(1)), group.resource_bitmap());
}

#[test_log::test]
fn cells_bitmap_is_all_or_nothing() {
    let mut group = submitted_group();
    group
        .process_mut(0)
        .expect("process 0 should exist")
        .set_cell(VP0)
        .expect("first claim should pass");
    let mut process = group.process_mut(1).expect("process 1 should exist");
    process
        .set_cells_bitmap(ResourceBitmap(1 << 4))
        .expect("single cell should be claimed");
    // replacing releases the previous cell
    process
        .set_cells_bitmap(ResourceBitmap(1 << 5))
        .expect("replacement cell should be claimed");
    assert_eq!(CellId(5), process.as_process().cell());
    let held = ResourceBitmap(1 << 1 | 1 << 5);
    assert_eq!(held, group.resource_bitmap());

    let mut process = group.process_mut(1).expect("process 1 should exist");
    assert_eq!(
        Err(PsysError::CapacityExceeded),
        process.set_cells_bitmap(ResourceBitmap(1 << 6 | 1 << 7))
    );
    assert_eq!(
        Err(PsysError::ResourceConflict),
        process.set_cells_bitmap(ResourceBitmap(1 << 1))
    );
    assert_eq!(
        Err(PsysError::InvalidArgument),
        process.set_cells_bitmap(ResourceBitmap(1 << 30))
    );
    assert_eq!(CellId(5), process.as_process().cell());
    assert_eq!(held, group.resource_bitmap());

    let mut process = group.process_mut(1).expect("process 1 should exist");
    process
        .set_cells_bitmap(ResourceBitmap::EMPTY)
        .expect("empty bitmap should release the cell");
    assert_eq!(CellId::NONE, process.as_process().cell());
    assert_eq!(ResourceBitmap(1 << 1), group.resource_bitmap());
}

#[test_log::test]
fn external_memory_binding() {
    let mut group = group();
    let mut process = group.process_mut(0).expect("process 0 should exist");
    // late binding needs a submitted group
    assert_eq!(
        Err(PsysError::InvalidState),
        process.set_ext_mem(TRANSFER_VMEM0, ResourceOffset(0x40))
    );
    process.set_cell(VP0).expect("cell should be claimed");
    group
        .exec_cmd(ProcessGroupCmd::Submit, &AcceptAll)
        .expect("submit should be accepted");

    let mut process = group.process_mut(0).expect("process 0 should exist");
    process
        .set_ext_mem(TRANSFER_VMEM0, ResourceOffset(0x40))
        .expect("external memory should bind");
    // DMEM3 is internal to VP0, so it cannot be bound as external memory
    assert_eq!(
        Err(PsysError::InvalidArgument),
        process.set_ext_mem(DMEM3, ResourceOffset(0x10))
    );
    process
        .set_ext_mem(DMEM0, ResourceOffset(0x10))
        .expect("memory of another cell should bind");
    assert_eq!(
        Err(PsysError::InvalidArgument),
        process.set_ext_mem(MemId(42), ResourceOffset(0))
    );
    let view = process.as_process();
    assert_eq!(TRANSFER_VMEM0, view.ext_mem_id(0));
    assert_eq!(ResourceOffset(0x40), view.ext_mem_offset(0));
    assert_eq!(DMEM0, view.ext_mem_id(3));
    assert_eq!(ResourceOffset(0x10), view.ext_mem_offset(3));

    process.clear_ext_mem(0).expect("binding should be cleared");
    assert_eq!(MemId::NONE, process.as_process().ext_mem_id(0));
    assert_eq!(ResourceOffset::INVALID, process.as_process().ext_mem_offset(0));
    assert_eq!(Err(PsysError::InvalidArgument), process.clear_ext_mem(6));
}

#[test_log::test]
fn late_binding_while_running() {
    let mut group = submitted_group();
    group
        .exec_cmd(ProcessGroupCmd::Start, &AcceptAll)
        .expect("start should be accepted");
    group
        .exec_cmd(ProcessGroupCmd::Run, &AcceptAll)
        .expect("run should be accepted");
    let mut process = group.process_mut(0).expect("process 0 should exist");
    process
        .set_dev_chn(1, ResourceOffset(3))
        .expect("channel should bind while running");
    process
        .set_dfm_port_bitmap(2, ResourceBitmap(0b101))
        .expect("dfm ports should bind while running");
    process
        .set_dfm_active_port_bitmap(2, ResourceBitmap(0b100))
        .expect("active dfm ports should bind while running");
    assert_eq!(Err(PsysError::InvalidState), process.clear_dev_chn(1));
    assert_eq!(Err(PsysError::InvalidState), process.set_cell(VP0));
    assert_eq!(Err(PsysError::InvalidState), process.clear_all());
    assert_eq!(
        Err(PsysError::InvalidArgument),
        process.set_dev_chn(5, ResourceOffset(0))
    );
    let view = process.as_process();
    assert_eq!(ResourceOffset(3), view.dev_chn_offset(1));
    assert_eq!(ResourceBitmap(0b101), view.dfm_port_bitmap(2));
    assert_eq!(ResourceBitmap(0b100), view.dfm_active_port_bitmap(2));
    assert!(format!("{}", view).contains("DMA_EXT1_READ"));
}

#[test_log::test]
fn extension_less_process() {
    let mut group = submitted_group();
    let mut process = group.process_mut(1).expect("process 1 should exist");
    assert!(!process.as_process().has_extension());
    process.clear_ext_mem(0).expect("nothing to clear");
    assert_eq!(Err(PsysError::InvalidArgument), process.clear_ext_mem(200));
    process.clear_dev_chn(0).expect("nothing to clear");
    process
        .set_dfm_port_bitmap(0, ResourceBitmap::EMPTY)
        .expect("empty bitmap needs no extension");
    assert_eq!(
        Err(PsysError::InvalidArgument),
        process.set_dfm_active_port_bitmap(0, ResourceBitmap(1))
    );
    assert_eq!(
        Err(PsysError::InvalidArgument),
        process.set_ext_mem(TRANSFER_VMEM0, ResourceOffset(0))
    );
    assert_eq!(
        Err(PsysError::InvalidArgument),
        process.set_dev_chn(0, ResourceOffset(0))
    );
}

#[test_log::test]
fn clear_all_resets_bindings() {
    let mut group = submitted_group();
    let mut process = group.process_mut(0).expect("process 0 should exist");
    process.set_cell(VP0).expect("cell should be claimed");
    process
        .set_ext_mem(TRANSFER_VMEM0, ResourceOffset(0x80))
        .expect("memory should bind");
    process
        .set_dfm_port_bitmap(0, ResourceBitmap(1))
        .expect("dfm should bind");
    process.clear_all().expect("clear all should pass");
    let view = process.as_process();
    assert_eq!(CellId::NONE, view.cell());
    assert_eq!(MemId::NONE, view.ext_mem_id(0));
    assert_eq!(ResourceBitmap::EMPTY, view.dfm_port_bitmap(0));
    assert_eq!(ResourceBitmap::EMPTY, group.resource_bitmap());
}

#[test_log::test]
fn validity_check_is_pure() {
    let manifest = pipeline();
    let mut group = group();
    group
        .process_mut(0)
        .expect("process 0 should exist")
        .set_cell(VP0)
        .expect("cell should be claimed");
    let snapshot = group.as_bytes().to_vec();
    let process = group.process(0).expect("process 0 should exist");
    assert!(process.is_valid(&manifest.programs[0]));
    assert!(!process.is_valid(&manifest.programs[1]));
    let mut fixed = manifest.programs[0].clone();
    fixed.cell = Some(SP0);
    assert!(!process.is_valid(&fixed));
    fixed.cell = Some(VP0);
    assert!(process.is_valid(&fixed));
    assert_eq!(snapshot, group.as_bytes());
}

#[test_log::test]
fn dependencies_resolve_to_group_indices() {
    let group = group();
    let plain = group.process(1).expect("process 1 should exist");
    assert_eq!(Dependency::Present(0), plain.cell_dependency(0));
    assert_eq!(Dependency::Present(1), plain.terminal_dependency(0));
    assert_eq!(Some(0), plain.parent());
    assert_eq!(Some(ProcessGroupState::Ready), plain.parent_state());
}
