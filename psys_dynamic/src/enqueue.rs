//! Hand off of buffer sets to the transport that owns the firmware queues.

use crate::{
    admission::AdmissionControl,
    buffer_set::BufferSet,
    process_group::{ProcessGroup, ProcessGroupState},
};
use log::{debug, warn};
use psys_commons::{PsysError, PsysResult};

/// One buffer set as handed to the transport.
#[derive(Debug, Clone, Copy)]
pub struct QueueEntry<'a> {
    pub queue_id: u8,
    pub group_token: u64,
    pub late_binding: bool,
    pub buffer_set: &'a BufferSet,
}

/// Transport for buffer sets. Pushing must not block, completion is reported elsewhere.
pub trait BufferSetQueue {
    fn push(&mut self, entry: QueueEntry) -> PsysResult<()>;
}

fn enqueue(
    group: &ProcessGroup,
    buffer_set: &BufferSet,
    queue_offset: u8,
    late_binding: bool,
    admission: &dyn AdmissionControl,
    queue: &mut dyn BufferSetQueue,
) -> PsysResult<()> {
    let state_allowed = match group.state() {
        ProcessGroupState::Running => true,
        ProcessGroupState::Started => !late_binding,
        _ => false,
    };
    if !state_allowed {
        return Err(PsysError::InvalidState);
    }
    if queue_offset >= group.num_queues() {
        return Err(PsysError::InvalidArgument);
    }
    if !admission.can_enqueue(group, buffer_set) {
        return Err(PsysError::ResourceUnavailable);
    }
    let queue_id = group
        .base_queue_id()
        .checked_add(queue_offset)
        .ok_or(PsysError::InvalidArgument)?;
    return queue.push(QueueEntry {
        queue_id,
        group_token: group.token(),
        late_binding,
        buffer_set,
    });
}

fn logged(
    operation: &str,
    group: &ProcessGroup,
    queue_offset: u8,
    result: PsysResult<()>,
) -> PsysResult<()> {
    match &result {
        Ok(()) => debug!(
            "process group {}: {} on queue offset {}",
            group.program_group_id(),
            operation,
            queue_offset
        ),
        Err(err) => warn!(
            "process group {}: {} on queue offset {} failed: {:?}",
            group.program_group_id(),
            operation,
            queue_offset,
            err
        ),
    }
    return result;
}

/// Submit `buffer_set` for a started or running group on queue `base_queue_id + queue_offset`.
pub fn enqueue_buffer_set(
    group: &ProcessGroup,
    buffer_set: &BufferSet,
    queue_offset: u8,
    admission: &dyn AdmissionControl,
    queue: &mut dyn BufferSetQueue,
) -> PsysResult<()> {
    let result = enqueue(group, buffer_set, queue_offset, false, admission, queue);
    return logged("enqueue buffer set", group, queue_offset, result);
}

/// Rebind the buffers of a running group for the frames still in flight.
pub fn enqueue_late_binding(
    group: &ProcessGroup,
    buffer_set: &BufferSet,
    queue_offset: u8,
    admission: &dyn AdmissionControl,
    queue: &mut dyn BufferSetQueue,
) -> PsysResult<()> {
    let result = enqueue(group, buffer_set, queue_offset, true, admission, queue);
    return logged("enqueue late binding", group, queue_offset, result);
}

/// Queue that keeps every pushed entry, used in tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingQueue {
    pub entries: Vec<(u8, u64, bool, Vec<u8>)>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        return RecordingQueue {
            entries: Vec::new(),
        };
    }
}

impl BufferSetQueue for RecordingQueue {
    fn push(&mut self, entry: QueueEntry) -> PsysResult<()> {
        self.entries.push((
            entry.queue_id,
            entry.group_token,
            entry.late_binding,
            entry.buffer_set.as_bytes().to_vec(),
        ));
        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        admission::TerminalBufferAdmission,
        bitmap::KernelBitmap,
        manifest::{
            ProgramGroupManifest, ProgramGroupParam, ProgramManifest, ProgramType,
            ProtocolVersion, TerminalManifest, TerminalType,
        },
        process_group::ProcessGroupCmd,
        resource_model::Generation,
        terminal::BufferState,
    };
    use psys_commons::{ProgramId, VAddress};

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

    fn ppg_group() -> ProcessGroup {
        let manifest = ProgramGroupManifest {
            program_group_id: 5,
            kernel_bitmap: KernelBitmap::from_kernels(&[0]),
            programs: vec![ProgramManifest {
                program_id: ProgramId(50),
                program_type: ProgramType::Singular,
                kernel_bitmap: KernelBitmap::from_kernels(&[0]),
                cell: None,
                cell_type: None,
                cell_dependencies: Vec::new(),
                terminal_dependencies: vec![0],
                ext_mem_size: Vec::new(),
                dev_chn_size: Vec::new(),
                dfm_port_bitmap: Vec::new(),
                dfm_active_port_bitmap: Vec::new(),
            }],
            terminals: vec![TerminalManifest {
                terminal_type: TerminalType::DataIn,
                kernel_bitmap: KernelBitmap::from_kernels(&[0]),
                kernel_id: None,
                section_kernels: Vec::new(),
            }],
        };
        let mut param = ProgramGroupParam::new(KernelBitmap::from_kernels(&[0]));
        param.protocol_version = ProtocolVersion::Ppg;
        let mut group = ProcessGroup::create(Generation::Ipu6ep.model(), &manifest, &param)
            .expect("group should be created");
        group
            .attach_buffer(0, VAddress(0x1000), BufferState::Full)
            .expect("buffer should attach");
        group.set_token(0xCAFE).expect("token should be set");
        group.set_base_queue_id(4).expect("base queue should be set");
        group.set_num_queues(2).expect("queue count should be set");
        return group;
    }

    #[test_log::test]
    fn enqueue_on_started_and_running_group() {
        let mut group = ppg_group();
        let buffer_set = BufferSet::create(VAddress(0x2000), 1).expect("buffer set should be created");
        let mut queue = RecordingQueue::new();
        let admission = TerminalBufferAdmission;

        assert_eq!(
            Err(PsysError::InvalidState),
            enqueue_buffer_set(&group, &buffer_set, 0, &admission, &mut queue)
        );
        group
            .exec_cmd(ProcessGroupCmd::Submit, &admission)
            .expect("submit should pass");
        group
            .exec_cmd(ProcessGroupCmd::Start, &AcceptAll)
            .expect("start should pass");
        enqueue_buffer_set(&group, &buffer_set, 1, &admission, &mut queue)
            .expect("started group should accept buffer sets");
        assert_eq!(
            Err(PsysError::InvalidState),
            enqueue_late_binding(&group, &buffer_set, 0, &admission, &mut queue)
        );
        assert_eq!(
            Err(PsysError::InvalidArgument),
            enqueue_buffer_set(&group, &buffer_set, 2, &admission, &mut queue)
        );

        group
            .exec_cmd(ProcessGroupCmd::Run, &admission)
            .expect("run should pass");
        enqueue_late_binding(&group, &buffer_set, 0, &admission, &mut queue)
            .expect("running group should accept late binding");

        assert_eq!(2, queue.entries.len());
        assert_eq!((5, 0xCAFE, false), (queue.entries[0].0, queue.entries[0].1, queue.entries[0].2));
        assert_eq!((4, 0xCAFE, true), (queue.entries[1].0, queue.entries[1].1, queue.entries[1].2));
        assert_eq!(buffer_set.as_bytes(), queue.entries[1].3.as_slice());
    }

    #[test_log::test]
    fn mismatched_buffer_set_is_refused() {
        let mut group = ppg_group();
        group
            .exec_cmd(ProcessGroupCmd::Submit, &AcceptAll)
            .expect("submit should pass");
        group
            .exec_cmd(ProcessGroupCmd::Start, &AcceptAll)
            .expect("start should pass");
        let buffer_set = BufferSet::create(VAddress(0x2000), 4).expect("buffer set should be created");
        let mut queue = RecordingQueue::new();
        assert_eq!(
            Err(PsysError::ResourceUnavailable),
            enqueue_buffer_set(&group, &buffer_set, 0, &TerminalBufferAdmission, &mut queue)
        );
        assert!(queue.entries.is_empty());
    }
}
