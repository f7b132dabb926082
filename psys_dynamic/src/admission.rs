//! Admission checks consulted before a group commits to submit, start or enqueue.

use crate::{
    buffer_set::BufferSet,
    manifest::{ProtocolVersion, TerminalType},
    process_group::ProcessGroup,
    terminal::{BufferState, Terminal},
};
use log::debug;

/// System wide feasibility beyond the bookkeeping of a single group.
pub trait AdmissionControl {
    /// The group may be submitted, every terminal it needs is connected.
    fn can_submit(&self, group: &ProcessGroup) -> bool;
    /// The group may start, its buffers are ready for a frame.
    fn can_start(&self, group: &ProcessGroup) -> bool;
    /// `buffer_set` may be enqueued against the group.
    fn can_enqueue(&self, group: &ProcessGroup, buffer_set: &BufferSet) -> bool;
}

/// Default admission that looks at the buffers attached to the group terminals.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalBufferAdmission;

fn is_connected(terminal: &Terminal) -> bool {
    return match terminal.terminal_type() {
        Some(terminal_type) if terminal_type.is_data() => {
            terminal.buffer_state() != BufferState::Null
        }
        Some(terminal_type) => {
            terminal_type.is_parameter()
                || terminal_type.is_program()
                || terminal_type.is_program_control_init()
                || terminal_type.is_spatial_parameter()
        }
        None => false,
    };
}

fn is_ready_for_frame(terminal: &Terminal) -> bool {
    return match terminal.terminal_type() {
        Some(TerminalType::DataIn) => terminal.buffer_state() == BufferState::Full,
        Some(TerminalType::DataOut) => terminal.buffer_state() == BufferState::Empty,
        Some(_) => true,
        None => false,
    };
}

impl AdmissionControl for TerminalBufferAdmission {
    fn can_submit(&self, group: &ProcessGroup) -> bool {
        let unconnected = group.terminals().find(|terminal| !is_connected(terminal));
        if let Some(terminal) = unconnected {
            debug!(
                "terminal {} of group {} is not connected",
                terminal.terminal_index(),
                group.program_group_id()
            );
        }
        return unconnected.is_none() && group.terminals().count() == group.terminal_count() as usize;
    }

    fn can_start(&self, group: &ProcessGroup) -> bool {
        return group.terminals().all(|terminal| is_ready_for_frame(&terminal));
    }

    fn can_enqueue(&self, group: &ProcessGroup, buffer_set: &BufferSet) -> bool {
        return group.protocol_version() == Some(ProtocolVersion::Ppg)
            && buffer_set.terminal_count() as usize == group.terminal_count() as usize
            && group.terminals().all(|terminal| is_connected(&terminal));
    }
}
