pub mod admission;
pub mod bitmap;
pub mod buffer_set;
pub mod dfm;
pub mod enqueue;
pub mod layout;
pub mod manifest;
pub mod process;
pub mod process_group;
pub mod record;
pub mod resource_model;
pub mod terminal;

pub use admission::{AdmissionControl, TerminalBufferAdmission};
pub use bitmap::{KernelBitmap, ResourceBitmap};
pub use buffer_set::BufferSet;
pub use manifest::{ProgramGroupManifest, ProgramGroupParam, ProtocolVersion};
pub use process::{Dependency, Process, ProcessCmd, ProcessMut, ProcessState};
pub use process_group::{ProcessGroup, ProcessGroupCmd, ProcessGroupState};
pub use resource_model::{Generation, ResourceModel};
pub use terminal::{BufferState, Terminal};
