//! Static description of a program group and the run time parameters it is
//! instantiated with.
//!
//! Both are produced outside this crate (typically JSON emitted by the pipeline
//! configuration) and only ever read here.

use crate::{
    bitmap::KernelBitmap,
    resource_model::{CellType, ResourceModel},
};
use log::warn;
use psys_commons::{CellId, KernelId, ProgramGroupId, ProgramId, PsysError, PsysResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgramType {
    Singular,
    ExclusiveSub,
    ExclusiveSuper,
    ParallelSub,
    ParallelSuper,
    VirtualSub,
    VirtualSuper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum TerminalType {
    DataIn = 0,
    DataOut = 1,
    ParamStream = 2,
    ParamCachedIn = 3,
    ParamCachedOut = 4,
    ParamSpatialIn = 5,
    ParamSpatialOut = 6,
    ParamSlicedIn = 7,
    ParamSlicedOut = 8,
    StateIn = 9,
    StateOut = 10,
    Program = 11,
    ProgramControlInit = 12,
}

impl TerminalType {
    pub const fn from_raw(raw: u8) -> Option<Self> {
        return match raw {
            0 => Some(TerminalType::DataIn),
            1 => Some(TerminalType::DataOut),
            2 => Some(TerminalType::ParamStream),
            3 => Some(TerminalType::ParamCachedIn),
            4 => Some(TerminalType::ParamCachedOut),
            5 => Some(TerminalType::ParamSpatialIn),
            6 => Some(TerminalType::ParamSpatialOut),
            7 => Some(TerminalType::ParamSlicedIn),
            8 => Some(TerminalType::ParamSlicedOut),
            9 => Some(TerminalType::StateIn),
            10 => Some(TerminalType::StateOut),
            11 => Some(TerminalType::Program),
            12 => Some(TerminalType::ProgramControlInit),
            _ => None,
        };
    }

    pub const fn is_data(self) -> bool {
        return matches!(self, TerminalType::DataIn | TerminalType::DataOut);
    }

    pub const fn is_parameter(self) -> bool {
        return matches!(
            self,
            TerminalType::ParamCachedIn
                | TerminalType::ParamCachedOut
                | TerminalType::ParamSlicedIn
                | TerminalType::ParamSlicedOut
        );
    }

    pub const fn is_spatial_parameter(self) -> bool {
        return matches!(
            self,
            TerminalType::ParamSpatialIn | TerminalType::ParamSpatialOut
        );
    }

    pub const fn is_program(self) -> bool {
        return matches!(self, TerminalType::Program);
    }

    pub const fn is_program_control_init(self) -> bool {
        return matches!(self, TerminalType::ProgramControlInit);
    }

    pub const fn is_input(self) -> bool {
        return matches!(
            self,
            TerminalType::DataIn
                | TerminalType::ParamStream
                | TerminalType::ParamCachedIn
                | TerminalType::ParamSpatialIn
                | TerminalType::ParamSlicedIn
                | TerminalType::StateIn
                | TerminalType::Program
                | TerminalType::ProgramControlInit
        );
    }
}

/// How buffers are handed to a started group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ProtocolVersion {
    /// buffer addresses live in the terminals of the group record
    #[default]
    Legacy = 0,
    /// buffer addresses live in buffer sets enqueued per frame
    Ppg = 1,
}

impl ProtocolVersion {
    pub const fn from_raw(raw: u8) -> Option<Self> {
        return match raw {
            0 => Some(ProtocolVersion::Legacy),
            1 => Some(ProtocolVersion::Ppg),
            _ => None,
        };
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramManifest {
    pub program_id: ProgramId,
    #[serde(default = "program_type_default")]
    pub program_type: ProgramType,
    pub kernel_bitmap: KernelBitmap,
    /// cell the program is bound to at creation, if it is not assigned dynamically
    #[serde(default)]
    pub cell: Option<CellId>,
    #[serde(default)]
    pub cell_type: Option<CellType>,
    /// indices of the programs in this manifest this program depends on
    #[serde(default)]
    pub cell_dependencies: Vec<u8>,
    /// indices of the terminals in this manifest this program depends on
    #[serde(default)]
    pub terminal_dependencies: Vec<u8>,
    /// external memory needed, per data memory type
    #[serde(default)]
    pub ext_mem_size: Vec<u16>,
    /// device channel size needed, per channel
    #[serde(default)]
    pub dev_chn_size: Vec<u16>,
    #[serde(default)]
    pub dfm_port_bitmap: Vec<u32>,
    #[serde(default)]
    pub dfm_active_port_bitmap: Vec<u32>,
}

fn program_type_default() -> ProgramType {
    return ProgramType::Singular;
}

impl ProgramManifest {
    /// A process extension is only laid out for programs that bind external resources.
    pub fn needs_extension(&self) -> bool {
        return self.ext_mem_size.iter().any(|size| *size != 0)
            || self.dev_chn_size.iter().any(|size| *size != 0)
            || self.dfm_port_bitmap.iter().any(|bitmap| *bitmap != 0)
            || self.dfm_active_port_bitmap.iter().any(|bitmap| *bitmap != 0);
    }

    pub fn fixed_cell(&self) -> Option<CellId> {
        return self.cell.filter(|cell| !cell.is_none());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalManifest {
    pub terminal_type: TerminalType,
    #[serde(default)]
    pub kernel_bitmap: KernelBitmap,
    /// kernel a spatial parameter terminal belongs to
    #[serde(default)]
    pub kernel_id: Option<KernelId>,
    /// kernels of the sections of cached, sliced and program terminals
    #[serde(default)]
    pub section_kernels: Vec<KernelId>,
}

impl TerminalManifest {
    pub fn is_enabled(&self, enable_bitmap: KernelBitmap) -> bool {
        let sections = || {
            self.section_kernels
                .iter()
                .any(|kernel| enable_bitmap.is_bit_set(*kernel))
        };
        return match self.terminal_type {
            TerminalType::ParamCachedIn | TerminalType::ProgramControlInit => true,
            TerminalType::ParamSpatialIn | TerminalType::ParamSpatialOut => self
                .kernel_id
                .map_or(false, |kernel| enable_bitmap.is_bit_set(kernel)),
            TerminalType::ParamCachedOut
            | TerminalType::ParamSlicedIn
            | TerminalType::ParamSlicedOut
            | TerminalType::Program => sections(),
            TerminalType::DataIn
            | TerminalType::DataOut
            | TerminalType::ParamStream
            | TerminalType::StateIn
            | TerminalType::StateOut => self.kernel_bitmap.intersects(enable_bitmap),
        };
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramGroupManifest {
    pub program_group_id: ProgramGroupId,
    pub kernel_bitmap: KernelBitmap,
    pub programs: Vec<ProgramManifest>,
    pub terminals: Vec<TerminalManifest>,
}

impl ProgramGroupManifest {
    pub fn program(&self, index: usize) -> Option<&ProgramManifest> {
        return self.programs.get(index);
    }

    pub fn terminal(&self, index: usize) -> Option<&TerminalManifest> {
        return self.terminals.get(index);
    }

    /// Whether the program at `index` is instantiated under `enable_bitmap`.
    ///
    /// Exclusive and virtual sub programs carve a subset out of the kernels of their
    /// super program (their first dependency), and are only picked when the enabled part
    /// of the super program is exactly their own kernel set. Virtual super programs are
    /// never instantiated themselves.
    pub fn is_program_enabled(&self, index: usize, enable_bitmap: KernelBitmap) -> bool {
        let program = match self.programs.get(index) {
            Some(program) => program,
            None => return false,
        };
        if !program.kernel_bitmap.intersects(enable_bitmap) {
            return false;
        }
        return match program.program_type {
            ProgramType::VirtualSuper => false,
            ProgramType::ExclusiveSuper => {
                enable_bitmap.intersection(program.kernel_bitmap) == program.kernel_bitmap
            }
            ProgramType::ExclusiveSub | ProgramType::VirtualSub => {
                let expected_super = if program.program_type == ProgramType::ExclusiveSub {
                    ProgramType::ExclusiveSuper
                } else {
                    ProgramType::VirtualSuper
                };
                let super_program = program
                    .cell_dependencies
                    .first()
                    .and_then(|super_index| self.programs.get(*super_index as usize));
                match super_program {
                    Some(super_program) if super_program.program_type == expected_super => {
                        enable_bitmap.intersection(super_program.kernel_bitmap)
                            == program.kernel_bitmap
                    }
                    _ => false,
                }
            }
            ProgramType::Singular | ProgramType::ParallelSub | ProgramType::ParallelSuper => true,
        };
    }

    pub fn enabled_programs(&self, enable_bitmap: KernelBitmap) -> impl Iterator<Item = usize> + '_ {
        return (0..self.programs.len())
            .filter(move |index| self.is_program_enabled(*index, enable_bitmap));
    }

    pub fn enabled_terminals(&self, enable_bitmap: KernelBitmap) -> impl Iterator<Item = usize> + '_ {
        return self
            .terminals
            .iter()
            .enumerate()
            .filter(move |(_, terminal)| terminal.is_enabled(enable_bitmap))
            .map(|(index, _)| index);
    }

    pub fn process_count(&self, param: &ProgramGroupParam) -> usize {
        return self.enabled_programs(param.kernel_enable_bitmap).count();
    }

    pub fn terminal_count(&self, param: &ProgramGroupParam) -> usize {
        return self.enabled_terminals(param.kernel_enable_bitmap).count();
    }

    /// Structural checks of a manifest against the resource model it is used with.
    pub fn validate(&self, model: &ResourceModel) -> PsysResult<()> {
        let result = self.check(model);
        if let Err(err) = &result {
            warn!(
                "manifest for program group {} rejected: {:?}",
                self.program_group_id, err
            );
        }
        return result;
    }

    fn check(&self, model: &ResourceModel) -> PsysResult<()> {
        if self.programs.len() > u8::MAX as usize || self.terminals.len() > u8::MAX as usize {
            return Err(PsysError::CapacityExceeded);
        }
        for program in self.programs.iter() {
            if !program.program_id.is_valid() {
                return Err(PsysError::InvalidArgument);
            }
            if !program.kernel_bitmap.is_subset_of(self.kernel_bitmap) {
                return Err(PsysError::MalformedConfig);
            }
            if let Some(cell) = program.fixed_cell() {
                if !model.is_valid_cell(cell) {
                    return Err(PsysError::InvalidArgument);
                }
                if program.cell_type.is_some() && program.cell_type != model.cell_type(cell) {
                    return Err(PsysError::MalformedConfig);
                }
            }
            if program
                .cell_dependencies
                .iter()
                .any(|dependency| *dependency as usize >= self.programs.len())
                || program
                    .terminal_dependencies
                    .iter()
                    .any(|dependency| *dependency as usize >= self.terminals.len())
            {
                return Err(PsysError::MalformedConfig);
            }
            if program.ext_mem_size.len() > model.n_data_mem_type
                || program.dev_chn_size.len() > model.n_dev_chn()
                || program.dfm_port_bitmap.len() > model.n_dfm_port()
                || program.dfm_active_port_bitmap.len() > model.n_dfm_port()
            {
                return Err(PsysError::MalformedConfig);
            }
        }
        for terminal in self.terminals.iter() {
            if !terminal.kernel_bitmap.is_subset_of(self.kernel_bitmap) {
                return Err(PsysError::MalformedConfig);
            }
        }
        return Ok(());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramGroupParam {
    pub kernel_enable_bitmap: KernelBitmap,
    #[serde(default = "fragment_count_default")]
    pub fragment_count: u16,
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
}

fn fragment_count_default() -> u16 {
    return 1;
}

impl ProgramGroupParam {
    pub fn new(kernel_enable_bitmap: KernelBitmap) -> Self {
        return ProgramGroupParam {
            kernel_enable_bitmap,
            fragment_count: fragment_count_default(),
            protocol_version: ProtocolVersion::default(),
        };
    }
}
