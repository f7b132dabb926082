//! Static description of the processing system resources of one hardware generation.
//!
//! Records only ever store small integer ids; everything needed to interpret them
//! (how many cells exist, which memories a cell owns, how large the per process
//! extension arrays are) lives in a [`ResourceModel`].

use crate::bitmap::ResourceBitmap;
use psys_commons::{BarrierId, CellId, DevChnId, MemId, MemTypeId, PsysError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Width of the group resource bitmap.
pub const RESOURCE_BITMAP_BITS: usize = 32;
/// Width of kernel enable bitmaps.
pub const KERNEL_BITMAP_BITS: usize = 128;
/// Cell slots in a process record.
pub const MAX_CELLS_PER_PROCESS: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Generation {
    Ipu6,
    Ipu6se,
    Ipu6ep,
}

impl Generation {
    pub fn model(self) -> &'static ResourceModel {
        return match self {
            Generation::Ipu6 => &IPU6,
            Generation::Ipu6se => &IPU6SE,
            Generation::Ipu6ep => &IPU6EP,
        };
    }
}

impl FromStr for Generation {
    type Err = PsysError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        return match name.to_ascii_lowercase().as_str() {
            "ipu6" => Ok(Generation::Ipu6),
            "ipu6se" => Ok(Generation::Ipu6se),
            "ipu6ep" => Ok(Generation::Ipu6ep),
            _ => Err(PsysError::MalformedConfig),
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellType {
    SpCtrl,
    SpServer,
    Vp,
    AccPsa,
    AccIsa,
    AccOsa,
    Gdc,
    Tnr,
}

#[derive(Debug)]
pub struct CellDesc {
    pub name: &'static str,
    pub cell_type: CellType,
    /// memories that are internal to this cell
    pub mems: &'static [u8],
}

#[derive(Debug)]
pub struct MemTypeDesc {
    pub name: &'static str,
    /// memory of this type lives outside of any cell and is bound per process
    pub external: bool,
}

#[derive(Debug)]
pub struct MemDesc {
    pub name: &'static str,
    pub mem_type: MemTypeId,
    pub max_size: u16,
}

#[derive(Debug)]
pub struct DevChnDesc {
    pub name: &'static str,
    pub max_size: u16,
}

#[derive(Debug)]
pub struct ResourceModel {
    pub generation: Generation,
    pub cells: &'static [CellDesc],
    pub mem_types: &'static [MemTypeDesc],
    /// leading memory types that can be bound through the process extension
    pub n_data_mem_type: usize,
    pub mems: &'static [MemDesc],
    pub dev_chns: &'static [DevChnDesc],
    pub dfm_ports: &'static [&'static str],
    pub n_barrier: usize,
}

impl ResourceModel {
    pub fn n_cell(&self) -> usize {
        return self.cells.len();
    }

    pub fn n_mem(&self) -> usize {
        return self.mems.len();
    }

    pub fn n_dev_chn(&self) -> usize {
        return self.dev_chns.len();
    }

    pub fn n_dfm_port(&self) -> usize {
        return self.dfm_ports.len();
    }

    pub fn is_valid_cell(&self, cell: CellId) -> bool {
        return (cell.0 as usize) < self.n_cell();
    }

    /// Bit of `cell` in the resource bitmap, empty if the cell does not exist.
    pub fn cell_bit_mask(&self, cell: CellId) -> ResourceBitmap {
        if !self.is_valid_cell(cell) {
            return ResourceBitmap::EMPTY;
        }
        return ResourceBitmap::bit_mask(cell.0 as usize);
    }

    /// Barriers are allocated in the bits directly above the cells, as long as they fit.
    pub fn barrier_bit_mask(&self, barrier: BarrierId) -> ResourceBitmap {
        if (barrier as usize) >= self.n_barrier {
            return ResourceBitmap::EMPTY;
        }
        return ResourceBitmap::bit_mask(barrier as usize + self.n_cell());
    }

    pub fn cell_type(&self, cell: CellId) -> Option<CellType> {
        return self.cells.get(cell.0 as usize).map(|desc| desc.cell_type);
    }

    pub fn cell_name(&self, cell: CellId) -> &'static str {
        return self
            .cells
            .get(cell.0 as usize)
            .map_or("NONE", |desc| desc.name);
    }

    pub fn cell_mems(&self, cell: CellId) -> &'static [u8] {
        return self.cells.get(cell.0 as usize).map_or(&[], |desc| desc.mems);
    }

    pub fn mem_type(&self, mem: MemId) -> Option<MemTypeId> {
        return self.mems.get(mem.0 as usize).map(|desc| desc.mem_type);
    }

    pub fn mem_name(&self, mem: MemId) -> &'static str {
        return self.mems.get(mem.0 as usize).map_or("NONE", |desc| desc.name);
    }

    pub fn mem_max_size(&self, mem: MemId) -> u16 {
        return self.mems.get(mem.0 as usize).map_or(0, |desc| desc.max_size);
    }

    pub fn mem_type_name(&self, mem_type: MemTypeId) -> &'static str {
        return self
            .mem_types
            .get(mem_type as usize)
            .map_or("NONE", |desc| desc.name);
    }

    pub fn is_external_mem_type(&self, mem_type: MemTypeId) -> bool {
        return self
            .mem_types
            .get(mem_type as usize)
            .map_or(false, |desc| desc.external);
    }

    pub fn is_cell_mem(&self, cell: CellId, mem: MemId) -> bool {
        return self.cell_mems(cell).contains(&mem.0);
    }

    pub fn dev_chn_name(&self, chn: DevChnId) -> &'static str {
        return self
            .dev_chns
            .get(chn as usize)
            .map_or("NONE", |desc| desc.name);
    }

    pub fn dev_chn_max_size(&self, chn: DevChnId) -> u16 {
        return self.dev_chns.get(chn as usize).map_or(0, |desc| desc.max_size);
    }

    // wire encoding of the sentinels, records use the table size as "none"

    pub fn encode_cell(&self, cell: CellId) -> u8 {
        if self.is_valid_cell(cell) {
            return cell.0;
        }
        return self.n_cell() as u8;
    }

    pub fn decode_cell(&self, raw: u8) -> CellId {
        let cell = CellId(raw);
        if self.is_valid_cell(cell) {
            return cell;
        }
        return CellId::NONE;
    }

    pub fn encode_mem(&self, mem: MemId) -> u8 {
        if (mem.0 as usize) < self.n_mem() {
            return mem.0;
        }
        return self.n_mem() as u8;
    }

    pub fn decode_mem(&self, raw: u8) -> MemId {
        if (raw as usize) < self.n_mem() {
            return MemId(raw);
        }
        return MemId::NONE;
    }
}

const fn cell(name: &'static str, cell_type: CellType, mems: &'static [u8]) -> CellDesc {
    return CellDesc {
        name,
        cell_type,
        mems,
    };
}

const fn mem(name: &'static str, mem_type: MemTypeId, max_size: u16) -> MemDesc {
    return MemDesc {
        name,
        mem_type,
        max_size,
    };
}

const fn mem_type(name: &'static str, external: bool) -> MemTypeDesc {
    return MemTypeDesc { name, external };
}

const fn dev_chn(name: &'static str, max_size: u16) -> DevChnDesc {
    return DevChnDesc { name, max_size };
}

// memory types shared by the generations with a vector processor
static VP_MEM_TYPES: [MemTypeDesc; 7] = [
    mem_type("TRANSFER_VMEM0", true),
    mem_type("TRANSFER_VMEM1", true),
    mem_type("LB_VMEM", true),
    mem_type("DMEM", false),
    mem_type("VMEM", false),
    mem_type("BAMEM", false),
    mem_type("PMEM", false),
];

// memory ids of VP_MEMS
const VMEM0: u8 = 0;
const BAMEM0: u8 = 4;
const DMEM0: u8 = 5;
const DMEM3: u8 = 8;
const PMEM0: u8 = 9;

static VP_MEMS: [MemDesc; 10] = [
    mem("VMEM0", 4, 0x0800),
    mem("TRANSFER_VMEM0", 0, 0x0800),
    mem("TRANSFER_VMEM1", 1, 0x0800),
    mem("LB_VMEM", 2, 0x0400),
    mem("BAMEM0", 5, 0x0800),
    mem("DMEM0", 3, 0x4000),
    mem("DMEM1", 3, 0x1000),
    mem("DMEM2", 3, 0x1000),
    mem("DMEM3", 3, 0x1000),
    mem("PMEM0", 6, 0x0500),
];

static VP_DEV_CHNS: [DevChnDesc; 5] = [
    dev_chn("DMA_EXT0", 30),
    dev_chn("DMA_EXT1_READ", 30),
    dev_chn("DMA_EXT1_WRITE", 43),
    dev_chn("DMA_INTERNAL", 8),
    dev_chn("DMA_ISA", 2),
];

static VP_DFM_PORTS: [&str; 6] = [
    "BB_FULL",
    "BB_EMPTY",
    "ISL_FULL",
    "ISL_EMPTY",
    "LB_FULL",
    "LB_EMPTY",
];

const SP_MEMS: &[u8] = &[DMEM0];
const VP_CELL_MEMS: &[u8] = &[VMEM0, BAMEM0, DMEM3, PMEM0];

static IPU6_CELLS: [CellDesc; 32] = [
    cell("SP0", CellType::SpCtrl, SP_MEMS),
    cell("VP0", CellType::Vp, VP_CELL_MEMS),
    cell("PSA_BNLM", CellType::AccPsa, &[]),
    cell("PSA_DM", CellType::AccPsa, &[]),
    cell("PSA_ACM", CellType::AccPsa, &[]),
    cell("PSA_GTC_YUV1", CellType::AccPsa, &[]),
    cell("BB_OFS_PIN_MAIN", CellType::AccOsa, &[]),
    cell("BB_OFS_PIN_DISPLAY", CellType::AccOsa, &[]),
    cell("BB_OFS_PIN_PP", CellType::AccOsa, &[]),
    cell("PSA_GAMMASTAR", CellType::AccPsa, &[]),
    cell("PSA_GLTM", CellType::AccPsa, &[]),
    cell("PSA_XNR", CellType::AccPsa, &[]),
    cell("PSA_VCSC", CellType::AccPsa, &[]),
    cell("ISA_ICA", CellType::AccIsa, &[]),
    cell("ISA_LSC", CellType::AccIsa, &[]),
    cell("ISA_DPC", CellType::AccIsa, &[]),
    cell("ISA_SIS_A", CellType::AccIsa, &[]),
    cell("ISA_SIS_B", CellType::AccIsa, &[]),
    cell("ISA_B2B", CellType::AccIsa, &[]),
    cell("ISA_B2R_R2I_SIE", CellType::AccIsa, &[]),
    cell("ISA_R2I_DS_A", CellType::AccIsa, &[]),
    cell("ISA_R2I_DS_B", CellType::AccIsa, &[]),
    cell("ISA_AWB", CellType::AccIsa, &[]),
    cell("ISA_AE", CellType::AccIsa, &[]),
    cell("ISA_AF", CellType::AccIsa, &[]),
    cell("ISA_DOL", CellType::AccIsa, &[]),
    cell("ISA_ICA_MEDIUM", CellType::AccIsa, &[]),
    cell("ISA_X2B_MD", CellType::AccIsa, &[]),
    cell("ISA_X2B_SVE_RGBIR", CellType::AccIsa, &[]),
    cell("ISA_PAF", CellType::AccIsa, &[]),
    cell("BB_GDC0", CellType::Gdc, &[]),
    cell("BB_TNR", CellType::Tnr, &[]),
];

static IPU6EP_CELLS: [CellDesc; 29] = [
    cell("SP0", CellType::SpCtrl, SP_MEMS),
    cell("VP0", CellType::Vp, VP_CELL_MEMS),
    cell("PSA_BNLM", CellType::AccPsa, &[]),
    cell("PSA_DM", CellType::AccPsa, &[]),
    cell("PSA_ACM", CellType::AccPsa, &[]),
    cell("PSA_GTC_YUV1", CellType::AccPsa, &[]),
    cell("BB_OFS_PIN_MAIN", CellType::AccOsa, &[]),
    cell("BB_OFS_PIN_DISPLAY", CellType::AccOsa, &[]),
    cell("BB_OFS_PIN_PP", CellType::AccOsa, &[]),
    cell("PSA_GAMMASTAR", CellType::AccPsa, &[]),
    cell("PSA_GLTM", CellType::AccPsa, &[]),
    cell("PSA_XNR", CellType::AccPsa, &[]),
    cell("PSA_VCSC", CellType::AccPsa, &[]),
    cell("ISA_ICA", CellType::AccIsa, &[]),
    cell("ISA_LSC", CellType::AccIsa, &[]),
    cell("ISA_DPC", CellType::AccIsa, &[]),
    cell("ISA_SIS_A", CellType::AccIsa, &[]),
    cell("ISA_SIS_B", CellType::AccIsa, &[]),
    cell("ISA_B2B", CellType::AccIsa, &[]),
    cell("ISA_B2R_R2I_SIE", CellType::AccIsa, &[]),
    cell("ISA_R2I_DS_A", CellType::AccIsa, &[]),
    cell("ISA_AWB", CellType::AccIsa, &[]),
    cell("ISA_AE", CellType::AccIsa, &[]),
    cell("ISA_AF", CellType::AccIsa, &[]),
    cell("ISA_X2B_MD", CellType::AccIsa, &[]),
    cell("ISA_X2B_SVE_RGBIR", CellType::AccIsa, &[]),
    cell("ISA_PAF", CellType::AccIsa, &[]),
    cell("BB_GDC0", CellType::Gdc, &[]),
    cell("BB_TNR", CellType::Tnr, &[]),
];

// ipu6se has no vector processor, so no VMEM/BAMEM/PMEM instances and a single transfer vmem
static IPU6SE_MEM_TYPES: [MemTypeDesc; 6] = [
    mem_type("TRANSFER_VMEM0", true),
    mem_type("LB_VMEM", true),
    mem_type("DMEM", false),
    mem_type("VMEM", false),
    mem_type("BAMEM", false),
    mem_type("PMEM", false),
];

static IPU6SE_MEMS: [MemDesc; 4] = [
    mem("TRANSFER_VMEM0", 0, 0x0800),
    mem("LB_VMEM", 1, 0x0400),
    mem("DMEM0", 2, 0x4000),
    mem("DMEM1", 2, 0x1000),
];

static IPU6SE_CELLS: [CellDesc; 12] = [
    cell("SP0", CellType::SpCtrl, &[2]),
    cell("ISA_ICA", CellType::AccIsa, &[]),
    cell("ISA_LSC", CellType::AccIsa, &[]),
    cell("ISA_DPC", CellType::AccIsa, &[]),
    cell("ISA_B2B", CellType::AccIsa, &[]),
    cell("ISA_B2R_R2I_SIE", CellType::AccIsa, &[]),
    cell("ISA_R2I_DS_A", CellType::AccIsa, &[]),
    cell("ISA_R2I_DS_B", CellType::AccIsa, &[]),
    cell("ISA_AWB", CellType::AccIsa, &[]),
    cell("ISA_AE", CellType::AccIsa, &[]),
    cell("ISA_AF", CellType::AccIsa, &[]),
    cell("ISA_PAF", CellType::AccIsa, &[]),
];

static IPU6SE_DEV_CHNS: [DevChnDesc; 4] = [
    dev_chn("DMA_EXT0", 22),
    dev_chn("DMA_EXT1_READ", 22),
    dev_chn("DMA_EXT1_WRITE", 22),
    dev_chn("DMA_ISA", 2),
];

static IPU6SE_DFM_PORTS: [&str; 2] = ["ISL_FULL", "ISL_EMPTY"];

pub static IPU6: ResourceModel = ResourceModel {
    generation: Generation::Ipu6,
    cells: &IPU6_CELLS,
    mem_types: &VP_MEM_TYPES,
    n_data_mem_type: 6,
    mems: &VP_MEMS,
    dev_chns: &VP_DEV_CHNS,
    dfm_ports: &VP_DFM_PORTS,
    n_barrier: 8,
};

pub static IPU6SE: ResourceModel = ResourceModel {
    generation: Generation::Ipu6se,
    cells: &IPU6SE_CELLS,
    mem_types: &IPU6SE_MEM_TYPES,
    n_data_mem_type: 5,
    mems: &IPU6SE_MEMS,
    dev_chns: &IPU6SE_DEV_CHNS,
    dfm_ports: &IPU6SE_DFM_PORTS,
    n_barrier: 8,
};

pub static IPU6EP: ResourceModel = ResourceModel {
    generation: Generation::Ipu6ep,
    cells: &IPU6EP_CELLS,
    mem_types: &VP_MEM_TYPES,
    n_data_mem_type: 6,
    mems: &VP_MEMS,
    dev_chns: &VP_DEV_CHNS,
    dfm_ports: &VP_DFM_PORTS,
    n_barrier: 8,
};
