//! Identifier types carried in records.
//!
//! Every identifier that has an "invalid" or "absent" reading carries it as a named
//! constant, so accessors can hand back a sentinel without it being mistaken for an
//! edge value of the valid range.

use serde::{Deserialize, Serialize};

/// Execution cell, index into the resource model's cell table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(pub u8);

impl CellId {
    /// No cell assigned.
    pub const NONE: CellId = CellId(u8::MAX);

    pub const fn is_none(self) -> bool {
        return self.0 == Self::NONE.0;
    }
}

/// Memory instance, index into the resource model's memory table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemId(pub u8);

impl MemId {
    /// No memory bound.
    pub const NONE: MemId = MemId(u8::MAX);

    pub const fn is_none(self) -> bool {
        return self.0 == Self::NONE.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgramId(pub u32);

impl ProgramId {
    pub const INVALID: ProgramId = ProgramId(0);

    pub const fn is_valid(self) -> bool {
        return self.0 != Self::INVALID.0;
    }
}

/// Offset inside a memory or device channel, as handed out by the resource allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceOffset(pub u16);

impl ResourceOffset {
    pub const INVALID: ResourceOffset = ResourceOffset(u16::MAX);

    pub const fn is_valid(self) -> bool {
        return self.0 != Self::INVALID.0;
    }
}

/// Address in the accelerator's virtual address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VAddress(pub u32);

impl VAddress {
    pub const NULL: VAddress = VAddress(0);

    pub const fn is_null(self) -> bool {
        return self.0 == Self::NULL.0;
    }
}

#[test]
fn sentinels_are_distinct_from_zero_edges() {
    assert!(CellId::NONE.is_none());
    assert!(!CellId(0).is_none());
    assert!(MemId::NONE.is_none());
    assert!(!ProgramId::INVALID.is_valid());
    assert!(ProgramId(1).is_valid());
    assert!(ResourceOffset(0).is_valid());
    assert!(!ResourceOffset::INVALID.is_valid());
    assert!(VAddress::NULL.is_null());
}
