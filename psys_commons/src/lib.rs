pub mod ids;

pub use ids::{CellId, MemId, ProgramId, ResourceOffset, VAddress};

pub type ProgramGroupId = u32;
pub type KernelId = u8;
pub type BarrierId = u8;
pub type DevChnId = u8;
pub type DfmPortId = u8;
pub type MemTypeId = u8;

#[derive(Debug, Clone, PartialEq)]
pub enum PsysError {
    // caller errors
    /// record missing, index out of range, zero program id or otherwise malformed argument
    InvalidArgument,
    /// command or operation is not legal in the current process or process group state
    InvalidState,
    /// tried to claim a resource bit that is already held
    ResourceConflict,
    /// admission check rejected a submit or start
    ResourceUnavailable,
    /// record would not fit its size field, or a fixed size array is full
    CapacityExceeded,
    // layout errors
    /// size pass and populate pass disagree on the record size
    LayoutMismatch { expected: usize, written: usize },
    /// could not reserve memory for a record buffer
    OutOfMemory,
    /// tried to read outside of record bounds
    InvalidRead,
    /// tried to write outside of record bounds
    InvalidWrite,
    // configuration errors
    /// manifest, parameter or config document was malformed
    MalformedConfig,
    /// error while performing IO on a file
    FileError,
}

impl PsysError {
    /// Negative status code as reported to callers that speak integer status.
    pub fn code(&self) -> i32 {
        return match self {
            PsysError::InvalidArgument => -22,
            PsysError::InvalidState => -1,
            PsysError::ResourceConflict => -16,
            PsysError::ResourceUnavailable => -11,
            PsysError::CapacityExceeded => -7,
            PsysError::LayoutMismatch { .. } => -14,
            PsysError::OutOfMemory => -12,
            PsysError::InvalidRead | PsysError::InvalidWrite => -14,
            PsysError::MalformedConfig => -22,
            PsysError::FileError => -5,
        };
    }
}

pub type PsysResult<T> = std::result::Result<T, PsysError>;

/// Collapse a result into the integer status convention, 0 on success.
pub fn status<T>(result: &PsysResult<T>) -> i32 {
    return match result {
        Ok(_) => 0,
        Err(err) => err.code(),
    };
}

#[test]
fn status_codes_are_negative() {
    let errors = [
        PsysError::InvalidArgument,
        PsysError::InvalidState,
        PsysError::ResourceConflict,
        PsysError::ResourceUnavailable,
        PsysError::CapacityExceeded,
        PsysError::LayoutMismatch {
            expected: 4,
            written: 8,
        },
        PsysError::OutOfMemory,
        PsysError::InvalidRead,
        PsysError::InvalidWrite,
        PsysError::MalformedConfig,
        PsysError::FileError,
    ];
    for err in errors {
        assert!(err.code() < 0, "{:?} should map to a negative code", err);
    }
    assert_eq!(0, status(&PsysResult::Ok(())));
    assert_eq!(-16, status::<()>(&Err(PsysError::ResourceConflict)));
}
