pub mod reader;
pub mod writer;

pub use reader::{Reader, Reporter};
pub use writer::Writer;

/// Type byte of a physical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum RecordType {
    // Zero is reserved for preallocated files.
    KZeroType = 0,
    KFullType = 1,

    // For fragments.
    KFirstType = 2,
    KMiddleType = 3,
    KLastType = 4,
}

pub const MAX_RECORD_TYPE: usize = RecordType::KLastType as usize;

pub const BLOCK_SIZE: usize = 32768;

/// Header is checksum (4 bytes) + length (2 bytes) + type (1 byte).
pub const HEADER_SIZE: usize = 4 + 2 + 1;
