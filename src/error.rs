use crate::copc::VoxelKey;
use thiserror::Error;

/// crate specific Result type
pub type Result<T> = std::result::Result<T, Error>;

/// crate specific Error enum
#[derive(Error, Debug)]
pub enum Error {
    /// The source does not start with the `LASF` signature
    #[error("not a LAS file, signature is {:?}", .0)]
    InvalidSignature([u8; 4]),

    /// COPC requires LAS 1.4
    #[error("unsupported LAS version {major}.{minor}, COPC requires 1.4")]
    UnsupportedVersion { major: u8, minor: u8 },

    /// The COPC info VLR was not the first VLR, octree can not be built
    #[error("the source does not carry a COPC info VLR at offset 375")]
    MissingCopcVlr,

    /// A VLR payload does not have the size its record type mandates
    #[error("VLR {user_id}/{record_id} payload is {actual} bytes, expected {expected}")]
    BadVlrLength {
        user_id: String,
        record_id: u16,
        expected: usize,
        actual: usize,
    },

    /// A hierarchy page is not a whole number of 32-byte entries,
    /// or contains an entry with a point count below -1
    #[error("malformed hierarchy page for {key}: {reason}")]
    BadHierarchyPage { key: VoxelKey, reason: String },

    /// Only point data record formats 0, 6, 7 and 8 are supported
    #[error("unsupported point data record format {}", .0)]
    UnsupportedPointFormat(u8),

    /// The laszip VLR was not found, the points cannot be decompressed
    #[error("laszip vlr not found")]
    LasZipVlrNotFound,

    /// A bad argument from the caller, e.g. a non-positive cache size
    #[error("invalid argument: {}", .0)]
    InvalidArgument(String),

    /// [laz::LasZipError], a malformed or truncated compressed chunk
    #[error(transparent)]
    Decode(#[from] laz::LasZipError),

    /// [std::io::Error] from the underlying byte source
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
