use std::io;

use thiserror::Error;

use crate::handle::{Handle, ResourceKind};
use crate::host::HostError;

pub type Result<T> = std::result::Result<T, CaptureError>;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("out of memory allocating {len} bytes")]
    OutOfMemory { len: usize },

    #[error("formatting replay source failed")]
    Fmt(#[from] std::fmt::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("host query failed: {0}")]
    Host(#[from] HostError),

    #[error("{entry_point}: missing parameter `{name}` (index {index})")]
    MissingParam {
        entry_point: &'static str,
        name: &'static str,
        index: usize,
    },

    #[error("{entry_point}: parameter `{name}` has an unexpected value type")]
    ParamTypeMismatch {
        entry_point: &'static str,
        name: &'static str,
    },

    #[error("{entry_point}: parameter `{name}` needs {expected} bytes but only {found} were provided")]
    PayloadTooShort {
        entry_point: &'static str,
        name: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("no map call recorded for mapped pointer {0}")]
    MissingMapCall(Handle),

    #[error("{kind:?} {handle} has no resource index")]
    UnknownResource { kind: ResourceKind, handle: Handle },

    #[error("binary data block size {0} is not a power of two")]
    InvalidBlockSize(u64),

    #[error("resident size {resident} must hold at least two blocks of {block_size} bytes")]
    InvalidResidentSize { resident: u64, block_size: u64 },

    #[error("payload of {len} bytes does not fit in a {block_size} byte binary data block")]
    PayloadExceedsBlock { len: usize, block_size: u64 },

    #[error("binary data offset {offset} (+{len}) is outside the store")]
    OffsetOutOfRange { offset: u64, len: usize },

    #[error("invalid capture window: start frame {start} is after end frame {end}")]
    InvalidFrameRange { start: u32, end: u32 },

    #[error("capture session is poisoned by an earlier error")]
    Poisoned,

    #[error("corrupt binary data: {0}")]
    Corrupt(&'static str),

    #[error("lz4 decompression failed: {0}")]
    Lz4Decompress(#[from] lz4_flex::block::DecompressError),
}
