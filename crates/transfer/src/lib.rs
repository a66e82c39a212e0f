//! Transfer side of a Parcel upload.
//!
//! A [`TransferClient`] moves the bytes of exactly one item per session and
//! reports back through a [`SignalSender`]. This crate defines that
//! interface, the chunked reader/writer used to move bytes, and
//! [`LocalDirClient`], a client that treats local directories as containers.

mod chunked;
mod client;
mod local;
mod validation;

pub use chunked::{Chunk, ChunkReader, ChunkWriter, SourceRead, checksum_bytes};
pub use client::{SignalSender, TransferClient, TransferRequest, UploadTarget};
pub use local::{LocalClientConfig, LocalDirClient};
pub use validation::validate_upload_path;

/// Default chunk size: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch at offset {0}")]
    ChecksumMismatch(u64),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("destination unavailable: {0}")]
    Destination(String),
}
