use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parcel_protocol::ItemSource;
use sha2::{Digest, Sha256};

use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// A chunk of item data read from its source.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Byte offset within the item.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Vec<u8>,
    /// SHA-256 hex checksum of `data` (empty means no verification).
    pub checksum: String,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Offset just past the end of this chunk.
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Any seekable byte source that can move to a blocking thread.
pub trait SourceRead: Read + Seek + Send {}

impl<T: Read + Seek + Send> SourceRead for T {}

/// Reads a source in fixed-size chunks with SHA-256 checksums.
pub struct ChunkReader<R = File> {
    reader: R,
    chunk_size: usize,
    offset: u64,
    size: u64,
}

impl ChunkReader<File> {
    /// Opens `path` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] is used.
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self, TransferError> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self::new(file, size, chunk_size))
    }
}

impl ChunkReader<Box<dyn SourceRead>> {
    /// Opens the content behind an item source.
    pub fn for_source(source: &ItemSource, chunk_size: usize) -> Result<Self, TransferError> {
        match source {
            ItemSource::File { path } => {
                let file = File::open(path)?;
                let size = file.metadata()?.len();
                Ok(Self::new(Box::new(file), size, chunk_size))
            }
            ItemSource::Inline { data } => {
                let size = data.len() as u64;
                Ok(Self::new(Box::new(Cursor::new(data.clone())), size, chunk_size))
            }
        }
    }
}

impl<R: Read + Seek> ChunkReader<R> {
    /// Wraps a reader whose total length is `size` bytes.
    pub fn new(reader: R, size: u64, chunk_size: usize) -> Self {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Self {
            reader,
            chunk_size,
            offset: 0,
            size,
        }
    }

    /// Seeks to the given byte offset (for resume).
    pub fn seek_to(&mut self, offset: u64) -> Result<(), TransferError> {
        self.reader.seek(SeekFrom::Start(offset))?;
        self.offset = offset;
        Ok(())
    }

    /// Reads the next chunk. Returns `None` at the end of the source.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }

        let read_size = remaining.min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; read_size];
        let n = self.reader.read(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);

        let checksum = checksum_bytes(&buf);
        let chunk = Chunk {
            offset: self.offset,
            data: buf,
            checksum,
        };
        self.offset += n as u64;
        Ok(Some(chunk))
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total source size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.offset)
    }
}

// ---------------------------------------------------------------------------
// ChunkWriter
// ---------------------------------------------------------------------------

/// Writes chunks into one file at exact offsets, verifying checksums.
pub struct ChunkWriter {
    path: PathBuf,
    file: File,
    written: u64,
}

impl ChunkWriter {
    /// Creates (or truncates) the file at `path`.
    pub fn create(path: &Path) -> Result<Self, TransferError> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            written: 0,
        })
    }

    /// Writes a chunk at its offset.
    ///
    /// The checksum is verified first when non-empty. On success the
    /// confirmed offset moves to the end of the chunk.
    pub fn write_chunk(&mut self, chunk: &Chunk) -> Result<(), TransferError> {
        if !chunk.checksum.is_empty() && checksum_bytes(&chunk.data) != chunk.checksum {
            return Err(TransferError::ChecksumMismatch(chunk.offset));
        }

        self.file.seek(SeekFrom::Start(chunk.offset))?;
        self.file.write_all(&chunk.data)?;
        self.file.flush()?;
        self.written = chunk.end();
        Ok(())
    }

    /// Bytes confirmed written, measured from the start of the file.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Syncs file contents to disk.
    pub fn sync(&self) -> Result<(), TransferError> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
