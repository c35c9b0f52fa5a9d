//! Chunk layout for a file of known size.

use serde::{Deserialize, Serialize};

use crate::{UploadError, UploadResult};

/// One planned chunk: `[start_byte, end_byte]`, both inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpan {
    pub index: u64,
    pub start_byte: u64,
    pub end_byte: u64,
    pub size: u64,
}

/// Number of chunks needed to cover `total_size` bytes.
pub fn total_chunks(total_size: u64, chunk_size: u64) -> UploadResult<u64> {
    check_sizes(total_size, chunk_size)?;
    Ok(total_size.div_ceil(chunk_size))
}

/// Split `[0, total_size)` into contiguous chunks of `chunk_size` bytes.
/// Only the last chunk may be shorter.
pub fn plan(total_size: u64, chunk_size: u64) -> UploadResult<Vec<ChunkSpan>> {
    let count = total_chunks(total_size, chunk_size)?;

    let spans = (0..count)
        .map(|index| {
            let start_byte = index * chunk_size;
            let end_byte = start_byte
                .saturating_add(chunk_size - 1)
                .min(total_size - 1);
            ChunkSpan {
                index,
                start_byte,
                end_byte,
                size: end_byte - start_byte + 1,
            }
        })
        .collect();

    Ok(spans)
}

fn check_sizes(total_size: u64, chunk_size: u64) -> UploadResult<()> {
    if total_size == 0 {
        return Err(UploadError::validation("Total size must be greater than zero"));
    }
    if chunk_size == 0 {
        return Err(UploadError::validation("Chunk size must be greater than zero"));
    }
    Ok(())
}
