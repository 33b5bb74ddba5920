use std::path::Path;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use super::errors::{Result, UploadError};

/// Fixed-size split of a file; the last chunk may be shorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub file_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
}

impl ChunkPlan {
    /// A zero-byte file is sent as one empty chunk so the server still finalizes it.
    pub fn new(file_size: u64, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(UploadError::ParamError("chunk size must be positive".to_string()));
        }

        let chunk_size = chunk_size as u64;
        let total = file_size.div_ceil(chunk_size).max(1);
        let total_chunks = u32::try_from(total).map_err(|_| {
            UploadError::ParamError(format!("{} chunks exceed the protocol limit", total))
        })?;

        Ok(Self {
            file_size,
            chunk_size,
            total_chunks,
        })
    }

    /// Byte offset and length of chunk `index`.
    pub fn range(&self, index: u32) -> Option<(u64, usize)> {
        if index >= self.total_chunks {
            return None;
        }

        let offset = index as u64 * self.chunk_size;
        let len = self.chunk_size.min(self.file_size.saturating_sub(offset));
        Some((offset, len as usize))
    }

    pub async fn read_chunk(&self, file_path: &Path, index: u32) -> Result<Bytes> {
        let (offset, len) = self.range(index).ok_or_else(|| {
            UploadError::ParamError(format!(
                "chunk {} out of range ({} chunks)",
                index, self.total_chunks
            ))
        })?;

        let mut file = File::open(file_path).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer).await?;

        Ok(Bytes::from(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_total_chunks() {
        assert_eq!(ChunkPlan::new(16, 4).unwrap().total_chunks, 4);
        assert_eq!(ChunkPlan::new(17, 4).unwrap().total_chunks, 5);
        assert_eq!(ChunkPlan::new(3, 4).unwrap().total_chunks, 1);
        assert_eq!(ChunkPlan::new(0, 4).unwrap().total_chunks, 1);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(ChunkPlan::new(10, 0).is_err());
    }

    #[test]
    fn test_last_chunk_is_shorter() {
        let plan = ChunkPlan::new(10, 4).unwrap();
        assert_eq!(plan.range(0), Some((0, 4)));
        assert_eq!(plan.range(1), Some((4, 4)));
        assert_eq!(plan.range(2), Some((8, 2)));
        assert_eq!(plan.range(3), None);
    }

    #[test]
    fn test_empty_file_has_one_empty_chunk() {
        let plan = ChunkPlan::new(0, 4).unwrap();
        assert_eq!(plan.range(0), Some((0, 0)));
    }

    #[tokio::test]
    async fn test_read_chunk_contents() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"AABBCCDDEE").unwrap();

        let plan = ChunkPlan::new(10, 4).unwrap();
        assert_eq!(&plan.read_chunk(file.path(), 0).await.unwrap()[..], b"AABB");
        assert_eq!(&plan.read_chunk(file.path(), 2).await.unwrap()[..], b"EE");
        assert!(plan.read_chunk(file.path(), 3).await.is_err());
    }
}
