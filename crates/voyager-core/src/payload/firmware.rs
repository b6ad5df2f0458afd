//! Application image handling.
//!
//! Wraps the raw bytes of the application to flash: validates that the size
//! fits the START packet, computes the image checksum announced to the
//! bootloader and splits the image into DATA payloads.

use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::protocol::constants::MAX_APP_SIZE;
use crate::protocol::crc::CrcEngine;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Image too large: {actual} bytes, maximum {maximum}")]
    TooLarge { actual: usize, maximum: usize },
    #[error("Chunk size must be non-zero")]
    InvalidChunkSize,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application image to be transferred.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    data: Vec<u8>,
    crc: u32,
}

impl FirmwareImage {
    /// Wrap raw image bytes.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ImageError> {
        if data.len() > MAX_APP_SIZE as usize {
            return Err(ImageError::TooLarge {
                actual: data.len(),
                maximum: MAX_APP_SIZE as usize,
            });
        }
        let crc = CrcEngine::compute(&data);
        Ok(Self { data, crc })
    }

    /// Read an image file from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let image = Self::from_bytes(data)?;
        info!(
            path = %path.display(),
            size = image.len(),
            crc = %format!("0x{:08X}", image.crc),
            "Loaded application image"
        );
        Ok(image)
    }

    /// Checksum of the whole image, as announced in START.
    pub fn crc(&self) -> u32 {
        self.crc
    }

    /// Image size as announced in START.
    pub fn app_size(&self) -> u32 {
        // Bounded by MAX_APP_SIZE at construction.
        self.data.len() as u32
    }

    /// Iterate over DATA payloads of at most `chunk_size` bytes.
    pub fn chunks(&self, chunk_size: usize) -> Result<ChunkIterator<'_>, ImageError> {
        if chunk_size == 0 {
            return Err(ImageError::InvalidChunkSize);
        }
        Ok(ChunkIterator::new(&self.data, chunk_size))
    }

    /// Number of DATA packets needed for `chunk_size`.
    pub fn chunk_count(&self, chunk_size: usize) -> Result<usize, ImageError> {
        if chunk_size == 0 {
            return Err(ImageError::InvalidChunkSize);
        }
        Ok(self.data.len().div_ceil(chunk_size))
    }

    /// Get raw data.
    pub fn raw_data(&self) -> &[u8] {
        &self.data
    }

    /// Get total size.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Iterator over fixed-size chunks; the last one may be shorter.
#[derive(Debug, Clone)]
pub struct ChunkIterator<'a> {
    data: &'a [u8],
    chunk_size: usize,
    offset: usize,
    current_chunk: usize,
}

impl<'a> ChunkIterator<'a> {
    fn new(data: &'a [u8], chunk_size: usize) -> Self {
        Self {
            data,
            chunk_size,
            offset: 0,
            current_chunk: 0,
        }
    }

    /// Get total number of chunks (including partial).
    pub fn total(&self) -> usize {
        self.data.len().div_ceil(self.chunk_size)
    }
}

impl<'a> Iterator for ChunkIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }

        let remaining = self.data.len() - self.offset;
        let chunk_len = remaining.min(self.chunk_size);

        let chunk = &self.data[self.offset..self.offset + chunk_len];
        self.offset += chunk_len;
        self.current_chunk += 1;

        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total() - self.current_chunk;
        (left, Some(left))
    }
}

impl ExactSizeIterator for ChunkIterator<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_crc() {
        let image = FirmwareImage::from_bytes(b"123456789".to_vec()).unwrap();
        assert_eq!(image.crc(), 0x0376_E6E7);
        assert_eq!(image.app_size(), 9);
        assert_eq!(image.raw_data(), b"123456789");
    }

    #[test]
    fn test_image_too_large() {
        let data = vec![0u8; MAX_APP_SIZE as usize + 1];
        assert!(matches!(
            FirmwareImage::from_bytes(data),
            Err(ImageError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_image_max_size_accepted() {
        let data = vec![0u8; MAX_APP_SIZE as usize];
        let image = FirmwareImage::from_bytes(data).unwrap();
        assert_eq!(image.app_size(), MAX_APP_SIZE);
    }

    #[test]
    fn test_chunk_iterator() {
        let image = FirmwareImage::from_bytes(vec![0u8; 300]).unwrap();
        let iter = image.chunks(128).unwrap();

        assert_eq!(iter.total(), 3); // 2 full + 1 partial
        assert_eq!(iter.len(), 3);

        let chunks: Vec<_> = iter.collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 128);
        assert_eq!(chunks[1].len(), 128);
        assert_eq!(chunks[2].len(), 300 - 2 * 128);
        assert_eq!(image.chunk_count(128).unwrap(), 3);
    }

    #[test]
    fn test_chunks_reassemble() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let image = FirmwareImage::from_bytes(data.clone()).unwrap();
        let joined: Vec<u8> = image.chunks(64).unwrap().flatten().copied().collect();
        assert_eq!(joined, data);
    }

    #[test]
    fn test_aligned_and_empty() {
        let image = FirmwareImage::from_bytes(vec![1u8; 256]).unwrap();
        assert_eq!(image.chunk_count(128).unwrap(), 2);

        let empty = FirmwareImage::from_bytes(Vec::new()).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.crc(), 0xFFFF_FFFF);
        assert_eq!(empty.chunk_count(64).unwrap(), 0);
        assert_eq!(empty.chunks(64).unwrap().count(), 0);
    }

    #[test]
    fn test_zero_chunk_size() {
        let image = FirmwareImage::from_bytes(vec![1u8; 4]).unwrap();
        assert!(matches!(image.chunks(0), Err(ImageError::InvalidChunkSize)));
        assert!(matches!(
            image.chunk_count(0),
            Err(ImageError::InvalidChunkSize)
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let result = FirmwareImage::load("/nonexistent/voyager/app.bin");
        assert!(matches!(result, Err(ImageError::Io(_))));
    }

    #[test]
    fn test_load_from_disk() {
        let path = std::env::temp_dir().join(format!("voyager-image-{}.bin", std::process::id()));
        std::fs::write(&path, b"123456789").unwrap();
        let image = FirmwareImage::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(image.crc(), 0x0376_E6E7);
    }
}
