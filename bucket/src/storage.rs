use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Writes mosaics to `<prefix>-<n>.jpg`, with `n` counting up from 1.
///
/// Indices are reserved before the file is written, so a number is never
/// handed out twice even if a write fails or two workers briefly overlap.
pub struct MosaicStore {
    prefix: String,
    quality: u8,
    next_index: AtomicU64,
}

impl MosaicStore {
    pub fn new(prefix: impl Into<String>, quality: u8) -> Self {
        Self {
            prefix: prefix.into(),
            quality,
            next_index: AtomicU64::new(1),
        }
    }

    /// Start numbering at `first` instead of 1.
    pub fn with_first_index(self, first: u64) -> Self {
        Self {
            next_index: AtomicU64::new(first.max(1)),
            ..self
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Path of the mosaic with index `n`.
    pub fn path_for(&self, n: u64) -> PathBuf {
        PathBuf::from(format!("{}-{n}.jpg", self.prefix))
    }

    /// Index the next mosaic will be written under.
    pub fn next_index(&self) -> u64 {
        self.next_index.load(Ordering::Acquire)
    }

    /// Encode the canvas and write it under the next free index.
    pub fn persist(&self, canvas: &RgbImage) -> Result<PathBuf, StorageError> {
        let n = self.next_index.fetch_add(1, Ordering::AcqRel);
        let path = self.path_for(n);

        let jpeg = encode_jpeg(canvas, self.quality)?;
        let size = jpeg.len();
        std::fs::write(&path, jpeg).map_err(|source| StorageError::Write {
            path: path.display().to_string(),
            source,
        })?;

        debug!(path = %path.display(), size, "wrote mosaic");
        Ok(path)
    }
}

/// Encode an RGB image as a baseline JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality).encode_image(image)?;
    Ok(bytes)
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to encode mosaic: {0}")]
    Encode(#[from] image::ImageError),
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}
