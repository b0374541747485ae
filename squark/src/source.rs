use squark_common::frame::{FrameBuffer, CHANNELS};
use std::io::{ErrorKind, Read};
use tracing::warn;

use crate::element::VideoInfo;

/// Reads packed RGB24 frames back to back from a byte stream, e.g. the
/// stdout of `ffmpeg -i <url> -f rawvideo -pix_fmt rgb24 -`.
///
/// Raw frames are fully decoded pictures, so every frame is a keyframe.
/// Timestamps are derived from the frame index and the nominal frame rate.
pub struct RawVideoReader<R> {
    reader: R,
    width: u32,
    height: u32,
    fps: f64,
    index: u64,
}

impl<R: Read> RawVideoReader<R> {
    pub fn new(reader: R, width: u32, height: u32, fps: f64) -> Self {
        Self {
            reader,
            width,
            height,
            fps,
            index: 0,
        }
    }

    pub fn info(&self) -> VideoInfo {
        VideoInfo::new(
            i32::try_from(self.width).unwrap_or(i32::MAX),
            i32::try_from(self.height).unwrap_or(i32::MAX),
        )
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * CHANNELS
    }

    fn pts_ns(&self) -> u64 {
        (self.index as f64 * 1e9 / self.fps) as u64
    }

    /// Read the next frame. Returns `Ok(None)` at end of stream.
    pub fn read_frame(&mut self) -> Result<Option<FrameBuffer>, SourceError> {
        let mut pixels = vec![0u8; self.frame_len()];
        let mut filled = 0;
        while filled < pixels.len() {
            match self.reader.read(&mut pixels[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(SourceError::Read(e)),
            }
        }

        if filled < pixels.len() {
            if filled > 0 {
                warn!(
                    got = filled,
                    expected = pixels.len(),
                    "discarding truncated frame at end of stream"
                );
            }
            return Ok(None);
        }

        let frame = FrameBuffer::new(pixels, self.width, self.height, self.pts_ns());
        self.index += 1;
        Ok(Some(frame))
    }
}

impl<R: Read> Iterator for RawVideoReader<R> {
    type Item = Result<FrameBuffer, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_frame().transpose()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to read raw video: {0}")]
    Read(#[from] std::io::Error),
}
