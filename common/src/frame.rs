use image::RgbImage;

/// Bytes per pixel of the packed RGB layout every frame carries.
pub const CHANNELS: usize = 3;

/// A raw video frame with its presentation timestamp.
///
/// The payload is opaque until it is mapped: construction never checks that
/// the byte count matches the declared dimensions, the same way an upstream
/// buffer is only known to be readable once it is mapped.
///
/// Layout: packed RGB, row-major, `width * height * 3` bytes, no padding.
#[derive(Clone)]
pub struct FrameBuffer {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    pts_ns: u64,
    keyframe: bool,
}

impl FrameBuffer {
    /// Create a new keyframe from packed RGB bytes.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, pts_ns: u64) -> Self {
        Self {
            pixels,
            width,
            height,
            pts_ns,
            keyframe: true,
        }
    }

    /// Create a frame filled with a single RGB colour.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3], pts_ns: u64) -> Self {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * CHANNELS);
        for _ in 0..count {
            pixels.extend_from_slice(&rgb);
        }
        Self::new(pixels, width, height, pts_ns)
    }

    /// Mark the frame as a keyframe or as a delta unit.
    pub fn with_keyframe(mut self, keyframe: bool) -> Self {
        self.keyframe = keyframe;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Presentation timestamp in nanoseconds.
    pub fn pts_ns(&self) -> u64 {
        self.pts_ns
    }

    /// Returns true if the frame depends on previous frames to be decoded.
    pub fn is_delta_unit(&self) -> bool {
        !self.keyframe
    }

    /// Number of payload bytes the declared dimensions require.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * CHANNELS
    }

    /// Map the payload for reading.
    ///
    /// Fails when the dimensions are zero or the payload is shorter than the
    /// dimensions require. Trailing bytes beyond `width * height * 3` are
    /// not part of the mapped view.
    pub fn map(&self) -> Result<&[u8], FrameError> {
        self.check()?;
        Ok(&self.pixels[..self.expected_len()])
    }

    /// Consume the frame into an owned RGB image.
    pub fn into_image(mut self) -> Result<RgbImage, FrameError> {
        self.check()?;
        let expected = self.expected_len();
        self.pixels.truncate(expected);
        let got = self.pixels.len();
        RgbImage::from_raw(self.width, self.height, self.pixels)
            .ok_or(FrameError::TooShort { got, expected })
    }

    fn check(&self) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameError::ZeroDimension {
                width: self.width,
                height: self.height,
            });
        }
        let expected = self.expected_len();
        if self.pixels.len() < expected {
            return Err(FrameError::TooShort {
                got: self.pixels.len(),
                expected,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pts_ns", &self.pts_ns)
            .field("keyframe", &self.keyframe)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame has a zero dimension: {width}x{height}")]
    ZeroDimension { width: u32, height: u32 },
    #[error("frame payload too short: got {got} bytes, expected at least {expected}")]
    TooShort { got: usize, expected: usize },
    #[error("frame is {got:?}, expected {expected:?}")]
    DimensionMismatch {
        got: (u32, u32),
        expected: (u32, u32),
    },
}
