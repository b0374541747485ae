use squark_common::frame::{FrameBuffer, FrameError};
use tracing::debug;

/// Time constant of the smoothing weight, in seconds.
const TAU_SECS: f64 = 0.8;
/// A frame is significant if its MSE exceeds `SPIKE_RATIO * running_mse`.
const SPIKE_RATIO: f64 = 1.7;

/// Outcome of evaluating one frame against the reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Novelty {
    /// No reference existed; the frame became the reference.
    Reference,
    /// The frame is part of the baseline.
    Absorbed { mse: f64 },
    /// The frame differs sharply from the baseline and should be kept.
    Significant { mse: f64 },
}

impl Novelty {
    pub fn is_significant(&self) -> bool {
        matches!(self, Novelty::Significant { .. })
    }
}

struct Reference {
    pixels: Vec<u8>,
    pts_ns: u64,
}

/// Mean-squared-error change detector.
///
/// Every frame is compared against the first frame the filter saw. A frame
/// is significant when its MSE jumps above `1.7x` the running statistic.
///
/// The running statistic is computed as an exponential moving average with a
/// time-decay weight `1 - e^(-dt / 0.8s)`, but it is then replaced by the
/// instantaneous MSE of the frame, so the next comparison is always against
/// the previous frame's MSE. Callers observing `running_mse()` rely on that.
pub struct NoveltyFilter {
    width: u32,
    height: u32,
    reference: Option<Reference>,
    running_mse: f64,
}

impl NoveltyFilter {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            reference: None,
            running_mse: 0.0,
        }
    }

    pub fn running_mse(&self) -> f64 {
        self.running_mse
    }

    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    pub fn evaluate(&mut self, frame: &FrameBuffer) -> Result<Novelty, FrameError> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(FrameError::DimensionMismatch {
                got: (frame.width(), frame.height()),
                expected: (self.width, self.height),
            });
        }
        let current = frame.map()?;

        let Some(reference) = &self.reference else {
            debug!(pts_ns = frame.pts_ns(), "first frame, storing as reference");
            self.reference = Some(Reference {
                pixels: current.to_vec(),
                pts_ns: frame.pts_ns(),
            });
            return Ok(Novelty::Reference);
        };

        let current_mse = mean_squared_error(current, &reference.pixels);
        let dt = (frame.pts_ns() as f64 - reference.pts_ns as f64) / 1e9;
        let alpha = 1.0 - (-dt / TAU_SECS).exp();

        let novelty = if self.running_mse > 0.0 && current_mse > SPIKE_RATIO * self.running_mse {
            Novelty::Significant { mse: current_mse }
        } else {
            self.running_mse = (1.0 - alpha) * self.running_mse + alpha * current_mse;
            Novelty::Absorbed { mse: current_mse }
        };

        debug!(
            pts_ns = frame.pts_ns(),
            mse = format!("{:.3}", current_mse),
            running = format!("{:.3}", self.running_mse),
            alpha = format!("{:.3}", alpha),
            significant = novelty.is_significant(),
            "MSE check"
        );

        self.running_mse = current_mse;
        Ok(novelty)
    }
}

/// Mean of the squared per-channel differences between two packed buffers.
///
/// Both slices must have the same length; the mean is taken over that length
/// (`width * height * 3` for a mapped frame).
pub fn mean_squared_error(a: &[u8], b: &[u8]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    if a.is_empty() {
        return 0.0;
    }
    let sum: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let diff = x as f64 - y as f64;
            diff * diff
        })
        .sum();
    sum / a.len() as f64
}
