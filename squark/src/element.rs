use squark_bucket::{Bucket, BucketError, BucketSettings};
use squark_common::config::{BucketConfig, GateConfig, MAX_SLOTS, MIN_SLOTS};
use squark_common::frame::FrameBuffer;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::gate::IngestGate;

/// Negotiated video format of the incoming stream.
///
/// Dimensions are signed because a format description may carry values that
/// are not usable yet; they are checked on every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInfo {
    pub width: i32,
    pub height: i32,
}

impl VideoInfo {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        if self.width <= 0 || self.height <= 0 {
            return None;
        }
        Some((self.width as u32, self.height as u32))
    }
}

/// Result of handing one frame to the element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Ok,
    Error,
}

#[derive(Debug, thiserror::Error)]
pub enum ElementError {
    #[error("slots must be within {MIN_SLOTS}..={MAX_SLOTS}, got {0}")]
    SlotsOutOfRange(u32),
}

/// Passthrough element that samples keyframes into a [`Bucket`].
///
/// The bucket is built from the current `prefix` and `slots` when the first
/// frame with usable dimensions arrives, and lives until [`Squark::stop`].
pub struct Squark {
    prefix: String,
    slots: u32,
    bucket_config: BucketConfig,
    gate: IngestGate,
    bucket: Option<Bucket>,
    /// Carried across buckets so a rebuilt bucket never overwrites mosaics.
    next_index: u64,
}

impl Default for Squark {
    fn default() -> Self {
        Self::new(&BucketConfig::default(), &GateConfig::default())
    }
}

impl Squark {
    pub fn new(bucket_config: &BucketConfig, gate_config: &GateConfig) -> Self {
        Self {
            prefix: bucket_config.prefix.clone(),
            slots: bucket_config.slots,
            bucket_config: bucket_config.clone(),
            gate: IngestGate::new(Duration::from_secs_f64(gate_config.min_interval_secs)),
            bucket: None,
            next_index: 1,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn set_prefix(&mut self, prefix: impl Into<String>) {
        self.prefix = prefix.into();
    }

    pub fn slots(&self) -> u32 {
        self.slots
    }

    pub fn set_slots(&mut self, slots: u32) -> Result<(), ElementError> {
        if !(MIN_SLOTS..=MAX_SLOTS).contains(&slots) {
            return Err(ElementError::SlotsOutOfRange(slots));
        }
        self.slots = slots;
        Ok(())
    }

    pub fn bucket(&self) -> Option<&Bucket> {
        self.bucket.as_ref()
    }

    pub fn transform_ip(&mut self, frame: &FrameBuffer, info: Option<&VideoInfo>) -> Flow {
        self.transform_ip_at(frame, info, Instant::now())
    }

    /// Handle one frame as if it arrived at `now`.
    pub fn transform_ip_at(
        &mut self,
        frame: &FrameBuffer,
        info: Option<&VideoInfo>,
        now: Instant,
    ) -> Flow {
        self.transform_with(frame, info, now, |bucket, copy| bucket.ingest(copy))
    }

    fn transform_with<F>(
        &mut self,
        frame: &FrameBuffer,
        info: Option<&VideoInfo>,
        now: Instant,
        ingest: F,
    ) -> Flow
    where
        F: FnOnce(&Bucket, FrameBuffer) -> Result<(), BucketError>,
    {
        if frame.is_delta_unit() {
            return Flow::Ok;
        }

        let Some(info) = info else {
            error!("failed to get the video information for this frame, skipped");
            return Flow::Error;
        };

        let Some((width, height)) = info.dimensions() else {
            warn!(
                width = info.width,
                height = info.height,
                "the video dimensions are invalid for now, skipped"
            );
            return Flow::Error;
        };

        let bucket = match self.bucket.take() {
            Some(bucket) => bucket,
            None => match self.build_bucket(width, height) {
                Ok(bucket) => bucket,
                Err(e) => {
                    error!(error = %e, "failed to create the bucket");
                    return Flow::Error;
                }
            },
        };
        let bucket = self.bucket.insert(bucket);

        if !self.gate.is_open(now) {
            return Flow::Ok;
        }

        let copy = frame.clone();
        match panic::catch_unwind(AssertUnwindSafe(|| ingest(bucket, copy))) {
            Ok(result) => {
                if let Err(BucketError::QueueFull { .. }) = result {
                    debug!(pts_ns = frame.pts_ns(), "frame dropped by full bucket");
                }
                self.gate.record(now);
            }
            Err(_) => {
                error!(
                    pts_ns = frame.pts_ns(),
                    "an unexpected panic occurred while ingesting the frame"
                );
            }
        }

        Flow::Ok
    }

    fn build_bucket(&self, width: u32, height: u32) -> Result<Bucket, BucketError> {
        let settings = BucketSettings {
            prefix: self.prefix.clone(),
            slots: self.slots,
            first_index: self.next_index,
            ..BucketSettings::from_config(&self.bucket_config, width, height)
        };
        let bucket = Bucket::new(settings)?;
        bucket.start_digest_thread()?;
        info!(
            width,
            height,
            prefix = %self.prefix,
            slots = self.slots,
            "bucket created and digest thread started"
        );
        Ok(bucket)
    }

    /// Tear the bucket down.
    ///
    /// With a timeout, full batches still queued are digested first and the
    /// worker is joined, both within the one timeout. Without one the worker
    /// is only signalled to stop.
    pub fn stop(&mut self, join_timeout: Option<Duration>) {
        let Some(bucket) = self.bucket.take() else {
            return;
        };
        match join_timeout {
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                if !bucket.wait_for_drain(timeout) {
                    warn!(queued = bucket.queue_len(), "bucket not drained before shutdown");
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if !bucket.shutdown_and_join(remaining) {
                    warn!("digest thread left running after stop");
                }
            }
            None => bucket.shutdown(),
        }
        self.next_index = bucket.next_index();
        let stats = bucket.stats();
        info!(
            accepted = stats.accepted,
            rejected = stats.rejected,
            mosaics = stats.mosaics_written,
            "bucket stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const INFO: VideoInfo = VideoInfo {
        width: 8,
        height: 8,
    };

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("squark-element-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn element(dir: &std::path::Path, slots: u32, min_interval_secs: f64) -> Squark {
        let bucket_config = BucketConfig {
            prefix: dir.join("thumb").display().to_string(),
            slots,
            poll_interval_ms: 5,
            ..BucketConfig::default()
        };
        Squark::new(&bucket_config, &GateConfig { min_interval_secs })
    }

    fn frame(pts_ns: u64) -> FrameBuffer {
        FrameBuffer::solid(8, 8, [128, 64, 32], pts_ns)
    }

    #[test]
    fn defaults() {
        let squark = Squark::default();
        assert_eq!(squark.prefix(), "thumbnail");
        assert_eq!(squark.slots(), 9);
        assert!(squark.bucket().is_none());
    }

    #[test]
    fn slots_are_range_checked() {
        let mut squark = Squark::default();
        assert!(matches!(squark.set_slots(0), Err(ElementError::SlotsOutOfRange(0))));
        assert!(matches!(squark.set_slots(17), Err(ElementError::SlotsOutOfRange(17))));
        assert_eq!(squark.slots(), 9);
        squark.set_slots(16).unwrap();
        assert_eq!(squark.slots(), 16);
    }

    #[test]
    fn delta_units_pass_through_untouched() {
        let mut squark = Squark::default();
        let delta = frame(0).with_keyframe(false);
        assert_eq!(squark.transform_ip(&delta, None), Flow::Ok);
        assert!(squark.bucket().is_none());
    }

    #[test]
    fn missing_or_invalid_caps_is_an_error() {
        let mut squark = Squark::default();
        assert_eq!(squark.transform_ip(&frame(0), None), Flow::Error);
        assert_eq!(
            squark.transform_ip(&frame(0), Some(&VideoInfo::new(0, 8))),
            Flow::Error
        );
        assert_eq!(
            squark.transform_ip(&frame(0), Some(&VideoInfo::new(8, -1))),
            Flow::Error
        );
        assert!(squark.bucket().is_none());
    }

    #[test]
    fn first_valid_frame_builds_running_bucket() {
        let dir = scratch_dir("build");
        let mut squark = element(&dir, 4, 8.0);

        assert_eq!(squark.transform_ip(&frame(0), Some(&INFO)), Flow::Ok);
        let bucket = squark.bucket().unwrap();
        assert!(bucket.is_running());
        assert_eq!(bucket.layout().grid.cols, 2);
        assert_eq!(bucket.stats().accepted, 1);

        squark.stop(Some(Duration::from_secs(5)));
        assert!(squark.bucket().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn gate_spaces_out_ingestion() {
        let dir = scratch_dir("gate");
        let mut squark = element(&dir, 4, 8.0);
        let t0 = Instant::now();

        for offset_ms in [0, 1_000, 7_999, 8_000, 9_000, 16_000] {
            let now = t0 + Duration::from_millis(offset_ms);
            assert_eq!(squark.transform_ip_at(&frame(offset_ms), Some(&INFO), now), Flow::Ok);
        }

        // Ingested at 0s, 8s and 16s.
        assert_eq!(squark.bucket().unwrap().stats().accepted, 3);
        squark.stop(None);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn new_slots_apply_to_next_bucket() {
        let dir = scratch_dir("slots");
        let mut squark = element(&dir, 4, 0.0);

        squark.transform_ip(&frame(0), Some(&INFO));
        squark.set_slots(9).unwrap();
        assert_eq!(squark.bucket().unwrap().layout().grid.cols, 2);

        squark.stop(Some(Duration::from_secs(5)));
        squark.transform_ip(&frame(1), Some(&INFO));
        assert_eq!(squark.bucket().unwrap().layout().grid.cols, 3);
        assert_eq!(squark.bucket().unwrap().next_index(), 1);
        squark.stop(Some(Duration::from_secs(5)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn rebuilt_bucket_continues_numbering() {
        let dir = scratch_dir("renumber");
        let mut squark = element(&dir, 1, 0.0);

        squark.transform_ip(&frame(0), Some(&INFO));
        squark.stop(Some(Duration::from_secs(10)));
        assert!(dir.join("thumb-1.jpg").exists());

        squark.transform_ip(&frame(1), Some(&INFO));
        squark.stop(Some(Duration::from_secs(10)));
        assert!(dir.join("thumb-2.jpg").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn panicking_ingest_is_contained_and_not_recorded() {
        let dir = scratch_dir("panic");
        let mut squark = element(&dir, 4, 8.0);
        let now = Instant::now();

        let flow = squark.transform_with(&frame(0), Some(&INFO), now, |_, _| {
            panic!("ingest blew up")
        });
        assert_eq!(flow, Flow::Ok);
        assert_eq!(squark.bucket().unwrap().stats().accepted, 0);

        // The gate stayed open, so the next frame at the same instant goes in.
        assert_eq!(squark.transform_ip_at(&frame(1), Some(&INFO), now), Flow::Ok);
        assert_eq!(squark.bucket().unwrap().stats().accepted, 1);

        squark.stop(None);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stop_timeout_bounds_the_whole_teardown() {
        let dir = scratch_dir("deadline");
        let bucket_config = BucketConfig {
            prefix: dir.join("thumb").display().to_string(),
            slots: 2,
            poll_interval_ms: 10_000,
            ..BucketConfig::default()
        };
        let mut squark = Squark::new(&bucket_config, &GateConfig { min_interval_secs: 0.0 });
        for pts in 0..6 {
            squark.transform_ip(&frame(pts), Some(&INFO));
        }

        let started = Instant::now();
        squark.stop(Some(Duration::from_millis(500)));
        assert!(started.elapsed() < Duration::from_millis(900));
        assert!(squark.bucket().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn one_batch_yields_one_mosaic() {
        let dir = scratch_dir("batch");
        let mut squark = element(&dir, 4, 0.0);

        for pts in 0..4 {
            assert_eq!(squark.transform_ip(&frame(pts), Some(&INFO)), Flow::Ok);
        }
        squark.stop(Some(Duration::from_secs(10)));

        assert!(dir.join("thumb-1.jpg").exists());
        assert!(!dir.join("thumb-2.jpg").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
