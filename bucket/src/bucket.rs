use parking_lot::Mutex;
use squark_common::config::{BucketConfig, MAX_SLOTS, MIN_SLOTS};
use squark_common::frame::{FrameBuffer, FrameError};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::digest;
use crate::filter::{Novelty, NoveltyFilter};
use crate::mosaic::Layout;
use crate::stats::{BucketStats, Counters};
use crate::storage::MosaicStore;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Construction parameters of a [`Bucket`].
#[derive(Debug, Clone)]
pub struct BucketSettings {
    /// Maximum number of queued frames.
    pub capacity: usize,
    /// Output files are `<prefix>-<n>.jpg`.
    pub prefix: String,
    /// Frames per mosaic.
    pub slots: u32,
    /// Mosaic width, also the frame width the novelty filter expects.
    pub width: u32,
    /// Mosaic height, also the frame height the novelty filter expects.
    pub height: u32,
    /// How long the worker sleeps when less than a full batch is queued.
    pub poll_interval: Duration,
    pub jpeg_quality: u8,
    /// Index of the first mosaic file.
    pub first_index: u64,
}

impl BucketSettings {
    pub fn new(
        capacity: usize,
        prefix: impl Into<String>,
        slots: u32,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            capacity,
            prefix: prefix.into(),
            slots,
            width,
            height,
            poll_interval: DEFAULT_POLL_INTERVAL,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            first_index: 1,
        }
    }

    pub fn from_config(config: &BucketConfig, width: u32, height: u32) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            jpeg_quality: config.jpeg_quality,
            ..Self::new(config.capacity, config.prefix.clone(), config.slots, width, height)
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn validate(&self) -> Result<(), BucketError> {
        if self.capacity == 0 {
            return Err(BucketError::InvalidSettings("capacity must be positive".into()));
        }
        if !(MIN_SLOTS..=MAX_SLOTS).contains(&self.slots) {
            return Err(BucketError::InvalidSettings(format!(
                "slots must be within {MIN_SLOTS}..={MAX_SLOTS}, got {}",
                self.slots
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(BucketError::InvalidSettings(format!(
                "dimensions must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(BucketError::InvalidSettings(format!(
                "jpeg quality must be within 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        Ok(())
    }
}

/// Everything guarded by the bucket lock.
struct State {
    queue: VecDeque<FrameBuffer>,
    filter: NoveltyFilter,
    running: bool,
    /// Bumped on every start; a worker whose generation is stale exits.
    generation: u64,
}

/// What a worker should do after one look at the queue.
pub(crate) enum Poll {
    Stop,
    Wait,
    Batch(Vec<FrameBuffer>),
}

/// Bucket internals shared with the digestion worker.
pub(crate) struct Shared {
    state: Mutex<State>,
    capacity: usize,
    slots: usize,
    pub(crate) layout: Layout,
    pub(crate) store: MosaicStore,
    pub(crate) poll_interval: Duration,
    pub(crate) counters: Counters,
}

impl Shared {
    /// Remove exactly one batch, oldest first, if the worker of `generation`
    /// is still the active one and a full batch is queued.
    pub(crate) fn poll(&self, generation: u64) -> Poll {
        let mut state = self.state.lock();
        if !state.running || state.generation != generation {
            return Poll::Stop;
        }
        match drain_batch(&mut state.queue, self.slots) {
            Some(batch) => Poll::Batch(batch),
            None => Poll::Wait,
        }
    }
}

fn drain_batch(queue: &mut VecDeque<FrameBuffer>, slots: usize) -> Option<Vec<FrameBuffer>> {
    if queue.len() < slots {
        return None;
    }
    Some(queue.drain(..slots).collect())
}

/// Bounded frame accumulator that turns batches of frames into mosaics.
///
/// Producers hand frames over with [`Bucket::ingest`] or
/// [`Bucket::ingest_filtered`]; neither blocks. A single background worker,
/// started with [`Bucket::start_digest_thread`], drains full batches and
/// writes one JPEG per batch.
pub struct Bucket {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Bucket {
    pub fn new(settings: BucketSettings) -> Result<Self, BucketError> {
        settings.validate()?;
        let shared = Shared {
            state: Mutex::new(State {
                queue: VecDeque::with_capacity(settings.capacity),
                filter: NoveltyFilter::new(settings.width, settings.height),
                running: false,
                generation: 0,
            }),
            capacity: settings.capacity,
            slots: settings.slots as usize,
            layout: Layout::new(settings.width, settings.height, settings.slots),
            store: MosaicStore::new(settings.prefix, settings.jpeg_quality)
                .with_first_index(settings.first_index),
            poll_interval: settings.poll_interval,
            counters: Counters::default(),
        };
        debug!(
            capacity = shared.capacity,
            slots = shared.slots,
            width = shared.layout.width,
            height = shared.layout.height,
            prefix = shared.store.prefix(),
            "bucket created"
        );
        Ok(Self {
            shared: Arc::new(shared),
            worker: Mutex::new(None),
        })
    }

    /// Append a frame to the queue.
    ///
    /// When the queue is full the frame is dropped and `QueueFull` returned;
    /// the call never waits for space.
    pub fn ingest(&self, frame: FrameBuffer) -> Result<(), BucketError> {
        let mut state = self.shared.state.lock();
        self.push(&mut state, frame)
    }

    /// Run the frame through the novelty filter and queue it only if it is
    /// significant.
    ///
    /// Significant frames are still subject to the capacity limit. Frames
    /// that are not queued are dropped before returning.
    pub fn ingest_filtered(&self, frame: FrameBuffer) -> Result<Novelty, BucketError> {
        let mut state = self.shared.state.lock();
        let novelty = match state.filter.evaluate(&frame) {
            Ok(n) => n,
            Err(e) => {
                debug!(pts_ns = frame.pts_ns(), error = %e, "frame cannot be evaluated");
                return Err(e.into());
            }
        };

        if !novelty.is_significant() {
            Counters::bump(&self.shared.counters.filtered_out);
            return Ok(novelty);
        }

        let pts_ns = frame.pts_ns();
        self.push(&mut state, frame)?;
        debug!(pts_ns, "significant frame pushed");
        Ok(novelty)
    }

    fn push(&self, state: &mut State, frame: FrameBuffer) -> Result<(), BucketError> {
        let len = state.queue.len();
        let capacity = self.shared.capacity;
        if len >= capacity {
            warn!(len, capacity, pts_ns = frame.pts_ns(), "the queue is full, dropping frame");
            Counters::bump(&self.shared.counters.rejected);
            return Err(BucketError::QueueFull { len, capacity });
        }
        state.queue.push_back(frame);
        Counters::bump(&self.shared.counters.accepted);
        Ok(())
    }

    /// Spawn the digestion worker.
    ///
    /// Returns `Ok(false)` without spawning anything if a worker is already
    /// running.
    pub fn start_digest_thread(&self) -> Result<bool, BucketError> {
        let generation = {
            let mut state = self.shared.state.lock();
            if state.running {
                warn!("digest thread already running, ignoring start");
                return Ok(false);
            }
            state.running = true;
            state.generation += 1;
            state.generation
        };

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("squark-digest".into())
            .spawn(move || digest::run(shared, generation));

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                Ok(true)
            }
            Err(e) => {
                error!(error = %e, "failed to spawn digest thread");
                self.shared.state.lock().running = false;
                Err(BucketError::Spawn(e))
            }
        }
    }

    /// Ask the worker to stop.
    ///
    /// Returns immediately; the worker notices on its next poll, after
    /// finishing any batch it is working on.
    pub fn shutdown(&self) {
        self.shared.state.lock().running = false;
    }

    /// Ask the worker to stop and wait up to `timeout` for it to exit.
    ///
    /// Returns `true` if no worker is left running.
    pub fn shutdown_and_join(&self, timeout: Duration) -> bool {
        self.shutdown();

        let mut worker = self.worker.lock();
        let Some(handle) = worker.take() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(timeout_ms = timeout.as_millis() as u64, "digest thread did not stop in time");
                *worker = Some(handle);
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }

        if handle.join().is_err() {
            error!("digest thread panicked");
        }
        true
    }

    /// Wait up to `timeout` until less than a full batch is queued.
    ///
    /// Only meaningful while the worker runs; a batch the worker already
    /// took may still be in progress when this returns.
    pub fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.queue_len() < self.shared.slots {
                return true;
            }
            if Instant::now() >= deadline || !self.is_running() {
                return false;
            }
            thread::sleep(self.shared.poll_interval.min(Duration::from_millis(10)));
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn layout(&self) -> Layout {
        self.shared.layout
    }

    /// Index the next mosaic will be written under.
    pub fn next_index(&self) -> u64 {
        self.shared.store.next_index()
    }

    pub fn stats(&self) -> BucketStats {
        self.shared.counters.snapshot()
    }
}

impl Drop for Bucket {
    fn drop(&mut self) {
        self.shutdown();
        if self.worker.get_mut().is_some() {
            info!("bucket dropped, digest thread signalled to stop");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BucketError {
    #[error("invalid bucket settings: {0}")]
    InvalidSettings(String),
    #[error("the queue is full {len}/{capacity}")]
    QueueFull { len: usize, capacity: usize },
    #[error("frame rejected: {0}")]
    Frame(#[from] FrameError),
    #[error("failed to spawn digest thread: {0}")]
    Spawn(std::io::Error),
}
