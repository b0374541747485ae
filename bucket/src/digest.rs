use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info};

use crate::bucket::{Poll, Shared};
use crate::mosaic::{self, Mosaic};
use crate::stats::Counters;

/// Worker loop: wait for a full batch, tile it, write it, repeat.
///
/// The queue is polled every `poll_interval`; no lock is held while a batch
/// is composed or written.
pub(crate) fn run(shared: Arc<Shared>, generation: u64) {
    info!(generation, "digest thread started");

    loop {
        let batch = match shared.poll(generation) {
            Poll::Stop => break,
            Poll::Wait => {
                thread::sleep(shared.poll_interval);
                continue;
            }
            Poll::Batch(batch) => batch,
        };

        let frames = batch.len();
        let mosaic = mosaic::compose(&shared.layout, batch);
        record(&shared.counters, &mosaic);
        debug!(
            frames,
            tiles = mosaic.tiles_placed,
            map_failures = mosaic.map_failures,
            degenerate = mosaic.degenerate,
            "batch composed"
        );

        if mosaic.is_empty() {
            continue;
        }

        match shared.store.persist(&mosaic.canvas) {
            Ok(path) => {
                Counters::bump(&shared.counters.mosaics_written);
                info!(path = %path.display(), tiles = mosaic.tiles_placed, "mosaic written");
            }
            Err(e) => {
                Counters::bump(&shared.counters.write_failures);
                error!(error = %e, "failed to write mosaic");
            }
        }
    }

    info!(generation, "digest thread stopped");
}

fn record(counters: &Counters, mosaic: &Mosaic) {
    Counters::add(&counters.tiled, mosaic.tiles_placed);
    Counters::add(&counters.map_failures, mosaic.map_failures);
    Counters::add(&counters.degenerate_tiles, mosaic.degenerate);
}
