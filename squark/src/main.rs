mod element;
mod gate;
mod source;

use element::{Flow, Squark};
use source::RawVideoReader;
use squark_common::config::Config;
use squark_common::logging;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    logging::init(&config.logging.level);

    info!(
        width = config.input.width,
        height = config.input.height,
        fps = config.input.fps,
        prefix = %config.bucket.prefix,
        slots = config.bucket.slots,
        capacity = config.bucket.capacity,
        min_interval_secs = config.gate.min_interval_secs,
        "starting squark"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || {
        if handler_stop.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        eprintln!("stopping after the current frame, press Ctrl-C again to abort");
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    let mut element = Squark::new(&config.bucket, &config.gate);
    let stdin = std::io::stdin();
    let reader = RawVideoReader::new(
        stdin.lock(),
        config.input.width,
        config.input.height,
        config.input.fps,
    );
    let info = reader.info();

    let mut total: u64 = 0;
    for result in reader {
        if stop.load(Ordering::SeqCst) {
            info!("stop requested");
            break;
        }

        let frame = match result {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, "failed to read frame from stdin");
                break;
            }
        };

        total += 1;
        if total % 100 == 0 {
            debug!(total, "frames read");
        }

        if element.transform_ip(&frame, Some(&info)) == Flow::Error {
            error!(pts_ns = frame.pts_ns(), "element failed, stopping");
            break;
        }
    }

    info!(frames = total, "input finished, shutting down");
    element.stop(Some(Duration::from_millis(config.bucket.join_timeout_ms)));
}
