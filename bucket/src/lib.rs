//! Frame bucket: a bounded frame queue, an MSE novelty filter, and a
//! background worker that tiles batches of frames into JPEG mosaics.

pub mod bucket;
mod digest;
pub mod filter;
pub mod mosaic;
mod stats;
pub mod storage;

pub use bucket::{Bucket, BucketError, BucketSettings};
pub use filter::{Novelty, NoveltyFilter};
pub use stats::BucketStats;
