pub mod mse;

pub use mse::{Novelty, NoveltyFilter};
