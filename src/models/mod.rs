pub mod episode;
pub mod result;

pub use episode::{EpisodeRecord, compose_rename, split_extension};
pub use result::OperationResult;
