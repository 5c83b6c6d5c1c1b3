//! cabfs-extract: obfuscated-path resolution and the concurrent extraction
//! pipeline
//!
//! One producer walks the manifest tree, opening and (when required)
//! key-wrapping each source file; a bounded queue hands the resulting
//! streams to a pool of copy workers. The queue's small capacity is the
//! backpressure keeping the walk from racing ahead of the disk writers.

pub mod error;
pub mod pipeline;
pub mod shard;
pub mod verify;

pub use error::ExtractError;
pub use pipeline::{DrmFile, ExtractOptions, ExtractSummary, Extractor};
pub use shard::{shard_path, PathObfuscator};
pub use verify::{verify_contents, VerifyReport};
