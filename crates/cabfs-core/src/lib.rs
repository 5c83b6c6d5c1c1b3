pub mod b64;
pub mod manifest;

pub use manifest::{FileRecord, ManifestNode};
