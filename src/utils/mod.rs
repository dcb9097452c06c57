//! Shared helpers

pub mod paths;

pub use paths::{canonical_key, canonical_path, remote_path_from_url};
