//! # corral-image
//!
//! Images are plain root filesystem tarballs kept in one directory.
//!
//! - **Storage**: resolves an image name to its archive.
//! - **Layers**: unpacks an archive into a container's lower layer.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod layer;
pub mod storage;

pub use layer::{Layer, extract_layer};
pub use storage::ImageStore;
