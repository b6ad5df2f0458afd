//! Payload handling module.
//!
//! Provides loading and chunking for application images.

pub mod firmware;

pub use firmware::{ChunkIterator, FirmwareImage, ImageError};
