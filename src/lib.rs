//! ddswatch - DDS texture conversion pipeline
//!
//! Watches a folder (or batch-converts it) and turns source images into
//! block-compressed DDS textures via the external nvcompress encoder.

pub mod batch;
pub mod config;
pub mod encoder;
pub mod paths;
pub mod policy;
pub mod watch;
pub mod worker;
