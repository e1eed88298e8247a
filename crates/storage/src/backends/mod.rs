//! Object client implementations.

pub mod memory;
pub mod s3;
