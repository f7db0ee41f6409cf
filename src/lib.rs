pub mod config;
pub mod ffmpeg;
pub mod fit;
pub mod logging;
pub mod notice;
pub mod selection;

/// Bytes per megabyte as used by the size limit (binary megabytes).
pub const BYTES_PER_MB: u64 = 1024 * 1024;

pub fn megabytes_to_bytes(megabytes: u32) -> u64 {
    megabytes as u64 * BYTES_PER_MB
}

pub fn bytes_to_megabytes(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB as f64
}
