//! Gzip Compression Utilities
//!
//! Shared compression logic for cached response payloads.
//! Large semantic-cache bodies are gzipped and carried inside JSON
//! documents as base64 text with a marker flag on the stored object.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use tracing::debug;

use super::error::{GatewayError, GatewayResult};

/// Payloads below this size are stored verbatim; gzip overhead dominates otherwise.
pub const COMPRESSION_FLOOR_BYTES: usize = 1024;

/// Compression statistics for logging and monitoring
#[derive(Debug, Clone, Copy)]
pub struct CompressionStats {
    pub original_size: usize,
    pub compressed_size: usize,
    pub ratio_percent: f64,
}

impl CompressionStats {
    /// Calculate compression statistics
    #[inline]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(original_size: usize, compressed_size: usize) -> Self {
        let ratio_percent = if original_size > 0 {
            (1.0 - (compressed_size as f64 / original_size as f64)) * 100.0
        } else {
            0.0
        };
        Self {
            original_size,
            compressed_size,
            ratio_percent,
        }
    }

    /// Get bytes saved
    #[inline]
    #[must_use]
    pub fn bytes_saved(&self) -> usize {
        self.original_size.saturating_sub(self.compressed_size)
    }
}

/// Compress a response payload to gzip and encode as base64 text
///
/// Returns the encoded payload and compression statistics. The caller
/// is responsible for setting the `compressed` marker on the stored
/// document so readers know to decode.
///
/// # Errors
///
/// Returns `GatewayError::Store` if compression fails (write or finish).
#[inline]
pub fn compress_payload(payload: &str) -> GatewayResult<(String, CompressionStats)> {
    let original_size = payload.len();

    // Pre-allocate with estimated 70% compression ratio for text payloads
    let estimated_size = original_size / 3;
    let mut encoder = GzEncoder::new(Vec::with_capacity(estimated_size), Compression::default());

    encoder
        .write_all(payload.as_bytes())
        .map_err(|e| GatewayError::Store(format!("Failed to write to encoder: {e}")))?;

    let compressed = encoder
        .finish()
        .map_err(|e| GatewayError::Store(format!("Failed to finish compression: {e}")))?;

    let stats = CompressionStats::new(original_size, compressed.len());
    debug!(
        original_bytes = stats.original_size,
        compressed_bytes = stats.compressed_size,
        ratio = format!("{:.1}%", stats.ratio_percent),
        "Payload compressed"
    );

    Ok((BASE64.encode(compressed), stats))
}

/// Decode a base64-encoded gzip payload back to the original text
///
/// # Errors
///
/// Returns `GatewayError::Store` if the payload is not valid base64 or gzip.
#[inline]
pub fn decompress_payload(encoded: &str) -> GatewayResult<String> {
    let compressed = BASE64
        .decode(encoded)
        .map_err(|e| GatewayError::Store(format!("Invalid base64 payload: {e}")))?;

    let mut decoder = GzDecoder::new(compressed.as_slice());
    let mut out = String::new();
    decoder
        .read_to_string(&mut out)
        .map_err(|e| GatewayError::Store(format!("Failed to decompress payload: {e}")))?;
    Ok(out)
}

/// Whether a payload is large enough that compression pays for itself
#[inline]
#[must_use]
pub fn should_compress(payload: &str) -> bool {
    payload.len() > COMPRESSION_FLOOR_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_stats() {
        let stats = CompressionStats::new(1000, 300);
        assert_eq!(stats.original_size, 1000);
        assert_eq!(stats.compressed_size, 300);
        assert!((stats.ratio_percent - 70.0).abs() < 0.01);
        assert_eq!(stats.bytes_saved(), 700);
    }

    #[test]
    fn test_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        // Repetitive text, representative of model responses that cache well
        let payload = "The quick brown fox jumps over the lazy dog. ".repeat(100);
        let (encoded, stats) = compress_payload(&payload)?;

        assert_eq!(stats.original_size, payload.len());
        assert!(stats.compressed_size < stats.original_size);

        let restored = decompress_payload(&encoded)?;
        assert_eq!(restored, payload);
        Ok(())
    }

    #[test]
    fn test_should_compress_floor() {
        assert!(!should_compress("short"));
        assert!(should_compress(&"x".repeat(2000)));
    }

    #[test]
    fn test_decompress_rejects_garbage() {
        assert!(decompress_payload("!!not-base64!!").is_err());
    }
}
