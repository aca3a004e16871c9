//! Content digests for download verification
//!
//! SHA256, hex-encoded, compared case-insensitively. The streaming hasher
//! lets the installer digest a payload chunk-by-chunk while writing it to
//! disk instead of buffering the whole artifact in memory.

use sha2::{Digest, Sha256};

/// SHA256 of a byte slice, hex-encoded.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Case-insensitive hex digest comparison.
pub fn digests_match(actual: &str, expected: &str) -> bool {
    actual.eq_ignore_ascii_case(expected)
}

/// Incremental SHA256 over a stream of chunks.
pub struct StreamingDigest {
    hasher: Sha256,
}

impl StreamingDigest {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    /// Consume the hasher and return the hex digest.
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl Default for StreamingDigest {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the expected digest from a companion checksum file.
///
/// The companion asset is plain text whose first whitespace-delimited
/// token is the hex digest (`sha256sum` output format).
pub fn parse_checksum_text(text: &str) -> Option<String> {
    text.split_whitespace().next().map(|t| t.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let data = b"firmware payload bytes";
        let mut streaming = StreamingDigest::new();
        streaming.update(&data[..8]);
        streaming.update(&data[8..]);
        assert_eq!(streaming.finish(), sha256_hex(data));
    }

    #[test]
    fn test_digests_match_case_insensitive() {
        assert!(digests_match("ABC123", "abc123"));
        assert!(!digests_match("abc123", "def456"));
    }

    #[test]
    fn test_parse_checksum_text() {
        assert_eq!(
            parse_checksum_text("deadbeef  firmware.tar.gz\n"),
            Some("deadbeef".to_string())
        );
        assert_eq!(parse_checksum_text("   \n"), None);
    }
}
