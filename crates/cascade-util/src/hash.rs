/// Compute the BLAKE3 hash of a byte slice, returning the hex-encoded digest.
#[must_use]
pub fn blake3_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Short (12 hex chars) digest used in logs and build summaries.
#[must_use]
pub fn short_digest(data: &[u8]) -> String {
    let mut hex = blake3_bytes(data);
    hex.truncate(12);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake3_bytes_known_digest() {
        assert_eq!(
            blake3_bytes(b"hello world"),
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
    }

    #[test]
    fn test_short_digest_is_prefix() {
        let full = blake3_bytes(b"a{color:red}");
        let short = short_digest(b"a{color:red}");
        assert_eq!(short.len(), 12);
        assert!(full.starts_with(&short));
    }
}
