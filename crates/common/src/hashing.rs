//! Content fingerprints used to skip reprocessing unchanged documents

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of the extracted text
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(content_hash("lecture one"), content_hash("lecture one"));
        assert_ne!(content_hash("lecture one"), content_hash("lecture two"));
    }
}
