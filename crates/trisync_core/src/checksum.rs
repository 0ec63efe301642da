//! Content fingerprints.
//!
//! Files are fingerprinted with SHA-256, encoded as standard base64, so both
//! replicas can compare content without transferring it.

use std::io::{self, Read};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

/// Fingerprint of an in-memory buffer.
pub fn checksum_bytes(content: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(content))
}

/// Fingerprint of everything a reader yields, streamed in chunks.
pub fn checksum_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(STANDARD.encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        // sha256("") in base64
        assert_eq!(
            checksum_bytes(b""),
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn test_reader_matches_bytes() {
        let data = vec![7u8; 100_000];
        assert_eq!(checksum_reader(&data[..]).unwrap(), checksum_bytes(&data));
    }
}
