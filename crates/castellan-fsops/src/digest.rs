//! SHA-256 helpers used for integrity checks.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{FsOpsError, FsOpsResult};

const READ_CHUNK: usize = 64 * 1024;

/// Hex-encoded SHA-256 of an in-memory buffer.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hex-encoded SHA-256 of a file, streamed in fixed-size chunks.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn sha256_file(path: &Path) -> FsOpsResult<String> {
    let mut file = File::open(path).map_err(|err| FsOpsError::io("sha256_file.open", path, err))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; READ_CHUNK];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|err| FsOpsError::io("sha256_file.read", path, err))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use tempfile::NamedTempFile;

    #[test]
    fn known_vector_matches() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn file_digest_matches_buffer_digest() -> Result<(), Box<dyn Error>> {
        let file = NamedTempFile::new()?;
        let payload = vec![7_u8; READ_CHUNK * 2 + 13];
        std::fs::write(file.path(), &payload)?;
        assert_eq!(sha256_file(file.path())?, sha256_hex(&payload));
        Ok(())
    }
}
