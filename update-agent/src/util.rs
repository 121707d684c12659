use std::{
    fs::File,
    io::{self, copy},
    path::{Path, PathBuf},
};

use sha2::{Digest as _, Sha256};
use tracing::{info, warn};

use crate::download::remove_if_exists;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed reading `{path}` for hashing")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(
        "mismatch between recorded and actual hashes of `{path}`; expected `{expected}`, \
         calculated `{actual}`"
    )]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

/// Lowercase hex encoded sha256 digest of the file at `path`.
pub fn sha256_hex<P: AsRef<Path>>(path: P) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut blob = File::open(path)?;
    copy(&mut blob, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Checks the sha256 digest of the file at `path` against `expected_hex_hash`, which must be
/// lowercase hex.
///
/// A file that does not match is deleted, so that no unverified image is ever left behind.
pub fn verify<P: AsRef<Path>>(path: P, expected_hex_hash: &str) -> Result<(), Error> {
    let path = path.as_ref();
    let actual = sha256_hex(path).map_err(|source| Error::Read {
        path: path.to_owned(),
        source,
    })?;
    if actual != expected_hex_hash {
        if let Err(e) = remove_if_exists(path) {
            warn!("failed removing image `{}` after hash mismatch: {e}", path.display());
        }
        return Err(Error::ChecksumMismatch {
            path: path.to_owned(),
            expected: expected_hex_hash.to_owned(),
            actual,
        });
    }
    info!("sha256 of `{}` matches `{expected_hex_hash}`", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // sha256 of "hello world"
    const HELLO_SHA256: &str =
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    fn blob(contents: &[u8]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.bin");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn matching_hash_keeps_the_file() {
        let (_dir, path) = blob(b"hello world");
        verify(&path, HELLO_SHA256).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn computed_hash_is_lowercase_hex() {
        let (_dir, path) = blob(b"hello world");
        let actual = sha256_hex(&path).unwrap();
        assert_eq!(actual, actual.to_ascii_lowercase());
        assert!(matches!(
            verify(&path, &HELLO_SHA256.to_ascii_uppercase()),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn verification_is_deterministic() {
        let (_dir, path) = blob(b"hello world");
        assert_eq!(sha256_hex(&path).unwrap(), sha256_hex(&path).unwrap());
        assert_eq!(sha256_hex(&path).unwrap(), HELLO_SHA256);
    }

    #[test]
    fn mismatch_deletes_the_file_and_reports_both_hashes() {
        let (_dir, path) = blob(b"hello world!");
        let expected = "0".repeat(64);
        let err = verify(&path, &expected).unwrap_err();
        match err {
            Error::ChecksumMismatch {
                expected: e,
                actual,
                ..
            } => {
                assert_eq!(e, expected);
                assert_ne!(actual, expected);
                assert_eq!(actual.len(), 64);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!path.exists());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            verify(dir.path().join("missing"), HELLO_SHA256),
            Err(Error::Read { .. })
        ));
    }
}
