//! Content-addressed blob store.
//!
//! Blobs are immutable byte sequences keyed by the hex SHA-256 of their
//! content, laid out as `<root>/<aa>/<bb>/<hash>` where `aa` and `bb` are the
//! first two byte-pairs of the hex hash. Writes stream through a temp file in
//! the store root and are renamed into place, so a crash never leaves a
//! partially written blob at its final path.
//!
//! The store holds no reference counts; those live in the task database and
//! are maintained by the service layer.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

mod error;

pub use error::{BlobError, Result};

/// Read/copy buffer size for streaming puts.
const COPY_BUF_SIZE: usize = 64 * 1024;

/// Outcome of a [`BlobStore::put`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    /// Hex SHA-256 of the stored content.
    pub id: String,
    /// Content length in bytes.
    pub size_bytes: u64,
    /// `true` if the blob was already present and the write was dropped.
    pub existed: bool,
}

/// A content-addressed file store rooted at a single directory.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Opens (or creates) a blob store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Returns the store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Streams `reader` into the store, returning the content id and size.
    ///
    /// The content is hashed while it is written to a temp file on the same
    /// filesystem as the final location, fsynced, then renamed into place.
    /// Putting content that already exists is a no-op that reports
    /// `existed = true`.
    pub fn put<R: Read>(&self, mut reader: R) -> Result<PutOutcome> {
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        let mut hasher = Sha256::new();
        let mut size_bytes: u64 = 0;
        let mut buf = [0u8; COPY_BUF_SIZE];

        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            tmp.write_all(&buf[..n])?;
            size_bytes += n as u64;
        }

        tmp.flush()?;
        tmp.as_file().sync_all()?;

        let id = hex_digest(hasher);
        let dest = self.blob_path(&id)?;

        if dest.exists() {
            // Temp file is removed on drop.
            debug!(%id, size_bytes, "blob already present, dropping upload");
            return Ok(PutOutcome {
                id,
                size_bytes,
                existed: true,
            });
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        match tmp.persist_noclobber(&dest) {
            Ok(_) => {
                debug!(%id, size_bytes, "blob stored");
                Ok(PutOutcome {
                    id,
                    size_bytes,
                    existed: false,
                })
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                // Lost a race with a concurrent put of the same content; the
                // winner's bytes are identical by construction.
                Ok(PutOutcome {
                    id,
                    size_bytes,
                    existed: true,
                })
            }
            Err(e) => Err(BlobError::Io(e.error)),
        }
    }

    /// Opens a blob for reading.
    ///
    /// The returned reader re-hashes the content as it is consumed and fails
    /// the final read with [`std::io::ErrorKind::InvalidData`] if the bytes on
    /// disk no longer match the id.
    pub fn open(&self, id: &str) -> Result<BlobReader> {
        let path = self.blob_path(id)?;
        let file = File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BlobError::not_found(id),
            _ => BlobError::Io(e),
        })?;
        Ok(BlobReader {
            file,
            hasher: Some(Sha256::new()),
            expected: id.to_owned(),
        })
    }

    /// Returns a blob's size without opening it.
    pub fn stat(&self, id: &str) -> Result<u64> {
        let path = self.blob_path(id)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BlobError::not_found(id)),
            Err(e) => Err(BlobError::Io(e)),
        }
    }

    /// Returns `true` if a blob with the given id exists.
    pub fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.blob_path(id)?.exists())
    }

    /// Removes a blob. Succeeds even if the blob is already absent, so GC
    /// retries stay cheap.
    pub fn delete(&self, id: &str) -> Result<()> {
        let path = self.blob_path(id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BlobError::Io(e)),
        }
    }

    /// Reads a blob to EOF, verifying its content hash.
    pub fn verify(&self, id: &str) -> Result<()> {
        let mut reader = self.open(id)?;
        let mut buf = [0u8; COPY_BUF_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    warn!(%id, "blob content corrupt");
                    return Err(BlobError::corrupt(id, reader.actual_digest()));
                }
                Err(e) => return Err(BlobError::Io(e)),
            }
        }
    }

    /// Maps an id to its on-disk path, validating the id shape first.
    fn blob_path(&self, id: &str) -> Result<PathBuf> {
        if !is_valid_id(id) {
            return Err(BlobError::invalid_id(id));
        }
        Ok(self.root.join(&id[0..2]).join(&id[2..4]).join(id))
    }
}

/// A reader over blob content that verifies the hash at EOF.
pub struct BlobReader {
    file: File,
    hasher: Option<Sha256>,
    expected: String,
}

impl BlobReader {
    /// The digest accumulated so far, finalized. Used for corruption reports.
    fn actual_digest(&mut self) -> String {
        match self.hasher.take() {
            Some(hasher) => hex_digest(hasher),
            None => String::new(),
        }
    }
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.file.read(buf)?;
        let Some(hasher) = self.hasher.as_mut() else {
            return Ok(n);
        };
        if n > 0 {
            hasher.update(&buf[..n]);
            return Ok(n);
        }
        // EOF: compare the accumulated digest against the id.
        let actual = hex_digest(self.hasher.take().expect("hasher present"));
        if actual != self.expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("blob content hash mismatch: expected {}", self.expected),
            ));
        }
        Ok(0)
    }
}

/// Returns `true` for a well-formed blob id: 64 lowercase hex chars.
pub fn is_valid_id(id: &str) -> bool {
    id.len() == 64
        && id
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Finalizes a hasher into a lowercase hex string.
fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut s = String::with_capacity(64);
    for byte in digest {
        s.push_str(&format!("{byte:02x}"));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn test_store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path().join("blobs")).unwrap();
        (dir, store)
    }

    #[test]
    fn put_and_read_back() {
        let (_dir, store) = test_store();
        let outcome = store.put(Cursor::new(b"hello world")).unwrap();
        assert_eq!(outcome.size_bytes, 11);
        assert!(!outcome.existed);
        // Well-known SHA-256 of "hello world".
        assert_eq!(
            outcome.id,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );

        let mut content = Vec::new();
        store.open(&outcome.id).unwrap().read_to_end(&mut content).unwrap();
        assert_eq!(content, b"hello world");
    }

    #[test]
    fn put_is_idempotent() {
        let (_dir, store) = test_store();
        let first = store.put(Cursor::new(b"same bytes")).unwrap();
        let second = store.put(Cursor::new(b"same bytes")).unwrap();
        assert_eq!(first.id, second.id);
        assert!(!first.existed);
        assert!(second.existed);
    }

    #[test]
    fn fan_out_layout() {
        let (_dir, store) = test_store();
        let outcome = store.put(Cursor::new(b"x")).unwrap();
        let expected = store
            .root()
            .join(&outcome.id[0..2])
            .join(&outcome.id[2..4])
            .join(&outcome.id);
        assert!(expected.is_file());
    }

    #[test]
    fn open_missing_is_not_found() {
        let (_dir, store) = test_store();
        let id = "0".repeat(64);
        let err = store.open(&id).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn stat_reports_size() {
        let (_dir, store) = test_store();
        let outcome = store.put(Cursor::new(b"12345")).unwrap();
        assert_eq!(store.stat(&outcome.id).unwrap(), 5);
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, store) = test_store();
        let outcome = store.put(Cursor::new(b"to delete")).unwrap();
        store.delete(&outcome.id).unwrap();
        assert!(!store.contains(&outcome.id).unwrap());
        // Second delete is still fine.
        store.delete(&outcome.id).unwrap();
    }

    #[test]
    fn invalid_id_rejected() {
        let (_dir, store) = test_store();
        let err = store.stat("../../etc/passwd").unwrap_err();
        assert!(matches!(err, BlobError::InvalidId { .. }));
        let err = store.stat("ABCD").unwrap_err();
        assert!(matches!(err, BlobError::InvalidId { .. }));
    }

    #[test]
    fn verify_detects_corruption() {
        let (_dir, store) = test_store();
        let outcome = store.put(Cursor::new(b"pristine")).unwrap();
        store.verify(&outcome.id).unwrap();

        // Flip the on-disk content behind the store's back.
        let path = store
            .root()
            .join(&outcome.id[0..2])
            .join(&outcome.id[2..4])
            .join(&outcome.id);
        fs::write(&path, b"tampered").unwrap();

        let err = store.verify(&outcome.id).unwrap_err();
        assert!(matches!(err, BlobError::Corrupt { .. }));
    }

    #[test]
    fn empty_blob_roundtrip() {
        let (_dir, store) = test_store();
        let outcome = store.put(Cursor::new(b"")).unwrap();
        assert_eq!(outcome.size_bytes, 0);
        let mut content = Vec::new();
        store.open(&outcome.id).unwrap().read_to_end(&mut content).unwrap();
        assert!(content.is_empty());
    }
}
