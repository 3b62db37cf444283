//! Document handles
//!
//! A [`DocumentHandle`] is an immutable reference to PDF content, either a
//! file on disk or an in-memory buffer. Adapters that need a real file call
//! [`DocumentHandle::materialize`], which returns the original path or writes
//! a temporary copy that is removed when the returned value is dropped.

use crate::error::{BenchError, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Opaque reference to PDF content
#[derive(Clone)]
pub enum DocumentHandle {
    /// A document stored on disk
    Path(PathBuf),
    /// A document held in memory, with a label used as its identity
    Bytes { label: String, data: Arc<[u8]> },
}

impl DocumentHandle {
    /// Reference a document on disk
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        DocumentHandle::Path(path.as_ref().to_path_buf())
    }

    /// Wrap an in-memory buffer
    pub fn from_bytes(label: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let data: Vec<u8> = data.into();
        DocumentHandle::Bytes {
            label: label.into(),
            data: Arc::from(data),
        }
    }

    /// Identity used in result records
    pub fn identity(&self) -> String {
        match self {
            DocumentHandle::Path(path) => path.display().to_string(),
            DocumentHandle::Bytes { label, .. } => label.clone(),
        }
    }

    /// File name without extension, used to name derived files
    pub fn stem(&self) -> String {
        let stem = match self {
            DocumentHandle::Path(path) => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            DocumentHandle::Bytes { label, .. } => Path::new(label)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        if stem.is_empty() {
            "document".to_string()
        } else {
            stem
        }
    }

    /// Read the full content
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        match self {
            DocumentHandle::Path(path) => Ok(fs::read(path)?),
            DocumentHandle::Bytes { data, .. } => Ok(data.to_vec()),
        }
    }

    /// Verify the document can be read and is not empty
    pub fn precheck(&self) -> Result<()> {
        let len = match self {
            DocumentHandle::Path(path) => fs::metadata(path)
                .map_err(|e| {
                    BenchError::InvalidInput(format!("cannot read {}: {e}", path.display()))
                })?
                .len() as usize,
            DocumentHandle::Bytes { data, .. } => data.len(),
        };
        if len == 0 {
            return Err(BenchError::InvalidInput(format!(
                "{} is empty",
                self.identity()
            )));
        }
        Ok(())
    }

    /// SHA-256 of the content, hex encoded
    pub fn content_digest(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(self.read_bytes()?);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Get a path on disk holding this document's content
    ///
    /// In-memory documents are written to a temporary file inside `dir`; the
    /// file lives as long as the returned [`Materialized`] value.
    pub fn materialize(&self, dir: &Path) -> Result<Materialized> {
        match self {
            DocumentHandle::Path(path) => Ok(Materialized::Borrowed(path.clone())),
            DocumentHandle::Bytes { data, .. } => {
                let mut file = tempfile::Builder::new()
                    .prefix(&format!("{}-", self.stem()))
                    .suffix(".pdf")
                    .tempfile_in(dir)?;
                file.write_all(data)?;
                file.flush()?;
                Ok(Materialized::Temporary(file))
            }
        }
    }
}

impl fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentHandle::Path(path) => f.debug_tuple("Path").field(path).finish(),
            DocumentHandle::Bytes { label, data } => f
                .debug_struct("Bytes")
                .field("label", label)
                .field("len", &data.len())
                .finish(),
        }
    }
}

/// A document available on disk for the duration of a probe
#[derive(Debug)]
pub enum Materialized {
    /// The original file
    Borrowed(PathBuf),
    /// A temporary copy, deleted on drop
    Temporary(NamedTempFile),
}

impl Materialized {
    pub fn path(&self) -> &Path {
        match self {
            Materialized::Borrowed(path) => path,
            Materialized::Temporary(file) => file.path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_identity_and_stem() {
        let doc = DocumentHandle::from_path("/corpus/broken-xref.pdf");
        assert_eq!(doc.identity(), "/corpus/broken-xref.pdf");
        assert_eq!(doc.stem(), "broken-xref");

        let doc = DocumentHandle::from_bytes("inline.pdf", b"%PDF-1.7".to_vec());
        assert_eq!(doc.identity(), "inline.pdf");
        assert_eq!(doc.stem(), "inline");
    }

    #[test]
    fn test_materialize_bytes_is_cleaned_up() {
        let dir = TempDir::new().unwrap();
        let doc = DocumentHandle::from_bytes("inline.pdf", b"%PDF-1.4\n%%EOF".to_vec());

        let materialized = doc.materialize(dir.path()).unwrap();
        let path = materialized.path().to_path_buf();
        assert!(path.starts_with(dir.path()));
        assert_eq!(fs::read(&path).unwrap(), b"%PDF-1.4\n%%EOF");

        drop(materialized);
        assert!(!path.exists());
    }

    #[test]
    fn test_materialize_path_borrows() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.pdf");
        fs::write(&file, b"%PDF-1.4").unwrap();

        let doc = DocumentHandle::from_path(&file);
        let materialized = doc.materialize(dir.path()).unwrap();
        assert_eq!(materialized.path(), file.as_path());
        drop(materialized);
        assert!(file.exists());
    }

    #[test]
    fn test_precheck() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("empty.pdf");
        fs::write(&empty, b"").unwrap();

        assert!(DocumentHandle::from_path(&empty).precheck().is_err());
        assert!(DocumentHandle::from_path(dir.path().join("missing.pdf"))
            .precheck()
            .is_err());
        assert!(DocumentHandle::from_bytes("x.pdf", b"%PDF".to_vec())
            .precheck()
            .is_ok());
    }

    #[test]
    fn test_content_digest_is_stable() {
        let a = DocumentHandle::from_bytes("a.pdf", b"same".to_vec());
        let b = DocumentHandle::from_bytes("b.pdf", b"same".to_vec());
        assert_eq!(a.content_digest().unwrap(), b.content_digest().unwrap());
        assert_eq!(a.content_digest().unwrap().len(), 64);
    }
}
