use std::ffi::OsStr;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::error::{Result, TieringError};

/// Absolute filesystem path stored as raw bytes, without a terminator.
///
/// Entries are validated for shape when built; the size limit depends on the
/// target queue and is enforced at push time.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PathEntry(Vec<u8>);

impl PathEntry {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(path.as_ref().as_os_str().as_bytes().to_vec())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(TieringError::InvalidEntry("empty path".into()));
        }
        if bytes.contains(&0) {
            return Err(TieringError::InvalidEntry(
                "path contains an embedded NUL byte".into(),
            ));
        }
        if bytes[0] != b'/' {
            return Err(TieringError::InvalidEntry(format!(
                "path {} is not absolute",
                String::from_utf8_lossy(&bytes)
            )));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(OsStr::from_bytes(&self.0))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Bytes needed to store this entry including the terminator slot.
    pub fn stored_size(&self) -> usize {
        self.0.len() + 1
    }
}

impl fmt::Debug for PathEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathEntry")
            .field(&self.as_path().display())
            .finish()
    }
}

impl fmt::Display for PathEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_path().display())
    }
}

impl TryFrom<&Path> for PathEntry {
    type Error = TieringError;

    fn try_from(value: &Path) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for PathEntry {
    type Error = TieringError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_relative_empty_and_nul_paths() {
        assert!(matches!(
            PathEntry::try_from("relative/file"),
            Err(TieringError::InvalidEntry(_))
        ));
        assert!(matches!(
            PathEntry::from_bytes(Vec::new()),
            Err(TieringError::InvalidEntry(_))
        ));
        assert!(matches!(
            PathEntry::from_bytes(b"/a\0b".to_vec()),
            Err(TieringError::InvalidEntry(_))
        ));
    }

    #[test]
    fn stored_size_counts_terminator() {
        let entry = PathEntry::try_from("/data/file.bin").unwrap();
        assert_eq!(entry.len(), 14);
        assert_eq!(entry.stored_size(), 15);
        assert_eq!(entry.as_path(), Path::new("/data/file.bin"));
    }
}
