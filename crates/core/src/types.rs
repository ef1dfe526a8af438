//! Types exchanged with file providers and event subscribers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// Opaque identifier naming one file or directory instance
///
/// A different handle at the same path means the old entity is gone and a new
/// one took its place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileHandle(String);

impl FileHandle {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self(identifier.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FileHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// File type flags reported by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FileType(u32);

impl FileType {
    pub const UNKNOWN: Self = Self(0);
    pub const FILE: Self = Self(1);
    pub const DIRECTORY: Self = Self(1 << 1);
    pub const SYMBOLIC_LINK: Self = Self(1 << 2);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_directory(self) -> bool {
        self.contains(Self::DIRECTORY)
    }
}

impl BitOr for FileType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Observed stats of an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStats {
    /// Type flags
    pub file_type: FileType,
    /// Content fingerprint (mtime + size, hash, ...) computed by the provider
    pub content_tag: String,
}

impl FileStats {
    pub fn new(file_type: FileType, content_tag: impl Into<String>) -> Self {
        Self {
            file_type,
            content_tag: content_tag.into(),
        }
    }

    /// Stats of a regular file
    pub fn file(content_tag: impl Into<String>) -> Self {
        Self::new(FileType::FILE, content_tag)
    }

    /// Stats of a directory
    pub fn directory(content_tag: impl Into<String>) -> Self {
        Self::new(FileType::DIRECTORY, content_tag)
    }

    pub fn is_directory(&self) -> bool {
        self.file_type.is_directory()
    }
}

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dirent {
    /// Single path component
    pub name: String,
    pub handle: FileHandle,
    pub stats: FileStats,
}

impl Dirent {
    pub fn new(name: impl Into<String>, handle: impl Into<FileHandle>, stats: FileStats) -> Self {
        Self {
            name: name.into(),
            handle: handle.into(),
            stats,
        }
    }
}

/// Kind of change reported to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FileEventKind {
    Created,
    Changed,
    Deleted,
    PropertyUpdated,
}

impl fmt::Display for FileEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileEventKind::Created => write!(f, "created"),
            FileEventKind::Changed => write!(f, "changed"),
            FileEventKind::Deleted => write!(f, "deleted"),
            FileEventKind::PropertyUpdated => write!(f, "property_updated"),
        }
    }
}

/// A committed change to one tracked entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub handle: FileHandle,
    /// Path of the entry when the event was produced
    pub path: String,
}

impl FileEvent {
    pub fn new(kind: FileEventKind, handle: FileHandle, path: impl Into<String>) -> Self {
        Self {
            kind,
            handle,
            path: path.into(),
        }
    }

    pub fn created(handle: FileHandle, path: impl Into<String>) -> Self {
        Self::new(FileEventKind::Created, handle, path)
    }

    pub fn changed(handle: FileHandle, path: impl Into<String>) -> Self {
        Self::new(FileEventKind::Changed, handle, path)
    }

    pub fn deleted(handle: FileHandle, path: impl Into<String>) -> Self {
        Self::new(FileEventKind::Deleted, handle, path)
    }

    pub fn property_updated(handle: FileHandle, path: impl Into<String>) -> Self {
        Self::new(FileEventKind::PropertyUpdated, handle, path)
    }
}

/// Behaviour flags stored with a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PropertyFeature(u32);

impl PropertyFeature {
    pub const NONE: Self = Self(0);
    /// Delete the property whenever the owning entry's content tag changes
    pub const AUTO_DELETE_WHEN_FILE_UPDATE: Self = Self(1);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PropertyFeature {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_flags() {
        let t = FileType::DIRECTORY | FileType::SYMBOLIC_LINK;
        assert!(t.is_directory());
        assert!(t.contains(FileType::SYMBOLIC_LINK));
        assert!(!FileType::FILE.is_directory());
        assert_eq!(FileType::from_bits(t.bits()), t);
    }

    #[test]
    fn test_property_feature_flags() {
        assert!(!PropertyFeature::NONE.contains(PropertyFeature::AUTO_DELETE_WHEN_FILE_UPDATE));
        assert!(PropertyFeature::AUTO_DELETE_WHEN_FILE_UPDATE
            .contains(PropertyFeature::AUTO_DELETE_WHEN_FILE_UPDATE));
        assert_eq!(PropertyFeature::default(), PropertyFeature::NONE);
    }

    #[test]
    fn test_event_display() {
        assert_eq!(FileEventKind::PropertyUpdated.to_string(), "property_updated");
        let event = FileEvent::created("h1".into(), "/a");
        assert_eq!(event.kind, FileEventKind::Created);
        assert_eq!(event.handle.as_str(), "h1");
    }
}
