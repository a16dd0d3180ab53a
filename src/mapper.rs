//! Local-path to storage-key mapping

use std::path::{Component, Path, PathBuf};

use crate::error::{Result, SyncError};

/// Maps absolute local paths to bucket keys relative to the watched root.
///
/// Keys always use forward slashes, regardless of platform. Paths outside
/// the root, the root itself, and paths with non-UTF-8 components are
/// rejected.
#[derive(Debug, Clone)]
pub struct PathMapper {
    root: PathBuf,
    prefix: String,
}

impl PathMapper {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            root: root.into(),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Compute the storage key for a path under the watched root.
    pub fn map(&self, path: &Path) -> Result<String> {
        let invalid = || SyncError::InvalidPath {
            path: path.to_path_buf(),
        };

        let rel = path.strip_prefix(&self.root).map_err(|_| invalid())?;

        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => {
                    parts.push(part.to_str().ok_or_else(invalid)?);
                }
                // `.` never appears in a stripped path; anything else
                // (`..`, roots) would escape the watched tree
                _ => return Err(invalid()),
            }
        }

        if parts.is_empty() {
            return Err(invalid());
        }

        let key = parts.join("/");
        if self.prefix.is_empty() {
            Ok(key)
        } else {
            Ok(format!("{}/{}", self.prefix, key))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn maps_nested_path() {
        let mapper = PathMapper::new("/data", "");
        let key = mapper.map(Path::new("/data/logs/app/today.log")).unwrap();
        assert_eq!(key, "logs/app/today.log");
    }

    #[test]
    fn applies_prefix() {
        let mapper = PathMapper::new("/data", "backups/host1/");
        let key = mapper.map(Path::new("/data/a.txt")).unwrap();
        assert_eq!(key, "backups/host1/a.txt");
    }

    #[test]
    fn rejects_path_outside_root() {
        let mapper = PathMapper::new("/data", "");
        assert!(matches!(
            mapper.map(Path::new("/etc/passwd")),
            Err(SyncError::InvalidPath { .. })
        ));
    }

    #[test]
    fn rejects_root_itself() {
        let mapper = PathMapper::new("/data", "");
        assert!(mapper.map(Path::new("/data")).is_err());
    }

    #[test]
    fn rejects_parent_escape() {
        let mapper = PathMapper::new("/data", "");
        assert!(mapper.map(Path::new("/data/../secret")).is_err());
    }
}
