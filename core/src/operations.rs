// Staged file operations against an image tree.
// Operations are keyed by normalized image path; a later operation on the
// same path replaces the earlier one and moves to the end of the queue.

use crate::IsoEditError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Normalize an image path: forward slashes, leading `/`, no empty,
/// `.` or trailing components. `..` never climbs above the root.
pub fn normalize_image_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Join a child name onto a normalized directory path.
pub fn join_image_path(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Parent of a normalized image path; the root is its own parent.
pub fn parent_image_path(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Map a normalized image path onto a local directory.
pub fn local_path_for(root: &Path, image_path: &str) -> PathBuf {
    let relative = image_path.trim_start_matches('/');
    if relative.is_empty() {
        root.to_path_buf()
    } else {
        relative.split('/').fold(root.to_path_buf(), |acc, part| acc.join(part))
    }
}

fn path_key(image_path: &str) -> String {
    image_path.to_ascii_lowercase()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum FileOperation {
    Add { local_path: PathBuf, image_path: String },
    Replace { image_path: String, local_path: PathBuf },
    Delete { image_path: String },
}

impl FileOperation {
    pub fn image_path(&self) -> &str {
        match self {
            FileOperation::Add { image_path, .. }
            | FileOperation::Replace { image_path, .. }
            | FileOperation::Delete { image_path } => image_path,
        }
    }

    pub fn local_path(&self) -> Option<&Path> {
        match self {
            FileOperation::Add { local_path, .. } | FileOperation::Replace { local_path, .. } => {
                Some(local_path)
            }
            FileOperation::Delete { .. } => None,
        }
    }

    /// Replace and Delete targets must not be copied out of the source.
    pub fn suppresses_source(&self) -> bool {
        matches!(self, FileOperation::Replace { .. } | FileOperation::Delete { .. })
    }
}

/// Ordered set of pending operations, consumed once by a rebuild.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationQueue {
    ops: Vec<FileOperation>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, local_path: impl Into<PathBuf>, image_path: &str) -> Result<(), IsoEditError> {
        let local_path = local_path.into();
        check_local_file(&local_path)?;
        let image_path = checked_target(image_path)?;
        self.push(FileOperation::Add { local_path, image_path });
        Ok(())
    }

    pub fn replace(&mut self, image_path: &str, local_path: impl Into<PathBuf>) -> Result<(), IsoEditError> {
        let local_path = local_path.into();
        check_local_file(&local_path)?;
        let image_path = checked_target(image_path)?;
        self.push(FileOperation::Replace { image_path, local_path });
        Ok(())
    }

    pub fn remove(&mut self, image_path: &str) -> Result<(), IsoEditError> {
        let image_path = checked_target(image_path)?;
        self.push(FileOperation::Delete { image_path });
        Ok(())
    }

    /// Insert an already-built operation, superseding any earlier one on the same path.
    pub fn push(&mut self, op: FileOperation) {
        let key = path_key(op.image_path());
        self.ops.retain(|existing| path_key(existing.image_path()) != key);
        self.ops.push(op);
    }

    pub fn get(&self, image_path: &str) -> Option<&FileOperation> {
        let key = path_key(&normalize_image_path(image_path));
        self.ops.iter().find(|op| path_key(op.image_path()) == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileOperation> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn skip_set(&self) -> SkipSet {
        SkipSet {
            paths: self
                .ops
                .iter()
                .filter(|op| op.suppresses_source())
                .map(|op| path_key(op.image_path()))
                .collect(),
        }
    }

    pub fn into_operations(self) -> Vec<FileOperation> {
        self.ops
    }
}

impl<'a> IntoIterator for &'a OperationQueue {
    type Item = &'a FileOperation;
    type IntoIter = std::slice::Iter<'a, FileOperation>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}

/// Image paths that extraction must not copy (Replace and Delete targets).
#[derive(Debug, Clone, Default)]
pub struct SkipSet {
    paths: HashSet<String>,
}

impl SkipSet {
    pub fn contains(&self, image_path: &str) -> bool {
        self.paths.contains(&path_key(&normalize_image_path(image_path)))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

fn checked_target(image_path: &str) -> Result<String, IsoEditError> {
    let normalized = normalize_image_path(image_path);
    if normalized == "/" {
        return Err(IsoEditError::InvalidInput(
            "The image root cannot be the target of a file operation".to_string(),
        ));
    }
    Ok(normalized)
}

fn check_local_file(path: &Path) -> Result<(), IsoEditError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        IsoEditError::InvalidInput(format!("Local file {} is not accessible: {}", path.display(), e))
    })?;
    if !metadata.is_file() {
        return Err(IsoEditError::InvalidInput(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn local_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"payload").unwrap();
        file
    }

    #[test]
    fn test_normalize_image_path() {
        assert_eq!(normalize_image_path(""), "/");
        assert_eq!(normalize_image_path("/"), "/");
        assert_eq!(normalize_image_path("sources/boot.wim"), "/sources/boot.wim");
        assert_eq!(normalize_image_path("\\efi\\boot\\"), "/efi/boot");
        assert_eq!(normalize_image_path("//a/./b//c/"), "/a/b/c");
        assert_eq!(normalize_image_path("/../a/../../b"), "/b");
    }

    #[test]
    fn test_join_and_parent() {
        assert_eq!(join_image_path("/", "boot"), "/boot");
        assert_eq!(join_image_path("/boot", "bcd"), "/boot/bcd");
        assert_eq!(parent_image_path("/boot/bcd"), "/boot");
        assert_eq!(parent_image_path("/boot"), "/");
        assert_eq!(parent_image_path("/"), "/");
    }

    #[test]
    fn test_local_path_for() {
        let root = Path::new("/tmp/stage");
        assert_eq!(local_path_for(root, "/"), PathBuf::from("/tmp/stage"));
        assert_eq!(
            local_path_for(root, "/efi/boot/bootx64.efi"),
            PathBuf::from("/tmp/stage/efi/boot/bootx64.efi")
        );
    }

    #[test]
    fn test_later_operation_supersedes_earlier() {
        let file = local_file();
        let mut queue = OperationQueue::new();
        queue.add(file.path(), "/new/file.txt").unwrap();
        queue.remove("/other.txt").unwrap();
        queue.remove("/NEW/file.txt").unwrap();

        assert_eq!(queue.len(), 2);
        let ops: Vec<_> = queue.iter().cloned().collect();
        assert_eq!(ops[0], FileOperation::Delete { image_path: "/other.txt".to_string() });
        assert_eq!(ops[1], FileOperation::Delete { image_path: "/NEW/file.txt".to_string() });
    }

    #[test]
    fn test_skip_set_covers_replace_and_delete_only() {
        let file = local_file();
        let mut queue = OperationQueue::new();
        queue.add(file.path(), "/added.txt").unwrap();
        queue.replace("sources/ei.cfg", file.path()).unwrap();
        queue.remove("/autorun.inf").unwrap();

        let skip = queue.skip_set();
        assert_eq!(skip.len(), 2);
        assert!(skip.contains("/sources/ei.cfg"));
        assert!(skip.contains("/SOURCES/EI.CFG"));
        assert!(skip.contains("autorun.inf"));
        assert!(!skip.contains("/added.txt"));
    }

    #[test]
    fn test_rejects_missing_local_file_and_root_target() {
        let mut queue = OperationQueue::new();
        assert!(matches!(
            queue.add("/definitely/not/here.bin", "/x"),
            Err(IsoEditError::InvalidInput(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            queue.add(dir.path(), "/x"),
            Err(IsoEditError::InvalidInput(_))
        ));

        assert!(matches!(queue.remove("/"), Err(IsoEditError::InvalidInput(_))));
        assert!(queue.is_empty());
    }
}
