// Staging tree: a private local copy of the image content that queued
// operations mutate before packaging.

use isoedit_core::{join_image_path, FileOperation, IsoEditError, OperationQueue, SkipSet};
use isoedit_filesystems::DiscImage;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Private staging directory, removed when dropped or explicitly.
pub struct StagingTree {
    dir: TempDir,
}

impl StagingTree {
    pub fn create(root: Option<&Path>) -> Result<Self, IsoEditError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("isoedit-staging-");
        let dir = match root {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        debug!("Created staging tree {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Local path for an image path, following existing entries whatever
    /// their case so a queued `/Sources/x` lands next to an extracted
    /// `/sources`.
    pub fn resolve(&self, image_path: &str) -> PathBuf {
        let mut current = self.dir.path().to_path_buf();
        for component in image_path.split('/').filter(|c| !c.is_empty()) {
            let exact = current.join(component);
            if exact.exists() {
                current = exact;
                continue;
            }
            current = find_case_insensitive(&current, component).unwrap_or(exact);
        }
        current
    }

    /// Image path of an existing staged entry, with the case it is stored with.
    pub fn staged_image_path(&self, image_path: &str) -> Option<String> {
        let local = self.resolve(image_path);
        if !local.exists() {
            return None;
        }
        let relative = local.strip_prefix(self.dir.path()).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(format!("/{}", parts.join("/")))
    }

    pub fn remove(self) -> Result<(), IsoEditError> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!("Removed staging tree {}", path.display());
        Ok(())
    }
}

fn find_case_insensitive(dir: &Path, name: &str) -> Option<PathBuf> {
    fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .find(|e| e.file_name().to_string_lossy().eq_ignore_ascii_case(name))
        .map(|e| e.path())
}

/// What a path in the image turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbedNode {
    Directory(Vec<String>),
    File,
    Absent,
}

/// Probe results for one traversal.
#[derive(Debug, Default)]
pub struct NodeCache {
    nodes: HashMap<String, ProbedNode>,
}

impl NodeCache {
    /// Probe once per path: a non-empty listing is a directory, otherwise a
    /// file probe decides, and record metadata keeps empty directories.
    pub fn probe(&mut self, image: &mut DiscImage, path: &str) -> ProbedNode {
        if let Some(node) = self.nodes.get(path) {
            return node.clone();
        }

        let children = image.list_directory(path).to_vec();
        let node = if !children.is_empty() {
            ProbedNode::Directory(children)
        } else if image.file_exists(path) {
            ProbedNode::File
        } else if image.directory_exists(path) {
            ProbedNode::Directory(Vec::new())
        } else {
            ProbedNode::Absent
        };

        self.nodes.insert(path.to_string(), node.clone());
        node
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    pub directories: usize,
    pub files: usize,
    pub skipped: usize,
}

/// Copy the whole image tree into `staging`, leaving out skipped paths.
pub async fn extract_tree(
    image: &mut DiscImage,
    skip: &SkipSet,
    staging: &StagingTree,
) -> Result<ExtractionStats, IsoEditError> {
    let mut stats = ExtractionStats::default();
    let mut cache = NodeCache::default();
    let mut pending = vec!["/".to_string()];

    while let Some(path) = pending.pop() {
        if path != "/" && skip.contains(&path) {
            debug!("Skipping {} (superseded by a queued operation)", path);
            stats.skipped += 1;
            continue;
        }

        let local = staging.resolve(&path);
        match cache.probe(image, &path) {
            ProbedNode::Directory(children) => {
                fs::create_dir_all(&local)?;
                stats.directories += 1;
                for child in children.iter().rev() {
                    pending.push(join_image_path(&path, child));
                }
            }
            ProbedNode::File => {
                image.extract_file(&path, &local).await?;
                stats.files += 1;
            }
            ProbedNode::Absent => {
                warn!("{} was listed but cannot be read; leaving it out", path);
            }
        }
    }

    info!(
        "Staged {} files in {} directories ({} skipped) into {}",
        stats.files,
        stats.directories,
        stats.skipped,
        staging.path().display()
    );
    Ok(stats)
}

/// Apply queued operations to the staging tree in queue order.
pub fn apply_queue(queue: &OperationQueue, staging: &StagingTree) -> Result<(), IsoEditError> {
    for op in queue {
        let target = staging.resolve(op.image_path());
        match op {
            FileOperation::Delete { image_path } => {
                if target.is_dir() {
                    fs::remove_dir_all(&target)?;
                    debug!("Deleted directory {}", image_path);
                } else if target.exists() {
                    fs::remove_file(&target)?;
                    debug!("Deleted {}", image_path);
                } else {
                    debug!("{} not staged; nothing to delete", image_path);
                }
            }
            FileOperation::Add { local_path, image_path }
            | FileOperation::Replace { image_path, local_path } => {
                if target.is_dir() {
                    fs::remove_dir_all(&target)?;
                }
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                let copied = fs::copy(local_path, &target).map_err(|e| {
                    IsoEditError::InvalidInput(format!(
                        "Cannot stage {} as {}: {}",
                        local_path.display(),
                        image_path,
                        e
                    ))
                })?;
                debug!("Staged {} ({} bytes) from {}", image_path, copied, local_path.display());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_follows_existing_case() {
        let staging = StagingTree::create(None).unwrap();
        fs::create_dir_all(staging.path().join("sources")).unwrap();

        assert_eq!(
            staging.resolve("/Sources/ei.cfg"),
            staging.path().join("sources").join("ei.cfg")
        );
        assert_eq!(staging.resolve("/"), staging.path());
        assert_eq!(staging.staged_image_path("/SOURCES").as_deref(), Some("/sources"));
        assert_eq!(staging.staged_image_path("/missing"), None);
    }

    #[test]
    fn test_apply_queue_in_order() {
        let scratch = tempfile::tempdir().unwrap();
        let new_cfg = scratch.path().join("ei.cfg");
        fs::write(&new_cfg, b"[Channel]\r\nRetail").unwrap();

        let staging = StagingTree::create(Some(scratch.path())).unwrap();
        fs::create_dir_all(staging.path().join("support/logging")).unwrap();
        fs::write(staging.path().join("support/logging/a.txt"), b"a").unwrap();
        fs::create_dir_all(staging.path().join("sources")).unwrap();
        fs::write(staging.path().join("sources/ei.cfg"), b"old").unwrap();

        let mut queue = OperationQueue::new();
        queue.remove("/support").unwrap();
        queue.replace("/SOURCES/EI.CFG", &new_cfg).unwrap();
        queue.add(&new_cfg, "/new/dir/copy.cfg").unwrap();
        queue.remove("/not/there").unwrap();

        apply_queue(&queue, &staging).unwrap();

        assert!(!staging.path().join("support").exists());
        assert_eq!(
            fs::read(staging.path().join("sources/ei.cfg")).unwrap(),
            b"[Channel]\r\nRetail"
        );
        assert!(staging.path().join("new/dir/copy.cfg").is_file());
        assert!(!staging.path().join("SOURCES").exists());
    }

    #[test]
    fn test_remove_deletes_directory() {
        let scratch = tempfile::tempdir().unwrap();
        let staging = StagingTree::create(Some(scratch.path())).unwrap();
        let path = staging.path().to_path_buf();
        staging.remove().unwrap();
        assert!(!path.exists());
        assert_eq!(fs::read_dir(scratch.path()).unwrap().count(), 0);
    }
}
