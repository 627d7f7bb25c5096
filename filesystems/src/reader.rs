// Read-only operations over an opened image.

use crate::detection::BoundFacade;
use crate::facade::RawName;
use crate::text::TextEncoding;
use isoedit_core::{
    local_path_for, normalize_image_path, EditorConfig, ExternalTool, ExtractionMode,
    FilesystemInfo, FilesystemVariant, IsoEditError,
};
use log::{debug, info, warn};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

pub const ARCHIVE_TOOLS: &[&str] = &["7z", "7za", "7zz"];

/// Child names of one directory.
///
/// Names are decoded on iteration and the listing can be walked any number
/// of times.
#[derive(Debug, Clone, Default)]
pub struct DirectoryListing {
    raw: Vec<RawName>,
    variant: Option<FilesystemVariant>,
}

impl DirectoryListing {
    fn new(raw: Vec<RawName>, variant: FilesystemVariant) -> Self {
        Self { raw, variant: Some(variant) }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = String> + '_ {
        let wide = self.variant.map(|v| v.uses_wide_names()).unwrap_or(false);
        self.raw.iter().map(move |raw| decode_name(raw, wide))
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.iter().collect()
    }
}

impl IntoIterator for DirectoryListing {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.to_vec().into_iter()
    }
}

/// Decode one raw name: 16-bit big-endian units for wide variants, 8-bit
/// text otherwise.
pub fn decode_name(raw: &[u8], wide: bool) -> String {
    if wide {
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|p| u16::from_be_bytes([p[0], p[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    match std::str::from_utf8(raw) {
        Ok(name) => name.to_string(),
        Err(_) => raw.iter().map(|&b| b as char).collect(),
    }
}

/// Reader bound to one image and one filesystem variant.
pub struct ImageReader {
    source: PathBuf,
    bound: BoundFacade,
    config: EditorConfig,
}

impl ImageReader {
    pub fn new(source: PathBuf, bound: BoundFacade, config: EditorConfig) -> Self {
        Self { source, bound, config }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn variant(&self) -> FilesystemVariant {
        self.bound.variant()
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub(crate) fn bound_mut(&mut self) -> &mut BoundFacade {
        &mut self.bound
    }

    /// Children of `path`; any failure yields an empty listing.
    pub fn list_directory(&mut self, path: &str) -> DirectoryListing {
        let path = normalize_image_path(path);
        match self.bound.list(&path) {
            Ok(raw) => DirectoryListing::new(raw, self.bound.variant()),
            Err(e) => {
                debug!("Listing {} yielded nothing: {}", path, e);
                DirectoryListing::empty()
            }
        }
    }

    /// True when `path` names a file. Never fails.
    pub fn file_exists(&mut self, path: &str) -> bool {
        let path = normalize_image_path(path);
        matches!(self.bound.metadata(&path), Ok(meta) if !meta.is_directory)
    }

    /// True when `path` names a directory. Never fails.
    pub fn directory_exists(&mut self, path: &str) -> bool {
        let path = normalize_image_path(path);
        matches!(self.bound.metadata(&path), Ok(meta) if meta.is_directory)
    }

    pub fn get_file_size(&mut self, path: &str) -> Result<u64, IsoEditError> {
        let path = normalize_image_path(path);

        match self.bound.size(&path) {
            Ok(Some(size)) => return Ok(size),
            Ok(None) => {}
            Err(e) => debug!("Metadata size for {} unavailable: {}", path, e),
        }

        let mut stream = self
            .bound
            .open(&path)
            .map_err(|_| IsoEditError::PathNotFound(path.clone()))?;
        stream
            .seek(SeekFrom::End(0))
            .map_err(|_| IsoEditError::PathNotFound(path.clone()))
    }

    /// Read a whole file. Files above the large-file threshold are read in
    /// fixed chunks with progress logged as they go.
    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>, IsoEditError> {
        let path = normalize_image_path(path);
        let size = self.get_file_size(&path)?;
        let mut stream = self
            .bound
            .open(&path)
            .map_err(|_| IsoEditError::PathNotFound(path.clone()))?;

        if size <= self.config.large_file_threshold {
            let mut data = Vec::with_capacity(size as usize);
            stream.read_to_end(&mut data)?;
            return Ok(data);
        }

        info!("Reading large file {} ({} bytes) in chunks", path, size);
        let mut data = Vec::with_capacity(size as usize);
        let mut chunk = vec![0u8; self.config.read_chunk_size as usize];
        let mut next_report = self.config.progress_interval;
        loop {
            let read = stream.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            data.extend_from_slice(&chunk[..read]);
            if data.len() as u64 >= next_report {
                info!(
                    "Read {} MiB of {} MiB from {}",
                    data.len() as u64 / isoedit_core::MIB,
                    size / isoedit_core::MIB,
                    path
                );
                next_report += self.config.progress_interval;
            }
        }
        Ok(data)
    }

    pub fn read_file_text(&mut self, path: &str, encoding: TextEncoding) -> Result<String, IsoEditError> {
        let bytes = self.read_file(path)?;
        encoding.decode(&bytes)
    }

    /// Copy one file out of the image to `output`.
    ///
    /// The archive tool is preferred because it reads multi-gigabyte files far
    /// faster than the record stream. Either way the result lands in a scratch
    /// location next to `output` and is moved into place once complete.
    pub async fn extract_file(&mut self, path: &str, output: &Path) -> Result<(), IsoEditError> {
        let path = normalize_image_path(path);
        if !self.file_exists(&path) {
            return Err(IsoEditError::PathNotFound(path));
        }

        let parent = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        match self.extraction_tool()? {
            Some(tool) => self.extract_with_tool(&tool, &path, &parent, output).await,
            None => self.extract_with_stream(&path, &parent, output),
        }
    }

    fn extraction_tool(&self) -> Result<Option<ExternalTool>, IsoEditError> {
        let explicit = self.config.extractor.as_deref();
        match self.config.extraction {
            ExtractionMode::Stream => Ok(None),
            ExtractionMode::ArchiveTool => ExternalTool::locate(explicit, ARCHIVE_TOOLS).map(Some),
            ExtractionMode::Auto => match ExternalTool::locate(explicit, ARCHIVE_TOOLS) {
                Ok(tool) => Ok(Some(tool)),
                Err(_) => {
                    debug!("No archive tool found, extracting through the record stream");
                    Ok(None)
                }
            },
        }
    }

    async fn extract_with_tool(
        &mut self,
        tool: &ExternalTool,
        path: &str,
        scratch_parent: &Path,
        output: &Path,
    ) -> Result<(), IsoEditError> {
        let scratch = tempfile::Builder::new()
            .prefix(".isoedit-extract-")
            .tempdir_in(scratch_parent)?;
        let entry = path.trim_start_matches('/');

        let args = vec![
            "x".to_string(),
            "-y".to_string(),
            format!("-o{}", scratch.path().display()),
            self.source.display().to_string(),
            entry.to_string(),
        ];
        let result = tool.run(&args, self.config.extractor_timeout()).await?;
        if !result.success {
            return Err(IsoEditError::ExtractionFailed(result.diagnostics()));
        }

        let extracted = local_path_for(scratch.path(), path);
        let extracted = if extracted.is_file() {
            extracted
        } else {
            // Case differs between the requested path and the stored name
            find_single_file(scratch.path())?.ok_or_else(|| {
                IsoEditError::ExtractionFailed(format!(
                    "{} produced no file for {}\n{}",
                    tool.name,
                    path,
                    result.diagnostics()
                ))
            })?
        };

        std::fs::rename(&extracted, output)?;
        info!("Extracted {} to {} with {}", path, output.display(), tool.name);
        Ok(())
    }

    fn extract_with_stream(&mut self, path: &str, scratch_parent: &Path, output: &Path) -> Result<(), IsoEditError> {
        let mut stream = self
            .bound
            .open(path)
            .map_err(|_| IsoEditError::PathNotFound(path.to_string()))?;
        let mut scratch = tempfile::Builder::new()
            .prefix(".isoedit-extract-")
            .tempfile_in(scratch_parent)?;

        let copied = io::copy(&mut stream, scratch.as_file_mut())
            .map_err(|e| IsoEditError::ExtractionFailed(format!("{}: {}", path, e)))?;
        scratch
            .persist(output)
            .map_err(|e| IsoEditError::IoError(e.error))?;

        info!("Extracted {} ({} bytes) to {}", path, copied, output.display());
        Ok(())
    }

    pub fn get_filesystem_info(&self) -> FilesystemInfo {
        let summary = self.bound.facade().summary();
        FilesystemInfo {
            variant: self.bound.variant(),
            volume_label: summary.volume_label,
            joliet_level: summary.joliet_level,
            udf_revision: summary.udf_revision,
            has_rock_ridge: summary.has_rock_ridge,
            logical_block_size: summary.logical_block_size,
            volume_space_size: summary.volume_space_size,
            has_boot_catalog: summary.has_boot_catalog,
        }
    }

    pub fn close(&mut self) {
        if !self.bound.facade().is_closed() {
            self.bound.facade_mut().close();
            debug!("Closed reader for {}", self.source.display());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.bound.facade().is_closed()
    }
}

/// The only regular file below `dir`, if there is exactly one.
fn find_single_file(dir: &Path) -> Result<Option<PathBuf>, IsoEditError> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                found.push(entry.path());
            }
        }
    }
    if found.len() > 1 {
        warn!("Archive tool extracted {} files where one was expected", found.len());
        return Ok(None);
    }
    Ok(found.pop())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_name_by_variant() {
        assert_eq!(decode_name(&[0x00, b'a', 0x04, 0x1F], true), "a\u{041F}");
        assert_eq!(decode_name(b"SETUP.EXE", false), "SETUP.EXE");
        assert_eq!(decode_name(&[b'c', 0xE9], false), "c\u{e9}");
    }

    #[test]
    fn test_listing_is_restartable() {
        let listing = DirectoryListing::new(
            vec![b"BOOT".to_vec(), b"EFI".to_vec()],
            FilesystemVariant::Plain,
        );
        assert_eq!(listing.iter().count(), 2);
        assert_eq!(listing.to_vec(), vec!["BOOT", "EFI"]);
        assert_eq!(listing.iter().next().as_deref(), Some("BOOT"));
        assert!(DirectoryListing::empty().is_empty());
    }

    #[test]
    fn test_find_single_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_single_file(dir.path()).unwrap(), None);

        std::fs::create_dir_all(dir.path().join("Sources")).unwrap();
        std::fs::write(dir.path().join("Sources/ei.cfg"), b"x").unwrap();
        assert_eq!(
            find_single_file(dir.path()).unwrap(),
            Some(dir.path().join("Sources/ei.cfg"))
        );

        std::fs::write(dir.path().join("other"), b"y").unwrap();
        assert_eq!(find_single_file(dir.path()).unwrap(), None);
    }
}
