use crate::IsoEditError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MIB: u64 = 1024 * 1024;

/// How single files are pulled out of a source image.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionMode {
    /// Use the archive tool when one is installed, else copy through the reader.
    #[default]
    Auto,
    ArchiveTool,
    Stream,
}

/// Editor settings, loadable from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub packager: Option<PathBuf>,
    pub extractor: Option<PathBuf>,
    pub extraction: ExtractionMode,
    pub packager_timeout_secs: u64,
    pub extractor_timeout_secs: u64,
    pub volume_label: Option<String>,
    pub staging_root: Option<PathBuf>,
    pub large_file_threshold: u64,
    pub read_chunk_size: u64,
    pub progress_interval: u64,
    pub verify_output: bool,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            packager: None,
            extractor: None,
            extraction: ExtractionMode::Auto,
            packager_timeout_secs: 3600,
            extractor_timeout_secs: 600,
            volume_label: None,
            staging_root: None,
            large_file_threshold: 100 * MIB,
            read_chunk_size: MIB,
            progress_interval: 100 * MIB,
            verify_output: true,
        }
    }
}

impl EditorConfig {
    pub fn load(path: &Path) -> Result<Self, IsoEditError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            IsoEditError::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: EditorConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IsoEditError> {
        if self.read_chunk_size == 0 {
            return Err(IsoEditError::Configuration(
                "read_chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.progress_interval == 0 {
            return Err(IsoEditError::Configuration(
                "progress_interval must be greater than zero".to_string(),
            ));
        }
        if self.packager_timeout_secs == 0 || self.extractor_timeout_secs == 0 {
            return Err(IsoEditError::Configuration(
                "tool timeouts must be greater than zero".to_string(),
            ));
        }
        if let Some(label) = &self.volume_label {
            // ISO 9660 volume identifiers are 32 bytes; Joliet allows 16 UCS-2 units
            if label.is_empty() || label.len() > 32 {
                return Err(IsoEditError::Configuration(format!(
                    "volume_label must be 1-32 bytes, got {:?}",
                    label
                )));
            }
        }
        Ok(())
    }

    pub fn packager_timeout(&self) -> Duration {
        Duration::from_secs(self.packager_timeout_secs)
    }

    pub fn extractor_timeout(&self) -> Duration {
        Duration::from_secs(self.extractor_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = EditorConfig::default();
        assert_eq!(config.large_file_threshold, 100 * MIB);
        assert_eq!(config.read_chunk_size, MIB);
        assert_eq!(config.packager_timeout(), Duration::from_secs(3600));
        assert_eq!(config.extraction, ExtractionMode::Auto);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"extraction": "stream", "volume_label": "WIN11_EDITED"}}"#).unwrap();

        let config = EditorConfig::load(file.path()).unwrap();
        assert_eq!(config.extraction, ExtractionMode::Stream);
        assert_eq!(config.volume_label.as_deref(), Some("WIN11_EDITED"));
        assert_eq!(config.read_chunk_size, MIB);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"read_chunk_size": 0}}"#).unwrap();
        assert!(matches!(
            EditorConfig::load(file.path()),
            Err(IsoEditError::Configuration(_))
        ));

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            EditorConfig::load(file.path()),
            Err(IsoEditError::SerializationError(_))
        ));
    }
}
