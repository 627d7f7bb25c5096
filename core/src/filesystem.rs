use serde::{Deserialize, Serialize};
use std::fmt;

/// Naming/encoding convention used for every read against an opened image.
///
/// Variants are ordered from the baseline ISO 9660 names up to the richest
/// metadata the image can carry. Detection prefers the richest one present.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FilesystemVariant {
    /// Plain sector-addressed ISO 9660 identifiers (8-bit names).
    Plain,
    /// Joliet supplementary tree with Unicode names.
    ExtendedNames,
    /// UDF tree with extended attributes and 64-bit file sizes.
    ExtendedAttributes,
}

impl FilesystemVariant {
    pub fn name(&self) -> &'static str {
        match self {
            FilesystemVariant::Plain => "iso9660",
            FilesystemVariant::ExtendedNames => "joliet",
            FilesystemVariant::ExtendedAttributes => "udf",
        }
    }

    /// Names in this variant are stored as 16-bit big-endian code units.
    pub fn uses_wide_names(&self) -> bool {
        matches!(self, FilesystemVariant::ExtendedAttributes)
    }
}

impl fmt::Display for FilesystemVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BootKind {
    Bios,
    Uefi,
}

impl fmt::Display for BootKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootKind::Bios => f.write_str("BIOS"),
            BootKind::Uefi => f.write_str("UEFI"),
        }
    }
}

/// A boot loader recovered from the El Torito catalog and mapped to a path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BootDescriptor {
    pub kind: BootKind,
    /// Normalized image path, always starting with `/`.
    pub image_path: String,
    /// Load size in 512-byte virtual sectors.
    pub load_size: u16,
    pub uses_info_table: bool,
    pub no_emulation: bool,
}

/// Normalized boot information for one opened image.
///
/// Holds at most one descriptor per boot kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BootInfo {
    pub has_catalog: bool,
    pub catalog_entries: usize,
    pub bios: Option<BootDescriptor>,
    pub uefi: Option<BootDescriptor>,
    pub warnings: Vec<String>,
}

impl BootInfo {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_bootable(&self) -> bool {
        self.bios.is_some() || self.uefi.is_some()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &BootDescriptor> {
        self.bios.iter().chain(self.uefi.iter())
    }

    /// True when `path` (normalized) is one of the boot loaders.
    pub fn is_boot_path(&self, path: &str) -> bool {
        self.descriptors()
            .any(|d| d.image_path.eq_ignore_ascii_case(path))
    }
}

/// Filesystem facts reported by `get_filesystem_info`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilesystemInfo {
    pub variant: FilesystemVariant,
    pub volume_label: Option<String>,
    pub joliet_level: Option<u8>,
    pub udf_revision: Option<String>,
    pub has_rock_ridge: bool,
    pub logical_block_size: u32,
    pub volume_space_size: u32,
    pub has_boot_catalog: bool,
}

/// Outcome of one rebuild invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RebuildResult {
    pub success: bool,
    pub message: String,
    pub output_path: String,
    pub output_size: u64,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(kind: BootKind, path: &str) -> BootDescriptor {
        BootDescriptor {
            kind,
            image_path: path.to_string(),
            load_size: 8,
            uses_info_table: kind == BootKind::Bios,
            no_emulation: true,
        }
    }

    #[test]
    fn test_boot_info_descriptors_in_kind_order() {
        let info = BootInfo {
            has_catalog: true,
            catalog_entries: 2,
            bios: Some(descriptor(BootKind::Bios, "/boot/etfsboot.com")),
            uefi: Some(descriptor(BootKind::Uefi, "/efi/microsoft/boot/efisys.bin")),
            warnings: vec![],
        };

        let kinds: Vec<_> = info.descriptors().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![BootKind::Bios, BootKind::Uefi]);
        assert!(info.is_bootable());
        assert!(info.is_boot_path("/BOOT/ETFSBOOT.COM"));
        assert!(!info.is_boot_path("/sources/boot.wim"));
    }

    #[test]
    fn test_empty_boot_info_is_not_bootable() {
        assert!(!BootInfo::none().is_bootable());
    }

    #[test]
    fn test_variant_wide_names() {
        assert!(FilesystemVariant::ExtendedAttributes.uses_wide_names());
        assert!(!FilesystemVariant::ExtendedNames.uses_wide_names());
        assert_eq!(FilesystemVariant::Plain.to_string(), "iso9660");
    }
}
