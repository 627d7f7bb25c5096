// Boot catalog analysis
//
// El Torito entries address loaders by block, not by path. The loader paths
// are recovered by probing well-known locations and pairing the hits with
// catalog entries by position, which is how dual-mode install media is
// conventionally authored.

use crate::facade::CatalogEntry;
use crate::reader::ImageReader;
use isoedit_core::{BootDescriptor, BootInfo, BootKind, IsoEditError};
use log::{debug, info, warn};

/// Legacy loaders, most specific first.
pub const BIOS_CANDIDATES: &[&str] = &["/boot/etfsboot.com", "/bootmgr", "/isolinux/isolinux.bin"];

/// Firmware boot images, vendor locations before generic ones.
pub const UEFI_CANDIDATES: &[&str] = &[
    "/efi/microsoft/boot/efisys.bin",
    "/efi/microsoft/boot/efisys_noprompt.bin",
    "/efi/boot/efiboot.img",
    "/boot/efiboot.img",
    "/images/efiboot.img",
    "/efi.img",
    "/boot/grub/efi.img",
];

const DEFAULT_BIOS_LOAD_SIZE: u16 = 8;

/// Descriptors and warnings produced from catalog entries and probe hits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub bios: Option<BootDescriptor>,
    pub uefi: Option<BootDescriptor>,
    pub warnings: Vec<String>,
}

/// Pair catalog entries with the loader paths found on the image.
///
/// Entry 0 belongs to BIOS when a BIOS loader exists, otherwise to UEFI.
/// Entry 1 belongs to UEFI when both loaders exist. A UEFI loader present on
/// disc but left without a catalog slot still gets a descriptor.
pub fn resolve_boot_descriptors(
    entries: &[CatalogEntry],
    bios_hit: Option<&str>,
    uefi_hit: Option<&str>,
) -> Resolution {
    let mut resolution = Resolution::default();

    let bios_descriptor = |entry: &CatalogEntry, path: &str| BootDescriptor {
        kind: BootKind::Bios,
        image_path: path.to_string(),
        load_size: if entry.sector_count == 0 {
            DEFAULT_BIOS_LOAD_SIZE
        } else {
            entry.sector_count
        },
        uses_info_table: true,
        no_emulation: entry.no_emulation,
    };
    let uefi_descriptor = |entry: &CatalogEntry, path: &str| BootDescriptor {
        kind: BootKind::Uefi,
        image_path: path.to_string(),
        load_size: entry.sector_count,
        uses_info_table: false,
        no_emulation: entry.no_emulation,
    };

    match (entries.first(), bios_hit, uefi_hit) {
        (Some(first), Some(bios), _) => {
            resolution.bios = Some(bios_descriptor(first, bios));
            if let (Some(second), Some(uefi)) = (entries.get(1), uefi_hit) {
                resolution.uefi = Some(uefi_descriptor(second, uefi));
            }
        }
        (Some(first), None, Some(uefi)) => {
            resolution.uefi = Some(uefi_descriptor(first, uefi));
        }
        _ => {}
    }

    if let (Some(first), Some(bios)) = (entries.first(), bios_hit) {
        if first.is_efi() {
            resolution.warnings.push(format!(
                "first catalog entry is an EFI entry but was assigned to BIOS loader {}",
                bios
            ));
        }
    }

    if resolution.uefi.is_none() {
        if let Some(uefi) = uefi_hit {
            resolution.uefi = Some(BootDescriptor {
                kind: BootKind::Uefi,
                image_path: uefi.to_string(),
                load_size: 0,
                uses_info_table: false,
                no_emulation: true,
            });
        }
    }

    let assigned = resolution.bios.is_some() as usize + resolution.uefi.is_some() as usize;
    if entries.len() > assigned {
        resolution.warnings.push(format!(
            "{} catalog entries but only {} loader(s) could be mapped to paths",
            entries.len(),
            assigned
        ));
    }
    if bios_hit.is_none() && uefi_hit.is_none() {
        resolution
            .warnings
            .push("no known boot loader found; the rebuilt image will not be bootable".to_string());
    }

    resolution
}

/// First candidate that exists as a file.
fn probe(reader: &mut ImageReader, candidates: &[&'static str]) -> Option<&'static str> {
    candidates.iter().copied().find(|path| reader.file_exists(path))
}

/// Produce normalized boot information for an opened image.
pub fn analyze(reader: &mut ImageReader) -> Result<BootInfo, IsoEditError> {
    let entries = match reader.bound_mut().facade_mut().boot_catalog() {
        Ok(Some(entries)) => entries,
        Ok(None) => {
            debug!("{} has no boot catalog", reader.source().display());
            return Ok(BootInfo::none());
        }
        Err(IsoEditError::MalformedImage(msg)) => {
            let warning = format!("boot catalog unreadable: {}", msg);
            warn!("{}", warning);
            return Ok(BootInfo {
                has_catalog: true,
                warnings: vec![warning],
                ..BootInfo::none()
            });
        }
        Err(e) => return Err(e),
    };

    let bios_hit = probe(reader, BIOS_CANDIDATES);
    let uefi_hit = probe(reader, UEFI_CANDIDATES);
    debug!(
        "Boot probe: {} catalog entries, BIOS {:?}, UEFI {:?}",
        entries.len(),
        bios_hit,
        uefi_hit
    );

    let resolution = resolve_boot_descriptors(&entries, bios_hit, uefi_hit);
    for warning in &resolution.warnings {
        warn!("{}", warning);
    }
    for descriptor in resolution.bios.iter().chain(resolution.uefi.iter()) {
        info!(
            "{} loader {} (load size {}, no emulation: {})",
            descriptor.kind, descriptor.image_path, descriptor.load_size, descriptor.no_emulation
        );
    }

    Ok(BootInfo {
        has_catalog: true,
        catalog_entries: entries.len(),
        bios: resolution.bios,
        uefi: resolution.uefi,
        warnings: resolution.warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(platform_id: u8, sector_count: u16) -> CatalogEntry {
        CatalogEntry {
            platform_id,
            bootable: true,
            media_type: 0,
            no_emulation: true,
            load_segment: 0,
            sector_count,
            load_rba: 40,
        }
    }

    const BIOS: &str = "/boot/etfsboot.com";
    const UEFI: &str = "/efi/microsoft/boot/efisys.bin";

    #[test]
    fn test_dual_mode_assigns_by_position() {
        let entries = [entry(0, 8), entry(0xEF, 2880)];
        let r = resolve_boot_descriptors(&entries, Some(BIOS), Some(UEFI));

        let bios = r.bios.unwrap();
        assert_eq!(bios.image_path, BIOS);
        assert_eq!(bios.load_size, 8);
        assert!(bios.uses_info_table);

        let uefi = r.uefi.unwrap();
        assert_eq!(uefi.image_path, UEFI);
        assert_eq!(uefi.load_size, 2880);
        assert!(!uefi.uses_info_table);
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn test_bios_load_size_defaults_to_eight() {
        let r = resolve_boot_descriptors(&[entry(0, 0)], Some(BIOS), None);
        assert_eq!(r.bios.unwrap().load_size, DEFAULT_BIOS_LOAD_SIZE);
        assert!(r.uefi.is_none());
    }

    #[test]
    fn test_uefi_only_takes_first_entry() {
        let r = resolve_boot_descriptors(&[entry(0xEF, 4)], None, Some(UEFI));
        assert!(r.bios.is_none());
        let uefi = r.uefi.unwrap();
        assert_eq!(uefi.load_size, 4);
    }

    #[test]
    fn test_single_entry_with_uefi_file_synthesizes_descriptor() {
        let r = resolve_boot_descriptors(&[entry(0, 8)], Some(BIOS), Some(UEFI));
        assert!(r.bios.is_some());
        let uefi = r.uefi.unwrap();
        assert_eq!(uefi.load_size, 0);
        assert!(uefi.no_emulation);
        assert!(!uefi.uses_info_table);
    }

    #[test]
    fn test_no_candidates_warns() {
        let r = resolve_boot_descriptors(&[entry(0, 4)], None, None);
        assert!(r.bios.is_none() && r.uefi.is_none());
        assert_eq!(r.warnings.len(), 2);
        assert!(r.warnings.iter().any(|w| w.contains("not be bootable")));
    }

    #[test]
    fn test_efi_first_entry_assigned_to_bios_warns() {
        let r = resolve_boot_descriptors(&[entry(0xEF, 4)], Some(BIOS), None);
        assert!(r.bios.is_some());
        assert!(r.warnings.iter().any(|w| w.contains("EFI entry")));
    }
}
