// Filesystem variant selection

use crate::facade::{DiscFacade, FileStream, RawName, RecordMetadata};
use isoedit_core::{FilesystemVariant, IsoEditError};
use log::debug;

/// Pick the naming convention all later reads use.
///
/// An image may advertise several trees at once. UDF carries the most
/// complete metadata, so it wins over Joliet, which wins over the plain tree.
pub fn select_variant(facade: &dyn DiscFacade) -> Result<FilesystemVariant, IsoEditError> {
    if facade.is_closed() {
        return Err(IsoEditError::LibraryUnavailable(
            "reading facade is closed".to_string(),
        ));
    }

    let variant = if facade.has_extended_attributes() {
        FilesystemVariant::ExtendedAttributes
    } else if facade.has_extended_names() {
        FilesystemVariant::ExtendedNames
    } else {
        FilesystemVariant::Plain
    };

    debug!("Selected filesystem variant {}", variant);
    Ok(variant)
}

/// A facade with its variant fixed, so callers see one list/open/size shape.
pub struct BoundFacade {
    facade: Box<dyn DiscFacade>,
    variant: FilesystemVariant,
}

impl BoundFacade {
    pub fn select(facade: Box<dyn DiscFacade>) -> Result<Self, IsoEditError> {
        let variant = select_variant(facade.as_ref())?;
        Ok(Self { facade, variant })
    }

    pub fn variant(&self) -> FilesystemVariant {
        self.variant
    }

    pub fn list(&mut self, path: &str) -> Result<Vec<RawName>, IsoEditError> {
        self.facade.list_children(self.variant, path)
    }

    pub fn open(&mut self, path: &str) -> Result<FileStream, IsoEditError> {
        self.facade.open_stream(self.variant, path)
    }

    pub fn metadata(&mut self, path: &str) -> Result<RecordMetadata, IsoEditError> {
        self.facade.get_record_metadata(self.variant, path)
    }

    /// Size from record metadata when the variant stores it reliably.
    pub fn size(&mut self, path: &str) -> Result<Option<u64>, IsoEditError> {
        if self.variant != FilesystemVariant::ExtendedAttributes {
            return Ok(None);
        }
        Ok(self.metadata(path)?.size)
    }

    pub fn facade(&self) -> &dyn DiscFacade {
        self.facade.as_ref()
    }

    pub fn facade_mut(&mut self) -> &mut dyn DiscFacade {
        self.facade.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::{CatalogEntry, VolumeSummary};

    struct Advertised {
        names: bool,
        attributes: bool,
        closed: bool,
    }

    impl DiscFacade for Advertised {
        fn has_extended_names(&self) -> bool {
            self.names
        }
        fn has_extended_attributes(&self) -> bool {
            self.attributes
        }
        fn list_children(&mut self, _: FilesystemVariant, _: &str) -> Result<Vec<RawName>, IsoEditError> {
            Ok(vec![])
        }
        fn open_stream(&mut self, _: FilesystemVariant, path: &str) -> Result<FileStream, IsoEditError> {
            Err(IsoEditError::PathNotFound(path.to_string()))
        }
        fn get_record_metadata(&mut self, _: FilesystemVariant, path: &str) -> Result<RecordMetadata, IsoEditError> {
            Err(IsoEditError::PathNotFound(path.to_string()))
        }
        fn boot_catalog(&mut self) -> Result<Option<Vec<CatalogEntry>>, IsoEditError> {
            Ok(None)
        }
        fn summary(&self) -> VolumeSummary {
            VolumeSummary::default()
        }
        fn close(&mut self) {
            self.closed = true;
        }
        fn is_closed(&self) -> bool {
            self.closed
        }
    }

    fn facade(names: bool, attributes: bool) -> Advertised {
        Advertised { names, attributes, closed: false }
    }

    #[test]
    fn test_detection_order() {
        assert_eq!(
            select_variant(&facade(true, true)).unwrap(),
            FilesystemVariant::ExtendedAttributes
        );
        assert_eq!(
            select_variant(&facade(false, true)).unwrap(),
            FilesystemVariant::ExtendedAttributes
        );
        assert_eq!(
            select_variant(&facade(true, false)).unwrap(),
            FilesystemVariant::ExtendedNames
        );
        assert_eq!(select_variant(&facade(false, false)).unwrap(), FilesystemVariant::Plain);
    }

    #[test]
    fn test_closed_facade_is_unavailable() {
        let mut closed = facade(true, true);
        closed.close();
        assert!(matches!(
            select_variant(&closed),
            Err(IsoEditError::LibraryUnavailable(_))
        ));
    }

    #[test]
    fn test_bound_size_only_trusts_udf_metadata() {
        let mut bound = BoundFacade::select(Box::new(facade(true, false))).unwrap();
        assert_eq!(bound.variant(), FilesystemVariant::ExtendedNames);
        assert_eq!(bound.size("/anything").unwrap(), None);
    }
}
