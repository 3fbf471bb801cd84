//! Volume-level access: open, catalog enumeration, store handles.


use std::sync::Arc;

use display_guid::Guid;
use tracing::{debug, warn};

use crate::error::Error;
use crate::format::{
    BLOCK_HEADER_SIZE, BLOCK_SIZE, CATALOG_ENTRY_SIZE, CatalogEntry, CatalogHeader,
    VOLUME_HEADER_SIZE, VSS_IDENTIFIER, VolumeHeader,
};
use crate::source::{AbortFlag, VolumeSource};
use crate::store::Store;
use crate::store_descriptor::StoreDescriptor;


/// Checks whether `offset` in `source` carries the shadow-copy volume header
/// identifier, without constructing a volume.
pub fn check_volume_signature(source: &dyn VolumeSource, offset: u64) -> Result<bool, Error> {
    let mut identifier = [0u8; 16];
    match source.read_at(&mut identifier, offset) {
        Ok(()) => Ok(identifier == VSS_IDENTIFIER),
        Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}


/// How a volume is opened and how it reports while in use.
#[derive(Clone, Debug)]
pub struct OpenOptions {
    /// Read-only access; the only supported mode.
    pub read_only: bool,

    /// Emit per-range resolution traces from the read engine.
    pub verbose_diagnostics: bool,

    /// Codepage label attached to narrow-text diagnostics.
    pub narrow_text_codepage: Option<u32>,

    /// Abort signal shared with the caller; a fresh one is created if absent.
    pub abort_flag: Option<AbortFlag>,
}
impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            read_only: true,
            verbose_diagnostics: false,
            narrow_text_codepage: None,
            abort_flag: None,
        }
    }
}


/// Shared IO state: the byte source plus the runtime controls.
pub(crate) struct IoState {
    source: Box<dyn VolumeSource>,
    abort: AbortFlag,
    pub verbose: bool,
    pub codepage: Option<u32>,
}
impl IoState {
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<(), Error> {
        self.source.read_at(buf, offset)
    }

    pub fn check_abort(&self) -> Result<(), Error> {
        self.abort.check()
    }
}


pub(crate) struct VolumeInner {
    pub io: IoState,
    pub header: VolumeHeader,
    pub size: u64,
    pub stores: Vec<StoreDescriptor>,
}


/// A shadow-copy-bearing volume.
///
/// Obtained with [`Volume::open`]; hands out [`Store`] handles for the
/// snapshots found in its catalog.
pub struct Volume {
    inner: Arc<VolumeInner>,
}
impl Volume {
    /// Opens the volume whose header sits at `offset` within `source`.
    ///
    /// All other on-disk offsets are absolute within the source.
    pub fn open<S: VolumeSource + 'static>(
        source: S,
        offset: u64,
        options: OpenOptions,
    ) -> Result<Self, Error> {
        if !options.read_only {
            return Err(Error::Argument { reason: "only read-only access is supported" });
        }

        let io = IoState {
            source: Box::new(source),
            abort: options.abort_flag.unwrap_or_default(),
            verbose: options.verbose_diagnostics,
            codepage: options.narrow_text_codepage,
        };

        let mut header_data = [0u8; VOLUME_HEADER_SIZE];
        io.read_at(&mut header_data, offset)?;
        let header = VolumeHeader::read_data(&header_data)?;

        let (stores, size) = read_catalog(&io, header.catalog_offset)?;

        for store in &stores {
            if !store.has_in_volume_data {
                continue;
            }
            io.check_abort()?;
            if let Err(e) = store.read_store_header(&io) {
                warn!(store = store.index, error = %e, "failed to read store header");
            }
        }

        debug!(offset, size, stores = stores.len(), "volume opened");

        Ok(Self {
            inner: Arc::new(VolumeInner {
                io,
                header,
                size,
                stores,
            }),
        })
    }

    /// Closes the volume.
    ///
    /// Outstanding [`Store`] handles keep the underlying source alive until
    /// they are dropped as well.
    pub fn close(self) {}

    pub fn header(&self) -> &VolumeHeader {
        &self.inner.header
    }

    /// The size of the original volume, as recorded by the first identity
    /// entry in the catalog.
    pub fn size(&self) -> u64 {
        self.inner.size
    }

    pub fn store_count(&self) -> usize {
        self.inner.stores.len()
    }

    /// A handle to the store at `index`, ordered oldest first.
    pub fn store(&self, index: usize) -> Result<Store, Error> {
        if index >= self.inner.stores.len() {
            return Err(Error::Argument { reason: "store index out of range" });
        }
        Ok(Store::new(Arc::clone(&self.inner), index))
    }

    pub fn store_identifier(&self, index: usize) -> Result<Guid, Error> {
        let store = self.inner.stores.get(index)
            .ok_or(Error::Argument { reason: "store index out of range" })?;
        Ok(store.identifier)
    }

    /// Raises the abort flag; in-flight loaders stop at their next block read.
    pub fn signal_abort(&self) {
        self.inner.io.abort.raise();
    }

    pub fn abort_flag(&self) -> AbortFlag {
        self.inner.io.abort.clone()
    }

    pub fn narrow_text_codepage(&self) -> Option<u32> {
        self.inner.io.codepage
    }
}


/// Walks the catalog block chain and materializes the store descriptors,
/// sorted by creation time and indexed in that order.
///
/// Also returns the volume size, taken from the first identity entry
/// encountered in catalog order.
fn read_catalog(io: &IoState, catalog_offset: u64) -> Result<(Vec<StoreDescriptor>, u64), Error> {
    let mut stores: Vec<StoreDescriptor> = Vec::new();
    let mut last_identity: Option<usize> = None;
    let mut catalog_volume_size = 0;

    let mut file_offset = catalog_offset;
    while file_offset != 0 {
        io.check_abort()?;

        let mut block_data = Vec::new();
        block_data.try_reserve_exact(BLOCK_SIZE as usize)?;
        block_data.resize(BLOCK_SIZE as usize, 0x00);
        io.read_at(&mut block_data, file_offset)?;

        let header = CatalogHeader::read_data(&block_data)?;

        for entry_data in block_data[BLOCK_HEADER_SIZE..].chunks_exact(CATALOG_ENTRY_SIZE) {
            match CatalogEntry::read_data(entry_data)? {
                CatalogEntry::Padding => {},
                CatalogEntry::StoreIdentity { volume_size, identifier, creation_time } => {
                    if catalog_volume_size == 0 && stores.is_empty() {
                        catalog_volume_size = volume_size;
                    } else if volume_size != catalog_volume_size {
                        debug!(
                            store = stores.len(), volume_size, catalog_volume_size,
                            "store volume size differs from the catalog's first entry",
                        );
                    }
                    stores.push(StoreDescriptor::from_identity(volume_size, identifier, creation_time));
                    last_identity = Some(stores.len() - 1);
                },
                CatalogEntry::StoreLocations {
                    block_list_offset,
                    identifier,
                    store_header_offset,
                    block_range_list_offset,
                    bitmap_offset,
                    previous_bitmap_offset,
                } => {
                    let target = match last_identity {
                        Some(last) if stores[last].identifier == identifier => Some(last),
                        _ => {
                            match stores.iter().position(|store| store.identifier == identifier) {
                                Some(found) => {
                                    warn!(
                                        identifier = %identifier,
                                        "store locations entry is not adjacent to its identity entry",
                                    );
                                    Some(found)
                                },
                                None => {
                                    warn!(
                                        identifier = %identifier,
                                        "store locations entry matches no store; applying to the most recent one",
                                    );
                                    last_identity
                                },
                            }
                        },
                    };
                    match target {
                        Some(index) => {
                            let store = &mut stores[index];
                            store.block_list_offset = block_list_offset;
                            store.store_header_offset = store_header_offset;
                            store.block_range_list_offset = block_range_list_offset;
                            store.bitmap_offset = bitmap_offset;
                            store.previous_bitmap_offset = previous_bitmap_offset;
                            store.has_in_volume_data = true;
                        },
                        None => {
                            warn!("store locations entry without a preceding identity entry");
                        },
                    }
                },
            }
        }

        file_offset = header.next_offset;
    }

    stores.sort_by_key(|store| store.creation_time);
    for (index, store) in stores.iter_mut().enumerate() {
        store.index = index;
    }

    Ok((stores, catalog_volume_size))
}


#[cfg(test)]
mod tests {
    use super::{OpenOptions, Volume, check_volume_signature};
    use crate::error::Error;
    use crate::source::BufferSource;
    use crate::testutil::{self, TestImage};

    #[test]
    fn test_signature_check() {
        let image = TestImage::two_stores().build();
        let source = BufferSource::new(image);
        assert!(check_volume_signature(&source, testutil::VOLUME_HEADER_OFFSET).unwrap());
        assert!(!check_volume_signature(&source, 0).unwrap());
        // probing past the end of the source is not an error
        assert!(!check_volume_signature(&source, 0x7FFF_FFFF).unwrap());
    }

    #[test]
    fn test_open_rejects_bad_magic() {
        let mut image = TestImage::two_stores().build();
        image[testutil::VOLUME_HEADER_OFFSET as usize] ^= 0xFF;
        let result = Volume::open(
            BufferSource::new(image),
            testutil::VOLUME_HEADER_OFFSET,
            OpenOptions::default(),
        );
        assert!(matches!(result, Err(Error::UnsupportedFormat { .. })));
    }

    #[test]
    fn test_open_rejects_writable_mode() {
        let image = TestImage::two_stores().build();
        let options = OpenOptions {
            read_only: false,
            ..OpenOptions::default()
        };
        let result = Volume::open(
            BufferSource::new(image),
            testutil::VOLUME_HEADER_OFFSET,
            options,
        );
        assert!(matches!(result, Err(Error::Argument { .. })));
    }

    #[test]
    fn test_catalog_enumeration() {
        let volume = testutil::open_two_store_volume();
        assert_eq!(volume.store_count(), 2);
        assert_eq!(volume.size(), testutil::VOLUME_SIZE);

        // stores come out ordered by creation time, oldest first
        let older = volume.store(0).unwrap();
        let newer = volume.store(1).unwrap();
        assert!(older.creation_time() < newer.creation_time());
        assert_eq!(
            volume.store_identifier(0).unwrap(),
            testutil::STORE_A_IDENTIFIER.into(),
        );
        assert_eq!(
            volume.store_identifier(1).unwrap(),
            testutil::STORE_B_IDENTIFIER.into(),
        );
        assert!(volume.store(2).is_err());
        assert!(volume.store_identifier(2).is_err());
    }

    #[test]
    fn test_store_headers_loaded_at_open() {
        let volume = testutil::open_two_store_volume();
        let store = volume.store(0).unwrap();
        assert!(store.has_in_volume_data());
        assert_eq!(
            store.copy_identifier().unwrap(),
            testutil::STORE_A_COPY_IDENTIFIER.into(),
        );
        assert_eq!(store.operating_machine().unwrap(), "victim-pc");
        assert_eq!(store.service_machine().unwrap(), "victim-pc");
    }

    #[test]
    fn test_abort_flag_cancels_open() {
        let image = TestImage::two_stores().build();
        let abort = crate::source::AbortFlag::new();
        abort.raise();
        let options = OpenOptions {
            abort_flag: Some(abort),
            ..OpenOptions::default()
        };
        let result = Volume::open(
            BufferSource::new(image),
            testutil::VOLUME_HEADER_OFFSET,
            options,
        );
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_volume_header_accessors() {
        let volume = testutil::open_two_store_volume();
        assert_eq!(volume.header().catalog_offset, testutil::CATALOG_OFFSET);
        assert_eq!(volume.header().maximum_size, testutil::MAXIMUM_SIZE);
    }
}
