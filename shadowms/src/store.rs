//! Public store handles.
//!
//! A `Store` presents one snapshot as a readable byte image of the original
//! volume. Each handle carries its own cursor; handles for distinct stores can
//! be read from concurrently.


use std::io::{self, SeekFrom};
use std::sync::{Arc, Mutex};

use display_guid::Guid;

use crate::block_descriptor::{BlockDescriptor, BlockFlags};
use crate::error::Error;
use crate::format::AttributeFlags;
use crate::store_descriptor::{InformationState, StoreDescriptor, read_store_buffer};
use crate::volume::VolumeInner;


/// A snapshot of one block descriptor, as enumerated by [`Store::block`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BlockView {
    pub original_offset: u64,
    pub relative_offset: u64,
    pub offset: u64,
    pub flags: BlockFlags,
    pub bitmap: u32,
}
impl From<&BlockDescriptor> for BlockView {
    fn from(value: &BlockDescriptor) -> Self {
        Self {
            original_offset: value.original_offset,
            relative_offset: value.relative_offset,
            offset: value.offset,
            flags: value.flags,
            bitmap: value.bitmap,
        }
    }
}


pub struct Store {
    inner: Arc<VolumeInner>,
    index: usize,
    current_offset: Mutex<u64>,
}
impl Store {
    pub(crate) fn new(inner: Arc<VolumeInner>, index: usize) -> Self {
        Self {
            inner,
            index,
            current_offset: Mutex::new(0),
        }
    }

    fn descriptor(&self) -> &StoreDescriptor {
        &self.inner.stores[self.index]
    }

    /// Position of this store in the volume's creation-time order.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether the catalog recorded in-volume data for this store.
    pub fn has_in_volume_data(&self) -> bool {
        self.descriptor().has_in_volume_data
    }

    /// The size of the readable store image; equals the volume size.
    pub fn size(&self) -> u64 {
        self.inner.size
    }

    /// The original volume size recorded in this store's catalog entry.
    pub fn volume_size(&self) -> u64 {
        self.descriptor().volume_size
    }

    pub fn identifier(&self) -> Guid {
        self.descriptor().identifier
    }

    /// Creation time as a FILETIME value.
    pub fn creation_time(&self) -> u64 {
        self.descriptor().creation_time
    }

    /// The shadow copy identifier; `None` until the store header is loaded.
    pub fn copy_identifier(&self) -> Option<Guid> {
        self.descriptor().with_information(|information| information.copy_identifier)
    }

    /// The shadow copy set identifier; `None` until the store header is loaded.
    pub fn copy_set_identifier(&self) -> Option<Guid> {
        self.descriptor().with_information(|information| information.copy_set_identifier)
    }

    /// `VSS_VOLSNAP_ATTR_*` flags; `None` until the store header is loaded.
    pub fn attribute_flags(&self) -> Option<AttributeFlags> {
        self.descriptor().with_information(|information| information.attribute_flags)
    }

    pub fn operating_machine(&self) -> Option<String> {
        self.descriptor().with_information(|information| information.operating_machine.clone())
    }

    pub fn service_machine(&self) -> Option<String> {
        self.descriptor().with_information(|information| information.service_machine.clone())
    }

    /// Reads at the cursor, advancing it. Returns 0 at or past end of store.
    pub fn read_buffer(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let mut cursor = self.current_offset.lock().unwrap();
        self.read_at_cursor(buf, &mut cursor)
    }

    /// Reads at `offset`, leaving the cursor right after the bytes read.
    pub fn read_buffer_at_offset(&self, buf: &mut [u8], offset: u64) -> Result<usize, Error> {
        let mut cursor = self.current_offset.lock().unwrap();
        *cursor = offset;
        self.read_at_cursor(buf, &mut cursor)
    }

    fn read_at_cursor(&self, buf: &mut [u8], cursor: &mut u64) -> Result<usize, Error> {
        let descriptor = self.descriptor();
        if !descriptor.has_in_volume_data {
            return Err(Error::State { reason: "store has no in-volume data" });
        }
        if matches!(*descriptor.information.read().unwrap(), InformationState::Failed) {
            return Err(Error::State { reason: "store header failed to load" });
        }

        if buf.is_empty() || *cursor >= descriptor.volume_size {
            return Ok(0);
        }
        let available = descriptor.volume_size - *cursor;
        let read_size = (buf.len() as u64).min(available) as usize;

        read_store_buffer(
            &self.inner.io,
            &self.inner.stores,
            self.index,
            &mut buf[..read_size],
            *cursor,
            self.index,
        )?;

        *cursor += read_size as u64;
        Ok(read_size)
    }

    /// Moves the cursor. Seeks past the end are legal; seeks before the start
    /// are not.
    pub fn seek_offset(&self, pos: SeekFrom) -> Result<u64, Error> {
        let mut cursor = self.current_offset.lock().unwrap();
        let target: i128 = match pos {
            SeekFrom::Start(offset) => offset.into(),
            SeekFrom::Current(delta) => i128::from(*cursor) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.descriptor().volume_size) + i128::from(delta),
        };
        let target = u64::try_from(target)
            .map_err(|_| Error::Argument { reason: "seek offset out of range" })?;
        *cursor = target;
        Ok(target)
    }

    /// The current cursor position.
    pub fn offset(&self) -> u64 {
        *self.current_offset.lock().unwrap()
    }

    /// The number of block descriptors in this store's block list.
    pub fn block_count(&self) -> Result<usize, Error> {
        self.descriptor().with_blocks(&self.inner.io, |blocks| blocks.records().len())
    }

    /// The block descriptor at `index`, in block-list order.
    pub fn block(&self, index: usize) -> Result<BlockView, Error> {
        self.descriptor().with_blocks(&self.inner.io, |blocks| {
            blocks.records().get(index).map(BlockView::from)
        })?
        .ok_or(Error::Argument { reason: "block index out of range" })
    }
}
impl io::Read for Store {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_buffer(buf).map_err(Into::into)
    }
}
impl io::Seek for Store {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.seek_offset(pos).map_err(Into::into)
    }
}
