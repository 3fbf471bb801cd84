//! Block descriptors: the 32-byte block-list entries that map one 16 KiB block
//! of the original volume to wherever its snapshot-time contents live.


use bitflags::bitflags;
use tracing::debug;

use crate::error::Error;
use crate::format::{BLOCK_LIST_ENTRY_SIZE, BLOCK_RANGE_LIST_ENTRY_SIZE};


bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    pub struct BlockFlags : u32 {
        /// The contents must be fetched at `relative_offset` in a newer store.
        const IS_FORWARDER = 0x0000_0001;

        /// Only the 512-byte sub-blocks named in the bitmap are present here.
        const IS_OVERLAY = 0x0000_0002;

        /// The entry is allocated but carries no mapping.
        const NOT_USED = 0x0000_0004;
    }
}


/// One decoded block-list entry.
///
/// `original_offset` is the block's position on the original volume,
/// `relative_offset` its position on the store axis, and `offset` the location
/// of the stored contents. For forwarders `offset` is zero and
/// `relative_offset` names where to read in the next store; for overlays
/// `bitmap` holds thirty-two 512-byte presence bits.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BlockDescriptor {
    pub original_offset: u64,
    pub relative_offset: u64,
    pub offset: u64,
    pub flags: BlockFlags,
    pub bitmap: u32,
    pub overlay: Option<Box<BlockDescriptor>>,
}
impl BlockDescriptor {
    pub fn is_forwarder(&self) -> bool {
        self.flags.contains(BlockFlags::IS_FORWARDER)
    }

    pub fn is_overlay(&self) -> bool {
        self.flags.contains(BlockFlags::IS_OVERLAY)
    }

    /// Decodes a 32-byte block-list entry.
    ///
    /// Returns `None` for the all-zero empty-entry sentinel.
    pub fn read_data(data: &[u8]) -> Result<Option<Self>, Error> {
        if data.len() < BLOCK_LIST_ENTRY_SIZE {
            return Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        if data[..BLOCK_LIST_ENTRY_SIZE].iter().all(|b| *b == 0x00) {
            return Ok(None);
        }

        let original_offset = u64::from_le_bytes(data[0..8].try_into().unwrap());
        let relative_offset = u64::from_le_bytes(data[8..16].try_into().unwrap());
        let offset = u64::from_le_bytes(data[16..24].try_into().unwrap());
        let flags = BlockFlags::from_bits_retain(u32::from_le_bytes(data[24..28].try_into().unwrap()));
        let bitmap = u32::from_le_bytes(data[28..32].try_into().unwrap());

        debug!(
            original_offset, relative_offset, offset, flags = flags.bits(), bitmap,
            "block list entry",
        );

        if flags.contains(BlockFlags::IS_FORWARDER) && offset != 0 {
            return Err(Error::UnsupportedFormat { reason: "forwarder block descriptor with nonzero store offset" });
        }

        Ok(Some(Self {
            original_offset,
            relative_offset,
            offset,
            flags,
            bitmap,
            overlay: None,
        }))
    }
}


/// One decoded 24-byte block-range entry.
///
/// These are recorded for completeness; nothing consumes them yet.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BlockRangeDescriptor {
    pub offset: u64,
    pub relative_offset: u64,
    pub size: u64,
}
impl BlockRangeDescriptor {
    /// Decodes a 24-byte block-range entry; `None` for the all-zero sentinel.
    pub fn read_data(data: &[u8]) -> Result<Option<Self>, Error> {
        if data.len() < BLOCK_RANGE_LIST_ENTRY_SIZE {
            return Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        if data[..BLOCK_RANGE_LIST_ENTRY_SIZE].iter().all(|b| *b == 0x00) {
            return Ok(None);
        }

        let offset = u64::from_le_bytes(data[0..8].try_into().unwrap());
        let relative_offset = u64::from_le_bytes(data[8..16].try_into().unwrap());
        let size = u64::from_le_bytes(data[16..24].try_into().unwrap());

        debug!(offset, relative_offset, size, "block range entry");

        Ok(Some(Self {
            offset,
            relative_offset,
            size,
        }))
    }
}
