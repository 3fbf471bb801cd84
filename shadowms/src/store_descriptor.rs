//! Per-snapshot state and the read engine.
//!
//! A store descriptor is created from its catalog identity entry, gains its
//! metadata offsets from the matching locations entry, and loads its block
//! indexes lazily on first read. Reads that a store cannot satisfy are
//! delegated to the next-newer store; only the store a read was originally
//! issued against consults its own overlay bitmaps and current bitmap.


use std::sync::{Mutex, RwLock};

use display_guid::Guid;
use tracing::debug;

use crate::block_descriptor::{BlockDescriptor, BlockRangeDescriptor};
use crate::block_tree::{BlockTrees, DescriptorId, block_slot};
use crate::error::Error;
use crate::format::{
    BLOCK_LIST_ENTRY_SIZE, BLOCK_RANGE_LIST_ENTRY_SIZE, BLOCK_SIZE, RecordType, StoreInformation,
};
use crate::range_list::RangeList;
use crate::store_block::StoreBlock;
use crate::volume::IoState;


/// Granularity of overlay sub-block bitmaps.
const SUB_BLOCK_SIZE: u64 = 512;
const SUB_BLOCKS_PER_BLOCK: u32 = (BLOCK_SIZE / SUB_BLOCK_SIZE) as u32;


#[derive(Debug)]
pub(crate) enum InformationState {
    NotLoaded,
    Loaded(StoreInformation),
    Failed,
}

pub(crate) enum BlocksState {
    NotLoaded,
    Loaded(LoadedBlocks),
    Failed,
}


pub(crate) struct StoreDescriptor {
    pub index: usize,
    pub volume_size: u64,
    pub identifier: Guid,
    pub creation_time: u64,
    pub has_in_volume_data: bool,
    pub store_header_offset: u64,
    pub block_list_offset: u64,
    pub block_range_list_offset: u64,
    pub bitmap_offset: u64,
    pub previous_bitmap_offset: u64,
    pub information: RwLock<InformationState>,
    blocks: RwLock<BlocksState>,
}
impl StoreDescriptor {
    pub fn from_identity(volume_size: u64, identifier: Guid, creation_time: u64) -> Self {
        Self {
            index: 0,
            volume_size,
            identifier,
            creation_time,
            has_in_volume_data: false,
            store_header_offset: 0,
            block_list_offset: 0,
            block_range_list_offset: 0,
            bitmap_offset: 0,
            previous_bitmap_offset: 0,
            information: RwLock::new(InformationState::NotLoaded),
            blocks: RwLock::new(BlocksState::NotLoaded),
        }
    }

    /// Reads and retains the store information block.
    pub fn read_store_header(&self, io: &IoState) -> Result<(), Error> {
        let mut guard = self.information.write().unwrap();
        if matches!(*guard, InformationState::Loaded(_)) {
            return Ok(());
        }
        let result = StoreBlock::read(io, self.store_header_offset, RecordType::StoreHeader)
            .and_then(|block| StoreInformation::read_data(block.payload()));
        match result {
            Ok(information) => {
                *guard = InformationState::Loaded(information);
                Ok(())
            },
            Err(e) => {
                *guard = InformationState::Failed;
                Err(e)
            },
        }
    }

    pub fn with_information<T, F: FnOnce(&StoreInformation) -> T>(&self, f: F) -> Option<T> {
        let guard = self.information.read().unwrap();
        match &*guard {
            InformationState::Loaded(information) => Some(f(information)),
            _ => None,
        }
    }

    /// Loads the block indexes if they have not been loaded yet.
    ///
    /// Double-checked: a shared-lock peek first, the load itself under the
    /// exclusive lock. A store whose load failed once stays unreadable.
    pub fn ensure_blocks_loaded(&self, io: &IoState) -> Result<(), Error> {
        {
            let guard = self.blocks.read().unwrap();
            match &*guard {
                BlocksState::Loaded(_) => return Ok(()),
                BlocksState::Failed => return Err(Error::State { reason: "store block descriptors failed to load" }),
                BlocksState::NotLoaded => {},
            }
        }

        let mut guard = self.blocks.write().unwrap();
        match &*guard {
            BlocksState::Loaded(_) => return Ok(()),
            BlocksState::Failed => return Err(Error::State { reason: "store block descriptors failed to load" }),
            BlocksState::NotLoaded => {},
        }
        match self.load_blocks(io) {
            Ok(blocks) => {
                *guard = BlocksState::Loaded(blocks);
                Ok(())
            },
            Err(e) => {
                *guard = BlocksState::Failed;
                Err(e)
            },
        }
    }

    pub fn with_blocks<T, F: FnOnce(&LoadedBlocks) -> T>(&self, io: &IoState, f: F) -> Result<T, Error> {
        self.ensure_blocks_loaded(io)?;
        let guard = self.blocks.read().unwrap();
        match &*guard {
            BlocksState::Loaded(blocks) => Ok(f(blocks)),
            _ => Err(Error::State { reason: "store block descriptors failed to load" }),
        }
    }

    fn load_blocks(&self, io: &IoState) -> Result<LoadedBlocks, Error> {
        let mut blocks = LoadedBlocks {
            trees: BlockTrees::new(),
            records: Vec::new(),
            block_ranges: Vec::new(),
            block_offset_list: RangeList::new(),
            previous_block_offset_list: RangeList::new(),
            forward_cache: Mutex::new(None),
            reverse_cache: Mutex::new(None),
        };

        let mut bitmap_cursor = 0;
        let mut chain_offset = self.bitmap_offset;
        while chain_offset != 0 {
            io.check_abort()?;
            chain_offset = self.read_store_bitmap(
                io,
                chain_offset,
                &mut blocks.block_offset_list,
                &mut bitmap_cursor,
            )?;
        }

        bitmap_cursor = 0;
        chain_offset = self.previous_bitmap_offset;
        while chain_offset != 0 {
            io.check_abort()?;
            chain_offset = self.read_store_bitmap(
                io,
                chain_offset,
                &mut blocks.previous_block_offset_list,
                &mut bitmap_cursor,
            )?;
        }

        chain_offset = self.block_list_offset;
        while chain_offset != 0 {
            io.check_abort()?;
            chain_offset = self.read_store_block_list(io, chain_offset, &mut blocks)?;
        }

        chain_offset = self.block_range_list_offset;
        while chain_offset != 0 {
            io.check_abort()?;
            chain_offset = self.read_store_block_range_list(io, chain_offset, &mut blocks)?;
        }

        debug!(
            store = self.index,
            descriptors = blocks.records.len(),
            bitmap_runs = blocks.block_offset_list.len(),
            previous_bitmap_runs = blocks.previous_block_offset_list.len(),
            block_ranges = blocks.block_ranges.len(),
            "store block descriptors loaded",
        );

        Ok(blocks)
    }

    /// Reads one bitmap block, emitting set-bit runs into `offset_list`.
    ///
    /// The cursor advances one block per bit and carries across chained bitmap
    /// blocks. Returns the next chain offset.
    fn read_store_bitmap(
        &self,
        io: &IoState,
        file_offset: u64,
        offset_list: &mut RangeList,
        bitmap_cursor: &mut u64,
    ) -> Result<u64, Error> {
        let block = StoreBlock::read(io, file_offset, RecordType::StoreBitmap)?;

        let mut run_start: Option<u64> = None;
        for word_bytes in block.payload().chunks_exact(4) {
            let mut word = u32::from_le_bytes(word_bytes.try_into().unwrap());
            for _ in 0..u32::BITS {
                if word & 0x0000_0001 == 0 {
                    if let Some(start) = run_start.take() {
                        offset_list.insert(start, *bitmap_cursor - start);
                    }
                } else if run_start.is_none() {
                    run_start = Some(*bitmap_cursor);
                }
                *bitmap_cursor += BLOCK_SIZE;
                word >>= 1;
            }
        }
        if let Some(start) = run_start {
            offset_list.insert(start, *bitmap_cursor - start);
        }

        Ok(block.next_offset)
    }

    /// Reads one block-list block into the trees and the enumeration list.
    fn read_store_block_list(
        &self,
        io: &IoState,
        file_offset: u64,
        blocks: &mut LoadedBlocks,
    ) -> Result<u64, Error> {
        let block = StoreBlock::read(io, file_offset, RecordType::StoreIndex)?;

        for entry_data in block.payload().chunks_exact(BLOCK_LIST_ENTRY_SIZE) {
            if let Some(descriptor) = BlockDescriptor::read_data(entry_data)? {
                blocks.records.try_reserve(1)?;
                blocks.records.push(descriptor.clone());
                blocks.trees.insert(descriptor)?;
            }
        }

        Ok(block.next_offset)
    }

    /// Reads one block-range-list block; entries are retained but unused.
    fn read_store_block_range_list(
        &self,
        io: &IoState,
        file_offset: u64,
        blocks: &mut LoadedBlocks,
    ) -> Result<u64, Error> {
        let block = StoreBlock::read(io, file_offset, RecordType::StoreBlockRange)?;

        for entry_data in block.payload().chunks_exact(BLOCK_RANGE_LIST_ENTRY_SIZE) {
            if let Some(range) = BlockRangeDescriptor::read_data(entry_data)? {
                blocks.block_ranges.try_reserve(1)?;
                blocks.block_ranges.push(range);
            }
        }

        Ok(block.next_offset)
    }
}


pub(crate) struct LoadedBlocks {
    trees: BlockTrees,
    records: Vec<BlockDescriptor>,
    block_ranges: Vec<BlockRangeDescriptor>,
    block_offset_list: RangeList,
    previous_block_offset_list: RangeList,
    forward_cache: Mutex<Option<DescriptorId>>,
    reverse_cache: Mutex<Option<DescriptorId>>,
}
impl LoadedBlocks {
    pub fn records(&self) -> &[BlockDescriptor] {
        &self.records
    }

    fn cached_forward_lookup(&self, offset: u64) -> Option<DescriptorId> {
        let mut cache = self.forward_cache.lock().unwrap();
        if let Some(id) = *cache {
            if block_slot(self.trees.descriptor(id).original_offset) == block_slot(offset) {
                return Some(id);
            }
        }
        let found = self.trees.forward_lookup(offset);
        if found.is_some() {
            *cache = found;
        }
        found
    }

    fn cached_reverse_lookup(&self, offset: u64) -> Option<DescriptorId> {
        let mut cache = self.reverse_cache.lock().unwrap();
        if let Some(id) = *cache {
            if block_slot(self.trees.descriptor(id).relative_offset) == block_slot(offset) {
                return Some(id);
            }
        }
        let found = self.trees.reverse_lookup(offset);
        if found.is_some() {
            *cache = found;
        }
        found
    }

    /// Resolves `offset` against the forward tree, applying overlay
    /// sub-block runs when this store is the one the read was issued against.
    fn resolve_forward(&self, offset: u64, is_active_store: bool) -> ResolvedRange {
        let relative = offset % BLOCK_SIZE;
        let mut size = BLOCK_SIZE - relative;

        let Some(id) = self.cached_forward_lookup(offset) else {
            return ResolvedRange {
                in_block_descriptor_list: false,
                is_forwarder: false,
                physical_offset: offset,
                size,
            };
        };

        let descriptor = self.trees.descriptor(id);
        let mut in_list = true;
        let mut is_forwarder = descriptor.is_forwarder();
        let mut physical_base = if is_forwarder {
            descriptor.relative_offset
        } else {
            descriptor.offset
        };

        let overlay = if descriptor.is_overlay() {
            Some(descriptor)
        } else {
            descriptor.overlay.as_deref()
        };
        if let Some(overlay) = overlay {
            if !is_active_store {
                // an overlay-only slot does not exist for older stores
                if descriptor.is_overlay() {
                    in_list = false;
                    is_forwarder = false;
                }
            } else {
                let sub_index = (relative / SUB_BLOCK_SIZE) as u32;
                let (in_overlay, run) = overlay_run(overlay.bitmap, sub_index);
                if in_overlay {
                    physical_base = overlay.offset;
                    is_forwarder = false;
                } else if descriptor.is_overlay() {
                    in_list = false;
                    is_forwarder = false;
                }
                size = run.min(size);
            }
        }

        ResolvedRange {
            in_block_descriptor_list: in_list,
            is_forwarder,
            physical_offset: physical_base + relative,
            size,
        }
    }

    /// Reverse-tree and bitmap membership for an unmapped offset.
    fn resolve_reverse(&self, offset: u64, previous_bitmap_absent: bool) -> ReverseResolution {
        let in_reverse_block_descriptor_list = self.cached_reverse_lookup(offset).is_some();
        let in_current_bitmap = self.block_offset_list.contains(offset);
        let in_previous_bitmap = if previous_bitmap_absent {
            true
        } else {
            self.previous_block_offset_list.contains(offset)
        };
        ReverseResolution {
            in_reverse_block_descriptor_list,
            in_current_bitmap,
            in_previous_bitmap,
        }
    }
}


struct ResolvedRange {
    in_block_descriptor_list: bool,
    is_forwarder: bool,
    physical_offset: u64,
    size: u64,
}

struct ReverseResolution {
    in_reverse_block_descriptor_list: bool,
    in_current_bitmap: bool,
    in_previous_bitmap: bool,
}

/// Length in bytes of the homogeneous bit run starting at `sub_index`, and
/// whether that run is of set bits.
fn overlay_run(bitmap: u32, sub_index: u32) -> (bool, u64) {
    let shifted = bitmap >> sub_index;
    let in_overlay = shifted & 0x0000_0001 != 0;
    let mut run = 0;
    let mut bits = shifted;
    for _ in 0..(SUB_BLOCKS_PER_BLOCK - sub_index) {
        if (bits & 0x0000_0001 != 0) != in_overlay {
            break;
        }
        run += SUB_BLOCK_SIZE;
        bits >>= 1;
    }
    (in_overlay, run)
}


/// Fills `buf` with store data starting at `offset`.
///
/// `active_store_index` is the store the read was originally issued against;
/// it stays fixed while unsatisfied ranges are delegated to newer stores.
/// The caller clamps `buf` to the volume size; anything short of filling it
/// completely is an error here.
pub(crate) fn read_store_buffer(
    io: &IoState,
    stores: &[StoreDescriptor],
    store_index: usize,
    buf: &mut [u8],
    offset: u64,
    active_store_index: usize,
) -> Result<(), Error> {
    let descriptor = &stores[store_index];
    if !descriptor.has_in_volume_data {
        return Err(Error::State { reason: "store has no in-volume data" });
    }
    descriptor.ensure_blocks_loaded(io)?;
    let guard = descriptor.blocks.read().unwrap();
    let blocks = match &*guard {
        BlocksState::Loaded(blocks) => blocks,
        _ => return Err(Error::State { reason: "store block descriptors failed to load" }),
    };

    let has_next_store = store_index + 1 < stores.len();
    let is_active_store = store_index == active_store_index;

    let mut buffer_offset = 0;
    let mut offset = offset;
    while buffer_offset < buf.len() {
        io.check_abort()?;

        let range = blocks.resolve_forward(offset, is_active_store);
        let remaining = (buf.len() - buffer_offset) as u64;
        let read_size = remaining.min(range.size) as usize;
        let chunk = &mut buf[buffer_offset..buffer_offset + read_size];

        if range.in_block_descriptor_list {
            if range.is_forwarder && has_next_store {
                if io.verbose {
                    debug!(
                        store = store_index, offset, target = range.physical_offset,
                        "delegating forwarded block range to next store",
                    );
                }
                read_store_buffer(
                    io,
                    stores,
                    store_index + 1,
                    chunk,
                    range.physical_offset,
                    active_store_index,
                )?;
            } else {
                if io.verbose {
                    debug!(
                        store = store_index, offset, physical = range.physical_offset,
                        "reading block range from store data",
                    );
                }
                io.read_at(chunk, range.physical_offset)?;
            }
        } else if has_next_store {
            if io.verbose {
                debug!(store = store_index, offset, "delegating unmapped block range to next store");
            }
            read_store_buffer(
                io,
                stores,
                store_index + 1,
                chunk,
                offset,
                active_store_index,
            )?;
        } else {
            // Only the most recent store consults its own current bitmap.
            let reverse = if is_active_store {
                blocks.resolve_reverse(offset, descriptor.previous_bitmap_offset == 0)
            } else {
                ReverseResolution {
                    in_reverse_block_descriptor_list: false,
                    in_current_bitmap: false,
                    in_previous_bitmap: false,
                }
            };
            if is_active_store
                && !reverse.in_reverse_block_descriptor_list
                && reverse.in_current_bitmap
                && reverse.in_previous_bitmap
            {
                if io.verbose {
                    debug!(store = store_index, offset, "zero-filling unmapped block range");
                }
                chunk.fill(0x00);
            } else {
                if io.verbose {
                    debug!(store = store_index, offset, "reading block range from live volume");
                }
                io.read_at(chunk, offset)?;
            }
        }

        buffer_offset += read_size;
        offset += read_size as u64;
    }

    Ok(())
}
