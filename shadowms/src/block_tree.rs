//! The per-store block indexes.
//!
//! Each store keeps two associative structures over its block descriptors: the
//! forward tree keyed by original-volume offset and the reverse tree keyed by
//! store-relative offset (forwarders only). A descriptor can be held by one
//! tree, both, or momentarily neither; descriptors live in an arena and are
//! dropped once no tree holds them, so removal from one tree never invalidates
//! the other.


use std::collections::BTreeMap;

use tracing::debug;

use crate::block_descriptor::{BlockDescriptor, BlockFlags};
use crate::error::Error;
use crate::format::BLOCK_SIZE;


pub(crate) type DescriptorId = usize;

/// Truncates an offset to its 16 KiB block slot.
pub(crate) fn block_slot(offset: u64) -> u64 {
    offset & !(BLOCK_SIZE - 1)
}


struct ArenaEntry {
    descriptor: BlockDescriptor,
    in_forward: bool,
    in_reverse: bool,
}


#[derive(Default)]
pub(crate) struct BlockTrees {
    entries: Vec<Option<ArenaEntry>>,
    free: Vec<DescriptorId>,
    forward: BTreeMap<u64, DescriptorId>,
    reverse: BTreeMap<u64, DescriptorId>,
}
impl BlockTrees {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            forward: BTreeMap::new(),
            reverse: BTreeMap::new(),
        }
    }

    fn allocate(&mut self, descriptor: BlockDescriptor) -> Result<DescriptorId, Error> {
        let entry = ArenaEntry {
            descriptor,
            in_forward: false,
            in_reverse: false,
        };
        if let Some(id) = self.free.pop() {
            self.entries[id] = Some(entry);
            Ok(id)
        } else {
            self.entries.try_reserve(1)?;
            self.entries.push(Some(entry));
            Ok(self.entries.len() - 1)
        }
    }

    fn entry(&self, id: DescriptorId) -> &ArenaEntry {
        self.entries[id].as_ref().unwrap()
    }

    fn entry_mut(&mut self, id: DescriptorId) -> &mut ArenaEntry {
        self.entries[id].as_mut().unwrap()
    }

    /// Drops the arena entry once neither tree holds it.
    fn release_if_orphaned(&mut self, id: DescriptorId) {
        let entry = self.entry(id);
        if !entry.in_forward && !entry.in_reverse {
            self.entries[id] = None;
            self.free.push(id);
        }
    }

    /// Removes the entry from the arena unconditionally and returns its descriptor.
    fn take(&mut self, id: DescriptorId) -> BlockDescriptor {
        let entry = self.entries[id].take().unwrap();
        self.free.push(id);
        entry.descriptor
    }

    pub fn descriptor(&self, id: DescriptorId) -> &BlockDescriptor {
        &self.entry(id).descriptor
    }

    /// The descriptor whose original-offset slot contains `offset`.
    pub fn forward_lookup(&self, offset: u64) -> Option<DescriptorId> {
        self.forward.get(&block_slot(offset)).copied()
    }

    /// The forwarder whose relative-offset slot contains `offset`.
    pub fn reverse_lookup(&self, offset: u64) -> Option<DescriptorId> {
        self.reverse.get(&block_slot(offset)).copied()
    }

    /// Ingests one decoded block descriptor.
    ///
    /// Unused descriptors and self-referencing forwarders are discarded; a
    /// colliding forwarder already indexed at this descriptor's original
    /// offset has its chain shortened; overlays at an occupied slot are merged
    /// by bitmap union; anything else replaces the previous occupant.
    pub fn insert(&mut self, descriptor: BlockDescriptor) -> Result<(), Error> {
        if descriptor.flags.contains(BlockFlags::NOT_USED) {
            debug!(original_offset = descriptor.original_offset, "discarding unused block descriptor");
            return Ok(());
        }
        let mut descriptor = descriptor;

        if !descriptor.is_overlay() {
            // An already-indexed forwarder whose target slot is this
            // descriptor's original offset forms a chain; point this
            // descriptor at the chain head and drop the intermediate hop.
            if let Some(existing_id) = self.reverse_lookup(descriptor.original_offset) {
                let existing = self.entry(existing_id);
                let shortened_offset = existing.descriptor.original_offset;
                let existing_slot = block_slot(existing.descriptor.relative_offset);
                debug!(
                    from = descriptor.original_offset, to = shortened_offset,
                    "shortening forwarder chain",
                );
                descriptor.original_offset = shortened_offset;
                self.reverse.remove(&existing_slot);
                self.entry_mut(existing_id).in_reverse = false;
                self.release_if_orphaned(existing_id);
            }
        }

        if descriptor.is_forwarder() && descriptor.original_offset == descriptor.relative_offset {
            debug!(
                original_offset = descriptor.original_offset,
                "discarding self-referencing forwarder",
            );
            return Ok(());
        }

        let forward_key = block_slot(descriptor.original_offset);
        let new_id = match self.forward.get(&forward_key).copied() {
            None => {
                let id = self.allocate(descriptor)?;
                self.forward.insert(forward_key, id);
                self.entry_mut(id).in_forward = true;
                id
            },
            Some(existing_id) => {
                if descriptor.is_overlay() {
                    let existing = &mut self.entry_mut(existing_id).descriptor;
                    if existing.is_overlay() {
                        existing.bitmap |= descriptor.bitmap;
                    } else if let Some(overlay) = existing.overlay.as_mut() {
                        overlay.bitmap |= descriptor.bitmap;
                    } else {
                        existing.overlay = Some(Box::new(descriptor));
                    }
                    return Ok(());
                }

                // replace the existing primary
                self.entry_mut(existing_id).in_forward = false;
                if self.entry(existing_id).descriptor.is_overlay() {
                    // the old primary was itself an overlay; demote it to the
                    // overlay of the new primary
                    if self.entry(existing_id).descriptor.overlay.is_some() {
                        return Err(Error::UnsupportedFormat { reason: "overlay block descriptor carries an overlay" });
                    }
                    let demoted = self.take(existing_id);
                    descriptor.overlay = Some(Box::new(demoted));
                } else {
                    descriptor.overlay = self.entry_mut(existing_id).descriptor.overlay.take();
                    self.release_if_orphaned(existing_id);
                }

                let id = self.allocate(descriptor)?;
                self.forward.insert(forward_key, id);
                self.entry_mut(id).in_forward = true;
                id
            },
        };

        if self.entry(new_id).descriptor.is_forwarder() {
            let reverse_key = block_slot(self.entry(new_id).descriptor.relative_offset);
            if let Some(replaced_id) = self.reverse.insert(reverse_key, new_id) {
                self.entry_mut(replaced_id).in_reverse = false;
                self.release_if_orphaned(replaced_id);
            }
            self.entry_mut(new_id).in_reverse = true;
        }

        Ok(())
    }

    #[cfg(test)]
    fn forward_len(&self) -> usize {
        self.forward.len()
    }

    #[cfg(test)]
    fn reverse_len(&self) -> usize {
        self.reverse.len()
    }
}
