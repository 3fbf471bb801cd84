//! Synthetic shadow-copy volume images for the integration tests.


use crate::format::VSS_IDENTIFIER;
use crate::source::BufferSource;
use crate::volume::{OpenOptions, Volume};


pub(crate) const VOLUME_HEADER_OFFSET: u64 = 0x1E00;
pub(crate) const CATALOG_OFFSET: u64 = 0x4000;
pub(crate) const MAXIMUM_SIZE: u64 = 0x0640_0000;
pub(crate) const VOLUME_SIZE: u64 = 0x10000;

pub(crate) const STORE_A_IDENTIFIER: [u8; 16] = [0xAA; 16];
pub(crate) const STORE_B_IDENTIFIER: [u8; 16] = [0xBB; 16];
pub(crate) const STORE_A_COPY_IDENTIFIER: [u8; 16] = [0xCA; 16];
pub(crate) const STORE_B_COPY_IDENTIFIER: [u8; 16] = [0xCB; 16];

const CREATION_TIME_A: u64 = 0x01D4_0000_0000_0000;
const CREATION_TIME_B: u64 = 0x01D4_0001_0000_0000;

// two-store image layout
const STORE_A_HEADER: u64 = 0x8000;
const STORE_A_BLOCK_LIST: u64 = 0xC000;
const STORE_A_RANGE_LIST: u64 = 0x10000;
const STORE_A_BITMAP: u64 = 0x14000;
const STORE_A_BLOCK_LIST_2: u64 = 0x18000;
const STORE_B_HEADER: u64 = 0x1C000;
const STORE_B_BLOCK_LIST: u64 = 0x20000;
const STORE_B_RANGE_LIST: u64 = 0x24000;
const STORE_B_BITMAP: u64 = 0x28000;
const STORE_B_PREVIOUS_BITMAP: u64 = 0x2C000;
const STORE_B_BLOCK0_DATA: u64 = 0x30000;
const STORE_B_BLOCK2_DATA: u64 = 0x34000;
const STORE_B_OVERLAY_DATA: u64 = 0x38000;
const STORE_A_BLOCK0_DATA: u64 = 0x3C000;
const STORE_B_BLOCK1_DATA: u64 = 0x40000;
const TWO_STORE_IMAGE_SIZE: usize = 0x44000;

// single-store image layout
const SINGLE_HEADER: u64 = 0x8000;
const SINGLE_BLOCK_LIST: u64 = 0xC000;
const SINGLE_BITMAP: u64 = 0x10000;
const SINGLE_IMAGE_SIZE: usize = 0x14000;


pub(crate) struct TestImage {
    data: Vec<u8>,
}
impl TestImage {
    /// Two chained stores.
    ///
    /// Store A (older) maps block 0 itself, forwards block 1 into store B, and
    /// carries discarded (unused, self-referencing) descriptors in a chained
    /// second block-list block. Store B (newer) maps blocks 0 and 1, maps
    /// block 2 with a primary plus a half-covering overlay, and leaves block 3
    /// to the zero-fill rule via its current and previous bitmaps.
    pub fn two_stores() -> Self {
        let mut data = vec![0u8; TWO_STORE_IMAGE_SIZE];

        write_volume_header(&mut data);

        write_block_header(&mut data, CATALOG_OFFSET, 2, 0);
        let mut entry_offset = (CATALOG_OFFSET + 128) as usize;
        write_identity_entry(&mut data, &mut entry_offset, STORE_A_IDENTIFIER, CREATION_TIME_A);
        write_locations_entry(
            &mut data,
            &mut entry_offset,
            STORE_A_IDENTIFIER,
            STORE_A_BLOCK_LIST,
            STORE_A_HEADER,
            STORE_A_RANGE_LIST,
            STORE_A_BITMAP,
            0,
        );
        write_identity_entry(&mut data, &mut entry_offset, STORE_B_IDENTIFIER, CREATION_TIME_B);
        write_locations_entry(
            &mut data,
            &mut entry_offset,
            STORE_B_IDENTIFIER,
            STORE_B_BLOCK_LIST,
            STORE_B_HEADER,
            STORE_B_RANGE_LIST,
            STORE_B_BITMAP,
            STORE_B_PREVIOUS_BITMAP,
        );

        write_store_header_block(&mut data, STORE_A_HEADER, STORE_A_COPY_IDENTIFIER, [0xDA; 16]);
        write_store_header_block(&mut data, STORE_B_HEADER, STORE_B_COPY_IDENTIFIER, [0xDB; 16]);

        // store A block list, spread over two chained blocks
        write_block_header(&mut data, STORE_A_BLOCK_LIST, 5, STORE_A_BLOCK_LIST_2);
        let mut list_offset = (STORE_A_BLOCK_LIST + 128) as usize;
        write_block_list_entry(&mut data, &mut list_offset, 0x0000, 0x0000, STORE_A_BLOCK0_DATA, 0x0, 0);
        write_block_list_entry(&mut data, &mut list_offset, 0x4000, 0x0000, 0, 0x1, 0);
        write_block_header(&mut data, STORE_A_BLOCK_LIST_2, 5, 0);
        let mut list_offset = (STORE_A_BLOCK_LIST_2 + 128) as usize;
        write_block_list_entry(&mut data, &mut list_offset, 0x8000, 0x0123, 0x4000, 0x4, 0);
        write_block_list_entry(&mut data, &mut list_offset, 0xC000, 0xC000, 0, 0x1, 0);

        // store A block range list, one entry
        write_block_header(&mut data, STORE_A_RANGE_LIST, 7, 0);
        let range_offset = (STORE_A_RANGE_LIST + 128) as usize;
        data[range_offset..range_offset + 8].copy_from_slice(&0x4000u64.to_le_bytes());
        data[range_offset + 16..range_offset + 24].copy_from_slice(&0x8000u64.to_le_bytes());

        // store A current bitmap: blocks 0-3
        write_block_header(&mut data, STORE_A_BITMAP, 6, 0);
        let bitmap_offset = (STORE_A_BITMAP + 128) as usize;
        data[bitmap_offset..bitmap_offset + 4].copy_from_slice(&0x0000_000Fu32.to_le_bytes());

        // store B block list
        write_block_header(&mut data, STORE_B_BLOCK_LIST, 5, 0);
        let mut list_offset = (STORE_B_BLOCK_LIST + 128) as usize;
        write_block_list_entry(&mut data, &mut list_offset, 0x0000, 0x0000, STORE_B_BLOCK0_DATA, 0x0, 0);
        write_block_list_entry(&mut data, &mut list_offset, 0x4000, 0x4000, STORE_B_BLOCK1_DATA, 0x0, 0);
        write_block_list_entry(&mut data, &mut list_offset, 0x8000, 0x8000, STORE_B_BLOCK2_DATA, 0x0, 0);
        write_block_list_entry(&mut data, &mut list_offset, 0x8000, 0x0001, STORE_B_OVERLAY_DATA, 0x2, 0x0000_FFFF);

        // store B block range list: empty
        write_block_header(&mut data, STORE_B_RANGE_LIST, 7, 0);

        // store B current bitmap: blocks 0-3; previous bitmap: block 3
        write_block_header(&mut data, STORE_B_BITMAP, 6, 0);
        let bitmap_offset = (STORE_B_BITMAP + 128) as usize;
        data[bitmap_offset..bitmap_offset + 4].copy_from_slice(&0x0000_000Fu32.to_le_bytes());
        write_block_header(&mut data, STORE_B_PREVIOUS_BITMAP, 6, 0);
        let bitmap_offset = (STORE_B_PREVIOUS_BITMAP + 128) as usize;
        data[bitmap_offset..bitmap_offset + 4].copy_from_slice(&0x0000_0008u32.to_le_bytes());

        fill(&mut data, STORE_B_BLOCK0_DATA, 0x4000, 0xB0);
        fill(&mut data, STORE_B_BLOCK2_DATA, 0x4000, 0xB2);
        fill(&mut data, STORE_B_OVERLAY_DATA, 0x4000, 0xE2);
        fill(&mut data, STORE_A_BLOCK0_DATA, 0x4000, 0xA0);
        fill(&mut data, STORE_B_BLOCK1_DATA, 0x4000, 0xB1);

        Self { data }
    }

    /// One store exercising the newest-store fallbacks: a forwarder without a
    /// newer store, a reverse-tree hit, and the previous-bitmap-absent
    /// zero-fill rule.
    pub fn single_store() -> Self {
        let mut data = vec![0u8; SINGLE_IMAGE_SIZE];

        write_volume_header(&mut data);

        write_block_header(&mut data, CATALOG_OFFSET, 2, 0);
        let mut entry_offset = (CATALOG_OFFSET + 128) as usize;
        write_identity_entry(&mut data, &mut entry_offset, STORE_A_IDENTIFIER, CREATION_TIME_A);
        write_locations_entry(
            &mut data,
            &mut entry_offset,
            STORE_A_IDENTIFIER,
            SINGLE_BLOCK_LIST,
            SINGLE_HEADER,
            0,
            SINGLE_BITMAP,
            0,
        );

        write_store_header_block(&mut data, SINGLE_HEADER, STORE_A_COPY_IDENTIFIER, [0xDA; 16]);

        write_block_header(&mut data, SINGLE_BLOCK_LIST, 5, 0);
        let mut list_offset = (SINGLE_BLOCK_LIST + 128) as usize;
        write_block_list_entry(&mut data, &mut list_offset, 0x4000, 0x8000, 0, 0x1, 0);

        // current bitmap: block 3 only
        write_block_header(&mut data, SINGLE_BITMAP, 6, 0);
        let bitmap_offset = (SINGLE_BITMAP + 128) as usize;
        data[bitmap_offset..bitmap_offset + 4].copy_from_slice(&0x0000_0008u32.to_le_bytes());

        Self { data }
    }

    /// A catalog with an identity entry but no locations entry.
    pub fn dataless_store() -> Self {
        let mut data = vec![0u8; 0x8000];

        write_volume_header(&mut data);

        write_block_header(&mut data, CATALOG_OFFSET, 2, 0);
        let mut entry_offset = (CATALOG_OFFSET + 128) as usize;
        write_identity_entry(&mut data, &mut entry_offset, STORE_A_IDENTIFIER, CREATION_TIME_A);

        Self { data }
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}


pub(crate) fn open_volume(data: Vec<u8>) -> Volume {
    Volume::open(BufferSource::new(data), VOLUME_HEADER_OFFSET, OpenOptions::default())
        .expect("failed to open test volume")
}

pub(crate) fn open_two_store_volume() -> Volume {
    open_volume(TestImage::two_stores().build())
}


fn write_volume_header(data: &mut [u8]) {
    let base = VOLUME_HEADER_OFFSET as usize;
    data[base..base + 16].copy_from_slice(&VSS_IDENTIFIER);
    data[base + 16..base + 20].copy_from_slice(&1u32.to_le_bytes());
    data[base + 20..base + 24].copy_from_slice(&4u32.to_le_bytes());
    data[base + 48..base + 56].copy_from_slice(&CATALOG_OFFSET.to_le_bytes());
    data[base + 56..base + 64].copy_from_slice(&MAXIMUM_SIZE.to_le_bytes());
    data[base + 64..base + 80].copy_from_slice(&[0x11; 16]);
    data[base + 80..base + 96].copy_from_slice(&[0x22; 16]);
}

fn write_block_header(data: &mut [u8], offset: u64, record_type: u32, next_offset: u64) {
    let base = offset as usize;
    data[base..base + 16].copy_from_slice(&VSS_IDENTIFIER);
    data[base + 16..base + 20].copy_from_slice(&1u32.to_le_bytes());
    data[base + 20..base + 24].copy_from_slice(&record_type.to_le_bytes());
    data[base + 32..base + 40].copy_from_slice(&offset.to_le_bytes());
    data[base + 40..base + 48].copy_from_slice(&next_offset.to_le_bytes());
}

fn write_identity_entry(data: &mut [u8], offset: &mut usize, identifier: [u8; 16], creation_time: u64) {
    let base = *offset;
    data[base..base + 8].copy_from_slice(&2u64.to_le_bytes());
    data[base + 8..base + 16].copy_from_slice(&VOLUME_SIZE.to_le_bytes());
    data[base + 16..base + 32].copy_from_slice(&identifier);
    data[base + 48..base + 56].copy_from_slice(&creation_time.to_le_bytes());
    *offset += 128;
}

fn write_locations_entry(
    data: &mut [u8],
    offset: &mut usize,
    identifier: [u8; 16],
    block_list_offset: u64,
    store_header_offset: u64,
    block_range_list_offset: u64,
    bitmap_offset: u64,
    previous_bitmap_offset: u64,
) {
    let base = *offset;
    data[base..base + 8].copy_from_slice(&3u64.to_le_bytes());
    data[base + 8..base + 16].copy_from_slice(&block_list_offset.to_le_bytes());
    data[base + 16..base + 32].copy_from_slice(&identifier);
    data[base + 32..base + 40].copy_from_slice(&store_header_offset.to_le_bytes());
    data[base + 40..base + 48].copy_from_slice(&block_range_list_offset.to_le_bytes());
    data[base + 48..base + 56].copy_from_slice(&bitmap_offset.to_le_bytes());
    data[base + 72..base + 80].copy_from_slice(&previous_bitmap_offset.to_le_bytes());
    *offset += 128;
}

fn write_store_header_block(data: &mut [u8], offset: u64, copy_identifier: [u8; 16], copy_set_identifier: [u8; 16]) {
    write_block_header(data, offset, 3, 0);

    let machine: Vec<u8> = "victim-pc"
        .encode_utf16()
        .flat_map(|word| word.to_le_bytes())
        .collect();

    let base = offset as usize + 128;
    data[base + 16..base + 32].copy_from_slice(&copy_identifier);
    data[base + 32..base + 48].copy_from_slice(&copy_set_identifier);
    data[base + 48..base + 52].copy_from_slice(&5u32.to_le_bytes());
    data[base + 52..base + 56].copy_from_slice(&1u32.to_le_bytes());
    data[base + 56..base + 60].copy_from_slice(&0x0002_000Du32.to_le_bytes());

    let mut string_offset = base + 64;
    for _ in 0..2 {
        let length = machine.len() as u16;
        data[string_offset..string_offset + 2].copy_from_slice(&length.to_le_bytes());
        string_offset += 2;
        data[string_offset..string_offset + machine.len()].copy_from_slice(&machine);
        string_offset += machine.len();
    }
}

fn write_block_list_entry(
    data: &mut [u8],
    offset: &mut usize,
    original_offset: u64,
    relative_offset: u64,
    store_offset: u64,
    flags: u32,
    bitmap: u32,
) {
    let base = *offset;
    data[base..base + 8].copy_from_slice(&original_offset.to_le_bytes());
    data[base + 8..base + 16].copy_from_slice(&relative_offset.to_le_bytes());
    data[base + 16..base + 24].copy_from_slice(&store_offset.to_le_bytes());
    data[base + 24..base + 28].copy_from_slice(&flags.to_le_bytes());
    data[base + 28..base + 32].copy_from_slice(&bitmap.to_le_bytes());
    *offset += 32;
}

fn fill(data: &mut [u8], offset: u64, length: usize, value: u8) {
    let base = offset as usize;
    data[base..base + length].fill(value);
}
