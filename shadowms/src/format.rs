//! On-disk record layouts of the shadow-copy storage area.
//!
//! All integers are little-endian. The volume header sits in the NTFS volume's
//! reserved sectors; everything else lives in 16 KiB blocks that open with a
//! 128-byte header carrying the same identifier GUID.


use bitflags::bitflags;
use display_guid::Guid;
use from_to_repr::from_to_other;
use tracing::debug;

use crate::error::Error;


/// Identifier GUID shared by all shadow-copy on-disk records.
pub const VSS_IDENTIFIER: [u8; 16] = [
    0x6B, 0x87, 0x08, 0x38, 0x76, 0xC1, 0x48, 0x4E,
    0xB7, 0xAE, 0x04, 0x04, 0x6E, 0x6C, 0xC7, 0x52,
];

/// Size of every catalog and store block, and of one mapped volume block.
pub const BLOCK_SIZE: u64 = 0x4000;

pub const VOLUME_HEADER_SIZE: usize = 512;
pub const BLOCK_HEADER_SIZE: usize = 128;
pub const CATALOG_ENTRY_SIZE: usize = 128;
pub const BLOCK_LIST_ENTRY_SIZE: usize = 32;
pub const BLOCK_RANGE_LIST_ENTRY_SIZE: usize = 24;


#[derive(Clone, Copy, Debug)]
#[from_to_other(base_type = u32, derive_compare = "as_int")]
pub enum RecordType {
    Catalog = 2,
    StoreHeader = 3,
    VolumeHeader = 4,
    StoreIndex = 5,
    StoreBitmap = 6,
    StoreBlockRange = 7,
    Other(u32),
}


bitflags! {
    /// `VSS_VOLSNAP_ATTR_*` flags carried in the store information record.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    pub struct AttributeFlags : u32 {
        const PERSISTENT = 0x0000_0001;
        const NO_AUTORECOVERY = 0x0000_0002;
        const CLIENT_ACCESSIBLE = 0x0000_0004;
        const NO_AUTO_RELEASE = 0x0000_0008;
        const NO_WRITERS = 0x0000_0010;
        const TRANSPORTABLE = 0x0000_0020;
        const NOT_SURFACED = 0x0000_0040;
        const NOT_TRANSACTED = 0x0000_0080;
        const HARDWARE_ASSISTED = 0x0001_0000;
        const DIFFERENTIAL = 0x0002_0000;
        const PLEX = 0x0004_0000;
        const IMPORTED = 0x0008_0000;
        const EXPOSED_LOCALLY = 0x0010_0000;
        const EXPOSED_REMOTELY = 0x0020_0000;
        const AUTORECOVER = 0x0040_0000;
        const ROLLBACK_RECOVERY = 0x0080_0000;
        const DELAYED_POSTSNAPSHOT = 0x0100_0000;
        const TXF_RECOVERY = 0x0200_0000;
    }
}


/// The 512-byte volume header at the start of the shadow-copy storage area.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct VolumeHeader {
    pub version: u32,
    // record_type: u32 == 4
    pub offset: u64,
    pub catalog_offset: u64,
    pub maximum_size: u64,
    pub volume_identifier: Guid,
    pub store_volume_identifier: Guid,
}
impl VolumeHeader {
    pub fn read_data(data: &[u8]) -> Result<Self, Error> {
        if data.len() < VOLUME_HEADER_SIZE {
            return Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        if data[0..16] != VSS_IDENTIFIER {
            return Err(Error::UnsupportedFormat { reason: "volume header identifier mismatch" });
        }

        let version = u32::from_le_bytes(data[16..20].try_into().unwrap());
        let record_type = RecordType::from_base_type(u32::from_le_bytes(data[20..24].try_into().unwrap()));
        let offset = u64::from_le_bytes(data[24..32].try_into().unwrap());
        // unknown1 at 32, unknown2 at 40
        let catalog_offset = u64::from_le_bytes(data[48..56].try_into().unwrap());
        let maximum_size = u64::from_le_bytes(data[56..64].try_into().unwrap());
        let volume_identifier: Guid = data[64..80].try_into().unwrap();
        let store_volume_identifier: Guid = data[80..96].try_into().unwrap();

        debug!(
            version, ?record_type, catalog_offset, maximum_size,
            %volume_identifier, %store_volume_identifier,
            "volume header",
        );

        if version != 1 && version != 2 {
            return Err(Error::UnsupportedFormat { reason: "unsupported volume header version" });
        }
        if record_type != RecordType::VolumeHeader {
            return Err(Error::UnsupportedFormat { reason: "unsupported volume header record type" });
        }

        Ok(Self {
            version,
            offset,
            catalog_offset,
            maximum_size,
            volume_identifier,
            store_volume_identifier,
        })
    }
}


/// The 128-byte header opening each 16 KiB catalog block.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CatalogHeader {
    pub version: u32,
    pub relative_offset: u64,
    pub offset: u64,
    pub next_offset: u64,
}
impl CatalogHeader {
    pub fn read_data(data: &[u8]) -> Result<Self, Error> {
        if data.len() < BLOCK_HEADER_SIZE {
            return Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        if data[0..16] != VSS_IDENTIFIER {
            return Err(Error::UnsupportedFormat { reason: "catalog header identifier mismatch" });
        }

        let version = u32::from_le_bytes(data[16..20].try_into().unwrap());
        let record_type = RecordType::from_base_type(u32::from_le_bytes(data[20..24].try_into().unwrap()));
        let relative_offset = u64::from_le_bytes(data[24..32].try_into().unwrap());
        let offset = u64::from_le_bytes(data[32..40].try_into().unwrap());
        let next_offset = u64::from_le_bytes(data[40..48].try_into().unwrap());

        debug!(version, ?record_type, relative_offset, offset, next_offset, "catalog header");

        if version != 1 {
            return Err(Error::UnsupportedFormat { reason: "unsupported catalog header version" });
        }
        if record_type != RecordType::Catalog {
            return Err(Error::UnsupportedFormat { reason: "unsupported catalog header record type" });
        }

        Ok(Self {
            version,
            relative_offset,
            offset,
            next_offset,
        })
    }
}


/// One 128-byte catalog entry.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum CatalogEntry {
    /// Entry types 0 and 1; carries no data.
    Padding,

    /// Entry type 2: the identity half of a store definition.
    StoreIdentity {
        volume_size: u64,
        identifier: Guid,
        creation_time: u64,
    },

    /// Entry type 3: the location half of a store definition.
    StoreLocations {
        block_list_offset: u64,
        identifier: Guid,
        store_header_offset: u64,
        block_range_list_offset: u64,
        bitmap_offset: u64,
        previous_bitmap_offset: u64,
    },
}
impl CatalogEntry {
    pub fn read_data(data: &[u8]) -> Result<Self, Error> {
        if data.len() < CATALOG_ENTRY_SIZE {
            return Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }

        let entry_type = u64::from_le_bytes(data[0..8].try_into().unwrap());
        match entry_type {
            0 | 1 => Ok(Self::Padding),
            2 => {
                let volume_size = u64::from_le_bytes(data[8..16].try_into().unwrap());
                let identifier: Guid = data[16..32].try_into().unwrap();
                let creation_time = u64::from_le_bytes(data[48..56].try_into().unwrap());

                debug!(volume_size, %identifier, creation_time, "catalog store identity entry");

                Ok(Self::StoreIdentity {
                    volume_size,
                    identifier,
                    creation_time,
                })
            },
            3 => {
                let block_list_offset = u64::from_le_bytes(data[8..16].try_into().unwrap());
                let identifier: Guid = data[16..32].try_into().unwrap();
                let store_header_offset = u64::from_le_bytes(data[32..40].try_into().unwrap());
                let block_range_list_offset = u64::from_le_bytes(data[40..48].try_into().unwrap());
                let bitmap_offset = u64::from_le_bytes(data[48..56].try_into().unwrap());
                let previous_bitmap_offset = u64::from_le_bytes(data[72..80].try_into().unwrap());

                debug!(
                    %identifier, block_list_offset, store_header_offset,
                    block_range_list_offset, bitmap_offset, previous_bitmap_offset,
                    "catalog store locations entry",
                );

                Ok(Self::StoreLocations {
                    block_list_offset,
                    identifier,
                    store_header_offset,
                    block_range_list_offset,
                    bitmap_offset,
                    previous_bitmap_offset,
                })
            },
            _ => Err(Error::UnsupportedFormat { reason: "unsupported catalog entry type" }),
        }
    }
}


/// The store information payload of a store-header block.
///
/// Follows the 128-byte block header; two length-prefixed UTF-16LE machine
/// strings trail the fixed part.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StoreInformation {
    pub unknown_identifier: Guid,
    pub copy_identifier: Guid,
    pub copy_set_identifier: Guid,
    pub snapshot_type: u32,
    pub provider: u32,
    pub attribute_flags: AttributeFlags,
    pub operating_machine: String,
    pub service_machine: String,
}
impl StoreInformation {
    pub fn read_data(data: &[u8]) -> Result<Self, Error> {
        // fixed part: three GUIDs plus four u32 values
        const FIXED_SIZE: usize = 64;

        if data.len() < FIXED_SIZE {
            return Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }

        let unknown_identifier: Guid = data[0..16].try_into().unwrap();
        let copy_identifier: Guid = data[16..32].try_into().unwrap();
        let copy_set_identifier: Guid = data[32..48].try_into().unwrap();
        let snapshot_type = u32::from_le_bytes(data[48..52].try_into().unwrap());
        let provider = u32::from_le_bytes(data[52..56].try_into().unwrap());
        let attribute_flags = AttributeFlags::from_bits_retain(u32::from_le_bytes(data[56..60].try_into().unwrap()));
        // unknown u32 at 60

        let mut string_offset = FIXED_SIZE;
        let operating_machine = read_sized_utf16le_string(data, &mut string_offset)?;
        let service_machine = read_sized_utf16le_string(data, &mut string_offset)?;

        debug!(
            %copy_identifier, %copy_set_identifier, snapshot_type, provider,
            ?attribute_flags, operating_machine, service_machine,
            "store information",
        );

        Ok(Self {
            unknown_identifier,
            copy_identifier,
            copy_set_identifier,
            snapshot_type,
            provider,
            attribute_flags,
            operating_machine,
            service_machine,
        })
    }
}

/// Reads a u16le byte-length-prefixed UTF-16LE string and advances `offset`.
fn read_sized_utf16le_string(data: &[u8], offset: &mut usize) -> Result<String, Error> {
    let length_end = offset.checked_add(2)
        .filter(|end| *end <= data.len())
        .ok_or(Error::OutOfBounds { reason: "machine string size past end of block" })?;
    let byte_length: usize = u16::from_le_bytes(data[*offset..length_end].try_into().unwrap()).into();

    let string_end = length_end.checked_add(byte_length)
        .filter(|end| *end <= data.len())
        .ok_or(Error::OutOfBounds { reason: "machine string data past end of block" })?;
    let string_bytes = &data[length_end..string_end];
    *offset = string_end;

    let mut words = Vec::with_capacity(string_bytes.len() / 2);
    for word_bytes in string_bytes.chunks_exact(2) {
        words.push(u16::from_le_bytes(word_bytes.try_into().unwrap()));
    }
    Ok(String::from_utf16_lossy(&words))
}
