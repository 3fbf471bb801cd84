//! 16 KiB store blocks: the chained unit all store metadata is stored in.


use tracing::debug;

use crate::error::Error;
use crate::format::{BLOCK_HEADER_SIZE, BLOCK_SIZE, RecordType, VSS_IDENTIFIER};
use crate::volume::IoState;


/// One store block, read in full with its 128-byte header validated.
pub(crate) struct StoreBlock {
    pub version: u32,
    pub record_type: RecordType,
    pub relative_offset: u64,
    pub offset: u64,
    pub next_offset: u64,
    data: Vec<u8>,
}
impl StoreBlock {
    /// Reads the block at `offset` and requires its record type to be `expected`.
    pub fn read(io: &IoState, offset: u64, expected: RecordType) -> Result<Self, Error> {
        let mut data = Vec::new();
        data.try_reserve_exact(BLOCK_SIZE as usize)?;
        data.resize(BLOCK_SIZE as usize, 0x00);
        io.read_at(&mut data, offset)?;

        let block = Self::from_data(data)?;
        if block.record_type != expected {
            debug!(
                offset, record_type = ?block.record_type, ?expected,
                "store block record type mismatch",
            );
            return Err(Error::UnsupportedFormat { reason: "unexpected store block record type" });
        }
        Ok(block)
    }

    fn from_data(data: Vec<u8>) -> Result<Self, Error> {
        if data.len() < BLOCK_HEADER_SIZE {
            return Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        if data[0..16] != VSS_IDENTIFIER {
            return Err(Error::UnsupportedFormat { reason: "store block identifier mismatch" });
        }

        let version = u32::from_le_bytes(data[16..20].try_into().unwrap());
        let record_type = RecordType::from_base_type(u32::from_le_bytes(data[20..24].try_into().unwrap()));
        let relative_offset = u64::from_le_bytes(data[24..32].try_into().unwrap());
        let offset = u64::from_le_bytes(data[32..40].try_into().unwrap());
        let next_offset = u64::from_le_bytes(data[40..48].try_into().unwrap());

        debug!(version, ?record_type, relative_offset, offset, next_offset, "store block header");

        if version != 1 {
            return Err(Error::UnsupportedFormat { reason: "unsupported store block version" });
        }

        Ok(Self {
            version,
            record_type,
            relative_offset,
            offset,
            next_offset,
            data,
        })
    }

    /// The block contents after the 128-byte header.
    pub fn payload(&self) -> &[u8] {
        &self.data[BLOCK_HEADER_SIZE..]
    }
}
