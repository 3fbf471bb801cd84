//! Windows GUID handling.
//!
//! GUIDs are stored on disk as a 16-byte structure whose first three fields are
//! little-endian integers (u32, u16, u16) while the remaining eight bytes are kept
//! in order. The canonical textual form therefore swaps bytes within the first
//! three groups relative to the byte stream.


use std::array::TryFromSliceError;
use std::fmt;


#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Guid([u8; 16]);
impl Guid {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn is_nil(&self) -> bool {
        self.0.iter().all(|b| *b == 0x00)
    }
}
impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[3], b[2], b[1], b[0],
            b[5], b[4],
            b[7], b[6],
            b[8], b[9],
            b[10], b[11], b[12], b[13], b[14], b[15],
        )
    }
}
impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self)
    }
}
impl From<[u8; 16]> for Guid {
    fn from(value: [u8; 16]) -> Self {
        Self(value)
    }
}
impl From<Guid> for [u8; 16] {
    fn from(value: Guid) -> Self {
        value.0
    }
}
impl TryFrom<&[u8]> for Guid {
    type Error = TryFromSliceError;
    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let buf: [u8; 16] = value.try_into()?;
        Ok(Self(buf))
    }
}
impl AsRef<[u8]> for Guid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
