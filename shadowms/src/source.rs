//! Byte sources the volume reader can run against.
//!
//! Every read names its own absolute offset, so sources must not expose a shared
//! seek cursor. `FileSource` serializes seek+read pairs behind a mutex;
//! `BufferSource` serves from memory and is mostly useful for tests.


use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Error;


pub trait VolumeSource: Send + Sync {
    /// The total size of the source in bytes.
    fn size(&self) -> Result<u64, Error>;

    /// Fills `buf` starting at absolute `offset`. A short read is an error.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<(), Error>;
}


pub struct FileSource {
    file: Mutex<File>,
    size: u64,
}
impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            size,
        })
    }
}
impl VolumeSource for FileSource {
    fn size(&self) -> Result<u64, Error> {
        Ok(self.size)
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<(), Error> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }
}


pub struct BufferSource {
    data: Vec<u8>,
}
impl BufferSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}
impl VolumeSource for BufferSource {
    fn size(&self) -> Result<u64, Error> {
        Ok(self.data.len() as u64)
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<(), Error> {
        let start = usize::try_from(offset)
            .map_err(|_| Error::Argument { reason: "offset exceeds addressable memory" })?;
        let end = start.checked_add(buf.len())
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| Error::Io(std::io::ErrorKind::UnexpectedEof.into()))?;
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }
}


/// Cloneable cancellation handle shared between a volume and its callers.
///
/// Loaders poll the flag between store-block reads and fail with
/// [`Error::Cancelled`] once it is raised.
#[derive(Clone, Debug, Default)]
pub struct AbortFlag {
    raised: std::sync::Arc<AtomicBool>,
}
impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::Relaxed);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Relaxed)
    }

    pub(crate) fn check(&self) -> Result<(), Error> {
        if self.is_raised() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
