//! Local staging of whole objects.
//!
//! Content is always transferred whole, so reads and writes stage the full
//! object in a temporary file and work on byte ranges there. The file is
//! removed when the [`StagedObject`] is dropped, whatever path the caller
//! leaves by.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use tempfile::{Builder, NamedTempFile};

const STAGING_PREFIX: &str = ".tgfs-stage-";

/// Where staged objects are created
#[derive(Debug, Clone, Default)]
pub struct StagingArea {
    dir: Option<PathBuf>,
}

impl StagingArea {
    /// `None` stages in the system temp directory.
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// Stage `initial` as the starting content of a new temporary file.
    pub fn stage(&self, initial: &[u8]) -> io::Result<StagedObject> {
        let mut builder = Builder::new();
        builder.prefix(STAGING_PREFIX);
        let mut file = match &self.dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                builder.tempfile_in(dir)?
            }
            None => builder.tempfile()?,
        };
        file.write_all(initial)?;
        file.flush()?;
        Ok(StagedObject { file })
    }
}

/// A whole object held in a temporary file
#[derive(Debug)]
pub struct StagedObject {
    file: NamedTempFile,
}

impl StagedObject {
    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.as_file().metadata()?.len())
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Copy up to `buf.len()` bytes starting at `offset`. Returns the count.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let file = self.file.as_file_mut();
        file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    /// Write `data` at `offset`. A gap past the current end reads as zeros.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let len = self.len()?;
        if offset > len {
            self.file.as_file().set_len(offset)?;
        }
        let file = self.file.as_file_mut();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()
    }

    /// Shrink or zero-extend to `size` bytes.
    pub fn set_len(&mut self, size: u64) -> io::Result<()> {
        self.file.as_file().set_len(size)
    }

    /// The full staged content.
    pub fn contents(&mut self) -> io::Result<Vec<u8>> {
        let file = self.file.as_file_mut();
        file.seek(SeekFrom::Start(0))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }
}
