use super::ReadAt;
use crate::Result;
use async_trait::async_trait;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::RwLock;

/// Local file reader with random access support
pub struct LocalFileReader {
    file: RwLock<Option<File>>,
    size: u64,
}

impl LocalFileReader {
    pub fn new(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: RwLock::new(Some(file)),
            size,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.file.read().map(|f| f.is_none()).unwrap_or(true)
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "file handle already closed")
}

#[async_trait]
impl ReadAt for LocalFileReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let guard = self
            .file
            .read()
            .map_err(|_| io::Error::other("file lock poisoned"))?;
        let file = guard.as_ref().ok_or_else(closed)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            Ok(file.read_at(buf, offset)?)
        }

        #[cfg(windows)]
        {
            // seek_read moves the cursor, which nothing else relies on
            use std::os::windows::fs::FileExt;
            Ok(file.seek_read(buf, offset)?)
        }

        #[cfg(not(any(unix, windows)))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = file;
            file.seek(SeekFrom::Start(offset))?;
            Ok(file.read(buf)?)
        }
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self
            .file
            .write()
            .map_err(|_| io::Error::other("file lock poisoned"))?;
        guard.take();
        Ok(())
    }
}
