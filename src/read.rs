use std::io::{self, SeekFrom};
use std::path::Path;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{watch, Mutex};

/// Positional reads against the backing file.
///
/// `read_at` must fill the whole of `buf` starting at `offset`; a short read
/// is an error. Implementations must tolerate concurrent calls.
#[async_trait]
pub trait ByteReader: Send + Sync {
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()>;
}

/// A [`ByteReader`] over a local file.
pub struct FileByteReader {
    file: Mutex<File>,
}

impl FileByteReader {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<FileByteReader> {
        Ok(FileByteReader {
            file: Mutex::new(File::open(path).await?),
        })
    }
}

#[async_trait]
impl ByteReader for FileByteReader {
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(buf).await?;
        Ok(())
    }
}

/// A [`ByteReader`] over an in-memory buffer.
pub struct MemoryByteReader {
    data: Vec<u8>,
}

impl MemoryByteReader {
    pub fn new(data: Vec<u8>) -> MemoryByteReader {
        MemoryByteReader { data }
    }
}

#[async_trait]
impl ByteReader for MemoryByteReader {
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let start = usize::try_from(offset)
            .ok()
            .filter(|&s| s <= self.data.len());
        let end = start.and_then(|s| s.checked_add(buf.len()));
        match (start, end) {
            (Some(start), Some(end)) if end <= self.data.len() => {
                buf.copy_from_slice(&self.data[start..end]);
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of buffer",
            )),
        }
    }
}

/// The write half of a cancellation pair.
///
/// Calling [`abort`](AbortHandle::abort) causes every in-progress read
/// holding a matching [`AbortSignal`] to stop at its next suspension point
/// and suppresses all further observer callbacks for queries carrying the
/// signal.
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

/// The read half of a cancellation pair; cheap to clone.
#[derive(Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortHandle {
    pub fn new() -> AbortHandle {
        let (tx, _rx) = watch::channel(false);
        AbortHandle { tx }
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for AbortHandle {
    fn default() -> Self {
        AbortHandle::new()
    }
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the handle aborts. Never resolves if the handle is
    /// dropped without aborting.
    pub(crate) async fn aborted(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
