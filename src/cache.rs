use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::BlockViewError;
use crate::read::{AbortSignal, ByteReader};

/// Byte ranges kept resident per cache.
pub(crate) const READ_CACHE_ENTRIES: usize = 1000;

type Key = (u64, u64);
type FetchResult = Result<Arc<Vec<u8>>, BlockViewError>;

/// A bounded LRU over raw byte ranges of the backing file, keyed on
/// `(offset, length)`.
///
/// Concurrent `get`s for the same range share a single backing read. The
/// read runs as its own task; it is aborted only once every waiter has
/// cancelled or been dropped. A range under fill is held outside the
/// resident map and cannot be evicted.
pub struct ReadCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    reader: Arc<dyn ByteReader>,
    max_entries: usize,
    state: Mutex<CacheState>,
}

#[derive(Default)]
struct CacheState {
    resident: HashMap<Key, ResidentEntry>,
    pending: HashMap<Key, PendingEntry>,
    tick: u64,
}

struct ResidentEntry {
    data: Arc<Vec<u8>>,
    last_used: u64,
}

struct PendingEntry {
    waiters: usize,
    handle: Option<JoinHandle<()>>,
    rx: watch::Receiver<Option<FetchResult>>,
}

impl ReadCache {
    pub fn new(reader: Arc<dyn ByteReader>) -> ReadCache {
        ReadCache::with_capacity(reader, READ_CACHE_ENTRIES)
    }

    pub fn with_capacity(reader: Arc<dyn ByteReader>, max_entries: usize) -> ReadCache {
        ReadCache {
            inner: Arc::new(CacheInner {
                reader,
                max_entries,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Returns the `length` bytes at `offset`, invoking the backing reader
    /// at most once while the range is in flight or resident.
    pub async fn get(
        &self,
        offset: u64,
        length: u64,
        signal: Option<&AbortSignal>,
    ) -> FetchResult {
        if signal.map_or(false, |s| s.is_aborted()) {
            return Err(BlockViewError::Cancelled);
        }

        let key = (offset, length);
        let mut rx = {
            let mut state = self.inner.state.lock().unwrap();
            state.tick += 1;
            let tick = state.tick;
            if let Some(entry) = state.resident.get_mut(&key) {
                entry.last_used = tick;
                return Ok(entry.data.clone());
            }
            match state.pending.get_mut(&key) {
                Some(pending) => {
                    pending.waiters += 1;
                    pending.rx.clone()
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    let handle = tokio::spawn(fill(self.inner.clone(), key, tx));
                    state.pending.insert(
                        key,
                        PendingEntry {
                            waiters: 1,
                            handle: Some(handle),
                            rx: rx.clone(),
                        },
                    );
                    rx
                }
            }
        };

        // Deregisters this waiter if the future is cancelled or dropped
        // before the fill resolves; the last deregistration aborts the fill.
        let mut waiter = Waiter {
            inner: &self.inner,
            key,
            armed: true,
        };

        let outcome = match signal {
            Some(signal) => {
                tokio::select! {
                    changed = rx.wait_for(|result| result.is_some()) => Some(changed),
                    _ = signal.aborted() => None,
                }
            }
            None => Some(rx.wait_for(|result| result.is_some()).await),
        };

        match outcome {
            Some(Ok(result)) => {
                waiter.armed = false;
                (*result).clone().unwrap()
            }
            Some(Err(_)) => {
                waiter.armed = false;
                Err(BlockViewError::IoError(Arc::new(io::Error::new(
                    io::ErrorKind::Other,
                    "backing read stopped before completing",
                ))))
            }
            None => Err(BlockViewError::Cancelled),
        }
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.inner.state.lock().unwrap().pending.len()
    }

    #[cfg(test)]
    fn waiter_count(&self, offset: u64, length: u64) -> usize {
        let state = self.inner.state.lock().unwrap();
        state
            .pending
            .get(&(offset, length))
            .map_or(0, |pending| pending.waiters)
    }

    #[cfg(test)]
    fn resident_len(&self) -> usize {
        self.inner.state.lock().unwrap().resident.len()
    }
}

struct Waiter<'a> {
    inner: &'a Arc<CacheInner>,
    key: Key,
    armed: bool,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let handle = {
            let mut state = self.inner.state.lock().unwrap();
            let mut last = false;
            if let Some(pending) = state.pending.get_mut(&self.key) {
                pending.waiters -= 1;
                last = pending.waiters == 0;
            }
            if last {
                state
                    .pending
                    .remove(&self.key)
                    .and_then(|mut pending| pending.handle.take())
            } else {
                None
            }
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

async fn fill(inner: Arc<CacheInner>, key: Key, tx: watch::Sender<Option<FetchResult>>) {
    let (offset, length) = key;
    let mut buf = vec![0u8; length as usize];
    let result = match inner.reader.read_at(&mut buf, offset).await {
        Ok(()) => Ok(Arc::new(buf)),
        Err(e) => Err(BlockViewError::from(e)),
    };

    {
        let mut state = inner.state.lock().unwrap();
        state.pending.remove(&key);
        if let Ok(data) = &result {
            state.tick += 1;
            let tick = state.tick;
            if state.resident.len() >= inner.max_entries {
                let oldest = state
                    .resident
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_used)
                    .map(|(k, _)| *k);
                if let Some(oldest) = oldest {
                    state.resident.remove(&oldest);
                }
            }
            state.resident.insert(
                key,
                ResidentEntry {
                    data: data.clone(),
                    last_used: tick,
                },
            );
        }
    }

    let _ = tx.send(Some(result));
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::read::{AbortHandle, MemoryByteReader};

    struct CountingReader {
        inner: MemoryByteReader,
        reads: AtomicUsize,
    }

    impl CountingReader {
        fn new(data: Vec<u8>) -> CountingReader {
            CountingReader {
                inner: MemoryByteReader::new(data),
                reads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ByteReader for CountingReader {
        async fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read_at(buf, offset).await
        }
    }

    /// Signals each read, then blocks until released (or forever).
    struct GatedReader {
        inner: MemoryByteReader,
        started: AtomicUsize,
        release: Notify,
    }

    impl GatedReader {
        fn new(data: Vec<u8>) -> GatedReader {
            GatedReader {
                inner: MemoryByteReader::new(data),
                started: AtomicUsize::new(0),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl ByteReader for GatedReader {
        async fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            self.inner.read_at(buf, offset).await
        }
    }

    #[tokio::test]
    async fn resident_ranges_are_read_once() {
        let reader = Arc::new(CountingReader::new((0u8..=255).collect()));
        let cache = ReadCache::new(reader.clone());
        let first = cache.get(8, 4, None).await.unwrap();
        let second = cache.get(8, 4, None).await.unwrap();
        assert_eq!(*first, vec![8, 9, 10, 11]);
        assert_eq!(first, second);
        assert_eq!(reader.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_waiters_share_one_read() {
        let reader = Arc::new(GatedReader::new((0u8..=255).collect()));
        let cache = Arc::new(ReadCache::new(reader.clone()));

        let a = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get(0, 16, None).await }
        });
        let b = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get(0, 16, None).await }
        });

        while reader.started.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        reader.release.notify_waiters();
        reader.release.notify_one();

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(reader.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_lengths_are_distinct_entries() {
        let reader = Arc::new(CountingReader::new((0u8..=255).collect()));
        let cache = ReadCache::new(reader.clone());
        cache.get(0, 4, None).await.unwrap();
        cache.get(0, 8, None).await.unwrap();
        assert_eq!(reader.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn evicts_least_recently_used() {
        let reader = Arc::new(CountingReader::new((0u8..=255).collect()));
        let cache = ReadCache::with_capacity(reader.clone(), 2);
        cache.get(0, 1, None).await.unwrap();
        cache.get(1, 1, None).await.unwrap();
        // Touch (0, 1) so (1, 1) becomes the eviction candidate.
        cache.get(0, 1, None).await.unwrap();
        cache.get(2, 1, None).await.unwrap();
        assert_eq!(cache.resident_len(), 2);

        cache.get(0, 1, None).await.unwrap();
        assert_eq!(reader.reads.load(Ordering::SeqCst), 3);
        cache.get(1, 1, None).await.unwrap();
        assert_eq!(reader.reads.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn read_errors_reach_every_waiter_and_are_not_cached() {
        let reader = Arc::new(CountingReader::new(vec![0u8; 4]));
        let cache = ReadCache::new(reader.clone());
        assert!(cache.get(100, 4, None).await.is_err());
        assert!(cache.get(100, 4, None).await.is_err());
        assert_eq!(reader.reads.load(Ordering::SeqCst), 2);
        assert_eq!(cache.resident_len(), 0);
    }

    #[tokio::test]
    async fn one_cancelled_waiter_does_not_abort_a_shared_fetch() {
        let reader = Arc::new(GatedReader::new((0u8..=255).collect()));
        let cache = Arc::new(ReadCache::new(reader.clone()));
        let handle = AbortHandle::new();
        let signal = handle.signal();

        let cancelled = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get(0, 16, Some(&signal)).await }
        });
        let kept = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get(0, 16, None).await }
        });

        while cache.waiter_count(0, 16) < 2 {
            tokio::task::yield_now().await;
        }
        handle.abort();
        assert!(matches!(
            cancelled.await.unwrap(),
            Err(BlockViewError::Cancelled)
        ));

        reader.release.notify_one();
        assert!(kept.await.unwrap().is_ok());
        assert_eq!(reader.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn last_cancelled_waiter_aborts_the_fetch() {
        let reader = Arc::new(GatedReader::new((0u8..=255).collect()));
        let cache = Arc::new(ReadCache::new(reader.clone()));
        let handle = AbortHandle::new();
        let signal = handle.signal();

        let waiter = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get(0, 16, Some(&signal)).await }
        });

        while reader.started.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        handle.abort();
        assert!(matches!(
            waiter.await.unwrap(),
            Err(BlockViewError::Cancelled)
        ));
        assert_eq!(cache.pending_len(), 0);
        assert_eq!(cache.resident_len(), 0);
    }
}
