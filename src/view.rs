use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex};

use byteordered::Endianness;
use flate2::read::ZlibDecoder;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::OnceCell;

use crate::bbi::{BlockKind, CoordRequest, Feature};
use crate::cache::ReadCache;
use crate::cirtree::{parse_cir_header, search_cir_tree};
use crate::coalesce::{group_blocks, Block, BlockGroup};
use crate::decode::decode_block;
use crate::error::BlockViewError;
use crate::read::{AbortSignal, ByteReader};

/// Layout facts the external file header supplies about one indexed data
/// section (the full data or one zoom level).
#[derive(Clone, Debug)]
pub struct BlockViewInfo {
    pub cir_tree_offset: u64,
    pub cir_tree_length: u64,
    pub endianness: Endianness,
    pub compressed: bool,
    pub kind: BlockKind,
    pub refs_by_name: HashMap<String, u32>,
}

/// Push consumer of query results.
///
/// `next` is called once per decoded block, in no particular order between
/// blocks; within a block, features keep their on-disk order. Exactly one
/// terminal call (`complete` or `error`) is made per query, unless the query
/// is cancelled, in which case no further calls are made at all.
pub trait Observer: Send + Sync {
    fn next(&self, features: Vec<Feature>);
    fn complete(&self);
    fn error(&self, error: BlockViewError);
}

/// Per-query options.
#[derive(Clone, Default)]
pub struct ReadOpts {
    pub signal: Option<AbortSignal>,
}

/// The block-view query engine over one indexed data section.
///
/// Drives the cir tree traversal, groups the matching data blocks into
/// coalesced fetches, decodes each block, and streams feature batches to
/// the caller's [`Observer`].
pub struct BlockView {
    info: BlockViewInfo,
    cache: Arc<ReadCache>,
    cir_block_size: OnceCell<u32>,
}

impl BlockView {
    pub fn new(reader: Arc<dyn ByteReader>, info: BlockViewInfo) -> Result<BlockView, BlockViewError> {
        BlockView::with_cache(Arc::new(ReadCache::new(reader)), info)
    }

    /// Builds a view sharing `cache` with other views over the same file,
    /// e.g. one per zoom level.
    pub fn with_cache(
        cache: Arc<ReadCache>,
        info: BlockViewInfo,
    ) -> Result<BlockView, BlockViewError> {
        if info.cir_tree_length == 0 {
            return Err(BlockViewError::InvalidArgument(
                "cir tree length must be nonzero".to_string(),
            ));
        }
        Ok(BlockView {
            info,
            cache,
            cir_block_size: OnceCell::new(),
        })
    }

    /// Streams every feature overlapping `[start, end)` on `ref_name` to
    /// `observer`.
    ///
    /// An unknown `ref_name` completes immediately with no features. Errors
    /// after query start arrive through `observer.error`; cancellation via
    /// `opts.signal` suppresses all further callbacks instead.
    pub async fn read_wig_data(
        &self,
        ref_name: &str,
        start: u32,
        end: u32,
        observer: &dyn Observer,
        opts: &ReadOpts,
    ) {
        let signal = opts.signal.as_ref();
        match self.run_query(ref_name, start, end, observer, signal).await {
            Ok(()) => {}
            Err(BlockViewError::Cancelled) => {}
            Err(e) => observer.error(e),
        }
    }

    async fn run_query(
        &self,
        ref_name: &str,
        start: u32,
        end: u32,
        observer: &dyn Observer,
        signal: Option<&AbortSignal>,
    ) -> Result<(), BlockViewError> {
        if signal.map_or(false, |s| s.is_aborted()) {
            return Err(BlockViewError::Cancelled);
        }
        let chrom_id = match self.info.refs_by_name.get(ref_name) {
            Some(&chrom_id) => chrom_id,
            None => {
                observer.complete();
                return Ok(());
            }
        };
        let req = CoordRequest {
            chrom_id,
            start,
            end,
        };

        let cir_block_size = *self
            .cir_block_size
            .get_or_try_init(|| async {
                let header = self.cache.get(self.info.cir_tree_offset, 48, signal).await?;
                parse_cir_header(&header, self.info.endianness)
            })
            .await?;

        let blocks = search_cir_tree(
            &self.cache,
            self.info.endianness,
            self.info.cir_tree_offset + 48,
            cir_block_size,
            &req,
            signal,
        )
        .await?;

        self.read_features(blocks, &req, observer, signal).await
    }

    async fn read_features(
        &self,
        blocks: Vec<Block>,
        req: &CoordRequest,
        observer: &dyn Observer,
        signal: Option<&AbortSignal>,
    ) -> Result<(), BlockViewError> {
        let cache = &self.cache;
        let mut fetches: FuturesUnordered<_> = group_blocks(blocks)
            .into_iter()
            .map(|group| async move {
                let data = cache.get(group.offset, group.size, signal).await?;
                Ok::<(BlockGroup, Arc<Vec<u8>>), BlockViewError>((group, data))
            })
            .collect();

        while let Some(fetched) = fetches.next().await {
            let (group, data) = fetched?;
            for block in &group.blocks {
                if signal.map_or(false, |s| s.is_aborted()) {
                    return Err(BlockViewError::Cancelled);
                }
                let offset = (block.offset - group.offset) as usize;
                let end = offset + block.size as usize;
                if end > data.len() {
                    return Err(BlockViewError::InvalidFile(
                        "data block overruns its group".to_string(),
                    ));
                }
                let raw = &data[offset..end];
                let features = if self.info.compressed {
                    let inflated = inflate(raw)?;
                    decode_block(
                        self.info.kind,
                        &inflated,
                        block.offset,
                        self.info.endianness,
                        req,
                    )?
                } else {
                    decode_block(self.info.kind, raw, block.offset, self.info.endianness, req)?
                };
                observer.next(features);
            }
        }

        if signal.map_or(false, |s| s.is_aborted()) {
            return Err(BlockViewError::Cancelled);
        }
        observer.complete();
        Ok(())
    }
}

/// Inflates one deflate stream; blocks are compressed individually.
fn inflate(data: &[u8]) -> Result<Vec<u8>, BlockViewError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| BlockViewError::Decompression(e.to_string()))?;
    Ok(out)
}

/// An [`Observer`] that buffers every batch and the terminal outcome.
#[derive(Default)]
pub struct FeatureCollector {
    state: Mutex<CollectorState>,
}

#[derive(Default)]
struct CollectorState {
    batches: Vec<Vec<Feature>>,
    completed: bool,
    error: Option<BlockViewError>,
}

impl FeatureCollector {
    pub fn new() -> FeatureCollector {
        FeatureCollector::default()
    }

    /// The batches received so far, one per decoded block.
    pub fn batches(&self) -> Vec<Vec<Feature>> {
        self.state.lock().unwrap().batches.clone()
    }

    /// Every feature received so far, flattened in arrival order.
    pub fn features(&self) -> Vec<Feature> {
        self.state
            .lock()
            .unwrap()
            .batches
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().unwrap().completed
    }

    pub fn failure(&self) -> Option<BlockViewError> {
        self.state.lock().unwrap().error.clone()
    }
}

impl Observer for FeatureCollector {
    fn next(&self, features: Vec<Feature>) {
        self.state.lock().unwrap().batches.push(features);
    }

    fn complete(&self) {
        self.state.lock().unwrap().completed = true;
    }

    fn error(&self, error: BlockViewError) {
        self.state.lock().unwrap().error = Some(error);
    }
}
