use std::io::Cursor;

use byteordered::{ByteOrdered, Endianness};
use bytes::Buf;
use smallvec::{smallvec, SmallVec};

use crate::bbi::{CoordRequest, CIR_TREE_MAGIC};
use crate::cache::ReadCache;
use crate::coalesce::Block;
use crate::error::BlockViewError;
use crate::range::RangeSet;
use crate::read::AbortSignal;

/// Parses the 48-byte header preceding the root node.
///
/// Validates the magic and returns the tree's block size (the maximum entry
/// count per node); the remaining header fields are not needed to traverse.
pub(crate) fn parse_cir_header(data: &[u8], endianness: Endianness) -> Result<u32, BlockViewError> {
    if data.len() < 48 {
        return Err(BlockViewError::InvalidFile(
            "cir tree header is truncated".to_string(),
        ));
    }
    let mut data = &data[..];
    let (magic, block_size) = match endianness {
        Endianness::Big => (data.get_u32(), data.get_u32()),
        Endianness::Little => (data.get_u32_le(), data.get_u32_le()),
    };
    if magic != CIR_TREE_MAGIC {
        return Err(BlockViewError::InvalidFile(
            "missing cir tree magic".to_string(),
        ));
    }
    Ok(block_size)
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct CirLeafEntry {
    start_chrom_ix: u32,
    start_base: u32,
    end_chrom_ix: u32,
    end_base: u32,
    data_offset: u64,
    data_size: u64,
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct CirInternalEntry {
    start_chrom_ix: u32,
    start_base: u32,
    end_chrom_ix: u32,
    end_base: u32,
    child_offset: u64,
}

pub(crate) enum CirNode {
    Leaf(Vec<CirLeafEntry>),
    Internal(Vec<CirInternalEntry>),
}

fn truncated(_: std::io::Error) -> BlockViewError {
    BlockViewError::InvalidFile("cir tree node is truncated".to_string())
}

/// Parses one node at the start of `data`. Trailing bytes are ignored: node
/// buffers are sliced out of fetches sized for a full node.
pub(crate) fn parse_node(data: &[u8], endianness: Endianness) -> Result<CirNode, BlockViewError> {
    let mut reader = ByteOrdered::runtime(Cursor::new(data), endianness);
    let isleaf = reader.read_u8().map_err(truncated)?;
    let _reserved = reader.read_u8().map_err(truncated)?;
    let count = reader.read_u16().map_err(truncated)?;

    match isleaf {
        1 => {
            let mut entries = Vec::with_capacity(count as usize);
            for _ in 0..count {
                entries.push(CirLeafEntry {
                    start_chrom_ix: reader.read_u32().map_err(truncated)?,
                    start_base: reader.read_u32().map_err(truncated)?,
                    end_chrom_ix: reader.read_u32().map_err(truncated)?,
                    end_base: reader.read_u32().map_err(truncated)?,
                    data_offset: reader.read_u64().map_err(truncated)?,
                    data_size: reader.read_u64().map_err(truncated)?,
                });
            }
            Ok(CirNode::Leaf(entries))
        }
        0 => {
            let mut entries = Vec::with_capacity(count as usize);
            for _ in 0..count {
                entries.push(CirInternalEntry {
                    start_chrom_ix: reader.read_u32().map_err(truncated)?,
                    start_base: reader.read_u32().map_err(truncated)?,
                    end_chrom_ix: reader.read_u32().map_err(truncated)?,
                    end_base: reader.read_u32().map_err(truncated)?,
                    child_offset: reader.read_u64().map_err(truncated)?,
                });
            }
            Ok(CirNode::Internal(entries))
        }
        flag => Err(BlockViewError::InvalidFile(format!(
            "unexpected cir node leaf flag: {}",
            flag
        ))),
    }
}

#[inline]
fn compare_position(chrom1: u32, chrom1_base: u32, chrom2: u32, chrom2_base: u32) -> i8 {
    if chrom1 < chrom2 {
        -1
    } else if chrom1 > chrom2 {
        1
    } else if chrom1_base < chrom2_base {
        -1
    } else if chrom1_base > chrom2_base {
        1
    } else {
        0
    }
}

/// Whether an entry's interval over the ordered `(chromId, base)` space
/// touches `[req.start, req.end]` on `req.chrom_id`.
#[inline]
fn entry_overlaps(
    req: &CoordRequest,
    start_chrom: u32,
    start_base: u32,
    end_chrom: u32,
    end_base: u32,
) -> bool {
    compare_position(req.chrom_id, req.start, end_chrom, end_base) <= 0
        && compare_position(req.chrom_id, req.end, start_chrom, start_base) >= 0
}

fn node_overlapping(
    node: &CirNode,
    req: &CoordRequest,
) -> (SmallVec<[u64; 4]>, SmallVec<[Block; 4]>) {
    match node {
        CirNode::Leaf(entries) => {
            let mut blocks: SmallVec<[_; 4]> = smallvec![];
            for entry in entries {
                if entry_overlaps(
                    req,
                    entry.start_chrom_ix,
                    entry.start_base,
                    entry.end_chrom_ix,
                    entry.end_base,
                ) {
                    blocks.push(Block {
                        offset: entry.data_offset,
                        size: entry.data_size,
                    });
                }
            }
            (smallvec![], blocks)
        }
        CirNode::Internal(entries) => {
            let mut children: SmallVec<[_; 4]> = smallvec![];
            for entry in entries {
                if entry_overlaps(
                    req,
                    entry.start_chrom_ix,
                    entry.start_base,
                    entry.end_chrom_ix,
                    entry.end_base,
                ) {
                    children.push(entry.child_offset);
                }
            }
            (children, smallvec![])
        }
    }
}

/// Walks the cir tree from `root_offset`, pruning by overlap with `req`,
/// and returns the data blocks of every matching leaf entry.
///
/// One round handles one set of sibling node offsets: their byte spans are
/// merged into a minimal `RangeSet`, each merged range is fetched through
/// the cache concurrently, and each node is parsed out of its covering
/// fetch. Child offsets that survive pruning form the next round's set; an
/// empty set ends the walk.
pub(crate) async fn search_cir_tree(
    cache: &ReadCache,
    endianness: Endianness,
    root_offset: u64,
    cir_block_size: u32,
    req: &CoordRequest,
    signal: Option<&AbortSignal>,
) -> Result<Vec<Block>, BlockViewError> {
    // Upper bound on a node: a full leaf.
    let max_node_size = 4 + u64::from(cir_block_size) * 32;
    let mut blocks = Vec::new();
    let mut offsets = vec![root_offset];

    while !offsets.is_empty() {
        let mut spans = RangeSet::singleton(offsets[0], offsets[0] + max_node_size);
        for &offset in &offsets[1..] {
            spans = spans.union(&RangeSet::singleton(offset, offset + max_node_size));
        }

        let fetches = spans
            .ranges()
            .iter()
            .map(|range| cache.get(range.min, range.max - range.min, signal));
        let buffers = futures::future::try_join_all(fetches).await?;

        let mut next_offsets = Vec::new();
        let mut outstanding = offsets.len();
        for (range, buffer) in spans.ranges().iter().zip(&buffers) {
            for &offset in offsets.iter().filter(|&&o| range.min <= o && o <= range.max) {
                let node = parse_node(&buffer[(offset - range.min) as usize..], endianness)?;
                let (children, leaf_blocks) = node_overlapping(&node, req);
                blocks.extend(leaf_blocks);
                next_offsets.extend(children);
                outstanding -= 1;
            }
        }
        if outstanding != 0 {
            return Err(BlockViewError::TraversalIncomplete);
        }
        offsets = next_offsets;
    }

    Ok(blocks)
}
