/// A data block referenced by a cir tree leaf.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Block {
    pub offset: u64,
    pub size: u64,
}

/// A run of blocks close enough on disk to fetch with one read.
///
/// Every member lies wholly inside `[offset, offset + size)`, and members
/// appear in ascending offset order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockGroup {
    pub offset: u64,
    pub size: u64,
    pub blocks: Vec<Block>,
}

/// Gaps up to this many bytes are read through rather than split into
/// separate fetches, amortizing per-request overhead of the backing store.
pub(crate) const COALESCE_GAP: u64 = 2048;

/// Sorts blocks by offset and merges near-adjacent ones into grouped reads.
pub(crate) fn group_blocks(mut blocks: Vec<Block>) -> Vec<BlockGroup> {
    blocks.sort_by_key(|block| (block.offset, block.size));
    let mut groups: Vec<BlockGroup> = Vec::new();
    for block in blocks {
        match groups.last_mut() {
            Some(group) if block.offset <= group.offset + group.size + COALESCE_GAP => {
                // A block contained in the group must not shrink it.
                group.size = group.size.max(block.offset + block.size - group.offset);
                group.blocks.push(block);
            }
            _ => groups.push(BlockGroup {
                offset: block.offset,
                size: block.size,
                blocks: vec![block],
            }),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(offset: u64, size: u64) -> Block {
        Block { offset, size }
    }

    #[test]
    fn groups_nearby_blocks_and_splits_distant_ones() {
        let groups = group_blocks(vec![block(1000, 200), block(1300, 100), block(10000, 50)]);
        assert_eq!(
            groups,
            vec![
                BlockGroup {
                    offset: 1000,
                    size: 400,
                    blocks: vec![block(1000, 200), block(1300, 100)],
                },
                BlockGroup {
                    offset: 10000,
                    size: 50,
                    blocks: vec![block(10000, 50)],
                },
            ]
        );
    }

    #[test]
    fn sorts_before_grouping() {
        let groups = group_blocks(vec![block(1300, 100), block(10000, 50), block(1000, 200)]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].blocks, vec![block(1000, 200), block(1300, 100)]);
    }

    #[test]
    fn gap_boundary_is_inclusive() {
        let at_gap = group_blocks(vec![block(0, 100), block(100 + COALESCE_GAP, 10)]);
        assert_eq!(at_gap.len(), 1);
        let past_gap = group_blocks(vec![block(0, 100), block(101 + COALESCE_GAP, 10)]);
        assert_eq!(past_gap.len(), 2);
    }

    #[test]
    fn contained_blocks_do_not_shrink_the_group() {
        let groups = group_blocks(vec![block(0, 1000), block(100, 50)]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].size, 1000);
    }

    #[test]
    fn groups_cover_their_members() {
        let blocks = vec![
            block(5000, 10),
            block(0, 64),
            block(70, 30),
            block(3000, 2000),
            block(5100, 1),
        ];
        let groups = group_blocks(blocks.clone());
        for b in &blocks {
            let group = groups
                .iter()
                .find(|g| g.offset <= b.offset && b.offset + b.size <= g.offset + g.size)
                .unwrap();
            assert!(group.blocks.contains(b));
        }
        for group in &groups {
            let mut covered_end = group.blocks[0].offset + group.blocks[0].size;
            for pair in group.blocks.windows(2) {
                assert!(pair[0].offset <= pair[1].offset);
                // No internal gap wider than the threshold.
                assert!(pair[1].offset <= covered_end + COALESCE_GAP);
                covered_end = covered_end.max(pair[1].offset + pair[1].size);
            }
        }
    }

    #[test]
    fn empty_input_yields_no_groups() {
        assert!(group_blocks(Vec::new()).is_empty());
    }
}
