/*!
bbiview is the block-level query engine of a bigWig / bigBed reader: given
an opened file's layout facts and a coordinate request, it walks the on-disk
cir tree index, coalesces the matching data blocks into a small number of
larger reads, decodes each block, and streams the overlapping features to a
caller-supplied observer.

The original file format specification for bigWig and bigBed files is
defined in this paper: <https://doi.org/10.1093/bioinformatics/btq351>

Header parsing is deliberately out of scope: the caller opens the file,
reads the magic, endianness, compression flag and chromosome tree, and hands
the relevant facts to a [`BlockView`] as a [`BlockViewInfo`] (one per
indexed data section, so a file with zoom levels gets one view per level,
all sharing one [`ReadCache`]).

## Example

```no_run
# use std::collections::HashMap;
# use std::sync::Arc;
# use bbiview::{BlockKind, BlockView, BlockViewInfo, Endianness, FeatureCollector, FileByteReader, ReadOpts};
# #[tokio::main(flavor = "current_thread")]
# async fn main() -> Result<(), Box<dyn std::error::Error>> {
let reader = Arc::new(FileByteReader::open("example.bigWig").await?);
let view = BlockView::new(
    reader,
    BlockViewInfo {
        cir_tree_offset: 1234,
        cir_tree_length: 5678,
        endianness: Endianness::Little,
        compressed: true,
        kind: BlockKind::BigWig,
        refs_by_name: HashMap::from([("chr17".to_string(), 0)]),
    },
)?;

let observer = FeatureCollector::new();
view.read_wig_data("chr17", 0, 59899, &observer, &ReadOpts::default())
    .await;
assert!(observer.is_completed());
# Ok(())
# }
```
*/

mod bbi;
mod cache;
mod cirtree;
mod coalesce;
mod decode;
mod error;
mod range;
mod read;
mod view;

pub use byteordered::Endianness;

pub use bbi::{BlockKind, CoordRequest, Feature};
pub use cache::ReadCache;
pub use coalesce::{Block, BlockGroup};
pub use error::BlockViewError;
pub use range::{EmptyIntersection, Range, RangeSet};
pub use read::{AbortHandle, AbortSignal, ByteReader, FileByteReader, MemoryByteReader};
pub use view::{BlockView, BlockViewInfo, FeatureCollector, Observer, ReadOpts};
