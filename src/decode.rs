use std::io::Cursor;

use byteordered::{ByteOrdered, Endianness};

use crate::bbi::{
    BlockKind, CoordRequest, Feature, WIG_TYPE_BED_GRAPH, WIG_TYPE_FIXED_STEP,
    WIG_TYPE_VARIABLE_STEP,
};
use crate::error::BlockViewError;

fn short(what: &'static str) -> impl FnOnce(std::io::Error) -> BlockViewError {
    move |_| BlockViewError::InvalidFile(format!("{} is truncated", what))
}

/// Decodes one (already inflated) data block into the features overlapping
/// `req`. `block_offset` is the block's position in the file; it seeds the
/// bigBed unique ids.
pub(crate) fn decode_block(
    kind: BlockKind,
    data: &[u8],
    block_offset: u64,
    endianness: Endianness,
    req: &CoordRequest,
) -> Result<Vec<Feature>, BlockViewError> {
    match kind {
        BlockKind::Summary => decode_summary_block(data, endianness, req),
        BlockKind::BigWig => decode_bigwig_block(data, endianness, req),
        BlockKind::BigBed => decode_bigbed_block(data, block_offset, endianness, req),
    }
}

/// Summary blocks are a flat run of 32-byte records.
fn decode_summary_block(
    data: &[u8],
    endianness: Endianness,
    req: &CoordRequest,
) -> Result<Vec<Feature>, BlockViewError> {
    if data.len() % 32 != 0 {
        return Err(BlockViewError::InvalidFile(format!(
            "summary block length {} is not a multiple of 32",
            data.len()
        )));
    }
    let count = data.len() / 32;
    let mut reader = ByteOrdered::runtime(Cursor::new(data), endianness);
    let mut features = Vec::with_capacity(count);
    for _ in 0..count {
        let chrom_id = reader.read_u32().map_err(short("summary record"))?;
        let start = reader.read_u32().map_err(short("summary record"))?;
        let end = reader.read_u32().map_err(short("summary record"))?;
        let valid_count = reader.read_u32().map_err(short("summary record"))?;
        let min_score = reader.read_f32().map_err(short("summary record"))?;
        let max_score = reader.read_f32().map_err(short("summary record"))?;
        let sum_data = reader.read_f32().map_err(short("summary record"))?;
        let _sum_squares = reader.read_f32().map_err(short("summary record"))?;

        if chrom_id != req.chrom_id || !req.overlaps(start, end) {
            continue;
        }
        features.push(Feature {
            start,
            end,
            score: sum_data / valid_count.max(1) as f32,
            min_score: Some(min_score),
            max_score: Some(max_score),
            summary: true,
            rest: None,
            unique_id: None,
        });
    }
    Ok(features)
}

/// BigWig blocks carry a 24-byte header and `item_count` items whose shape
/// depends on the section type.
fn decode_bigwig_block(
    data: &[u8],
    endianness: Endianness,
    req: &CoordRequest,
) -> Result<Vec<Feature>, BlockViewError> {
    let mut reader = ByteOrdered::runtime(Cursor::new(data), endianness);
    let chrom_id = reader.read_u32().map_err(short("bigwig block header"))?;
    let block_start = reader.read_u32().map_err(short("bigwig block header"))?;
    let _block_end = reader.read_u32().map_err(short("bigwig block header"))?;
    let item_step = reader.read_u32().map_err(short("bigwig block header"))?;
    let item_span = reader.read_u32().map_err(short("bigwig block header"))?;
    let section_type = reader.read_u8().map_err(short("bigwig block header"))?;
    let _reserved = reader.read_u8().map_err(short("bigwig block header"))?;
    let item_count = reader.read_u16().map_err(short("bigwig block header"))?;

    let mut features = Vec::with_capacity(item_count as usize);
    if chrom_id != req.chrom_id {
        return Ok(features);
    }

    match section_type {
        WIG_TYPE_BED_GRAPH => {
            for _ in 0..item_count {
                let start = reader.read_u32().map_err(short("graph item"))?;
                let end = reader.read_u32().map_err(short("graph item"))?;
                let score = reader.read_f32().map_err(short("graph item"))?;
                if req.overlaps(start, end) {
                    features.push(Feature::value(start, end, score));
                }
            }
        }
        WIG_TYPE_VARIABLE_STEP => {
            for _ in 0..item_count {
                let start = reader.read_u32().map_err(short("variable step item"))?;
                let score = reader.read_f32().map_err(short("variable step item"))?;
                let end = start + item_span;
                if req.overlaps(start, end) {
                    features.push(Feature::value(start, end, score));
                }
            }
        }
        WIG_TYPE_FIXED_STEP => {
            let mut start = block_start;
            for _ in 0..item_count {
                let score = reader.read_f32().map_err(short("fixed step item"))?;
                let end = start + item_span;
                if req.overlaps(start, end) {
                    features.push(Feature::value(start, end, score));
                }
                start += item_step;
            }
        }
        section_type => {
            tracing::warn!("unknown bigwig section type: {}", section_type);
        }
    }
    Ok(features)
}

/// BigBed records are variable length: fixed coordinates then a
/// zero-terminated free-form tail, parsed to the end of the buffer.
fn decode_bigbed_block(
    data: &[u8],
    block_offset: u64,
    endianness: Endianness,
    req: &CoordRequest,
) -> Result<Vec<Feature>, BlockViewError> {
    let mut cursor = Cursor::new(data);
    let mut features = Vec::new();
    while (cursor.position() as usize) < data.len() {
        let record_offset = cursor.position();
        let mut reader = ByteOrdered::runtime(&mut cursor, endianness);
        let chrom_id = reader.read_u32().map_err(short("bigbed record"))?;
        let start = reader.read_u32().map_err(short("bigbed record"))?;
        let end = reader.read_u32().map_err(short("bigbed record"))?;

        let rest_start = cursor.position() as usize;
        let rest_len = data[rest_start..]
            .iter()
            .position(|&byte| byte == 0)
            .ok_or_else(|| {
                BlockViewError::InvalidFile("bigbed record is missing its terminator".to_string())
            })?;
        let rest = data[rest_start..rest_start + rest_len].to_vec();
        cursor.set_position((rest_start + rest_len + 1) as u64);

        if chrom_id != req.chrom_id || !req.overlaps(start, end) {
            continue;
        }
        features.push(Feature {
            start,
            end,
            score: 0.0,
            min_score: None,
            max_score: None,
            summary: false,
            rest: Some(rest),
            unique_id: Some(format!("bb-{}", block_offset + record_offset)),
        });
    }
    Ok(features)
}
