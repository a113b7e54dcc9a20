//! Tiled attention over a query-tile × key-tile grid.

use super::specialization::{BQ, WM, WN, key_block_size, tile_attention_kernel};
use crate::{
    Array,
    backends::common::{
        Backend, ComputeEncoder, Context, GridSize,
        gpu_types::{AttnMaskParams, AttnParams},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TileCounts {
    pub nq: usize,
    pub nk: usize,
    pub nq_aligned: usize,
    pub nk_aligned: usize,
    pub q_rem: usize,
    pub k_rem: usize,
    /// Negative when there are more queries than keys.
    pub q_off: isize,
}

/// Tile arithmetic for a query/key sequence pair. The grid covers every
/// element (`nq * bq >= q_len`, `nk * bk >= k_len`); the kernel masks the
/// ragged tails using the remainders.
pub(crate) fn tile_counts(
    q_len: usize,
    k_len: usize,
    bq: usize,
    bk: usize,
) -> TileCounts {
    let nq = q_len.div_ceil(bq);
    let nk = k_len.div_ceil(bk);
    let nq_aligned = q_len / bq;
    let nk_aligned = k_len / bk;
    TileCounts {
        nq,
        nk,
        nq_aligned,
        nk_aligned,
        q_rem: q_len - nq_aligned * bq,
        k_rem: k_len - nk_aligned * bk,
        q_off: k_len as isize - q_len as isize,
    }
}

pub(crate) fn encode<B: Backend>(
    context: &B::Context,
    encoder: &B::ComputeEncoder,
    q: &Array<B>,
    k: &Array<B>,
    v: &Array<B>,
    out: &Array<B>,
    scale: f32,
    do_causal: bool,
    mask: Option<&Array<B>>,
) -> Result<(), B::Error> {
    let head_dim = q.dim(3);
    let bq = BQ;
    let bk = key_block_size(head_dim);

    let batch = q.dim(0);
    let heads = q.dim(1);
    let q_len = q.dim(2);
    let k_len = k.dim(2);
    let gqa_factor = heads / k.dim(1);

    let align_q = q_len % bq == 0;
    let align_k = k_len % bk == 0;

    let request = tile_attention_kernel(
        q.data_type(),
        mask.map_or(q.data_type(), |m| m.data_type()),
        head_dim,
        bq,
        bk,
        align_q,
        align_k,
        mask.is_some(),
        do_causal,
    );
    let pipeline = context.compute_pipeline_state(
        &request.base_name,
        &request.hash_name,
        &request.constants,
    )?;
    encoder.set_compute_pipeline_state(&pipeline);

    let tiles = tile_counts(q_len, k_len, bq, bk);

    let params = AttnParams {
        q_strides: [q.stride(0), q.stride(1), q.stride(2)],
        k_strides: [k.stride(0), k.stride(1), k.stride(2)],
        v_strides: [v.stride(0), v.stride(1), v.stride(2)],
        o_strides: [out.stride(0), out.stride(1), out.stride(2)],
        gqa_factor: gqa_factor as i32,
        scale,
        q_len: q_len as i32,
        k_len: k_len as i32,
        q_off: tiles.q_off as i32,
        head_dim: head_dim as i32,
        nq: tiles.nq as i32,
        nk: tiles.nk as i32,
        nq_aligned: tiles.nq_aligned as i32,
        nk_aligned: tiles.nk_aligned as i32,
        q_rem: tiles.q_rem as i32,
        k_rem: tiles.k_rem as i32,
    };

    encoder.set_input_array(q, 0);
    encoder.set_input_array(k, 1);
    encoder.set_input_array(v, 2);
    encoder.set_output_array(out, 3);
    encoder.set_bytes(&params, 4);

    if let Some(m) = mask {
        let mask_params = AttnMaskParams {
            m_strides: [m.stride(0), m.stride(1), m.stride(2)],
        };
        encoder.set_bytes(&mask_params, 5);
        encoder.set_input_array(m, 6);
    }

    let grid = GridSize::new(tiles.nq, heads, batch);
    let group = GridSize::new(32, WM, WN);
    encoder.dispatch_threadgroups(grid, group);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_counts_ragged() {
        // 50 query rows in 32-row tiles, 50 key rows in 16-row tiles.
        let tiles = tile_counts(50, 50, 32, 16);
        assert_eq!(tiles.nq, 2);
        assert_eq!(tiles.nk, 4);
        assert_eq!(tiles.nq_aligned, 1);
        assert_eq!(tiles.nk_aligned, 3);
        assert_eq!(tiles.q_rem, 18);
        assert_eq!(tiles.k_rem, 2);
        assert_eq!(tiles.q_off, 0);
    }

    #[test]
    fn test_tile_counts_aligned() {
        let tiles = tile_counts(64, 96, 32, 32);
        assert_eq!(tiles.nq, 2);
        assert_eq!(tiles.nk, 3);
        assert_eq!(tiles.q_rem, 0);
        assert_eq!(tiles.k_rem, 0);
        assert_eq!(tiles.q_off, 32);
    }

    #[test]
    fn test_tile_counts_cover_sequences() {
        for (q_len, k_len) in [(1, 1), (9, 33), (31, 17), (33, 1023), (100, 4097)] {
            for bk in [16, 32] {
                let tiles = tile_counts(q_len, k_len, BQ, bk);
                assert!(tiles.nq * BQ >= q_len);
                assert!(tiles.nk * bk >= k_len);
                assert!(tiles.q_rem < BQ);
                assert!(tiles.k_rem < bk);
            }
        }
    }
}
