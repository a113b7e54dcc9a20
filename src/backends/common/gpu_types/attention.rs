//! Attention kernel parameter blocks, passed to kernels by raw bytes.

use bytemuck::{Pod, Zeroable};

/// Number of key-axis blocks processed independently by the two-pass vector
/// kernels. Baked into both passes; the finalize kernel reduces exactly this
/// many partials per query row.
pub const TWO_PASS_BLOCKS: usize = 32;

/// Parameters for the tiled attention kernel.
///
/// All strides are in **elements**, not bytes. Q/K/V/O strides cover the
/// batch, head and sequence axes in that order; the head-dim stride is 1 by
/// contract (inputs are normalized before dispatch).
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct AttnParams {
    pub q_strides: [i64; 3],
    pub k_strides: [i64; 3],
    pub v_strides: [i64; 3],
    pub o_strides: [i64; 3],
    /// Query heads per key/value head.
    pub gqa_factor: i32,
    pub scale: f32,
    pub q_len: i32,
    pub k_len: i32,
    /// `k_len - q_len`: aligns the causal diagonal to the end of the key
    /// sequence when keys outnumber queries.
    pub q_off: i32,
    pub head_dim: i32,
    /// Query tiling: ceil(q_len / BQ).
    pub nq: i32,
    /// Key tiling: ceil(k_len / BK).
    pub nk: i32,
    /// Query tiling: q_len / BQ.
    pub nq_aligned: i32,
    /// Key tiling: k_len / BK.
    pub nk_aligned: i32,
    /// Ragged query tail: q_len - nq_aligned * BQ.
    pub q_rem: i32,
    /// Ragged key tail: k_len - nk_aligned * BK.
    pub k_rem: i32,
}

/// Strides describing the additive attention mask.
///
/// `m_strides` covers the batch, head and query axes in elements; the key
/// axis stride is 1 by contract. Broadcast axes carry stride 0.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct AttnMaskParams {
    pub m_strides: [i64; 3],
}
