//! Scaled-dot-product attention dispatch.
//!
//! Routes one attention call to a specialized kernel variant: a vector
//! kernel when the query is short (optionally split into a two-pass
//! reduction over key blocks), or a tiled kernel over a query×key grid
//! otherwise. Inputs whose memory layout violates a kernel's contract are
//! copied into a dense layout first; all copies and intermediates are
//! registered as stream-scoped temporaries.

mod full;
pub mod specialization;
mod vector;

use crate::{
    Array,
    backends::common::{Backend, Context, DeviceClass},
    data_type::array_size_in_bytes,
};

/// Queries at most this long reduce to O(1) rows per launch and take the
/// vector path.
pub const VECTOR_MODE_MAX_QUERY_LEN: usize = 8;

/// Key length at which a high-end device trades an extra launch for better
/// occupancy.
pub const TWO_PASS_MIN_KEY_LEN: usize = 1024;

/// Key length at which grouped-query workloads do the same on any device.
pub const TWO_PASS_MIN_KEY_LEN_GQA: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttentionStrategy {
    VectorSinglePass,
    VectorTwoPass,
    Tiled,
}

/// Pure routing decision over shapes and the device capability tier.
pub fn select_strategy(
    q_len: usize,
    k_len: usize,
    q_heads: usize,
    kv_heads: usize,
    device_class: DeviceClass,
) -> AttentionStrategy {
    if q_len > VECTOR_MODE_MAX_QUERY_LEN {
        return AttentionStrategy::Tiled;
    }
    if (device_class.is_high_end() && k_len >= TWO_PASS_MIN_KEY_LEN)
        || (kv_heads < q_heads && k_len >= TWO_PASS_MIN_KEY_LEN_GQA)
    {
        AttentionStrategy::VectorTwoPass
    } else {
        AttentionStrategy::VectorSinglePass
    }
}

/// Row-contiguous, or transposed only across the head/sequence axes in the
/// pattern the vector kernel can address directly. The kernel collapses
/// batch and heads into one flat axis, so the transposed form is only
/// addressable for a single batch.
fn is_contiguous_or_head_seq_transposed<B: Backend>(arr: &Array<B>) -> bool {
    if arr.flags().row_contiguous {
        return true;
    }
    let strides = arr.strides();
    let shape = arr.shape();
    shape[0] == 1
        && strides[3] == 1
        && strides[2] == (shape[3] * shape[1]) as i64
        && strides[1] == shape[3] as i64
        && strides[0] == strides[2] * shape[2] as i64
}

/// The innermost (head-dim) axis is dense.
fn is_matrix_contiguous<B: Backend>(arr: &Array<B>) -> bool {
    arr.strides().last().copied() == Some(1)
}

fn copy_unless<B: Backend>(
    context: &B::Context,
    copies: &mut Vec<Array<B>>,
    predicate: impl Fn(&Array<B>) -> bool,
    arr: &Array<B>,
) -> Result<Array<B>, B::Error> {
    if predicate(arr) {
        Ok(arr.clone())
    } else {
        let copy = context.copy_row_major(arr)?;
        copies.push(copy.clone());
        Ok(copy)
    }
}

fn copy_unless_owned<B: Backend>(
    context: &B::Context,
    copies: &mut Vec<Array<B>>,
    predicate: impl Fn(&Array<B>) -> bool,
    arr: Array<B>,
) -> Result<Array<B>, B::Error> {
    if predicate(&arr) {
        Ok(arr)
    } else {
        let copy = context.copy_row_major(&arr)?;
        copies.push(copy.clone());
        Ok(copy)
    }
}

/// Output placement for the vector path: donate the query's storage when
/// safe, otherwise allocate with the write pattern the kernel expects.
///
/// Multi-row kernels write query rows interleaved across the flat
/// batch-by-head axis, so the planned strides put the sequence axis
/// outermost. Donation is sound because the passthrough layouts (single
/// row, or single-batch head/seq transposed) coincide with that pattern.
fn plan_vector_output<B: Backend>(
    context: &B::Context,
    q: &Array<B>,
    shape: &[usize; 4],
) -> Result<Array<B>, B::Error> {
    let num_elements: usize = shape.iter().product();

    if q.is_donatable()
        && (q.dim(2) == 1 || !q.flags().row_contiguous)
        && q.num_elements() == num_elements
    {
        return Ok(Array::sharing(q, shape));
    }

    let nbytes = array_size_in_bytes(shape, q.data_type());
    if shape[2] == 1 {
        return Ok(Array::new_contiguous(
            context.malloc(nbytes)?,
            shape,
            q.data_type(),
        ));
    }

    let strides = [
        (shape[1] * shape[3]) as i64,
        shape[3] as i64,
        (shape[0] * shape[1] * shape[3]) as i64,
        1,
    ];
    let flags = crate::Flags {
        contiguous: true,
        row_contiguous: shape[0] == 1 && shape[1] == 1,
        col_contiguous: false,
    };
    Ok(unsafe {
        Array::from_parts(
            context.malloc(nbytes)?,
            shape,
            &strides,
            q.data_type(),
            flags,
        )
    })
}

/// Output placement for the tiled path: always fresh storage, head-dim
/// fastest, then head, then sequence, then batch.
fn plan_tiled_output<B: Backend>(
    context: &B::Context,
    q: &Array<B>,
    shape: &[usize; 4],
) -> Result<Array<B>, B::Error> {
    let str_d = 1i64;
    let str_h = shape[3] as i64;
    let str_l = (shape[1] * shape[3]) as i64;
    let str_b = (shape[2] * shape[1] * shape[3]) as i64;
    let flags = crate::Flags {
        contiguous: true,
        row_contiguous: false,
        col_contiguous: false,
    };
    let nbytes = array_size_in_bytes(shape, q.data_type());
    Ok(unsafe {
        Array::from_parts(
            context.malloc(nbytes)?,
            shape,
            &[str_b, str_h, str_l, str_d],
            q.data_type(),
            flags,
        )
    })
}

/// Dispatches one attention call onto the context's execution stream and
/// returns the output array.
///
/// The query is consumed: when its storage is donatable the output takes
/// the allocation over, so the caller cannot keep an independent handle to
/// memory the kernel overwrites.
///
/// Shape compatibility is a precondition: `q`/`k`/`v` are rank-4
/// `[batch, heads, seq, head_dim]` with matching query/key head dims and a
/// key/value head count dividing the query head count. Violations are fatal.
/// Failures from the backend (kernel fetch, allocation) propagate unmodified.
pub fn scaled_dot_product_attention<B: Backend>(
    context: &B::Context,
    encoder: &B::ComputeEncoder,
    q: Array<B>,
    k: &Array<B>,
    v: &Array<B>,
    mask: Option<&Array<B>>,
    scale: f32,
    do_causal: bool,
) -> Result<Array<B>, B::Error> {
    assert_eq!(q.ndim(), 4, "Queries must be rank 4");
    assert_eq!(k.ndim(), 4, "Keys must be rank 4");
    assert_eq!(v.ndim(), 4, "Values must be rank 4");
    assert_eq!(q.dim(3), k.dim(3), "Query/key head dims must match");
    assert_eq!(k.dim(2), v.dim(2), "Key/value sequence lengths must match");
    assert_eq!(k.dim(1), v.dim(1), "Key/value head counts must match");
    assert!(
        k.dim(1) > 0 && q.dim(1) % k.dim(1) == 0,
        "Key/value heads must divide query heads"
    );
    assert!(q.dim(2) >= 1 && k.dim(2) >= 1, "Sequences must be non-empty");
    assert!(
        q.data_type() == k.data_type() && q.data_type() == v.data_type(),
        "Query/key/value data types must match"
    );

    let out_shape = [q.dim(0), q.dim(1), q.dim(2), v.dim(3)];
    let strategy = select_strategy(
        q.dim(2),
        k.dim(2),
        q.dim(1),
        k.dim(1),
        context.device_class(),
    );

    let mut copies = Vec::with_capacity(3);

    let out = match strategy {
        AttentionStrategy::VectorSinglePass | AttentionStrategy::VectorTwoPass => {
            if let Some(m) = mask {
                assert!(
                    m.data_type() == q.data_type(),
                    "Mask data type must match the query data type for the vector kernels"
                );
            }
            let q = copy_unless_owned(
                context,
                &mut copies,
                is_contiguous_or_head_seq_transposed,
                q,
            )?;
            let k = copy_unless(context, &mut copies, is_matrix_contiguous, k)?;
            let v = copy_unless(context, &mut copies, is_matrix_contiguous, v)?;

            let out = plan_vector_output(context, &q, &out_shape)?;

            match strategy {
                AttentionStrategy::VectorTwoPass => vector::encode_two_pass(
                    context, encoder, &q, &k, &v, &out, scale, mask,
                )?,
                _ => vector::encode_single_pass(
                    context, encoder, &q, &k, &v, &out, scale, mask,
                )?,
            }
            out
        },
        AttentionStrategy::Tiled => {
            assert_eq!(
                q.dim(3),
                v.dim(3),
                "Tiled attention requires equal query and value head dims"
            );
            let q =
                copy_unless_owned(context, &mut copies, is_matrix_contiguous, q)?;
            let k = copy_unless(context, &mut copies, is_matrix_contiguous, k)?;
            let v = copy_unless(context, &mut copies, is_matrix_contiguous, v)?;
            let mask = match mask {
                Some(m) => Some(copy_unless(
                    context,
                    &mut copies,
                    is_matrix_contiguous,
                    m,
                )?),
                None => None,
            };

            let out = plan_tiled_output(context, &q, &out_shape)?;
            full::encode(
                context,
                encoder,
                &q,
                &k,
                &v,
                &out,
                scale,
                do_causal,
                mask.as_ref(),
            )?;
            out
        },
    };

    context.add_temporaries(copies);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_mode_boundary() {
        for q_len in 1..=8 {
            assert_ne!(
                select_strategy(q_len, 64, 8, 8, DeviceClass::Base),
                AttentionStrategy::Tiled
            );
        }
        assert_eq!(
            select_strategy(9, 64, 8, 8, DeviceClass::Base),
            AttentionStrategy::Tiled
        );
        assert_eq!(
            select_strategy(128, 1 << 20, 8, 1, DeviceClass::Ultra),
            AttentionStrategy::Tiled
        );
    }

    #[test]
    fn test_two_pass_selection() {
        // High-end devices split long key sequences.
        assert_eq!(
            select_strategy(1, 1024, 8, 8, DeviceClass::Max),
            AttentionStrategy::VectorTwoPass
        );
        assert_eq!(
            select_strategy(1, 1023, 8, 8, DeviceClass::Max),
            AttentionStrategy::VectorSinglePass
        );
        assert_eq!(
            select_strategy(1, 1024, 8, 8, DeviceClass::Base),
            AttentionStrategy::VectorSinglePass
        );

        // Grouped-query workloads split on any device once keys are long
        // enough.
        assert_eq!(
            select_strategy(1, 4096, 8, 2, DeviceClass::Base),
            AttentionStrategy::VectorTwoPass
        );
        assert_eq!(
            select_strategy(1, 4095, 8, 2, DeviceClass::Base),
            AttentionStrategy::VectorSinglePass
        );
        assert_eq!(
            select_strategy(1, 4096, 8, 8, DeviceClass::Base),
            AttentionStrategy::VectorSinglePass
        );
    }

    #[test]
    fn test_two_pass_monotonic_in_key_len() {
        for device_class in [DeviceClass::Ultra, DeviceClass::Max, DeviceClass::Pro, DeviceClass::Base] {
            for kv_heads in [2, 8] {
                let mut seen_two_pass = false;
                for k_len in (0..=8192).step_by(512) {
                    let strategy =
                        select_strategy(4, k_len.max(1), 8, kv_heads, device_class);
                    match strategy {
                        AttentionStrategy::VectorTwoPass => seen_two_pass = true,
                        _ => assert!(
                            !seen_two_pass,
                            "two-pass deselected at k_len {} on {:?}",
                            k_len, device_class
                        ),
                    }
                }
            }
        }
    }
}
