//! Vector-mode attention: one (or a few) query rows scanning a long key
//! sequence, dispatched as a single pass or as a block-parallel two-pass
//! reduction.

use super::specialization::{
    vector_attention_kernel, vector_two_pass_finalize_name,
    vector_two_pass_partial_kernel,
};
use crate::{
    Array, DataType,
    backends::common::{
        Backend, ComputeEncoder, Context, GridSize, gpu_types::TWO_PASS_BLOCKS,
    },
    data_type::array_size_in_bytes,
};

/// Per-axis mask strides for the trailing (key, query, head) axes.
/// An axis of extent 1 is broadcast and contributes stride 0.
fn mask_strides<B: Backend>(mask: &Array<B>) -> (i32, i32, i32) {
    let nd = mask.ndim();
    let stride_or_zero = |axis_from_end: usize| -> i32 {
        if nd >= axis_from_end + 1 && mask.dim(nd - 1 - axis_from_end) > 1 {
            mask.stride(nd - 1 - axis_from_end) as i32
        } else {
            0
        }
    };
    (stride_or_zero(0), stride_or_zero(1), stride_or_zero(2))
}

fn bind_mask<B: Backend>(
    encoder: &B::ComputeEncoder,
    mask: &Array<B>,
    buffer_slot: u32,
) {
    let (kv_seq_stride, q_seq_stride, head_stride) = mask_strides(mask);
    encoder.set_input_array(mask, buffer_slot);
    encoder.set_bytes(&kv_seq_stride, buffer_slot + 1);
    encoder.set_bytes(&q_seq_stride, buffer_slot + 2);
    encoder.set_bytes(&head_stride, buffer_slot + 3);
}

pub(crate) fn encode_single_pass<B: Backend>(
    context: &B::Context,
    encoder: &B::ComputeEncoder,
    q: &Array<B>,
    k: &Array<B>,
    v: &Array<B>,
    out: &Array<B>,
    scale: f32,
    mask: Option<&Array<B>>,
) -> Result<(), B::Error> {
    let request = vector_attention_kernel(
        q.data_type(),
        q.dim(3),
        v.dim(3),
        mask.is_some(),
        !q.flags().row_contiguous,
    );
    let pipeline = context.compute_pipeline_state(
        &request.base_name,
        &request.hash_name,
        &request.constants,
    )?;
    encoder.set_compute_pipeline_state(&pipeline);

    let gqa_factor = (q.dim(1) / k.dim(1)) as i32;
    let k_len = k.dim(2) as i32;

    encoder.set_input_array(q, 0);
    encoder.set_input_array(k, 1);
    encoder.set_input_array(v, 2);
    encoder.set_output_array(out, 3);
    encoder.set_bytes(&gqa_factor, 4);
    encoder.set_bytes(&k_len, 5);
    encoder.set_bytes(&(k.stride(1) as i32), 6);
    encoder.set_bytes(&(k.stride(2) as i32), 7);
    encoder.set_bytes(&(v.stride(1) as i32), 8);
    encoder.set_bytes(&(v.stride(2) as i32), 9);
    encoder.set_bytes(&scale, 10);
    if let Some(m) = mask {
        bind_mask(encoder, m, 11);
    }

    let grid = GridSize::new(q.dim(0) * q.dim(1), q.dim(2), 1);
    let group = GridSize::new(1024, 1, 1);
    encoder.dispatch_threadgroups(grid, group);

    Ok(())
}

pub(crate) fn encode_two_pass<B: Backend>(
    context: &B::Context,
    encoder: &B::ComputeEncoder,
    q: &Array<B>,
    k: &Array<B>,
    v: &Array<B>,
    out: &Array<B>,
    scale: f32,
    mask: Option<&Array<B>>,
) -> Result<(), B::Error> {
    let request = vector_two_pass_partial_kernel(
        q.data_type(),
        q.dim(3),
        v.dim(3),
        mask.is_some(),
        !q.flags().row_contiguous,
    );
    let pipeline = context.compute_pipeline_state(
        &request.base_name,
        &request.hash_name,
        &request.constants,
    )?;
    encoder.set_compute_pipeline_state(&pipeline);

    // Partial reductions, one triple per key block, in float32 regardless of
    // the input type.
    let mut stats_shape: Vec<usize> = out.shape()[..out.ndim() - 1].to_vec();
    stats_shape.push(TWO_PASS_BLOCKS);
    let mut partials_shape = stats_shape.clone();
    partials_shape.push(out.dim(out.ndim() - 1));

    let partials = Array::new_contiguous(
        context.malloc(array_size_in_bytes(&partials_shape, DataType::F32))?,
        &partials_shape,
        DataType::F32,
    );
    let sums = Array::new_contiguous(
        context.malloc(array_size_in_bytes(&stats_shape, DataType::F32))?,
        &stats_shape,
        DataType::F32,
    );
    let maxs = Array::new_contiguous(
        context.malloc(array_size_in_bytes(&stats_shape, DataType::F32))?,
        &stats_shape,
        DataType::F32,
    );

    let gqa_factor = (q.dim(1) / k.dim(1)) as i32;
    let k_len = k.dim(2) as i32;

    encoder.set_input_array(q, 0);
    encoder.set_input_array(k, 1);
    encoder.set_input_array(v, 2);
    encoder.set_output_array(&partials, 3);
    encoder.set_output_array(&sums, 4);
    encoder.set_output_array(&maxs, 5);
    encoder.set_bytes(&gqa_factor, 6);
    encoder.set_bytes(&k_len, 7);
    encoder.set_bytes(&(k.stride(1) as i32), 8);
    encoder.set_bytes(&(k.stride(2) as i32), 9);
    encoder.set_bytes(&(v.stride(1) as i32), 10);
    encoder.set_bytes(&(v.stride(2) as i32), 11);
    encoder.set_bytes(&scale, 12);
    if let Some(m) = mask {
        bind_mask(encoder, m, 13);
    }

    let collapsed_heads = q.dim(0) * q.dim(1);
    let grid = GridSize::new(collapsed_heads, q.dim(2), TWO_PASS_BLOCKS);
    let group = GridSize::new(8 * 32, 1, 1);
    encoder.dispatch_threadgroups(grid, group);

    // Finalize on the same encoder; stream order makes the partials visible
    // without an explicit barrier.
    let finalize =
        vector_two_pass_finalize_name(q.data_type(), v.dim(3));
    let pipeline = context.compute_pipeline_state_exact(&finalize)?;
    encoder.set_compute_pipeline_state(&pipeline);

    encoder.set_input_array(&partials, 0);
    encoder.set_input_array(&sums, 1);
    encoder.set_input_array(&maxs, 2);
    encoder.set_output_array(out, 3);

    let grid = GridSize::new(collapsed_heads, q.dim(2), 1);
    let group = GridSize::new(1024, 1, 1);
    encoder.dispatch_threadgroups(grid, group);

    context.add_temporary(partials);
    context.add_temporary(sums);
    context.add_temporary(maxs);

    Ok(())
}
