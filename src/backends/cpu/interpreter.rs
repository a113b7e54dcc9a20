//! Dispatch execution.
//!
//! Each kernel family is interpreted with the exact argument table, grid
//! semantics and accumulation behavior of its device counterpart: scores and
//! softmax state are kept in float32 regardless of the element type, and the
//! implicit addressing rules of each family (interleaved head/sequence rows
//! in vector mode, strided tiles in tile mode) are reproduced here.

use bytemuck::Pod;
use half::{bf16, f16};

use super::{
    buffer::CpuBuffer,
    compute_encoder::Bindings,
    pipeline::{KernelSpec, TileSpec, VectorSpec},
};
use crate::{
    ArrayElement, DataType,
    backends::common::{
        GridSize, NativeBuffer,
        gpu_types::{AttnMaskParams, AttnParams, TWO_PASS_BLOCKS},
    },
};

/// Raw element access into a bound buffer. Reads and writes go through raw
/// pointers so that aliased bindings (a donated output) stay well-defined.
#[derive(Clone, Copy)]
struct BufferView {
    ptr: *mut u8,
    len: usize,
}

impl BufferView {
    fn of(buffer: &CpuBuffer) -> Self {
        Self {
            ptr: buffer.cpu_ptr().as_ptr() as *mut u8,
            len: buffer.length(),
        }
    }

    fn read<T: Pod>(
        &self,
        element_index: usize,
    ) -> T {
        let byte_offset = element_index * size_of::<T>();
        assert!(byte_offset + size_of::<T>() <= self.len);
        // Byte allocations make no alignment promise.
        unsafe { (self.ptr.add(byte_offset) as *const T).read_unaligned() }
    }

    fn write<T: Pod>(
        &self,
        element_index: usize,
        value: T,
    ) {
        let byte_offset = element_index * size_of::<T>();
        assert!(byte_offset + size_of::<T>() <= self.len);
        unsafe { (self.ptr.add(byte_offset) as *mut T).write_unaligned(value) }
    }

    fn read_f32(
        &self,
        data_type: DataType,
        element_index: usize,
    ) -> f32 {
        match data_type {
            DataType::F32 => self.read::<f32>(element_index),
            DataType::F16 => self.read::<f16>(element_index).to_f32(),
            DataType::BF16 => self.read::<bf16>(element_index).to_f32(),
        }
    }
}

pub(crate) fn execute(
    spec: &KernelSpec,
    bindings: &Bindings,
    grid: GridSize,
    _group: GridSize,
) {
    match spec {
        KernelSpec::Vector(vector) => match vector.data_type {
            DataType::F32 => run_vector::<f32>(vector, bindings, grid),
            DataType::F16 => run_vector::<f16>(vector, bindings, grid),
            DataType::BF16 => run_vector::<bf16>(vector, bindings, grid),
        },
        KernelSpec::VectorTwoPassPartial(vector) => match vector.data_type {
            DataType::F32 => run_two_pass_partial::<f32>(vector, bindings, grid),
            DataType::F16 => run_two_pass_partial::<f16>(vector, bindings, grid),
            DataType::BF16 => run_two_pass_partial::<bf16>(vector, bindings, grid),
        },
        KernelSpec::VectorTwoPassFinalize {
            data_type,
            value_head_dim,
        } => match data_type {
            DataType::F32 => {
                run_two_pass_finalize::<f32>(*value_head_dim, bindings, grid)
            },
            DataType::F16 => {
                run_two_pass_finalize::<f16>(*value_head_dim, bindings, grid)
            },
            DataType::BF16 => {
                run_two_pass_finalize::<bf16>(*value_head_dim, bindings, grid)
            },
        },
        KernelSpec::Tile(tile) => match tile.data_type {
            DataType::F32 => run_tile::<f32>(tile, bindings, grid),
            DataType::F16 => run_tile::<f16>(tile, bindings, grid),
            DataType::BF16 => run_tile::<bf16>(tile, bindings, grid),
        },
    }
}

struct VectorArgs {
    q: BufferView,
    k: BufferView,
    v: BufferView,
    gqa_factor: usize,
    k_len: usize,
    k_head_stride: i64,
    k_seq_stride: i64,
    v_head_stride: i64,
    v_seq_stride: i64,
    scale: f32,
    mask: Option<VectorMask>,
}

struct VectorMask {
    view: BufferView,
    kv_seq_stride: i64,
    q_seq_stride: i64,
    head_stride: i64,
}

impl VectorArgs {
    /// Reads the shared vector-kernel argument table starting at the given
    /// slot for the first scalar argument.
    fn bind(
        spec: &VectorSpec,
        bindings: &Bindings,
        scalar_base: u32,
    ) -> Self {
        let mask = spec.has_mask.then(|| {
            let slot = scalar_base + 7;
            VectorMask {
                view: BufferView::of(bindings.buffer(slot)),
                kv_seq_stride: bindings.scalar::<i32>(slot + 1) as i64,
                q_seq_stride: bindings.scalar::<i32>(slot + 2) as i64,
                head_stride: bindings.scalar::<i32>(slot + 3) as i64,
            }
        });
        Self {
            q: BufferView::of(bindings.buffer(0)),
            k: BufferView::of(bindings.buffer(1)),
            v: BufferView::of(bindings.buffer(2)),
            gqa_factor: bindings.scalar::<i32>(scalar_base) as usize,
            k_len: bindings.scalar::<i32>(scalar_base + 1) as usize,
            k_head_stride: bindings.scalar::<i32>(scalar_base + 2) as i64,
            k_seq_stride: bindings.scalar::<i32>(scalar_base + 3) as i64,
            v_head_stride: bindings.scalar::<i32>(scalar_base + 4) as i64,
            v_seq_stride: bindings.scalar::<i32>(scalar_base + 5) as i64,
            scale: bindings.scalar::<f32>(scalar_base + 6),
            mask,
        }
    }

    fn query_row<T: ArrayElement>(
        &self,
        spec: &VectorSpec,
        grid: GridSize,
        head_idx: usize,
        row: usize,
    ) -> Vec<f32> {
        let base = if spec.query_transposed {
            (row * grid.width + head_idx) * spec.head_dim
        } else {
            (head_idx * grid.height + row) * spec.head_dim
        };
        (0..spec.head_dim)
            .map(|d| self.q.read::<T>(base + d).to_f32())
            .collect()
    }

    fn score<T: ArrayElement>(
        &self,
        spec: &VectorSpec,
        query: &[f32],
        kv_head: usize,
        head_idx: usize,
        row: usize,
        key: usize,
    ) -> f32 {
        let k_base = kv_head as i64 * self.k_head_stride
            + key as i64 * self.k_seq_stride;
        let mut dot = 0.0f32;
        for d in 0..spec.head_dim {
            dot += query[d] * self.k.read::<T>((k_base + d as i64) as usize).to_f32();
        }
        let mut score = dot * self.scale;
        if let Some(mask) = &self.mask {
            let offset = head_idx as i64 * mask.head_stride
                + row as i64 * mask.q_seq_stride
                + key as i64 * mask.kv_seq_stride;
            score += mask.view.read::<T>(offset as usize).to_f32();
        }
        score
    }

    fn value_row<T: ArrayElement>(
        &self,
        spec: &VectorSpec,
        kv_head: usize,
        key: usize,
        accumulator: &mut [f32],
        weight: f32,
        decay: f32,
    ) {
        let v_base = kv_head as i64 * self.v_head_stride
            + key as i64 * self.v_seq_stride;
        for d in 0..spec.value_head_dim {
            accumulator[d] = accumulator[d] * decay
                + weight * self.v.read::<T>((v_base + d as i64) as usize).to_f32();
        }
    }
}

fn run_vector<T: ArrayElement>(
    spec: &VectorSpec,
    bindings: &Bindings,
    grid: GridSize,
) {
    let args = VectorArgs::bind(spec, bindings, 4);
    let out = BufferView::of(bindings.buffer(3));

    for head_idx in 0..grid.width {
        let kv_head = head_idx / args.gqa_factor;
        for row in 0..grid.height {
            let query = args.query_row::<T>(spec, grid, head_idx, row);

            let mut running_max = f32::NEG_INFINITY;
            let mut running_sum = 0.0f32;
            let mut accumulator = vec![0.0f32; spec.value_head_dim];
            for key in 0..args.k_len {
                let score =
                    args.score::<T>(spec, &query, kv_head, head_idx, row, key);
                let new_max = running_max.max(score);
                let decay = (running_max - new_max).exp();
                let weight = (score - new_max).exp();
                running_sum = running_sum * decay + weight;
                args.value_row::<T>(
                    spec,
                    kv_head,
                    key,
                    &mut accumulator,
                    weight,
                    decay,
                );
                running_max = new_max;
            }

            let out_base = (row * grid.width + head_idx) * spec.value_head_dim;
            for d in 0..spec.value_head_dim {
                out.write::<T>(
                    out_base + d,
                    T::from_f32(accumulator[d] / running_sum),
                );
            }
        }
    }
}

fn run_two_pass_partial<T: ArrayElement>(
    spec: &VectorSpec,
    bindings: &Bindings,
    grid: GridSize,
) {
    let args = VectorArgs::bind(spec, bindings, 6);
    let partials = BufferView::of(bindings.buffer(3));
    let sums = BufferView::of(bindings.buffer(4));
    let maxs = BufferView::of(bindings.buffer(5));

    let blocks = grid.depth;
    let keys_per_block = args.k_len.div_ceil(blocks);

    for head_idx in 0..grid.width {
        let kv_head = head_idx / args.gqa_factor;
        for row in 0..grid.height {
            let query = args.query_row::<T>(spec, grid, head_idx, row);
            let stats_base = (head_idx * grid.height + row) * blocks;

            for block in 0..blocks {
                let first = block * keys_per_block;
                let last = args.k_len.min(first + keys_per_block);

                let mut running_max = f32::NEG_INFINITY;
                let mut running_sum = 0.0f32;
                let mut accumulator = vec![0.0f32; spec.value_head_dim];
                for key in first..last {
                    let score = args
                        .score::<T>(spec, &query, kv_head, head_idx, row, key);
                    let new_max = running_max.max(score);
                    let decay = (running_max - new_max).exp();
                    let weight = (score - new_max).exp();
                    running_sum = running_sum * decay + weight;
                    args.value_row::<T>(
                        spec,
                        kv_head,
                        key,
                        &mut accumulator,
                        weight,
                        decay,
                    );
                    running_max = new_max;
                }

                maxs.write::<f32>(stats_base + block, running_max);
                sums.write::<f32>(stats_base + block, running_sum);
                let partial_base =
                    (stats_base + block) * spec.value_head_dim;
                for d in 0..spec.value_head_dim {
                    partials.write::<f32>(partial_base + d, accumulator[d]);
                }
            }
        }
    }
}

fn run_two_pass_finalize<T: ArrayElement>(
    value_head_dim: usize,
    bindings: &Bindings,
    grid: GridSize,
) {
    let partials = BufferView::of(bindings.buffer(0));
    let sums = BufferView::of(bindings.buffer(1));
    let maxs = BufferView::of(bindings.buffer(2));
    let out = BufferView::of(bindings.buffer(3));

    for head_idx in 0..grid.width {
        for row in 0..grid.height {
            let stats_base = (head_idx * grid.height + row) * TWO_PASS_BLOCKS;

            let mut global_max = f32::NEG_INFINITY;
            for block in 0..TWO_PASS_BLOCKS {
                global_max = global_max.max(maxs.read::<f32>(stats_base + block));
            }

            let mut total = 0.0f32;
            let mut accumulator = vec![0.0f32; value_head_dim];
            for block in 0..TWO_PASS_BLOCKS {
                let block_max = maxs.read::<f32>(stats_base + block);
                if block_max == f32::NEG_INFINITY {
                    continue;
                }
                let factor = (block_max - global_max).exp();
                total += sums.read::<f32>(stats_base + block) * factor;
                let partial_base = (stats_base + block) * value_head_dim;
                for d in 0..value_head_dim {
                    accumulator[d] +=
                        partials.read::<f32>(partial_base + d) * factor;
                }
            }

            let out_base = (row * grid.width + head_idx) * value_head_dim;
            for d in 0..value_head_dim {
                out.write::<T>(out_base + d, T::from_f32(accumulator[d] / total));
            }
        }
    }
}

fn run_tile<T: ArrayElement>(
    spec: &TileSpec,
    bindings: &Bindings,
    grid: GridSize,
) {
    let q = BufferView::of(bindings.buffer(0));
    let k = BufferView::of(bindings.buffer(1));
    let v = BufferView::of(bindings.buffer(2));
    let out = BufferView::of(bindings.buffer(3));
    let params = bindings.scalar::<AttnParams>(4);
    let mask = spec.has_mask.then(|| {
        (
            bindings.scalar::<AttnMaskParams>(5),
            BufferView::of(bindings.buffer(6)),
        )
    });

    let head_dim = spec.head_dim;
    let q_len = params.q_len as usize;
    let k_len = params.k_len as usize;
    let gqa_factor = params.gqa_factor as usize;

    for batch in 0..grid.depth {
        for head in 0..grid.height {
            let kv_head = head / gqa_factor;
            let q_head_base = batch as i64 * params.q_strides[0]
                + head as i64 * params.q_strides[1];
            let o_head_base = batch as i64 * params.o_strides[0]
                + head as i64 * params.o_strides[1];
            let k_head_base = batch as i64 * params.k_strides[0]
                + kv_head as i64 * params.k_strides[1];
            let v_head_base = batch as i64 * params.v_strides[0]
                + kv_head as i64 * params.v_strides[1];

            for q_tile in 0..grid.width {
                let first_row = q_tile * spec.query_block;
                let last_row = q_len.min(first_row + spec.query_block);

                for row in first_row..last_row {
                    let q_base = q_head_base + row as i64 * params.q_strides[2];

                    let mut scores = vec![f32::NEG_INFINITY; k_len];
                    for key in 0..k_len {
                        if spec.do_causal
                            && key as i64 > row as i64 + params.q_off as i64
                        {
                            continue;
                        }
                        let k_base =
                            k_head_base + key as i64 * params.k_strides[2];
                        let mut dot = 0.0f32;
                        for d in 0..head_dim {
                            dot += q.read::<T>((q_base + d as i64) as usize)
                                .to_f32()
                                * k.read::<T>((k_base + d as i64) as usize)
                                    .to_f32();
                        }
                        let mut score = dot * params.scale;
                        if let Some((mask_params, mask_view)) = &mask {
                            let offset = batch as i64 * mask_params.m_strides[0]
                                + head as i64 * mask_params.m_strides[1]
                                + row as i64 * mask_params.m_strides[2]
                                + key as i64;
                            score += mask_view
                                .read_f32(spec.mask_data_type, offset as usize);
                        }
                        scores[key] = score;
                    }

                    let row_max =
                        scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                    let o_base = o_head_base + row as i64 * params.o_strides[2];
                    if row_max == f32::NEG_INFINITY {
                        for d in 0..head_dim {
                            out.write::<T>(
                                (o_base + d as i64) as usize,
                                T::from_f32(0.0),
                            );
                        }
                        continue;
                    }

                    let mut total = 0.0f32;
                    let mut accumulator = vec![0.0f32; head_dim];
                    for key in 0..k_len {
                        let weight = (scores[key] - row_max).exp();
                        if weight == 0.0 {
                            continue;
                        }
                        total += weight;
                        let v_base =
                            v_head_base + key as i64 * params.v_strides[2];
                        for d in 0..head_dim {
                            accumulator[d] += weight
                                * v.read::<T>((v_base + d as i64) as usize)
                                    .to_f32();
                        }
                    }

                    for d in 0..head_dim {
                        out.write::<T>(
                            (o_base + d as i64) as usize,
                            T::from_f32(accumulator[d] / total),
                        );
                    }
                }
            }
        }
    }
}
