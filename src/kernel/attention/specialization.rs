//! Kernel identity: base names select a compiled program family, hash names
//! key the specialization cache, and function constants carry the boolean
//! specialization flags.

use crate::{DataType, backends::common::FunctionConstantValues};

/// Warp-tiling constants baked into the tiled kernel family.
pub const WM: usize = 4;
pub const WN: usize = 1;

/// Query tile size of the tiled path.
pub const BQ: usize = 32;

/// Key tile size of the tiled path; wider heads get shorter key tiles to
/// keep the tile footprint bounded.
pub const fn key_block_size(head_dim: usize) -> usize {
    if head_dim < 128 { 32 } else { 16 }
}

/// Everything needed to fetch one compiled kernel variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelRequest {
    pub base_name: String,
    pub hash_name: String,
    pub constants: FunctionConstantValues,
}

pub fn tile_attention_kernel(
    data_type: DataType,
    mask_data_type: DataType,
    head_dim: usize,
    bq: usize,
    bk: usize,
    align_q: bool,
    align_k: bool,
    has_mask: bool,
    do_causal: bool,
) -> KernelRequest {
    let base_name = format!(
        "steel_attention_{}_bq{}_bk{}_bd{}_wm{}_wn{}_mask{}",
        data_type.function_name_suffix(),
        bq,
        bk,
        head_dim,
        WM,
        WN,
        mask_data_type.function_name_suffix(),
    );

    let hash_name = format!(
        "{}_aq{}_ak{}_m{}_c{}",
        base_name, align_q as u8, align_k as u8, has_mask as u8, do_causal as u8
    );

    let mut constants = FunctionConstantValues::new();
    constants.set_bool(align_q, 200);
    constants.set_bool(align_k, 201);
    constants.set_bool(has_mask, 300);
    constants.set_bool(do_causal, 301);

    KernelRequest {
        base_name,
        hash_name,
        constants,
    }
}

fn vector_kernel(
    prefix: &str,
    data_type: DataType,
    head_dim: usize,
    value_head_dim: usize,
    has_mask: bool,
    query_transposed: bool,
) -> KernelRequest {
    let base_name = format!(
        "{}_{}_{}_{}",
        prefix,
        data_type.function_name_suffix(),
        head_dim,
        value_head_dim
    );

    let mut hash_name = base_name.clone();
    hash_name.push_str(if has_mask { "_mask" } else { "_nomask" });
    hash_name.push_str(if query_transposed { "_qt" } else { "_qnt" });

    let mut constants = FunctionConstantValues::new();
    constants.set_bool(has_mask, 20);
    constants.set_bool(query_transposed, 21);

    KernelRequest {
        base_name,
        hash_name,
        constants,
    }
}

pub fn vector_attention_kernel(
    data_type: DataType,
    head_dim: usize,
    value_head_dim: usize,
    has_mask: bool,
    query_transposed: bool,
) -> KernelRequest {
    vector_kernel(
        "sdpa_vector",
        data_type,
        head_dim,
        value_head_dim,
        has_mask,
        query_transposed,
    )
}

pub fn vector_two_pass_partial_kernel(
    data_type: DataType,
    head_dim: usize,
    value_head_dim: usize,
    has_mask: bool,
    query_transposed: bool,
) -> KernelRequest {
    vector_kernel(
        "sdpa_vector_2pass_1",
        data_type,
        head_dim,
        value_head_dim,
        has_mask,
        query_transposed,
    )
}

/// The finalize kernel has no specialization flags and is fetched by exact
/// name, without constant binding.
pub fn vector_two_pass_finalize_name(
    data_type: DataType,
    value_head_dim: usize,
) -> String {
    format!(
        "sdpa_vector_2pass_2_{}_{}",
        data_type.function_name_suffix(),
        value_head_dim
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_kernel_names() {
        let request = tile_attention_kernel(
            DataType::F16,
            DataType::F32,
            128,
            32,
            16,
            true,
            false,
            true,
            true,
        );
        assert_eq!(
            request.base_name,
            "steel_attention_f16_bq32_bk16_bd128_wm4_wn1_maskf32"
        );
        assert_eq!(
            request.hash_name,
            "steel_attention_f16_bq32_bk16_bd128_wm4_wn1_maskf32_aq1_ak0_m1_c1"
        );
        assert_eq!(request.constants.bool_at(200), Some(true));
        assert_eq!(request.constants.bool_at(201), Some(false));
        assert_eq!(request.constants.bool_at(300), Some(true));
        assert_eq!(request.constants.bool_at(301), Some(true));
    }

    #[test]
    fn test_vector_kernel_names() {
        let request =
            vector_attention_kernel(DataType::F32, 64, 64, false, true);
        assert_eq!(request.base_name, "sdpa_vector_f32_64_64");
        assert_eq!(request.hash_name, "sdpa_vector_f32_64_64_nomask_qt");

        let request =
            vector_two_pass_partial_kernel(DataType::BF16, 128, 64, true, false);
        assert_eq!(request.base_name, "sdpa_vector_2pass_1_bf16_128_64");
        assert_eq!(
            request.hash_name,
            "sdpa_vector_2pass_1_bf16_128_64_mask_qnt"
        );

        assert_eq!(
            vector_two_pass_finalize_name(DataType::F16, 64),
            "sdpa_vector_2pass_2_f16_64"
        );
    }

    #[test]
    fn test_key_block_size() {
        assert_eq!(key_block_size(64), 32);
        assert_eq!(key_block_size(127), 32);
        assert_eq!(key_block_size(128), 16);
        assert_eq!(key_block_size(256), 16);
    }
}
