//! Kernel name parsing.
//!
//! A pipeline on this backend is a parsed description of the requested
//! function: the name encodes the kernel family and its shape
//! specialization, the function constants carry the boolean flags. The
//! interpreter executes the description at dispatch time.

use std::sync::Arc;

use super::error::CpuError;
use crate::{
    DataType,
    backends::common::FunctionConstantValues,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VectorSpec {
    pub data_type: DataType,
    pub head_dim: usize,
    pub value_head_dim: usize,
    pub has_mask: bool,
    pub query_transposed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TileSpec {
    pub data_type: DataType,
    pub mask_data_type: DataType,
    pub query_block: usize,
    pub key_block: usize,
    pub head_dim: usize,
    pub align_q: bool,
    pub align_k: bool,
    pub has_mask: bool,
    pub do_causal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum KernelSpec {
    Vector(VectorSpec),
    VectorTwoPassPartial(VectorSpec),
    VectorTwoPassFinalize {
        data_type: DataType,
        value_head_dim: usize,
    },
    Tile(TileSpec),
}

/// A compiled kernel handle. Clones share the parsed description, so two
/// fetches that hit the same cache entry compare as the same instance.
#[derive(Debug, Clone)]
pub struct CpuPipelineState {
    spec: Arc<KernelSpec>,
}

impl CpuPipelineState {
    pub(crate) fn parse(
        function_name: &str,
        constants: &FunctionConstantValues,
    ) -> Result<Self, CpuError> {
        let spec = parse_kernel(function_name, constants)
            .ok_or_else(|| CpuError::FunctionNotFound(function_name.to_string()))?;
        Ok(Self {
            spec: Arc::new(spec),
        })
    }

    pub(crate) fn spec(&self) -> &KernelSpec {
        &self.spec
    }

    pub fn same_instance(
        &self,
        other: &Self,
    ) -> bool {
        Arc::ptr_eq(&self.spec, &other.spec)
    }
}

fn parse_kernel(
    name: &str,
    constants: &FunctionConstantValues,
) -> Option<KernelSpec> {
    // The two-pass prefixes extend the plain vector prefix, so they must be
    // tried first.
    if let Some(rest) = name.strip_prefix("sdpa_vector_2pass_2_") {
        let (data_type, dims) = parse_data_type(rest)?;
        let mut dims = dims.split('_');
        let value_head_dim = dims.next()?.parse().ok()?;
        if dims.next().is_some() {
            return None;
        }
        return Some(KernelSpec::VectorTwoPassFinalize {
            data_type,
            value_head_dim,
        });
    }
    if let Some(rest) = name.strip_prefix("sdpa_vector_2pass_1_") {
        return Some(KernelSpec::VectorTwoPassPartial(parse_vector(
            rest, constants,
        )?));
    }
    if let Some(rest) = name.strip_prefix("sdpa_vector_") {
        return Some(KernelSpec::Vector(parse_vector(rest, constants)?));
    }
    if let Some(rest) = name.strip_prefix("steel_attention_") {
        return Some(KernelSpec::Tile(parse_tile(rest, constants)?));
    }
    None
}

/// Splits a leading data-type suffix off `text`, returning it with the rest
/// of the string (without the separating underscore).
fn parse_data_type(text: &str) -> Option<(DataType, &str)> {
    let (suffix, rest) = text.split_once('_')?;
    Some((DataType::from_function_name_suffix(suffix)?, rest))
}

fn parse_vector(
    rest: &str,
    constants: &FunctionConstantValues,
) -> Option<VectorSpec> {
    let (data_type, dims) = parse_data_type(rest)?;
    let mut dims = dims.split('_');
    let head_dim = dims.next()?.parse().ok()?;
    let value_head_dim = dims.next()?.parse().ok()?;
    if dims.next().is_some() {
        return None;
    }
    Some(VectorSpec {
        data_type,
        head_dim,
        value_head_dim,
        has_mask: constants.bool_at(20)?,
        query_transposed: constants.bool_at(21)?,
    })
}

fn parse_tile(
    rest: &str,
    constants: &FunctionConstantValues,
) -> Option<TileSpec> {
    let (data_type, rest) = parse_data_type(rest)?;
    let mut parts = rest.split('_');
    let query_block = parts.next()?.strip_prefix("bq")?.parse().ok()?;
    let key_block = parts.next()?.strip_prefix("bk")?.parse().ok()?;
    let head_dim = parts.next()?.strip_prefix("bd")?.parse().ok()?;
    let _wm: usize = parts.next()?.strip_prefix("wm")?.parse().ok()?;
    let _wn: usize = parts.next()?.strip_prefix("wn")?.parse().ok()?;
    let mask_data_type =
        DataType::from_function_name_suffix(parts.next()?.strip_prefix("mask")?)?;
    if parts.next().is_some() {
        return None;
    }
    Some(TileSpec {
        data_type,
        mask_data_type,
        query_block,
        key_block,
        head_dim,
        align_q: constants.bool_at(200)?,
        align_k: constants.bool_at(201)?,
        has_mask: constants.bool_at(300)?,
        do_causal: constants.bool_at(301)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::attention::specialization::{
        tile_attention_kernel, vector_attention_kernel,
        vector_two_pass_finalize_name, vector_two_pass_partial_kernel,
    };

    #[test]
    fn test_parse_vector_names() {
        let request = vector_attention_kernel(DataType::F16, 64, 64, true, false);
        let pipeline =
            CpuPipelineState::parse(&request.base_name, &request.constants)
                .unwrap();
        assert_eq!(
            *pipeline.spec(),
            KernelSpec::Vector(VectorSpec {
                data_type: DataType::F16,
                head_dim: 64,
                value_head_dim: 64,
                has_mask: true,
                query_transposed: false,
            })
        );

        let request =
            vector_two_pass_partial_kernel(DataType::BF16, 128, 64, false, true);
        let pipeline =
            CpuPipelineState::parse(&request.base_name, &request.constants)
                .unwrap();
        assert_eq!(
            *pipeline.spec(),
            KernelSpec::VectorTwoPassPartial(VectorSpec {
                data_type: DataType::BF16,
                head_dim: 128,
                value_head_dim: 64,
                has_mask: false,
                query_transposed: true,
            })
        );

        let name = vector_two_pass_finalize_name(DataType::F32, 96);
        let pipeline =
            CpuPipelineState::parse(&name, &FunctionConstantValues::new())
                .unwrap();
        assert_eq!(
            *pipeline.spec(),
            KernelSpec::VectorTwoPassFinalize {
                data_type: DataType::F32,
                value_head_dim: 96,
            }
        );
    }

    #[test]
    fn test_parse_tile_name() {
        let request = tile_attention_kernel(
            DataType::F32,
            DataType::F16,
            128,
            32,
            16,
            false,
            true,
            true,
            false,
        );
        let pipeline =
            CpuPipelineState::parse(&request.base_name, &request.constants)
                .unwrap();
        assert_eq!(
            *pipeline.spec(),
            KernelSpec::Tile(TileSpec {
                data_type: DataType::F32,
                mask_data_type: DataType::F16,
                query_block: 32,
                key_block: 16,
                head_dim: 128,
                align_q: false,
                align_k: true,
                has_mask: true,
                do_causal: false,
            })
        );
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        let constants = FunctionConstantValues::new();
        for name in [
            "gemm_f32",
            "sdpa_vector_f32_64",
            "sdpa_vector_i8_64_64",
            "steel_attention_f32_bq32",
        ] {
            assert!(CpuPipelineState::parse(name, &constants).is_err());
        }
    }
}
