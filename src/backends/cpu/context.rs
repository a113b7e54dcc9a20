use std::{collections::HashMap, sync::Mutex};

use half::{bf16, f16};

use super::{Cpu, buffer::CpuBuffer, error::CpuError, pipeline::CpuPipelineState};
use crate::{
    Array, ArrayElement, DataType,
    backends::common::{Context, DeviceClass, FunctionConstantValues},
};

/// A host execution context. Work dispatched through its encoders runs
/// immediately, so stream order is trivially call order.
pub struct CpuContext {
    device_class: DeviceClass,
    pipelines: Mutex<HashMap<String, CpuPipelineState>>,
    temporaries: Mutex<Vec<Array<Cpu>>>,
}

impl CpuContext {
    pub fn new(device_class: DeviceClass) -> Self {
        Self {
            device_class,
            pipelines: Mutex::new(HashMap::new()),
            temporaries: Mutex::new(Vec::new()),
        }
    }

    pub fn compute_encoder(&self) -> super::CpuComputeEncoder {
        super::CpuComputeEncoder::new()
    }

    /// Drops every temporary registered since the last synchronization.
    /// All dispatched work has already run by the time this is called.
    pub fn synchronize(&self) {
        self.temporaries.lock().unwrap().clear();
    }

    fn cached_pipeline(
        &self,
        cache_key: &str,
        function_name: &str,
        constants: &FunctionConstantValues,
    ) -> Result<CpuPipelineState, CpuError> {
        let mut pipelines = self.pipelines.lock().unwrap();
        if let Some(pipeline) = pipelines.get(cache_key) {
            return Ok(pipeline.clone());
        }
        let pipeline = CpuPipelineState::parse(function_name, constants)?;
        pipelines.insert(cache_key.to_string(), pipeline.clone());
        Ok(pipeline)
    }
}

impl Context for CpuContext {
    type Backend = Cpu;

    fn device_class(&self) -> DeviceClass {
        self.device_class
    }

    fn malloc(
        &self,
        nbytes: usize,
    ) -> Result<CpuBuffer, CpuError> {
        Ok(CpuBuffer::new_zeroed(nbytes))
    }

    fn compute_pipeline_state(
        &self,
        base_name: &str,
        hash_name: &str,
        constants: &FunctionConstantValues,
    ) -> Result<CpuPipelineState, CpuError> {
        self.cached_pipeline(hash_name, base_name, constants)
    }

    fn compute_pipeline_state_exact(
        &self,
        function_name: &str,
    ) -> Result<CpuPipelineState, CpuError> {
        self.cached_pipeline(
            function_name,
            function_name,
            &FunctionConstantValues::new(),
        )
    }

    fn copy_row_major(
        &self,
        array: &Array<Cpu>,
    ) -> Result<Array<Cpu>, CpuError> {
        let buffer = self.malloc(array.size_in_bytes())?;
        let mut dense =
            Array::new_contiguous(buffer, array.shape(), array.data_type());
        match array.data_type() {
            DataType::F32 => gather::<f32>(array, &mut dense),
            DataType::F16 => gather::<f16>(array, &mut dense),
            DataType::BF16 => gather::<bf16>(array, &mut dense),
        }
        // The copy is exclusively ours, so a later operation may take it over.
        dense.set_donatable(true);
        Ok(dense)
    }

    fn add_temporary(
        &self,
        array: Array<Cpu>,
    ) {
        self.temporaries.lock().unwrap().push(array);
    }

    fn add_temporaries(
        &self,
        arrays: Vec<Array<Cpu>>,
    ) {
        self.temporaries.lock().unwrap().extend(arrays);
    }
}

fn gather<T: ArrayElement>(
    src: &Array<Cpu>,
    dst: &mut Array<Cpu>,
) {
    let shape = src.shape().to_vec();
    let num_elements = src.num_elements();
    let src_elements = src.as_slice::<T>();
    let dst_elements = dst.as_slice_mut::<T>();
    let mut index = vec![0usize; shape.len()];
    for flat in 0..num_elements {
        dst_elements[flat] = src_elements[src.element_offset(&index) as usize];
        for axis in (0..shape.len()).rev() {
            index[axis] += 1;
            if index[axis] < shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backends::common::NativeBuffer,
        kernel::attention::specialization::vector_attention_kernel,
    };

    #[test]
    fn test_pipeline_cache_returns_same_instance() {
        let context = CpuContext::new(DeviceClass::Base);
        let request = vector_attention_kernel(DataType::F32, 64, 64, false, false);
        let first = context
            .compute_pipeline_state(
                &request.base_name,
                &request.hash_name,
                &request.constants,
            )
            .unwrap();
        let second = context
            .compute_pipeline_state(
                &request.base_name,
                &request.hash_name,
                &request.constants,
            )
            .unwrap();
        assert!(first.same_instance(&second));

        let masked = vector_attention_kernel(DataType::F32, 64, 64, true, false);
        let third = context
            .compute_pipeline_state(
                &masked.base_name,
                &masked.hash_name,
                &masked.constants,
            )
            .unwrap();
        assert!(!first.same_instance(&third));
    }

    #[test]
    fn test_copy_row_major_gathers_strided_input() {
        let context = CpuContext::new(DeviceClass::Base);
        let buffer = context.malloc(6 * 4).unwrap();
        let mut src = Array::<Cpu>::new_contiguous(buffer, &[2, 3], DataType::F32);
        src.as_slice_mut::<f32>()
            .copy_from_slice(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);

        // Transposed view of the same storage.
        let transposed = unsafe {
            Array::<Cpu>::from_parts(
                src.buffer().clone(),
                &[3, 2],
                &[1, 3],
                DataType::F32,
                crate::array::layout_flags(&[3, 2], &[1, 3]),
            )
        };
        let dense = context.copy_row_major(&transposed).unwrap();
        assert_eq!(
            dense.as_slice::<f32>(),
            &[0.0, 3.0, 1.0, 4.0, 2.0, 5.0]
        );
        assert!(dense.flags().row_contiguous);
        assert!(dense.is_donatable());
        assert_ne!(dense.buffer().id(), src.buffer().id());
    }
}
