use std::{collections::HashMap, sync::Mutex};

use bytemuck::{AnyBitPattern, NoUninit};

use super::{
    Cpu, buffer::CpuBuffer, interpreter, pipeline::CpuPipelineState,
};
use crate::{
    Array,
    backends::common::{ComputeEncoder, GridSize},
};

/// Arguments bound on the encoder, as seen by one dispatch.
///
/// Bindings persist until overwritten, so a dispatch observes the union of
/// everything set since the encoder was created.
pub(crate) struct Bindings {
    buffers: HashMap<u32, CpuBuffer>,
    bytes: HashMap<u32, Vec<u8>>,
}

impl Bindings {
    pub(crate) fn buffer(
        &self,
        index: u32,
    ) -> &CpuBuffer {
        self.buffers
            .get(&index)
            .unwrap_or_else(|| panic!("No buffer bound at index {index}"))
    }

    pub(crate) fn scalar<T: AnyBitPattern>(
        &self,
        index: u32,
    ) -> T {
        let bytes = self
            .bytes
            .get(&index)
            .unwrap_or_else(|| panic!("No bytes bound at index {index}"));
        bytemuck::pod_read_unaligned(bytes)
    }
}

struct EncoderState {
    pipeline: Option<CpuPipelineState>,
    buffers: HashMap<u32, CpuBuffer>,
    bytes: HashMap<u32, Vec<u8>>,
}

/// Records bindings and runs the interpreter on dispatch.
pub struct CpuComputeEncoder {
    state: Mutex<EncoderState>,
}

impl CpuComputeEncoder {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(EncoderState {
                pipeline: None,
                buffers: HashMap::new(),
                bytes: HashMap::new(),
            }),
        }
    }

    fn bind_buffer(
        &self,
        array: &Array<Cpu>,
        index: u32,
    ) {
        self.state
            .lock()
            .unwrap()
            .buffers
            .insert(index, array.buffer().clone());
    }
}

impl ComputeEncoder for CpuComputeEncoder {
    type Backend = Cpu;

    fn set_compute_pipeline_state(
        &self,
        pipeline: &CpuPipelineState,
    ) {
        self.state.lock().unwrap().pipeline = Some(pipeline.clone());
    }

    fn set_input_array(
        &self,
        array: &Array<Cpu>,
        index: u32,
    ) {
        self.bind_buffer(array, index);
    }

    fn set_output_array(
        &self,
        array: &Array<Cpu>,
        index: u32,
    ) {
        self.bind_buffer(array, index);
    }

    fn set_bytes<T: NoUninit>(
        &self,
        value: &T,
        index: u32,
    ) {
        self.state
            .lock()
            .unwrap()
            .bytes
            .insert(index, bytemuck::bytes_of(value).to_vec());
    }

    fn dispatch_threadgroups(
        &self,
        grid: GridSize,
        group: GridSize,
    ) {
        let state = self.state.lock().unwrap();
        let pipeline = state
            .pipeline
            .as_ref()
            .unwrap_or_else(|| panic!("Dispatch without a pipeline"))
            .clone();
        let bindings = Bindings {
            buffers: state.buffers.clone(),
            bytes: state.bytes.clone(),
        };
        drop(state);
        interpreter::execute(pipeline.spec(), &bindings, grid, group);
    }
}
