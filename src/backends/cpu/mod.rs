//! Host-memory backend.
//!
//! Kernels are interpreted: fetching a pipeline parses the function name and
//! its specialization constants into a kernel description, and dispatching
//! executes that description immediately against the bound buffers. Useful as
//! a reference implementation and for exercising the dispatch layer without a
//! device.

mod buffer;
mod compute_encoder;
mod context;
mod error;
mod interpreter;
mod pipeline;

pub use buffer::CpuBuffer;
pub use compute_encoder::CpuComputeEncoder;
pub use context::CpuContext;
pub use error::CpuError;
pub use pipeline::CpuPipelineState;

use super::common::Backend;

#[derive(Debug, Clone, Copy)]
pub struct Cpu;

impl Backend for Cpu {
    type ComputeEncoder = CpuComputeEncoder;
    type Context = CpuContext;
    type Error = CpuError;
    type NativeBuffer = CpuBuffer;
    type PipelineState = CpuPipelineState;
}
