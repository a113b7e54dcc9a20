use bytemuck::NoUninit;

use super::Backend;
use crate::Array;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSize {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl GridSize {
    pub const fn new(
        width: usize,
        height: usize,
        depth: usize,
    ) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }
}

/// Argument binding and launch surface of a compute command encoder.
///
/// Bindings persist across dispatches on the same encoder, so a later
/// pipeline may rebind only the slots it changes.
pub trait ComputeEncoder {
    type Backend: Backend;

    fn set_compute_pipeline_state(
        &self,
        pipeline: &<Self::Backend as Backend>::PipelineState,
    );

    fn set_input_array(
        &self,
        array: &Array<Self::Backend>,
        index: u32,
    );

    fn set_output_array(
        &self,
        array: &Array<Self::Backend>,
        index: u32,
    );

    /// Binds a value-type argument by raw bytes.
    fn set_bytes<T: NoUninit>(
        &self,
        value: &T,
        index: u32,
    );

    fn dispatch_threadgroups(
        &self,
        grid: GridSize,
        group: GridSize,
    );
}
