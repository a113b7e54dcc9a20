use std::error::Error;

use super::{ComputeEncoder, Context, NativeBuffer};

pub trait Backend: Sized + 'static {
    type NativeBuffer: NativeBuffer<Backend = Self> + Clone + std::fmt::Debug;
    type Context: Context<Backend = Self>;
    type ComputeEncoder: ComputeEncoder<Backend = Self>;
    type PipelineState: Clone;
    type Error: Error;
}
