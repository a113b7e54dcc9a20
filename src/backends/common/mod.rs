mod backend;
mod compute_encoder;
mod context;
mod function_constants;
pub mod gpu_types;
mod native_buffer;

pub use backend::Backend;
pub use compute_encoder::{ComputeEncoder, GridSize};
pub use context::{Context, DeviceClass};
pub use function_constants::{ConstantValue, FunctionConstantValues};
pub use native_buffer::NativeBuffer;
