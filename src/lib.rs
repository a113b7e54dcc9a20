pub mod array;
pub mod backends;
pub mod data_type;
pub mod kernel;

pub use array::{Array, Flags};
pub use data_type::{ArrayElement, DataType};
pub use kernel::attention::scaled_dot_product_attention;
