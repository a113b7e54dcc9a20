pub mod attention;

pub use attention::{AttnMaskParams, AttnParams, TWO_PASS_BLOCKS};
