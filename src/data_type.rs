use bytemuck::Pod;
use half::{bf16, f16};
use num_traits::NumCast;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash)]
pub enum DataType {
    BF16,
    F16,
    F32,
}

impl DataType {
    pub const fn size_in_bytes(&self) -> usize {
        match self {
            DataType::BF16 | DataType::F16 => 2,
            DataType::F32 => 4,
        }
    }

    /// Suffix used when composing kernel function names.
    pub const fn function_name_suffix(&self) -> &'static str {
        match self {
            DataType::BF16 => "bf16",
            DataType::F16 => "f16",
            DataType::F32 => "f32",
        }
    }

    pub fn from_function_name_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "bf16" => Some(DataType::BF16),
            "f16" => Some(DataType::F16),
            "f32" => Some(DataType::F32),
            _ => None,
        }
    }
}

pub trait ArrayElement: NumCast + Pod {
    fn data_type() -> DataType;
    fn to_f32(self) -> f32;
    fn from_f32(value: f32) -> Self;
}

impl ArrayElement for f32 {
    fn data_type() -> DataType {
        DataType::F32
    }

    fn to_f32(self) -> f32 {
        self
    }

    fn from_f32(value: f32) -> Self {
        value
    }
}

impl ArrayElement for f16 {
    fn data_type() -> DataType {
        DataType::F16
    }

    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    fn from_f32(value: f32) -> Self {
        f16::from_f32(value)
    }
}

impl ArrayElement for bf16 {
    fn data_type() -> DataType {
        DataType::BF16
    }

    fn to_f32(self) -> f32 {
        bf16::to_f32(self)
    }

    fn from_f32(value: f32) -> Self {
        bf16::from_f32(value)
    }
}

pub fn array_size_in_bytes(
    shape: &[usize],
    data_type: DataType,
) -> usize {
    shape.iter().product::<usize>() * data_type.size_in_bytes()
}
