/// A compile-time constant bound to a fixed specialization slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstantValue {
    Bool(bool),
    I32(i32),
}

/// Ordered set of compile-time constants used to specialize a kernel.
///
/// Kernels specialized with different constant sets are distinct compiled
/// artifacts even though they share source; callers must reflect every
/// constant in the cache hash name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionConstantValues {
    values: Vec<(u32, ConstantValue)>,
}

impl FunctionConstantValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bool(
        &mut self,
        value: bool,
        index: u32,
    ) {
        self.values.push((index, ConstantValue::Bool(value)));
    }

    pub fn set_i32(
        &mut self,
        value: i32,
        index: u32,
    ) {
        self.values.push((index, ConstantValue::I32(value)));
    }

    pub fn bool_at(
        &self,
        index: u32,
    ) -> Option<bool> {
        self.values.iter().rev().find_map(|&(slot, value)| {
            match value {
                ConstantValue::Bool(flag) if slot == index => Some(flag),
                _ => None,
            }
        })
    }

    pub fn i32_at(
        &self,
        index: u32,
    ) -> Option<i32> {
        self.values.iter().rev().find_map(|&(slot, value)| {
            match value {
                ConstantValue::I32(scalar) if slot == index => Some(scalar),
                _ => None,
            }
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &(u32, ConstantValue)> {
        self.values.iter()
    }
}
