use crate::{
    ArrayElement, DataType,
    backends::common::{Backend, NativeBuffer},
    data_type::array_size_in_bytes,
};

/// Memory-layout flags carried alongside an array's strides.
///
/// `contiguous` means the elements occupy one dense span of memory in some
/// order; `row_contiguous`/`col_contiguous` additionally pin that order to
/// row-major/column-major over the logical shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    pub contiguous: bool,
    pub row_contiguous: bool,
    pub col_contiguous: bool,
}

impl Flags {
    pub const fn row_major() -> Self {
        Self {
            contiguous: true,
            row_contiguous: true,
            col_contiguous: false,
        }
    }
}

/// An n-dimensional strided view over backend memory.
///
/// The view is immutable metadata: shape, per-dimension element strides, a
/// data type and layout flags. The backing buffer is shared and owned by the
/// backend; cloning an `Array` clones the view, not the storage. A stride of
/// zero marks a broadcast dimension.
#[derive(Debug)]
pub struct Array<B: Backend> {
    buffer: B::NativeBuffer,
    shape: Box<[usize]>,
    strides: Box<[i64]>,
    data_type: DataType,
    flags: Flags,
    donatable: bool,
}

// Derived `Clone` would demand `B: Clone`; only the buffer handle needs it.
impl<B: Backend> Clone for Array<B> {
    fn clone(&self) -> Self {
        Self {
            buffer: self.buffer.clone(),
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            data_type: self.data_type,
            flags: self.flags,
            donatable: self.donatable,
        }
    }
}

pub fn row_major_strides(shape: &[usize]) -> Box<[i64]> {
    let mut strides = vec![1i64; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1] as i64;
    }
    strides.into_boxed_slice()
}

/// Derives layout flags from a shape/strides pair.
pub fn layout_flags(
    shape: &[usize],
    strides: &[i64],
) -> Flags {
    let num_elements: usize = shape.iter().product();
    if num_elements <= 1 {
        return Flags {
            contiguous: true,
            row_contiguous: true,
            col_contiguous: true,
        };
    }

    let mut row = true;
    let mut expected = 1i64;
    for axis in (0..shape.len()).rev() {
        if shape[axis] > 1 && strides[axis] != expected {
            row = false;
            break;
        }
        expected *= shape[axis] as i64;
    }

    let mut col = true;
    let mut expected = 1i64;
    for axis in 0..shape.len() {
        if shape[axis] > 1 && strides[axis] != expected {
            col = false;
            break;
        }
        expected *= shape[axis] as i64;
    }

    Flags {
        contiguous: row || col,
        row_contiguous: row,
        col_contiguous: col,
    }
}

impl<B: Backend> Array<B> {
    /// Builds an array from explicit parts.
    ///
    /// # Safety
    /// The caller must guarantee that every logical index stays within the
    /// buffer once offset by `strides`.
    pub unsafe fn from_parts(
        buffer: B::NativeBuffer,
        shape: &[usize],
        strides: &[i64],
        data_type: DataType,
        flags: Flags,
    ) -> Self {
        assert_eq!(
            shape.len(),
            strides.len(),
            "Shape {:?} and strides {:?} must have equal rank",
            shape,
            strides
        );
        let required_bytes = array_size_in_bytes(shape, data_type);
        assert!(
            required_bytes <= buffer.length(),
            "Shape {:?} with data type {:?} requires {} bytes, but buffer length is {} bytes",
            shape,
            data_type,
            required_bytes,
            buffer.length()
        );
        Self {
            buffer,
            shape: shape.into(),
            strides: strides.into(),
            data_type,
            flags,
            donatable: false,
        }
    }

    /// Builds a dense row-major array over the full buffer.
    pub fn new_contiguous(
        buffer: B::NativeBuffer,
        shape: &[usize],
        data_type: DataType,
    ) -> Self {
        let strides = row_major_strides(shape);
        unsafe {
            Self::from_parts(buffer, shape, &strides, data_type, Flags::row_major())
        }
    }

    /// Reuses `other`'s storage, strides and flags under a new shape.
    /// This is the zero-copy donation path; the result does not inherit
    /// `other`'s donatable bit.
    pub fn sharing(
        other: &Array<B>,
        shape: &[usize],
    ) -> Self {
        assert_eq!(
            shape.iter().product::<usize>(),
            other.num_elements(),
            "Storage donation requires equal element counts"
        );
        Self {
            buffer: other.buffer.clone(),
            shape: shape.into(),
            strides: other.strides.clone(),
            data_type: other.data_type,
            flags: other.flags,
            donatable: false,
        }
    }

    pub fn buffer(&self) -> &B::NativeBuffer {
        &self.buffer
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[i64] {
        &self.strides
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn dim(
        &self,
        axis: usize,
    ) -> usize {
        self.shape[axis]
    }

    pub fn stride(
        &self,
        axis: usize,
    ) -> i64 {
        self.strides[axis]
    }

    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn size_in_bytes(&self) -> usize {
        array_size_in_bytes(&self.shape, self.data_type)
    }

    /// May this array's storage be reused as an operation's output?
    pub fn is_donatable(&self) -> bool {
        self.donatable
    }

    pub fn set_donatable(
        &mut self,
        donatable: bool,
    ) {
        self.donatable = donatable;
    }

    /// Element offset of a logical index, in elements from the buffer base.
    pub fn element_offset(
        &self,
        index: &[usize],
    ) -> i64 {
        debug_assert_eq!(index.len(), self.shape.len());
        index
            .iter()
            .zip(self.strides.iter())
            .map(|(&i, &s)| i as i64 * s)
            .sum()
    }

    fn validate_element_type<T: ArrayElement>(&self) {
        assert_eq!(
            T::data_type(),
            self.data_type,
            "Invalid data type, expected {:?}, actual {:?}",
            T::data_type(),
            self.data_type
        );
    }

    /// Views the whole backing buffer as a flat element slice.
    pub fn as_slice<T: ArrayElement>(&self) -> &[T] {
        self.validate_element_type::<T>();
        unsafe {
            std::slice::from_raw_parts(
                self.buffer.cpu_ptr().as_ptr() as *const T,
                self.buffer.length() / self.data_type.size_in_bytes(),
            )
        }
    }

    pub fn as_slice_mut<T: ArrayElement>(&mut self) -> &mut [T] {
        self.validate_element_type::<T>();
        unsafe {
            std::slice::from_raw_parts_mut(
                self.buffer.cpu_ptr().as_ptr() as *mut T,
                self.buffer.length() / self.data_type.size_in_bytes(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_major_strides() {
        assert_eq!(
            row_major_strides(&[2, 3, 4]).as_ref(),
            &[12i64, 4, 1]
        );
        assert_eq!(row_major_strides(&[5]).as_ref(), &[1i64]);
    }

    #[test]
    fn test_layout_flags() {
        let flags = layout_flags(&[2, 3], &[3, 1]);
        assert!(flags.row_contiguous);
        assert!(!flags.col_contiguous);

        let flags = layout_flags(&[2, 3], &[1, 2]);
        assert!(!flags.row_contiguous);
        assert!(flags.col_contiguous);

        let flags = layout_flags(&[2, 3], &[6, 2]);
        assert!(!flags.contiguous);

        // Unit dimensions do not constrain the layout.
        let flags = layout_flags(&[1, 3], &[100, 1]);
        assert!(flags.row_contiguous);
    }
}
