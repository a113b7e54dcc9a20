use std::{os::raw::c_void, ptr::NonNull};

use super::Backend;

pub trait NativeBuffer: Send + Sync {
    type Backend: Backend;

    fn length(&self) -> usize;

    /// Stable identity of the underlying allocation, independent of views.
    fn id(&self) -> usize;

    fn cpu_ptr(&self) -> NonNull<c_void>;
}
