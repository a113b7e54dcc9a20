use std::{cell::UnsafeCell, os::raw::c_void, ptr::NonNull, sync::Arc};

use super::Cpu;
use crate::backends::common::NativeBuffer;

struct Storage {
    // Stored as u64 words so the base pointer is aligned for every element
    // type an array may carry.
    words: UnsafeCell<Box<[u64]>>,
    nbytes: usize,
}

// Interior mutability is only exercised through raw pointers by code that
// already runs in stream order, matching how device memory behaves.
unsafe impl Send for Storage {}
unsafe impl Sync for Storage {}

/// A reference-counted host allocation.
#[derive(Clone)]
pub struct CpuBuffer {
    storage: Arc<Storage>,
}

impl CpuBuffer {
    pub fn new_zeroed(nbytes: usize) -> Self {
        let words = nbytes.div_ceil(size_of::<u64>());
        Self {
            storage: Arc::new(Storage {
                words: UnsafeCell::new(vec![0u64; words].into_boxed_slice()),
                nbytes,
            }),
        }
    }
}

impl NativeBuffer for CpuBuffer {
    type Backend = Cpu;

    fn length(&self) -> usize {
        self.storage.nbytes
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.storage) as usize
    }

    fn cpu_ptr(&self) -> NonNull<c_void> {
        let ptr = unsafe { (*self.storage.words.get()).as_mut_ptr() };
        NonNull::new(ptr as *mut c_void).unwrap_or(NonNull::dangling())
    }
}

impl std::fmt::Debug for CpuBuffer {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("CpuBuffer")
            .field("id", &NativeBuffer::id(self))
            .field("length", &self.length())
            .finish()
    }
}
