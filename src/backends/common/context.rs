use super::{Backend, FunctionConstantValues};
use crate::Array;

/// Capability tier of the executing device, reported by the backend.
///
/// The attention router only distinguishes high-end tiers from the rest when
/// deciding whether an extra reduction pass pays for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Ultra,
    Max,
    Pro,
    Base,
}

impl DeviceClass {
    pub fn is_high_end(&self) -> bool {
        matches!(self, DeviceClass::Ultra | DeviceClass::Max)
    }
}

/// Device/stream services consumed by the dispatch layer.
///
/// All work issued through one context targets a single execution stream:
/// submission order is execution order, and no barrier is needed between
/// consecutive dispatches or between a layout copy and the kernel that reads
/// it.
pub trait Context: Sized {
    type Backend: Backend<Context = Self>;

    fn device_class(&self) -> DeviceClass;

    /// Raw device allocation. Failure is fatal for the current call.
    fn malloc(
        &self,
        nbytes: usize,
    ) -> Result<<Self::Backend as Backend>::NativeBuffer, <Self::Backend as Backend>::Error>;

    /// Fetches a kernel specialized by function constants.
    ///
    /// `hash_name` is the cache key: two fetches with identical hash names
    /// must resolve to the same compiled pipeline, with at most one
    /// compilation per distinct hash name under concurrent access.
    fn compute_pipeline_state(
        &self,
        base_name: &str,
        hash_name: &str,
        constants: &FunctionConstantValues,
    ) -> Result<<Self::Backend as Backend>::PipelineState, <Self::Backend as Backend>::Error>;

    /// Fetches an unspecialized kernel by exact function name.
    fn compute_pipeline_state_exact(
        &self,
        function_name: &str,
    ) -> Result<<Self::Backend as Backend>::PipelineState, <Self::Backend as Backend>::Error>;

    /// Materializes a dense row-major copy of `array` on the stream.
    fn copy_row_major(
        &self,
        array: &Array<Self::Backend>,
    ) -> Result<Array<Self::Backend>, <Self::Backend as Backend>::Error>;

    /// Registers a stream-scoped temporary: the buffer is released only after
    /// all enqueued work referencing it has retired.
    fn add_temporary(
        &self,
        array: Array<Self::Backend>,
    );

    fn add_temporaries(
        &self,
        arrays: Vec<Array<Self::Backend>>,
    );
}
