use thiserror::Error;

#[derive(Debug, Error)]
pub enum CpuError {
    #[error("Function not found: {0}")]
    FunctionNotFound(String),
    #[error("Unable to allocate {0} bytes")]
    AllocationFailed(usize),
}
