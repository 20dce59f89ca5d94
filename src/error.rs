use std::fmt::{Display, Formatter};

use ash::vk;

use crate::hmd::config::ConfigError;
use crate::render::shaders::ShaderError;
use crate::vk::allocator::AllocationError;

pub type Result<T, E = CompositorError> = std::result::Result<T, E>;

#[derive(Debug)]
pub enum CompositorError {
    /// A device level call failed.
    Gpu(vk::Result),

    /// A queue submission failed.
    FailedToSubmit(vk::Result),

    /// A write was larger than the allocation backing a buffer.
    OutOfDeviceMemory,
    Allocation(AllocationError),
    Shader(ShaderError),
    Configuration(ConfigError),

    /// The call was made on a destroyed or unpaired object or with an out of range index.
    InvalidState(&'static str),

    /// The native swapchain has no image to hand out (or no slot to take one back).
    NoImageAvailable,
    Timeout,
    Unsupported(&'static str),
}

impl CompositorError {
    pub fn is_submission(&self) -> bool {
        matches!(self, CompositorError::FailedToSubmit(_))
    }

    /// Helper used for contract violations. Asserts in debug builds and returns the error otherwise.
    pub(crate) fn invalid_state(what: &'static str) -> Self {
        debug_assert!(false, "Invalid state: {}", what);
        CompositorError::InvalidState(what)
    }
}

impl Display for CompositorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CompositorError::Gpu(err) => write!(f, "gpu error: {:?}", err),
            CompositorError::FailedToSubmit(err) => write!(f, "failed to submit to queue: {:?}", err),
            CompositorError::OutOfDeviceMemory => write!(f, "out of device memory"),
            CompositorError::Allocation(err) => write!(f, "allocation error: {:?}", err),
            CompositorError::Shader(err) => write!(f, "shader error: {:?}", err),
            CompositorError::Configuration(err) => write!(f, "configuration error: {}", err),
            CompositorError::InvalidState(what) => write!(f, "invalid state: {}", what),
            CompositorError::NoImageAvailable => write!(f, "no image available"),
            CompositorError::Timeout => write!(f, "timeout"),
            CompositorError::Unsupported(what) => write!(f, "unsupported: {}", what),
        }
    }
}

impl std::error::Error for CompositorError {
}

impl From<vk::Result> for CompositorError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::TIMEOUT => CompositorError::Timeout,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => CompositorError::OutOfDeviceMemory,
            other => CompositorError::Gpu(other),
        }
    }
}

impl From<AllocationError> for CompositorError {
    fn from(err: AllocationError) -> Self {
        CompositorError::Allocation(err)
    }
}

impl From<ShaderError> for CompositorError {
    fn from(err: ShaderError) -> Self {
        CompositorError::Shader(err)
    }
}

impl From<ConfigError> for CompositorError {
    fn from(err: ConfigError) -> Self {
        CompositorError::Configuration(err)
    }
}
