use common::HostFeature;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MicroVuError {
    #[error("microVU{index} Error: Failed to allocate recompiler memory! ({size} bytes)")]
    OutOfMemory { index: usize, size: usize },

    #[error("microVU{index} recompiler init failed: {extension} is not available. \
             microVU requires a host CPU with MMX, SSE, and SSE2 extensions.")]
    HardwareDeficiency { index: usize, extension: HostFeature },

    #[error("code cache overflow: {requested} bytes requested, {available} available")]
    CodeCacheOverflow { requested: usize, available: usize },

    #[error("microcode image is {actual} bytes, expected {expected}")]
    ImageSize { expected: usize, actual: usize },

    #[error("invalid microVU configuration: {0}")]
    InvalidConfig(String),

    #[error("translator failed: {0}")]
    Translator(String),
}

impl MicroVuError {
    /// True for errors that leave the owning instance unusable for the session
    pub fn is_fatal(&self) -> bool {
        matches!(self,
            MicroVuError::OutOfMemory { .. } |
            MicroVuError::HardwareDeficiency { .. } |
            MicroVuError::InvalidConfig(_)
        )
    }
}
