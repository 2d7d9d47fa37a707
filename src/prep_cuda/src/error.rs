//! Error types for the preprocessing pipeline.
//!
//! Two layers, matching how callers react:
//! - [`PrepError`]: configuration and stage-entry errors. These are caller
//!   mistakes and are surfaced immediately, never clamped or repaired.
//! - [`AcceleratorError`]: GPU resource and execution errors. An
//!   `Unavailable` or `ModuleLoad` error means "use the CPU path"; an
//!   `Execution` error is a failed dispatch and is never retried.

use thiserror::Error;

/// Errors surfaced by pipeline stages and configuration validation.
#[derive(Debug, Error)]
pub enum PrepError {
    /// Axis permutation is not a bijection on {0, 1, 2}.
    #[error("invalid axis permutation {0:?}: must be a permutation of [0, 1, 2]")]
    InvalidPermutation([usize; 3]),

    /// A spacing component is zero, negative, or non-finite.
    #[error("spacing must be strictly positive, got {0:?}")]
    NonPositiveSpacing([f32; 3]),

    /// A shape component is zero.
    #[error("shape must be strictly positive, got {0:?}")]
    NonPositiveShape([usize; 3]),

    /// Sample buffer length does not match the declared shape.
    #[error("sample count {samples} does not match shape {shape:?} ({expected} voxels)")]
    ShapeMismatch {
        samples: usize,
        shape: [usize; 3],
        expected: usize,
    },

    /// Normalization clip bounds are inverted.
    #[error("normalization bounds are inverted: lower {lower} > upper {upper}")]
    InvalidBounds { lower: f32, upper: f32 },

    /// Unsupported interpolation order.
    #[error("unsupported interpolation order {0}")]
    UnsupportedOrder(u8),

    /// A GPU dispatch failed; see [`AcceleratorError`].
    #[error(transparent)]
    Accelerator(#[from] AcceleratorError),
}

/// Errors from the GPU accelerator.
///
/// `Unavailable` and `ModuleLoad` are resource errors: the correct response
/// is to fall back to the CPU path. `Execution` is a device-level failure
/// carried through from a submitted dispatch.
#[derive(Debug, Error)]
pub enum AcceleratorError {
    /// No usable CUDA device, or the operation is not supported on the GPU.
    #[error("accelerator unavailable: {0}")]
    Unavailable(String),

    /// Every kernel-source fallback in the loader chain failed.
    #[error("kernel module load failed: {0}")]
    ModuleLoad(String),

    /// A submitted dispatch failed on the device.
    #[error("device execution failed: {0}")]
    Execution(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accelerator_error_converts_to_prep_error() {
        let err: PrepError = AcceleratorError::Unavailable("no device".into()).into();
        assert!(matches!(
            err,
            PrepError::Accelerator(AcceleratorError::Unavailable(_))
        ));
    }

    #[test]
    fn test_error_messages_name_the_offending_values() {
        let err = PrepError::InvalidPermutation([0, 0, 2]);
        assert!(err.to_string().contains("[0, 0, 2]"));

        let err = PrepError::InvalidBounds {
            lower: 10.0,
            upper: -10.0,
        };
        assert!(err.to_string().contains("10"));
    }
}
