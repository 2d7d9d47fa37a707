//! CUDA-accelerated volumetric preprocessing for medical-scan inference.
//!
//! Converts a raw 3D scan (voxel intensities + spatial metadata) into the
//! normalized, resampled tensor an inference engine consumes, reproducing
//! the reference preprocessing pipeline to tight numerical tolerance.
//!
//! # Architecture
//!
//! Four pure stages compose linearly; each returns a new [`VolumeBuffer`]:
//! - Transpose: reorder the spatial axes per the plan's permutation
//! - Crop: extract the bounding box of non-background voxels
//! - Normalize: percentile clip + z-score with dataset statistics
//! - Resample: cubic interpolation to the target spacing, with an
//!   anisotropy-triggered separate-axis mode
//!
//! Normalize and resample have GPU twins (CUDA, behind the `cuda`
//! feature) that must agree with the CPU reference within documented
//! tolerances; the kernel module resolves through an ordered fallback
//! chain and degrades to the CPU path when no device or kernel is
//! available.
//!
//! # Usage
//!
//! ```ignore
//! use prep_cuda::{PreprocessPlan, VolumeBuffer};
//!
//! // Parameters come from the training-side planning documents.
//! let plan = PreprocessPlan::from_files(plans, fingerprint, "3d_fullres")?;
//! let preprocessor = plan.preprocessor(/* use_gpu */ true)?;
//!
//! let volume = VolumeBuffer::new(samples, shape, spacing)?;
//! let output = preprocessor.run(&volume)?;
//! // output.volume -> inference engine
//! // output.crop_bbox + output.inverse_transpose_axes -> inverse mapping
//! ```

pub mod config;
pub mod crop;
pub mod error;
pub mod fixtures;
#[cfg(feature = "cuda")]
pub mod module_loader;
pub mod normalize;
pub mod pipeline;
pub mod resample;
#[cfg(feature = "cuda")]
pub mod runtime;
pub mod test_utils;
pub mod timing;
pub mod transpose;
pub mod volume;

pub use config::PreprocessPlan;
pub use crop::crop_to_nonzero;
pub use error::{AcceleratorError, PrepError};
pub use normalize::{normalize, CtNormalization};
pub use pipeline::{
    PreprocessOutput, Preprocessor, PreprocessorBuilder, PreprocessorConfig,
};
pub use resample::{resample, ResampleConfig, DEFAULT_ANISOTROPY_THRESHOLD};
pub use timing::PreprocessTiming;
pub use transpose::{inverse_permutation, transpose};
pub use volume::{BoundingBox, VolumeBuffer};

#[cfg(feature = "cuda")]
pub use module_loader::KernelSource;
#[cfg(feature = "cuda")]
pub use runtime::{is_cuda_available, GpuRuntime, PendingVolume};
